//! Re-read authoritative collections when the backend reports a change.
//!
//! Change notices only say "something changed in this table". Their payload
//! is never applied; the whole collection is fetched again and republished.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::access::AccessContext;
use crate::backend::Row;
use crate::engine::SyncEngine;
use crate::families::{family_for_table, EntityFamily, ALL_FAMILIES};

/// Notification from the external change feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotice {
    pub table: String,
}

impl ChangeNotice {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }
}

pub type Collection = Arc<Vec<Row>>;

/// Latest authoritative rows per family.
#[derive(Debug)]
pub struct CollectionHub {
    channels: HashMap<&'static str, watch::Sender<Collection>>,
}

impl Default for CollectionHub {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectionHub {
    pub fn new() -> Self {
        let channels = ALL_FAMILIES
            .iter()
            .map(|family| {
                let (tx, _rx) = watch::channel(Arc::new(Vec::new()));
                (family.table, tx)
            })
            .collect();
        Self { channels }
    }

    pub fn subscribe(&self, family: &EntityFamily) -> Option<watch::Receiver<Collection>> {
        self.channels.get(family.table).map(watch::Sender::subscribe)
    }

    pub fn current(&self, family: &EntityFamily) -> Collection {
        self.channels
            .get(family.table)
            .map(|tx| Arc::clone(&tx.borrow()))
            .unwrap_or_default()
    }

    /// Replace the collection for `family`. An empty list is authoritative too.
    pub fn publish(&self, family: &EntityFamily, rows: Vec<Row>) {
        if let Some(tx) = self.channels.get(family.table) {
            tx.send_replace(Arc::new(rows));
        }
    }
}

pub struct LiveRefresh {
    engine: Arc<SyncEngine>,
    hub: Arc<CollectionHub>,
    access: watch::Receiver<AccessContext>,
}

impl LiveRefresh {
    /// `access` follows the current context, typically from
    /// [`crate::access::AccessBoundary::subscribe`].
    pub fn new(
        engine: Arc<SyncEngine>,
        hub: Arc<CollectionHub>,
        access: watch::Receiver<AccessContext>,
    ) -> Self {
        Self {
            engine,
            hub,
            access,
        }
    }

    pub fn hub(&self) -> &Arc<CollectionHub> {
        &self.hub
    }

    /// Re-read `family` and publish it. Returns whether anything was
    /// published; an ineligible or failed read keeps the previous state.
    pub async fn refresh(&self, family: &EntityFamily) -> bool {
        let access = self.access.borrow().clone();
        match self.engine.fetch(&access, family).await {
            Some(rows) => {
                debug!("Refreshed {} ({} rows)", family.table, rows.len());
                self.hub.publish(family, rows);
                true
            }
            None => false,
        }
    }

    pub async fn refresh_all(&self) -> usize {
        let mut refreshed = 0;
        for family in ALL_FAMILIES {
            if self.refresh(family).await {
                refreshed += 1;
            }
        }
        refreshed
    }

    /// Consume change notices until the sender side closes.
    pub async fn run(&self, mut notices: mpsc::Receiver<ChangeNotice>) {
        info!("Live refresh listening for change notices");
        while let Some(notice) = notices.recv().await {
            match family_for_table(&notice.table) {
                Some(family) => {
                    self.refresh(family).await;
                }
                None => debug!("Ignoring change notice for {}", notice.table),
            }
        }
        info!("Change notice feed closed");
    }
}
