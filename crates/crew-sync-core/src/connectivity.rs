use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Shared "is this device online" signal fed by platform connectivity events.
///
/// Going offline never cancels an in-flight call; it only decides whether new
/// writes are attempted live or queued directly.
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Record a connectivity change. Returns whether the state changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!("Connectivity changed: {}", if online { "online" } else { "offline" });
        }
        changed
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
