//! Scripted in-memory backend for tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::backend::{Backend, BackendError, RemoteWrite, Row, Select};

#[derive(Default)]
struct MockState {
    writes: Vec<RemoteWrite>,
    selects: Vec<Select>,
    /// Consumed one per write; `None` entries succeed
    write_script: VecDeque<Option<BackendError>>,
    /// Returned for every write once the script is exhausted
    write_error: Option<BackendError>,
    select_error: Option<BackendError>,
    select_delay: Option<Duration>,
    session_error: Option<BackendError>,
    rows: HashMap<String, Vec<Row>>,
}

/// Records every request and answers from scripted state.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes that reached the backend, including failed ones.
    pub fn writes(&self) -> Vec<RemoteWrite> {
        self.state().writes.clone()
    }

    pub fn selects(&self) -> Vec<Select> {
        self.state().selects.clone()
    }

    pub fn select_count(&self) -> usize {
        self.state().selects.len()
    }

    /// Outcomes for the next writes, in order.
    pub fn script_writes(&self, outcomes: impl IntoIterator<Item = Option<BackendError>>) {
        self.state().write_script.extend(outcomes);
    }

    /// Fail every write not covered by a script.
    pub fn set_write_error(&self, error: Option<BackendError>) {
        self.state().write_error = error;
    }

    pub fn set_select_error(&self, error: Option<BackendError>) {
        self.state().select_error = error;
    }

    /// Stall every select, e.g. to keep a schema probe in flight.
    pub fn set_select_delay(&self, delay: Option<Duration>) {
        self.state().select_delay = delay;
    }

    pub fn set_session_error(&self, error: Option<BackendError>) {
        self.state().session_error = error;
    }

    /// Rows returned for reads of `table`.
    pub fn set_rows(&self, table: &str, rows: Vec<Row>) {
        self.state().rows.insert(table.to_string(), rows);
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn select(&self, query: &Select) -> Result<Vec<Row>, BackendError> {
        let delay = {
            let mut state = self.state();
            state.selects.push(query.clone());
            state.select_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state();
        match &state.select_error {
            Some(err) => Err(err.clone()),
            None => Ok(state.rows.get(&query.table).cloned().unwrap_or_default()),
        }
    }

    async fn execute(&self, write: &RemoteWrite) -> Result<(), BackendError> {
        let mut state = self.state();
        state.writes.push(write.clone());
        let outcome = match state.write_script.pop_front() {
            Some(scripted) => scripted,
            None => state.write_error.clone(),
        };
        match outcome {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn check_session(&self) -> Result<(), BackendError> {
        match &self.state().session_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}
