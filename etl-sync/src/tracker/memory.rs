use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::EtlResult;
use crate::tracker::{FileState, FileStateStore};

/// In-memory [`FileStateStore`] for tests and dry runs.
///
/// States are lost when the store is dropped.
#[derive(Debug, Clone, Default)]
pub struct MemoryFileStateStore {
    inner: Arc<Mutex<HashMap<(String, String), FileState>>>,
}

impl MemoryFileStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all stored states of `etl_name`, ordered by path.
    pub async fn file_states(&self, etl_name: &str) -> Vec<FileState> {
        let inner = self.inner.lock().await;

        let mut states: Vec<FileState> = inner
            .values()
            .filter(|state| state.etl_name == etl_name)
            .cloned()
            .collect();
        states.sort_by(|a, b| a.file_path.cmp(&b.file_path));

        states
    }
}

impl FileStateStore for MemoryFileStateStore {
    async fn get_file_state(&self, etl_name: &str, file_path: &str) -> EtlResult<Option<FileState>> {
        let inner = self.inner.lock().await;

        Ok(inner
            .get(&(etl_name.to_string(), file_path.to_string()))
            .cloned())
    }

    async fn upsert_file_state(&self, state: FileState) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;
        inner.insert((state.etl_name.clone(), state.file_path.clone()), state);

        Ok(())
    }

    async fn purge_file_states(&self, etl_name: &str) -> EtlResult<u64> {
        let mut inner = self.inner.lock().await;

        let before = inner.len();
        inner.retain(|(name, _), _| name != etl_name);

        Ok((before - inner.len()) as u64)
    }
}
