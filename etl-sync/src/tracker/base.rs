use std::future::Future;
use std::path::Path;

use chrono::{DateTime, Utc};
use etl_postgres::sqlx::file_state::FileStateRow;

use crate::error::EtlResult;

/// Last processed metadata of a source file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileState {
    pub etl_name: String,
    /// Normalized absolute path.
    pub file_path: String,
    /// Modification time in seconds since the Unix epoch.
    pub mtime: f64,
    pub size: i64,
    pub processed_time: DateTime<Utc>,
}

impl From<FileStateRow> for FileState {
    fn from(row: FileStateRow) -> Self {
        Self {
            etl_name: row.etl_name,
            file_path: row.file_path,
            mtime: row.file_mtime,
            size: row.file_size,
            processed_time: row.processed_time,
        }
    }
}

impl From<FileState> for FileStateRow {
    fn from(state: FileState) -> Self {
        Self {
            etl_name: state.etl_name,
            file_path: state.file_path,
            file_mtime: state.mtime,
            file_size: state.size,
            processed_time: state.processed_time,
        }
    }
}

/// Current on-disk metadata of a file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileStat {
    pub mtime: f64,
    pub size: i64,
}

/// Persistence of [`FileState`]s, at most one per `(etl_name, file_path)`.
pub trait FileStateStore {
    fn get_file_state(
        &self,
        etl_name: &str,
        file_path: &str,
    ) -> impl Future<Output = EtlResult<Option<FileState>>> + Send;

    /// Inserts the state or replaces the existing one for the same file.
    fn upsert_file_state(&self, state: FileState) -> impl Future<Output = EtlResult<()>> + Send;

    /// Removes every state of `etl_name` and returns how many were removed.
    fn purge_file_states(&self, etl_name: &str) -> impl Future<Output = EtlResult<u64>> + Send;
}

/// Reads file metadata.
pub trait FileStatProvider {
    fn stat(&self, path: &Path) -> impl Future<Output = EtlResult<FileStat>> + Send;
}
