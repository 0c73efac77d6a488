use etl_postgres::sqlx::file_state;
use sqlx::PgPool;

use crate::error::EtlResult;
use crate::tracker::{FileState, FileStateStore};

/// [`FileStateStore`] backed by the `etl.file_state` table.
///
/// The table is created by [`crate::migrations::apply_etl_migrations`].
#[derive(Debug, Clone)]
pub struct PostgresFileStateStore {
    pool: PgPool,
}

impl PostgresFileStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns all stored states of `etl_name`, ordered by path.
    pub async fn file_states(&self, etl_name: &str) -> EtlResult<Vec<FileState>> {
        let rows = file_state::get_file_states(&self.pool, etl_name).await?;

        Ok(rows.into_iter().map(FileState::from).collect())
    }
}

impl FileStateStore for PostgresFileStateStore {
    async fn get_file_state(&self, etl_name: &str, file_path: &str) -> EtlResult<Option<FileState>> {
        let row = file_state::get_file_state(&self.pool, etl_name, file_path).await?;

        Ok(row.map(FileState::from))
    }

    async fn upsert_file_state(&self, state: FileState) -> EtlResult<()> {
        file_state::upsert_file_state(&self.pool, &state.into()).await?;

        Ok(())
    }

    async fn purge_file_states(&self, etl_name: &str) -> EtlResult<u64> {
        let deleted = file_state::delete_file_states(&self.pool, etl_name).await?;

        Ok(deleted)
    }
}
