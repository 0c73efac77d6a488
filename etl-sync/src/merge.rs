//! Hash based merges of batches into append-only target tables.
//!
//! A merge loads the batch into a per-table staging table and copies over only the rows
//! whose hash the target does not contain yet:
//!
//! 1. the target is created if missing and grows the columns the batch brings;
//! 2. the staging table `<prefix><table>` mirrors the target's non-identity columns;
//! 3. staging is truncated and loaded with the batch through the [`BatchLoader`];
//! 4. an anti-join `insert .. select` copies unseen hashes into the target;
//! 5. staging is truncated again, also when an earlier step failed.
//!
//! Re-running a merge with the same batch therefore inserts nothing.

use std::collections::{HashMap, HashSet};
use std::future::Future;

use etl_config::shared::{LoaderConfig, MergeConfig};
use etl_postgres::types::{ColumnInfo, TableName, quote_column, truncate_identifier};
use sqlx::PgPool;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::hashing::dedup_keep_last;
use crate::loader::{BatchLoader, reject_identity_values};
use crate::schema::{SchemaEvolver, build_add_column_sql};
use crate::types::Batch;

/// Hash column types that cannot back a btree index.
const NON_INDEXABLE_TYPES: &[&str] = &["json", "xml"];

/// Outcome of one merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Rows added to the target.
    pub inserted: u64,
    /// Rows written to staging.
    pub staged: u64,
    /// Rows the loader skipped because staging rejected them.
    pub failed_rows: u64,
    /// Rows dropped because a later row of the batch had the same hash.
    pub duplicates_dropped: usize,
    /// Columns added to the target for this batch.
    pub columns_added: Vec<String>,
}

/// Merges a hashed batch into a table, inserting only unseen hashes.
pub trait MergeTarget {
    fn merge_by_hash(
        &self,
        table: &TableName,
        batch: Batch,
        hash_column: &str,
        text_columns: &[String],
    ) -> impl Future<Output = EtlResult<MergeReport>> + Send;
}

/// Contents of a staging table as far as this engine knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StagingState {
    /// Not created by this engine yet.
    #[default]
    Absent,
    Empty,
    Loaded,
}

#[derive(Debug, Default)]
struct TableState {
    staging: StagingState,
    hash_indexed: bool,
}

/// [`MergeTarget`] writing into Postgres.
#[derive(Debug)]
pub struct MergeEngine {
    pool: PgPool,
    loader: BatchLoader,
    evolver: SchemaEvolver,
    config: MergeConfig,
    tables: Mutex<HashMap<TableName, TableState>>,
}

impl MergeEngine {
    pub fn new(pool: PgPool, loader_config: LoaderConfig, config: MergeConfig) -> Self {
        Self {
            loader: BatchLoader::new(pool.clone(), loader_config),
            evolver: SchemaEvolver::new(pool.clone()),
            pool,
            config,
            tables: Mutex::new(HashMap::new()),
        }
    }

    pub fn evolver(&self) -> &SchemaEvolver {
        &self.evolver
    }

    /// Returns the staging table used for `table`.
    pub fn staging_table(&self, table: &TableName) -> TableName {
        table.with_prefix(&self.config.staging_prefix)
    }

    pub async fn staging_state(&self, staging: &TableName) -> StagingState {
        let tables = self.tables.lock().await;
        tables
            .get(staging)
            .map(|state| state.staging)
            .unwrap_or_default()
    }

    async fn set_staging_state(&self, staging: &TableName, state: StagingState) {
        let mut tables = self.tables.lock().await;
        tables.entry(staging.clone()).or_default().staging = state;
    }

    async fn merge_inner(
        &self,
        table: &TableName,
        staging: &TableName,
        batch: &Batch,
        hash_column: &str,
        text_columns: &[String],
    ) -> EtlResult<MergeReport> {
        let mut report = MergeReport::default();

        self.evolver
            .create_table_if_missing(table, batch, hash_column, text_columns)
            .await?;
        report.columns_added = self
            .evolver
            .ensure_columns(table, batch, text_columns)
            .await?;

        let target_columns = self.evolver.table_columns(table).await?;
        let Some(hash_info) = target_columns
            .iter()
            .find(|column| column.column_name == hash_column)
        else {
            bail!(
                ErrorKind::DestinationSchemaError,
                "Target table has no hash column",
                format!("table `{table}`, hash column `{hash_column}`")
            );
        };
        reject_identity_values(table, batch, &target_columns)?;
        self.ensure_hash_index(table, hash_info).await;

        let staging_columns = self.ensure_staging(table, staging, &target_columns).await?;

        sqlx::query(&build_truncate_sql(staging))
            .execute(&self.pool)
            .await?;
        self.set_staging_state(staging, StagingState::Empty).await;

        let load = self
            .loader
            .insert_rows(staging, batch, &staging_columns)
            .await?;
        self.set_staging_state(staging, StagingState::Loaded).await;
        report.staged = load.inserted;
        report.failed_rows = load.failed;

        let batch_columns: HashSet<&str> = batch
            .columns()
            .iter()
            .map(|column| truncate_identifier(column))
            .collect();
        let columns: Vec<&str> = target_columns
            .iter()
            .filter(|column| {
                !column.is_identity && batch_columns.contains(column.column_name.as_str())
            })
            .map(|column| column.column_name.as_str())
            .collect();

        let result = sqlx::query(&build_merge_sql(table, staging, &columns, hash_column))
            .execute(&self.pool)
            .await?;
        report.inserted = result.rows_affected();

        Ok(report)
    }

    /// Creates the staging table of `table` and adds any target column it lacks.
    ///
    /// Returns the staging columns.
    async fn ensure_staging(
        &self,
        table: &TableName,
        staging: &TableName,
        target_columns: &[ColumnInfo],
    ) -> EtlResult<Vec<ColumnInfo>> {
        let mirrored: Vec<&ColumnInfo> = target_columns
            .iter()
            .filter(|column| !column.is_identity)
            .collect();

        if self.staging_state(staging).await == StagingState::Absent {
            let names: Vec<&str> = mirrored
                .iter()
                .map(|column| column.column_name.as_str())
                .collect();
            sqlx::query(&build_create_staging_sql(table, staging, &names))
                .execute(&self.pool)
                .await?;
            self.evolver.invalidate(staging).await;
            self.set_staging_state(staging, StagingState::Empty).await;

            debug!(%table, %staging, "ensured staging table");
        }

        let existing = self.evolver.table_columns(staging).await?;
        let missing: Vec<&ColumnInfo> = mirrored
            .iter()
            .copied()
            .filter(|column| {
                !existing
                    .iter()
                    .any(|staged| staged.column_name == column.column_name)
            })
            .collect();

        if missing.is_empty() {
            return Ok(existing.to_vec());
        }

        for column in missing {
            let sql = build_add_column_sql(staging, &column.column_name, &column.sql_type());
            sqlx::query(&sql).execute(&self.pool).await?;
            debug!(%staging, column = %column.column_name, "added column to staging table");
        }
        self.evolver.invalidate(staging).await;

        Ok(self.evolver.table_columns(staging).await?.to_vec())
    }

    /// Indexes the target hash column once per engine. Failures only cost performance.
    async fn ensure_hash_index(&self, table: &TableName, hash_column: &ColumnInfo) {
        {
            let tables = self.tables.lock().await;
            if tables.get(table).is_some_and(|state| state.hash_indexed) {
                return;
            }
        }

        if NON_INDEXABLE_TYPES.contains(&hash_column.data_type.as_str()) {
            debug!(%table, column = %hash_column.column_name, "hash column type cannot be indexed");
        } else {
            let sql = build_create_index_sql(table, &hash_column.column_name);
            if let Err(err) = sqlx::query(&sql).execute(&self.pool).await {
                warn!(%table, column = %hash_column.column_name, error = %err, "failed to index hash column");
            }
        }

        let mut tables = self.tables.lock().await;
        tables.entry(table.clone()).or_default().hash_indexed = true;
    }

    /// Empties staging after a merge. Failures are logged.
    async fn clear_staging(&self, staging: &TableName) {
        if self.staging_state(staging).await == StagingState::Absent {
            return;
        }

        match sqlx::query(&build_truncate_sql(staging))
            .execute(&self.pool)
            .await
        {
            Ok(_) => self.set_staging_state(staging, StagingState::Empty).await,
            Err(err) => {
                warn!(%staging, error = %err, "failed to truncate staging table");
            }
        }
    }
}

impl MergeTarget for MergeEngine {
    async fn merge_by_hash(
        &self,
        table: &TableName,
        mut batch: Batch,
        hash_column: &str,
        text_columns: &[String],
    ) -> EtlResult<MergeReport> {
        if batch.is_empty() {
            return Ok(MergeReport::default());
        }

        validate_hash_column(&batch, hash_column)?;
        let duplicates_dropped = dedup_keep_last(&mut batch, hash_column)?;

        let staging = self.staging_table(table);
        let result = self
            .merge_inner(table, &staging, &batch, hash_column, text_columns)
            .await;
        self.clear_staging(&staging).await;

        let mut report = result?;
        report.duplicates_dropped = duplicates_dropped;

        info!(
            %table,
            rows = batch.len(),
            inserted = report.inserted,
            failed_rows = report.failed_rows,
            duplicates_dropped,
            columns_added = report.columns_added.len(),
            "merged batch"
        );

        Ok(report)
    }
}

/// Checks that every row carries a hash.
pub fn validate_hash_column(batch: &Batch, hash_column: &str) -> EtlResult<()> {
    let Some(mut hashes) = batch.column_values(hash_column) else {
        bail!(
            ErrorKind::InvalidBatch,
            "Hash column is missing from the batch",
            format!("column `{hash_column}`")
        );
    };

    if let Some(row) = hashes.position(|hash| hash.is_missing()) {
        bail!(
            ErrorKind::InvalidBatch,
            "Batch contains rows without a hash",
            format!("column `{hash_column}`, first row {row}")
        );
    }

    Ok(())
}

fn column_list(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|column| quote_column(column))
        .collect::<Vec<_>>()
        .join(", ")
}

fn build_create_staging_sql(target: &TableName, staging: &TableName, columns: &[&str]) -> String {
    format!(
        "create unlogged table if not exists {} as select {} from {} with no data",
        staging.as_quoted_identifier(),
        column_list(columns),
        target.as_quoted_identifier()
    )
}

fn build_truncate_sql(staging: &TableName) -> String {
    format!("truncate table {}", staging.as_quoted_identifier())
}

fn build_merge_sql(
    target: &TableName,
    staging: &TableName,
    columns: &[&str],
    hash_column: &str,
) -> String {
    let hash = quote_column(hash_column);
    let selected = columns
        .iter()
        .map(|column| format!("s.{}", quote_column(column)))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "insert into {target} ({columns}) \
         select {selected} \
         from {staging} s \
         where s.{hash} is not null \
         and not exists (select 1 from {target} t where t.{hash} = s.{hash})",
        target = target.as_quoted_identifier(),
        columns = column_list(columns),
        staging = staging.as_quoted_identifier(),
    )
}

/// Name of the hash index, cut to the identifier limit.
fn hash_index_name(table: &TableName, hash_column: &str) -> String {
    truncate_identifier(&format!("idx_{}_{}", table.name, hash_column)).to_string()
}

fn build_create_index_sql(table: &TableName, hash_column: &str) -> String {
    format!(
        "create index if not exists {} on {} ({})",
        quote_column(&hash_index_name(table, hash_column)),
        table.as_quoted_identifier(),
        quote_column(hash_column)
    )
}

#[cfg(test)]
mod tests {
    use etl_postgres::types::MAX_IDENTIFIER_LENGTH;

    use super::*;
    use crate::types::{Cell, DataRecord};

    fn sfc() -> TableName {
        TableName::new("mes", "sfc")
    }

    #[test]
    fn merge_inserts_only_unseen_hashes() {
        let sql = build_merge_sql(
            &sfc(),
            &sfc().with_prefix("_stg_"),
            &["record_hash", "lot"],
            "record_hash",
        );

        assert_eq!(
            sql,
            "insert into mes.sfc (record_hash, lot) \
             select s.record_hash, s.lot \
             from mes._stg_sfc s \
             where s.record_hash is not null \
             and not exists (select 1 from mes.sfc t where t.record_hash = s.record_hash)"
        );
    }

    #[test]
    fn staging_copies_listed_columns_without_rows() {
        assert_eq!(
            build_create_staging_sql(&sfc(), &sfc().with_prefix("_stg_"), &["lot", "Qty"]),
            r#"create unlogged table if not exists mes._stg_sfc as select lot, "Qty" from mes.sfc with no data"#
        );
        assert_eq!(
            build_truncate_sql(&sfc().with_prefix("_stg_")),
            "truncate table mes._stg_sfc"
        );
    }

    #[test]
    fn index_names_fit_identifier_limit() {
        let long = TableName::new("mes", "a".repeat(80));

        assert_eq!(hash_index_name(&sfc(), "record_hash"), "idx_sfc_record_hash");
        assert_eq!(hash_index_name(&long, "record_hash").len(), MAX_IDENTIFIER_LENGTH);
        assert_eq!(
            build_create_index_sql(&sfc(), "record_hash"),
            "create index if not exists idx_sfc_record_hash on mes.sfc (record_hash)"
        );
    }

    #[test]
    fn batches_need_a_hash_in_every_row() {
        let hashed = Batch::from_records([DataRecord::new().with("h", "a").with("v", 1)]);
        let unhashed = Batch::from_records([
            DataRecord::new().with("h", "a"),
            DataRecord::new().with("h", Cell::Null),
        ]);

        assert!(validate_hash_column(&hashed, "h").is_ok());
        assert_eq!(
            validate_hash_column(&hashed, "missing").unwrap_err().kind(),
            ErrorKind::InvalidBatch
        );
        assert_eq!(
            validate_hash_column(&unhashed, "h").unwrap_err().kind(),
            ErrorKind::InvalidBatch
        );
    }
}
