use std::sync::Arc;

use etl_postgres::sqlx::columns::{get_table_columns, table_exists};
use etl_postgres::types::{ColumnInfo, TableName, quote_column, truncate_identifier};
use sqlx::PgPool;
use tracing::{info, warn};

use crate::error::EtlResult;
use crate::schema::{ColumnTypeCache, StorageType, infer_column_type};
use crate::types::Batch;

/// Name of the surrogate key added to bootstrapped tables.
pub const SURROGATE_KEY_COLUMN: &str = "id";

/// Type of the hash column in bootstrapped tables, sized for a hex SHA-256 digest.
const HASH_COLUMN_TYPE: &str = "varchar(64)";

/// Adds columns to target tables as exports grow new fields.
///
/// Columns are only ever added. Existing columns are never dropped, renamed or retyped.
#[derive(Debug, Clone)]
pub struct SchemaEvolver {
    pool: PgPool,
    cache: ColumnTypeCache,
}

impl SchemaEvolver {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            cache: ColumnTypeCache::new(),
        }
    }

    /// Returns the columns of `table`, from the cache when possible.
    ///
    /// An absent table has no columns.
    pub async fn table_columns(&self, table: &TableName) -> EtlResult<Arc<Vec<ColumnInfo>>> {
        if let Some(columns) = self.cache.get(table).await {
            return Ok(columns);
        }

        let columns = get_table_columns(&self.pool, table).await?;
        if columns.is_empty() {
            // Not cached, the table may be created later on.
            return Ok(Arc::new(columns));
        }

        Ok(self.cache.insert(table.clone(), columns).await)
    }

    /// Drops the cached columns of `table`.
    pub async fn invalidate(&self, table: &TableName) {
        self.cache.invalidate(table).await;
    }

    /// Creates `table` from the shape of `batch` unless it already exists.
    ///
    /// Returns whether the table was created.
    pub async fn create_table_if_missing(
        &self,
        table: &TableName,
        batch: &Batch,
        hash_column: &str,
        text_columns: &[String],
    ) -> EtlResult<bool> {
        if table_exists(&self.pool, table).await? {
            return Ok(false);
        }

        let mut columns: Vec<(String, StorageType)> = Vec::with_capacity(batch.columns().len());
        for column in batch.columns() {
            let stored = truncate_identifier(column);
            if stored == hash_column {
                continue;
            }
            if columns.iter().any(|(name, _)| name == stored) {
                warn!(
                    %table,
                    column,
                    stored,
                    "column name collides with another once truncated, values are skipped"
                );
                continue;
            }

            columns.push((
                stored.to_string(),
                infer_column_type(batch, column, text_columns),
            ));
        }

        sqlx::query(&build_create_schema_sql(&table.schema))
            .execute(&self.pool)
            .await?;
        sqlx::query(&build_create_table_sql(table, hash_column, &columns))
            .execute(&self.pool)
            .await?;
        self.invalidate(table).await;

        info!(%table, columns = columns.len() + 1, "created target table");

        Ok(true)
    }

    /// Adds every batch column that `table` lacks, typed by inference over the batch.
    ///
    /// Batch names are matched the way Postgres stores them, so a name longer than the
    /// identifier limit matches its truncated column. A column that cannot be added is
    /// logged and skipped. Returns the added columns under their stored names.
    pub async fn ensure_columns(
        &self,
        table: &TableName,
        batch: &Batch,
        text_columns: &[String],
    ) -> EtlResult<Vec<String>> {
        let existing = self.table_columns(table).await?;

        let mut added: Vec<String> = Vec::new();
        for column in batch.columns() {
            let stored = truncate_identifier(column);
            if existing.iter().any(|info| info.column_name == stored)
                || added.iter().any(|name| name == stored)
            {
                continue;
            }

            let storage_type = infer_column_type(batch, column, text_columns);
            let sql = build_add_column_sql(table, stored, storage_type.sql_type());

            match sqlx::query(&sql).execute(&self.pool).await {
                Ok(_) => {
                    info!(
                        %table,
                        column = stored,
                        sql_type = storage_type.sql_type(),
                        "added column"
                    );
                    added.push(stored.to_string());
                }
                Err(err) => {
                    warn!(%table, column, error = %err, "failed to add column, values are skipped");
                }
            }
        }

        if !added.is_empty() {
            self.invalidate(table).await;
        }

        Ok(added)
    }
}

pub(crate) fn build_create_schema_sql(schema: &str) -> String {
    format!("create schema if not exists {}", quote_column(schema))
}

/// Builds the DDL of a bootstrapped target table.
///
/// The surrogate key is left out when the data already has a column of that name.
pub(crate) fn build_create_table_sql(
    table: &TableName,
    hash_column: &str,
    columns: &[(String, StorageType)],
) -> String {
    let mut definitions = Vec::with_capacity(columns.len() + 2);

    if !columns.iter().any(|(name, _)| name == SURROGATE_KEY_COLUMN) {
        definitions.push(format!(
            "{} bigint generated always as identity primary key",
            quote_column(SURROGATE_KEY_COLUMN)
        ));
    }

    definitions.push(format!("{} {HASH_COLUMN_TYPE}", quote_column(hash_column)));
    for (name, storage_type) in columns {
        definitions.push(format!("{} {}", quote_column(name), storage_type.sql_type()));
    }

    format!(
        "create table if not exists {} ({})",
        table.as_quoted_identifier(),
        definitions.join(", ")
    )
}

pub(crate) fn build_add_column_sql(table: &TableName, column: &str, sql_type: &str) -> String {
    format!(
        "alter table {} add column if not exists {} {sql_type}",
        table.as_quoted_identifier(),
        quote_column(column)
    )
}
