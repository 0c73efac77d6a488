//! Chunked, savepoint protected inserts of a [`Batch`] into an existing table.
//!
//! Rows are coerced to the destination column types and written with multi-row
//! parameterized `insert` statements. A chunk that the database rejects is replayed row
//! by row so that one bad value costs one row instead of the whole chunk.

use std::ops::Range;

use etl_config::shared::LoaderConfig;
use etl_postgres::sqlx::columns::get_table_columns;
use etl_postgres::types::{ColumnInfo, TableName, quote_column, truncate_identifier};
use sqlx::postgres::PgDatabaseError;
use sqlx::query_builder::Separated;
use sqlx::{Connection, PgPool, Postgres, QueryBuilder, Transaction};
use tracing::{debug, info, warn};

use crate::bail;
use crate::conversions::{BindValue, ColumnFamily, coerce};
use crate::error::{ErrorKind, EtlResult};
use crate::types::Batch;

/// Maximum number of bind parameters Postgres accepts in one statement.
const MAX_BIND_PARAMETERS: usize = u16::MAX as usize;

/// Row counts of one [`BatchLoader::insert_batch`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub inserted: u64,
    /// Rows skipped because the database rejected them.
    pub failed: u64,
}

/// Result of writing one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    Inserted(u64),
    /// The chunk was replayed row by row and the listed batch rows were skipped.
    PartialFailure {
        inserted: u64,
        failed_rows: Vec<usize>,
    },
}

/// A batch column matched to a destination column.
#[derive(Debug, Clone, PartialEq)]
struct PlannedColumn {
    name: String,
    batch_index: usize,
    family: ColumnFamily,
    max_length: Option<usize>,
    int_range: Option<(i64, i64)>,
}

impl PlannedColumn {
    fn new(info: &ColumnInfo, batch_index: usize) -> Self {
        let int_range = match info.data_type.as_str() {
            "smallint" => Some((i64::from(i16::MIN), i64::from(i16::MAX))),
            "integer" => Some((i64::from(i32::MIN), i64::from(i32::MAX))),
            _ => None,
        };

        Self {
            name: info.column_name.clone(),
            batch_index,
            family: ColumnFamily::of(info),
            max_length: info
                .character_maximum_length
                .and_then(|length| usize::try_from(length).ok()),
            int_range,
        }
    }
}

/// A value that is known to be rejected by its column.
#[derive(Debug, Clone, PartialEq)]
struct RowProblem {
    /// 1-based position of the parameter in a single row insert.
    parameter: usize,
    column: String,
    value: String,
    reason: &'static str,
}

/// Writes batches into existing tables.
#[derive(Debug, Clone)]
pub struct BatchLoader {
    pool: PgPool,
    config: LoaderConfig,
}

impl BatchLoader {
    pub fn new(pool: PgPool, config: LoaderConfig) -> Self {
        Self { pool, config }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Inserts every row of `batch` into `table`.
    ///
    /// Batch columns the table lacks are skipped with a warning. Values for an identity
    /// column fail the batch. Rows the database rejects are logged and skipped.
    pub async fn insert_batch(&self, table: &TableName, batch: &Batch) -> EtlResult<LoadReport> {
        let columns = get_table_columns(&self.pool, table).await?;
        if columns.is_empty() {
            bail!(
                ErrorKind::DestinationSchemaError,
                "Destination table does not exist",
                format!("table `{table}`")
            );
        }

        self.insert_rows(table, batch, &columns).await
    }

    /// Inserts `batch` into `table` whose columns have already been introspected.
    pub async fn insert_rows(
        &self,
        table: &TableName,
        batch: &Batch,
        columns: &[ColumnInfo],
    ) -> EtlResult<LoadReport> {
        if batch.is_empty() {
            return Ok(LoadReport::default());
        }

        let plan = plan_columns(table, batch, columns)?;
        let chunk_rows = rows_per_chunk(self.config.chunk_size, plan.len());

        let mut report = LoadReport::default();
        let mut tx = self.pool.begin().await?;
        let mut uncommitted = 0;

        let mut start = 0;
        while start < batch.len() {
            let end = (start + chunk_rows).min(batch.len());

            match insert_chunk(&mut tx, table, &plan, batch, start..end).await? {
                ChunkOutcome::Inserted(inserted) => report.inserted += inserted,
                ChunkOutcome::PartialFailure {
                    inserted,
                    failed_rows,
                } => {
                    report.inserted += inserted;
                    report.failed += failed_rows.len() as u64;
                }
            }

            uncommitted += end - start;
            if uncommitted >= self.config.commit_interval {
                tx.commit().await?;
                debug!(%table, rows = uncommitted, "committed loaded rows");

                tx = self.pool.begin().await?;
                uncommitted = 0;
            }

            start = end;
        }

        tx.commit().await?;

        info!(
            %table,
            inserted = report.inserted,
            failed = report.failed,
            columns = plan.len(),
            "loaded batch"
        );

        Ok(report)
    }
}

/// Matches batch columns to insertable table columns.
///
/// Batch names are compared as Postgres stores them, truncated to the identifier limit.
fn plan_columns(
    table: &TableName,
    batch: &Batch,
    columns: &[ColumnInfo],
) -> EtlResult<Vec<PlannedColumn>> {
    reject_identity_values(table, batch, columns)?;

    let mut plan: Vec<PlannedColumn> = Vec::with_capacity(batch.columns().len());
    for (batch_index, name) in batch.columns().iter().enumerate() {
        let stored = truncate_identifier(name);
        match columns.iter().find(|info| info.column_name == stored) {
            Some(info) if info.is_identity => {
                debug!(
                    %table,
                    column = %name,
                    "skipping empty column that maps to an identity column"
                );
            }
            Some(_) if plan.iter().any(|planned| planned.name == stored) => {
                warn!(
                    %table,
                    column = %name,
                    stored,
                    "skipping column whose truncated name is already loaded"
                );
            }
            Some(info) => plan.push(PlannedColumn::new(info, batch_index)),
            None => {
                warn!(%table, column = %name, "skipping column missing from destination table");
            }
        }
    }

    if plan.is_empty() {
        bail!(
            ErrorKind::InvalidBatch,
            "No batch column matches the destination table",
            format!("table `{table}`, batch columns {:?}", batch.columns())
        );
    }

    Ok(plan)
}

/// Fails when the batch carries values for a column the table generates itself.
pub(crate) fn reject_identity_values(
    table: &TableName,
    batch: &Batch,
    columns: &[ColumnInfo],
) -> EtlResult<()> {
    for identity in columns.iter().filter(|info| info.is_identity) {
        let supplied = batch
            .columns()
            .iter()
            .filter(|name| truncate_identifier(name) == identity.column_name)
            .filter_map(|name| batch.column_values(name))
            .any(|mut values| values.any(|value| !value.is_missing()));

        if supplied {
            bail!(
                ErrorKind::DestinationSchemaError,
                "Batch supplies values for an identity column",
                format!(
                    "table `{table}`, column `{}` is generated by the table",
                    identity.column_name
                )
            );
        }
    }

    Ok(())
}

/// Rows per statement so that rows times columns stays within the bind parameter limit.
fn rows_per_chunk(chunk_size: usize, columns: usize) -> usize {
    chunk_size
        .min(MAX_BIND_PARAMETERS / columns.max(1))
        .max(1)
}

fn coerce_rows(plan: &[PlannedColumn], batch: &Batch, rows: Range<usize>) -> Vec<Vec<BindValue>> {
    rows.filter_map(|index| batch.row(index))
        .map(|row| {
            let values = row.values();
            plan.iter()
                .map(|column| coerce(&values[column.batch_index], &column.family))
                .collect()
        })
        .collect()
}

async fn insert_chunk(
    tx: &mut Transaction<'_, Postgres>,
    table: &TableName,
    plan: &[PlannedColumn],
    batch: &Batch,
    rows: Range<usize>,
) -> EtlResult<ChunkOutcome> {
    let values = coerce_rows(plan, batch, rows.clone());

    let mut savepoint = tx.begin().await?;
    let result = build_insert(table, plan, &values)
        .build()
        .execute(&mut *savepoint)
        .await;

    match result {
        Ok(result) => {
            savepoint.commit().await?;
            Ok(ChunkOutcome::Inserted(result.rows_affected()))
        }
        Err(sqlx::Error::Database(err)) => {
            savepoint.rollback().await?;
            warn!(
                %table,
                first_row = rows.start,
                rows = rows.len(),
                error = %err,
                "chunk insert failed, retrying row by row"
            );

            insert_row_by_row(tx, table, plan, rows.start, &values).await
        }
        Err(err) => Err(err.into()),
    }
}

async fn insert_row_by_row(
    tx: &mut Transaction<'_, Postgres>,
    table: &TableName,
    plan: &[PlannedColumn],
    first_row: usize,
    values: &[Vec<BindValue>],
) -> EtlResult<ChunkOutcome> {
    let mut inserted = 0;
    let mut failed_rows = Vec::new();

    for (offset, row) in values.iter().enumerate() {
        let index = first_row + offset;

        let mut savepoint = tx.begin().await?;
        let result = build_insert(table, plan, std::slice::from_ref(row))
            .build()
            .execute(&mut *savepoint)
            .await;

        match result {
            Ok(result) => {
                savepoint.commit().await?;
                inserted += result.rows_affected();
            }
            Err(sqlx::Error::Database(err)) => {
                savepoint.rollback().await?;

                let reported_column = err
                    .try_downcast_ref::<PgDatabaseError>()
                    .and_then(|pg_err| pg_err.column())
                    .map(str::to_string);
                let problem = diagnose_row(plan, row).or_else(|| {
                    reported_column.and_then(|column| describe_column(plan, row, &column))
                });

                match problem {
                    Some(problem) => warn!(
                        %table,
                        row = index,
                        parameter = problem.parameter,
                        column = %problem.column,
                        value = %problem.value,
                        reason = problem.reason,
                        error = %err,
                        "skipping row rejected by destination"
                    ),
                    None => warn!(
                        %table,
                        row = index,
                        values = %describe_row(plan, row),
                        error = %err,
                        "skipping row rejected by destination"
                    ),
                }

                failed_rows.push(index);
            }
            Err(err) => return Err(err.into()),
        }
    }

    if failed_rows.is_empty() {
        return Ok(ChunkOutcome::Inserted(inserted));
    }

    Ok(ChunkOutcome::PartialFailure {
        inserted,
        failed_rows,
    })
}

fn build_insert<'a>(
    table: &TableName,
    plan: &[PlannedColumn],
    rows: &'a [Vec<BindValue>],
) -> QueryBuilder<'a, Postgres> {
    let column_list = plan
        .iter()
        .map(|column| quote_column(&column.name))
        .collect::<Vec<_>>()
        .join(", ");

    let mut builder = QueryBuilder::new(format!(
        "insert into {} ({column_list}) ",
        table.as_quoted_identifier()
    ));

    builder.push_values(rows, |mut separated, row| {
        for (value, column) in row.iter().zip(plan) {
            push_value(&mut separated, value, column.family.cast());
        }
    });

    builder
}

fn push_value<'a>(
    separated: &mut Separated<'_, 'a, Postgres, &'static str>,
    value: &'a BindValue,
    cast: Option<&str>,
) {
    match value {
        BindValue::Integer(value) => separated.push_bind(*value),
        BindValue::Float(value) => separated.push_bind(*value),
        BindValue::Boolean(value) => separated.push_bind(*value),
        BindValue::Timestamp(value) => separated.push_bind(*value),
        BindValue::Text(value) => separated.push_bind(value.as_deref()),
    };

    if let Some(cast) = cast {
        separated.push_unseparated(format!("::{cast}"));
    }
}

/// Finds a value that its column cannot hold without asking the database.
fn diagnose_row(plan: &[PlannedColumn], row: &[BindValue]) -> Option<RowProblem> {
    plan.iter()
        .zip(row)
        .enumerate()
        .find_map(|(position, (column, value))| {
            let reason = match value {
                BindValue::Text(Some(text))
                    if column
                        .max_length
                        .is_some_and(|max_length| text.chars().count() > max_length) =>
                {
                    "value exceeds the column length"
                }
                BindValue::Integer(Some(number))
                    if column
                        .int_range
                        .is_some_and(|(min, max)| *number < min || *number > max) =>
                {
                    "value is out of range for the column type"
                }
                _ => return None,
            };

            Some(RowProblem {
                parameter: position + 1,
                column: column.name.clone(),
                value: value.to_string(),
                reason,
            })
        })
}

fn describe_column(plan: &[PlannedColumn], row: &[BindValue], column: &str) -> Option<RowProblem> {
    let position = plan.iter().position(|planned| planned.name == column)?;

    Some(RowProblem {
        parameter: position + 1,
        column: column.to_string(),
        value: row.get(position)?.to_string(),
        reason: "reported by the database",
    })
}

/// Renders every value of a row with its 1-based parameter position and column.
fn describe_row(plan: &[PlannedColumn], row: &[BindValue]) -> String {
    plan.iter()
        .zip(row)
        .enumerate()
        .map(|(position, (column, value))| format!("${} {}={value}", position + 1, column.name))
        .collect::<Vec<_>>()
        .join(", ")
}
