use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use etl_postgres::types::TableName;
use tokio::sync::Mutex;

use crate::error::EtlResult;
use crate::hashing::dedup_keep_last;
use crate::merge::{MergeReport, MergeTarget, validate_hash_column};
use crate::types::{Batch, DataRecord, Record};

#[derive(Debug, Default)]
struct MemoryTable {
    columns: Vec<String>,
    hashes: HashSet<String>,
    rows: Vec<DataRecord>,
}

/// [`MergeTarget`] that appends rows with unseen hashes to in-memory tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryMergeTarget {
    inner: Arc<Mutex<HashMap<TableName, MemoryTable>>>,
}

impl MemoryMergeTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the rows of `table` in insertion order.
    pub async fn rows(&self, table: &TableName) -> Vec<DataRecord> {
        let inner = self.inner.lock().await;

        inner
            .get(table)
            .map(|table| table.rows.clone())
            .unwrap_or_default()
    }

    /// Returns the columns `table` has accumulated, in the order they first appeared.
    pub async fn columns(&self, table: &TableName) -> Vec<String> {
        let inner = self.inner.lock().await;

        inner
            .get(table)
            .map(|table| table.columns.clone())
            .unwrap_or_default()
    }
}

impl MergeTarget for MemoryMergeTarget {
    async fn merge_by_hash(
        &self,
        table: &TableName,
        mut batch: Batch,
        hash_column: &str,
        _text_columns: &[String],
    ) -> EtlResult<MergeReport> {
        if batch.is_empty() {
            return Ok(MergeReport::default());
        }

        validate_hash_column(&batch, hash_column)?;
        let duplicates_dropped = dedup_keep_last(&mut batch, hash_column)?;

        let mut inner = self.inner.lock().await;
        let target = inner.entry(table.clone()).or_default();

        let mut report = MergeReport {
            staged: batch.len() as u64,
            duplicates_dropped,
            ..MergeReport::default()
        };

        for column in batch.columns() {
            if !target.columns.contains(column) {
                target.columns.push(column.clone());
                report.columns_added.push(column.clone());
            }
        }

        for row in batch.rows() {
            let Some(hash) = row.value(hash_column).map(|hash| hash.to_string()) else {
                continue;
            };
            if !target.hashes.insert(hash) {
                continue;
            }

            let mut record = DataRecord::new();
            for (column, value) in batch.columns().iter().zip(row.values()) {
                record.set(column.clone(), value.clone());
            }
            target.rows.push(record);
            report.inserted += 1;
        }

        Ok(report)
    }
}
