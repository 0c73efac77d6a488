use std::collections::HashMap;
use std::sync::Arc;

use etl_postgres::types::{ColumnInfo, TableName};
use tokio::sync::Mutex;

/// Introspected columns of the tables a merge engine writes to.
///
/// Entries live until [`ColumnTypeCache::invalidate`] is called, which happens whenever
/// a column is added to the table.
#[derive(Debug, Clone, Default)]
pub struct ColumnTypeCache {
    inner: Arc<Mutex<HashMap<TableName, Arc<Vec<ColumnInfo>>>>>,
}

impl ColumnTypeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, table: &TableName) -> Option<Arc<Vec<ColumnInfo>>> {
        let inner = self.inner.lock().await;
        inner.get(table).cloned()
    }

    pub async fn insert(&self, table: TableName, columns: Vec<ColumnInfo>) -> Arc<Vec<ColumnInfo>> {
        let columns = Arc::new(columns);
        let mut inner = self.inner.lock().await;
        inner.insert(table, columns.clone());

        columns
    }

    pub async fn invalidate(&self, table: &TableName) {
        let mut inner = self.inner.lock().await;
        inner.remove(table);
    }
}
