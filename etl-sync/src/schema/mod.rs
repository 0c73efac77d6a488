//! Target table introspection, bootstrap and additive evolution.

mod cache;
mod evolver;
mod inference;

pub use cache::ColumnTypeCache;
pub use evolver::{SURROGATE_KEY_COLUMN, SchemaEvolver};
pub use inference::{StorageType, infer_column_type, infer_storage_type};

pub(crate) use evolver::build_add_column_sql;
