//! Values and batches flowing from readers to the merge engine.

mod batch;
mod cell;

pub use batch::*;
pub use cell::*;

pub use etl_postgres::types::{ColumnInfo, TableName};
