//! Incremental synchronization of recurring tabular exports into Postgres.
//!
//! A run filters the candidate files of an ETL down to the ones that changed since they
//! were last processed ([`tracker`]), reads each into a [`types::Batch`], stamps every
//! record with a content hash over its key fields ([`hashing`]) and merges the batch into
//! the target table so that only unseen hashes are inserted ([`merge`]). Columns that the
//! target lacks are added on the fly ([`schema`]).

pub mod conversions;
pub mod error;
pub mod hashing;
pub mod loader;
mod macros;
pub mod merge;
pub mod migrations;
pub mod pipeline;
pub mod retry;
pub mod schema;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod tracker;
pub mod types;
