//! Helpers for testing sync runs.
//!
//! - [`database`] creates isolated Postgres databases that are dropped with their handle.
//! - [`memory_target`] is a [`crate::merge::MergeTarget`] that keeps merged rows in memory.

#[cfg(feature = "test-utils")]
pub mod database;
pub mod memory_target;
