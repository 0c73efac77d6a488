//! Logging setup shared by the sync runner and the test suites.

pub mod tracing;
