//! Postgres building blocks shared by the sync engine: table names, file state
//! queries, column introspection and test database helpers.

pub mod sqlx;
pub mod types;
