//! Shared configuration types for sync runs.

mod base;
mod connection;
mod job;
mod retry;
mod runner;
mod sync;

pub use base::ValidationError;
pub use connection::{
    ETL_MIGRATION_OPTIONS, ETL_SYNC_OPTIONS, IntoConnectOptions, PgConnectionConfig,
    PgConnectionOptions, TlsConfig,
};
pub use job::JobConfig;
pub use retry::RetryConfig;
pub use runner::RunnerConfig;
pub use sync::{LoaderConfig, MergeConfig, SyncConfig, TrackerConfig};
