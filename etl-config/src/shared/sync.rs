use serde::{Deserialize, Serialize};

use crate::shared::{RetryConfig, ValidationError};

/// Maximum number of bind parameters Postgres accepts in one statement.
const MAX_BIND_PARAMETERS: usize = u16::MAX as usize;

/// Tuning of the incremental sync engine.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SyncConfig {
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub merge: MergeConfig,
    /// Retry policy for reading source files that may still be synchronizing.
    #[serde(default)]
    pub read_retry: RetryConfig,
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.loader.validate()?;
        self.tracker.validate()?;
        self.merge.validate()?;
        self.read_retry.validate()
    }
}

/// Chunking and commit cadence of the batch loader.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoaderConfig {
    /// Rows per multi-row insert statement, clamped further by the bind parameter limit.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Rows after which the running transaction is committed.
    #[serde(default = "default_commit_interval")]
    pub commit_interval: usize,
}

impl LoaderConfig {
    pub const DEFAULT_CHUNK_SIZE: usize = 2_000;

    pub const DEFAULT_COMMIT_INTERVAL: usize = 50_000;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.chunk_size == 0 || self.chunk_size > MAX_BIND_PARAMETERS {
            return Err(ValidationError::InvalidFieldValue {
                field: "loader.chunk_size".to_string(),
                constraint: format!("must be between 1 and {MAX_BIND_PARAMETERS}"),
            });
        }

        if self.commit_interval < self.chunk_size {
            return Err(ValidationError::InvalidFieldValue {
                field: "loader.commit_interval".to_string(),
                constraint: "must be greater than or equal to `loader.chunk_size`".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            commit_interval: default_commit_interval(),
        }
    }
}

fn default_chunk_size() -> usize {
    LoaderConfig::DEFAULT_CHUNK_SIZE
}

fn default_commit_interval() -> usize {
    LoaderConfig::DEFAULT_COMMIT_INTERVAL
}

/// File change detection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TrackerConfig {
    /// Modification time differences up to this many seconds count as unchanged.
    ///
    /// Absorbs timestamp jitter of network shares and sync clients.
    #[serde(default = "default_mtime_tolerance_secs")]
    pub mtime_tolerance_secs: f64,
}

impl TrackerConfig {
    pub const DEFAULT_MTIME_TOLERANCE_SECS: f64 = 1.0;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.mtime_tolerance_secs.is_finite() || self.mtime_tolerance_secs < 0.0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "tracker.mtime_tolerance_secs".to_string(),
                constraint: "must be a finite, non negative number".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            mtime_tolerance_secs: default_mtime_tolerance_secs(),
        }
    }
}

fn default_mtime_tolerance_secs() -> f64 {
    TrackerConfig::DEFAULT_MTIME_TOLERANCE_SECS
}

/// Merge engine settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MergeConfig {
    /// Prefix of the per-table staging table name.
    #[serde(default = "default_staging_prefix")]
    pub staging_prefix: String,
}

impl MergeConfig {
    pub const DEFAULT_STAGING_PREFIX: &'static str = "_stg_";

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.staging_prefix.is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "merge.staging_prefix".to_string(),
                constraint: "must not be empty, staging would overwrite the target".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            staging_prefix: default_staging_prefix(),
        }
    }
}

fn default_staging_prefix() -> String {
    MergeConfig::DEFAULT_STAGING_PREFIX.to_string()
}
