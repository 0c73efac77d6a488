//! The per-ETL driver tying change detection, hashing and merging together.

use std::future::Future;
use std::path::{Path, PathBuf};

use etl_config::shared::JobConfig;
use etl_postgres::types::TableName;
use tracing::{debug, error, info};

use crate::error::EtlResult;
use crate::hashing::RecordHasher;
use crate::merge::MergeTarget;
use crate::retry::{RetryPolicy, Sleeper, TokioSleeper, retry};
use crate::tracker::{FileChangeTracker, FileStatProvider, FileStateStore};
use crate::types::Batch;

/// What to sync and how records are identified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncJob {
    pub etl_name: String,
    pub table: TableName,
    pub key_fields: Vec<String>,
    pub hash_column: String,
    pub text_columns: Vec<String>,
}

impl From<&JobConfig> for SyncJob {
    fn from(config: &JobConfig) -> Self {
        Self {
            etl_name: config.name.clone(),
            table: TableName::new(config.schema.clone(), config.table.clone()),
            key_fields: config.key_fields.clone(),
            hash_column: config.hash_column.clone(),
            text_columns: config.text_columns.clone(),
        }
    }
}

/// Turns a source file into a cleaned [`Batch`].
///
/// Transient failures such as a file still being written should be reported with a
/// retryable error kind, see [`crate::error::EtlError::is_retryable`].
pub trait BatchReader {
    fn read_batch(&self, path: &Path) -> impl Future<Output = EtlResult<Batch>> + Send;
}

/// Counters of one [`SyncPipeline::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub files_seen: usize,
    pub files_changed: usize,
    pub files_processed: usize,
    pub files_failed: usize,
    pub rows_read: u64,
    pub rows_inserted: u64,
    /// Files that could not be read. They stay unprocessed and are retried next run.
    pub failed_files: Vec<PathBuf>,
}

/// Syncs changed files of a job into its target table.
#[derive(Debug)]
pub struct SyncPipeline<S, P, R, T, Z = TokioSleeper> {
    tracker: FileChangeTracker<S, P>,
    reader: R,
    target: T,
    read_retry: RetryPolicy,
    sleeper: Z,
}

impl<S, P, R, T> SyncPipeline<S, P, R, T, TokioSleeper> {
    pub fn new(
        tracker: FileChangeTracker<S, P>,
        reader: R,
        target: T,
        read_retry: RetryPolicy,
    ) -> Self {
        Self {
            tracker,
            reader,
            target,
            read_retry,
            sleeper: TokioSleeper,
        }
    }
}

impl<S, P, R, T, Z> SyncPipeline<S, P, R, T, Z>
where
    S: FileStateStore,
    P: FileStatProvider,
    R: BatchReader,
    T: MergeTarget,
    Z: Sleeper,
{
    /// Replaces how the pipeline waits between read attempts.
    pub fn with_sleeper<Z2: Sleeper>(self, sleeper: Z2) -> SyncPipeline<S, P, R, T, Z2> {
        SyncPipeline {
            tracker: self.tracker,
            reader: self.reader,
            target: self.target,
            read_retry: self.read_retry,
            sleeper,
        }
    }

    pub fn tracker(&self) -> &FileChangeTracker<S, P> {
        &self.tracker
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    /// Processes the changed files among `candidates`, one after the other.
    ///
    /// A file is marked processed only after its batch was merged. Files that cannot be
    /// read are reported and left for the next run, a failed merge aborts the run.
    pub async fn run<I, F>(&self, job: &SyncJob, candidates: I) -> EtlResult<SyncReport>
    where
        I: IntoIterator<Item = F>,
        F: AsRef<Path>,
    {
        let hasher = RecordHasher::new(job.key_fields.clone())?;

        let candidates: Vec<PathBuf> = candidates
            .into_iter()
            .map(|path| path.as_ref().to_path_buf())
            .collect();
        let changed = self
            .tracker
            .filter_changed(&job.etl_name, &candidates)
            .await;

        let mut report = SyncReport {
            files_seen: candidates.len(),
            files_changed: changed.len(),
            ..SyncReport::default()
        };

        for path in changed {
            let reader = &self.reader;
            let source = path.as_path();
            let read = retry(&self.read_retry, &self.sleeper, move |attempt| {
                debug!(path = %source.display(), attempt, "reading source file");
                reader.read_batch(source)
            })
            .await;

            let mut batch = match read {
                Ok(batch) => batch,
                Err(err) => {
                    error!(
                        etl_name = %job.etl_name,
                        path = %path.display(),
                        error = %err,
                        "failed to read source file, it will be retried next run"
                    );
                    report.files_failed += 1;
                    report.failed_files.push(path);
                    continue;
                }
            };

            let rows = batch.len();
            hasher.assign_hashes(&mut batch, &job.hash_column)?;

            let merge = self
                .target
                .merge_by_hash(&job.table, batch, &job.hash_column, &job.text_columns)
                .await?;

            self.tracker.mark_processed(&job.etl_name, &path).await?;

            info!(
                etl_name = %job.etl_name,
                path = %path.display(),
                rows,
                inserted = merge.inserted,
                "processed source file"
            );

            report.files_processed += 1;
            report.rows_read += rows as u64;
            report.rows_inserted += merge.inserted;
        }

        info!(
            etl_name = %job.etl_name,
            table = %job.table,
            files_seen = report.files_seen,
            files_changed = report.files_changed,
            files_processed = report.files_processed,
            files_failed = report.files_failed,
            rows_read = report.rows_read,
            rows_inserted = report.rows_inserted,
            "sync run finished"
        );

        Ok(report)
    }
}
