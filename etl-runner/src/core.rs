use std::path::PathBuf;

use anyhow::{Context, bail};
use etl_config::shared::{ETL_SYNC_OPTIONS, IntoConnectOptions, JobConfig, RunnerConfig};
use etl_sync::merge::MergeEngine;
use etl_sync::migrations::apply_etl_migrations;
use etl_sync::pipeline::{SyncJob, SyncPipeline, SyncReport};
use etl_sync::retry::RetryPolicy;
use etl_sync::tracker::{FileChangeTracker, PostgresFileStateStore};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use crate::csv_reader::CsvBatchReader;

/// Jobs run sequentially, a few connections cover the tracker and the merge engine.
const MAX_POOL_CONNECTIONS: u32 = 4;

/// Which of the configured jobs to run and how.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Runs only the job with this name.
    pub job: Option<String>,
    /// Forgets the processed files of each selected job before running it.
    pub purge: bool,
}

/// Runs the selected jobs one after the other.
///
/// Migrations of the `etl` schema are applied first. A failing job aborts the run, its
/// unprocessed files are picked up again by the next run.
pub async fn run_with_config(config: RunnerConfig, options: RunOptions) -> anyhow::Result<()> {
    let jobs = select_jobs(&config, options.job.as_deref())?;
    if jobs.is_empty() {
        warn!("no jobs configured, nothing to run");
        return Ok(());
    }

    apply_etl_migrations(&config.database).await?;

    let pool = PgPoolOptions::new()
        .max_connections(MAX_POOL_CONNECTIONS)
        .connect_with(config.database.with_db(Some(&*ETL_SYNC_OPTIONS)))
        .await
        .context("connecting to the destination database")?;

    for job in jobs {
        let report = run_job(&pool, &config, job, options.purge)
            .await
            .with_context(|| format!("running job `{}`", job.name))?;

        info!(
            etl_name = %job.name,
            files_seen = report.files_seen,
            files_changed = report.files_changed,
            files_processed = report.files_processed,
            files_failed = report.files_failed,
            rows_read = report.rows_read,
            rows_inserted = report.rows_inserted,
            "job finished"
        );
        for path in &report.failed_files {
            warn!(etl_name = %job.name, path = %path.display(), "file left for the next run");
        }
    }

    pool.close().await;

    Ok(())
}

fn select_jobs<'a>(config: &'a RunnerConfig, name: Option<&str>) -> anyhow::Result<Vec<&'a JobConfig>> {
    match name {
        Some(name) => match config.job(name) {
            Some(job) => Ok(vec![job]),
            None => bail!("job `{name}` is not configured"),
        },
        None => Ok(config.jobs.iter().collect()),
    }
}

async fn run_job(
    pool: &PgPool,
    config: &RunnerConfig,
    job: &JobConfig,
    purge: bool,
) -> anyhow::Result<SyncReport> {
    let tracker = FileChangeTracker::local(
        PostgresFileStateStore::new(pool.clone()),
        &config.sync.tracker,
    );
    if purge {
        tracker.purge(&job.name).await?;
    }

    let pipeline = SyncPipeline::new(
        tracker,
        CsvBatchReader,
        MergeEngine::new(
            pool.clone(),
            config.sync.loader.clone(),
            config.sync.merge.clone(),
        ),
        RetryPolicy::from(&config.sync.read_retry),
    );

    let candidates = list_candidates(job).await?;
    info!(etl_name = %job.name, directory = %job.directory.display(), candidates = candidates.len(), "starting job");

    let report = pipeline.run(&SyncJob::from(job), candidates).await?;

    Ok(report)
}

/// Lists the files of the job directory with one of the job's extensions, sorted by path.
async fn list_candidates(job: &JobConfig) -> anyhow::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(&job.directory)
        .await
        .with_context(|| format!("listing `{}`", job.directory.display()))?;

    let mut candidates = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let matches = path
            .extension()
            .and_then(|extension| extension.to_str())
            .is_some_and(|extension| job.matches_extension(extension));

        if matches && entry.file_type().await?.is_file() {
            candidates.push(path);
        }
    }
    candidates.sort();

    Ok(candidates)
}
