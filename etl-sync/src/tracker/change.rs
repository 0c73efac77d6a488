use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use etl_config::shared::TrackerConfig;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::tracker::{FileStat, FileStatProvider, FileState, FileStateStore, LocalFileStatProvider};

/// Decides which source files need processing and records the ones that were processed.
#[derive(Debug, Clone)]
pub struct FileChangeTracker<S, P = LocalFileStatProvider> {
    store: S,
    stats: P,
    mtime_tolerance_secs: f64,
}

impl<S> FileChangeTracker<S, LocalFileStatProvider>
where
    S: FileStateStore,
{
    /// Creates a tracker over the local filesystem.
    pub fn local(store: S, config: &TrackerConfig) -> Self {
        Self::new(store, LocalFileStatProvider, config)
    }
}

impl<S, P> FileChangeTracker<S, P>
where
    S: FileStateStore,
    P: FileStatProvider,
{
    pub fn new(store: S, stats: P, config: &TrackerConfig) -> Self {
        Self {
            store,
            stats,
            mtime_tolerance_secs: config.mtime_tolerance_secs,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the paths that are new or changed since they were last marked processed.
    ///
    /// Paths are normalized to absolute form and reported once. Files whose metadata
    /// cannot be read are skipped. When the stored state cannot be looked up the file is
    /// reported as changed, processing twice is harmless since merges skip known rows.
    pub async fn filter_changed<I, T>(&self, etl_name: &str, paths: I) -> Vec<PathBuf>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<Path>,
    {
        let mut seen = HashSet::new();
        let mut changed = Vec::new();

        for path in paths {
            let path = match normalize_path(path.as_ref()) {
                Ok(path) => path,
                Err(err) => {
                    warn!(etl_name, path = %path.as_ref().display(), error = %err, "skipping path that cannot be normalized");
                    continue;
                }
            };
            if !seen.insert(path.clone()) {
                continue;
            }

            let current = match self.stats.stat(&path).await {
                Ok(stat) => stat,
                Err(err) => {
                    warn!(etl_name, path = %path.display(), error = %err, "skipping file with unreadable metadata");
                    continue;
                }
            };

            let key = path_key(&path);
            match self.store.get_file_state(etl_name, &key).await {
                Ok(Some(stored)) if !has_changed(&stored, &current, self.mtime_tolerance_secs) => {
                    debug!(etl_name, path = %key, "file unchanged");
                }
                Ok(Some(_)) | Ok(None) => changed.push(path),
                Err(err) => {
                    warn!(etl_name, path = %key, error = %err, "file state lookup failed, treating file as changed");
                    changed.push(path);
                }
            }
        }

        info!(
            etl_name,
            candidates = seen.len(),
            changed = changed.len(),
            "filtered changed files"
        );

        changed
    }

    /// Records the current size and modification time of `path` as processed now.
    pub async fn mark_processed(&self, etl_name: &str, path: &Path) -> EtlResult<()> {
        let path = normalize_path(path)?;
        let stat = self.stats.stat(&path).await?;

        self.store
            .upsert_file_state(FileState {
                etl_name: etl_name.to_string(),
                file_path: path_key(&path),
                mtime: stat.mtime,
                size: stat.size,
                processed_time: Utc::now(),
            })
            .await?;

        debug!(etl_name, path = %path.display(), "marked file processed");

        Ok(())
    }

    /// Forgets every processed file of `etl_name` so the next run processes all of them.
    pub async fn purge(&self, etl_name: &str) -> EtlResult<u64> {
        let purged = self.store.purge_file_states(etl_name).await?;

        info!(etl_name, purged, "purged file states");

        Ok(purged)
    }
}

/// Whether the file differs from its recorded state.
///
/// Modification times within `tolerance` seconds are considered equal to absorb
/// filesystem timestamp granularity, any size difference counts.
pub fn has_changed(stored: &FileState, current: &FileStat, tolerance: f64) -> bool {
    (current.mtime - stored.mtime).abs() > tolerance || current.size != stored.size
}

fn normalize_path(path: &Path) -> EtlResult<PathBuf> {
    std::path::absolute(path).map_err(|err| {
        etl_error!(
            ErrorKind::SourceIoError,
            "Path cannot be made absolute",
            path.display(),
            source: err
        )
    })
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
