use std::path::Path;
use std::time::UNIX_EPOCH;

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::tracker::{FileStat, FileStatProvider};

/// [`FileStatProvider`] for the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileStatProvider;

impl FileStatProvider for LocalFileStatProvider {
    async fn stat(&self, path: &Path) -> EtlResult<FileStat> {
        let metadata = tokio::fs::metadata(path).await.map_err(|err| {
            etl_error!(
                ErrorKind::SourceIoError,
                "Reading file metadata failed",
                path.display(),
                source: err
            )
        })?;

        if !metadata.is_file() {
            return Err(etl_error!(
                ErrorKind::SourceIoError,
                "Path is not a regular file",
                path.display()
            ));
        }

        let modified = metadata.modified().map_err(|err| {
            etl_error!(
                ErrorKind::SourceIoError,
                "File modification time is unavailable",
                path.display(),
                source: err
            )
        })?;
        // Times before the epoch come out negative.
        let mtime = match modified.duration_since(UNIX_EPOCH) {
            Ok(duration) => duration.as_secs_f64(),
            Err(err) => -err.duration().as_secs_f64(),
        };

        Ok(FileStat {
            mtime,
            size: i64::try_from(metadata.len()).unwrap_or(i64::MAX),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[tokio::test]
    async fn stat_reports_size_and_mtime() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"lot,qty\nL1,4\n").unwrap();
        file.flush().unwrap();

        let stat = LocalFileStatProvider.stat(file.path()).await.unwrap();

        assert_eq!(stat.size, 13);
        assert!(stat.mtime > 0.0);
    }

    #[tokio::test]
    async fn missing_files_are_source_io_errors() {
        let dir = tempfile::tempdir().unwrap();

        let err = LocalFileStatProvider
            .stat(&dir.path().join("gone.csv"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SourceIoError);
        assert_eq!(
            LocalFileStatProvider.stat(dir.path()).await.unwrap_err().kind(),
            ErrorKind::SourceIoError
        );
    }
}
