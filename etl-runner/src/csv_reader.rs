use std::path::Path;

use etl_sync::error::{ErrorKind, EtlError, EtlResult};
use etl_sync::etl_error;
use etl_sync::pipeline::BatchReader;
use etl_sync::types::{Batch, Cell};
use tracing::debug;

/// Reads comma separated exports into batches of text cells.
///
/// Headers are trimmed and empty cells become [`Cell::Null`]. Every other value is kept
/// as a [`Cell::String`], column types are resolved when the batch is merged.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvBatchReader;

impl BatchReader for CsvBatchReader {
    async fn read_batch(&self, path: &Path) -> EtlResult<Batch> {
        let owned_path = path.to_path_buf();
        let batch = tokio::task::spawn_blocking(move || read_csv(&owned_path))
            .await
            .map_err(|err| {
                etl_error!(
                    ErrorKind::SourceError,
                    "Csv reader task failed",
                    path.display(),
                    source: err
                )
            })??;

        debug!(path = %path.display(), rows = batch.len(), columns = batch.columns().len(), "read csv export");

        Ok(batch)
    }
}

fn read_csv(path: &Path) -> EtlResult<Batch> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_path(path)
        .map_err(|err| csv_error(path, err))?;

    let columns: Vec<String> = reader
        .headers()
        .map_err(|err| csv_error(path, err))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| csv_error(path, err))?;
        rows.push(record.iter().map(to_cell).collect());
    }

    Batch::with_rows(columns, rows)
}

fn to_cell(value: &str) -> Cell {
    if value.is_empty() {
        Cell::Null
    } else {
        Cell::String(value.to_string())
    }
}

/// I/O failures are reported as retryable source errors, a file can be unreadable
/// while it is still being synchronized. Anything else means the export is malformed.
fn csv_error(path: &Path, err: csv::Error) -> EtlError {
    if err.is_io_error() {
        etl_error!(
            ErrorKind::SourceIoError,
            "Reading csv export failed",
            path.display(),
            source: err
        )
    } else {
        etl_error!(
            ErrorKind::InvalidData,
            "Csv export is malformed",
            path.display(),
            source: err
        )
    }
}
