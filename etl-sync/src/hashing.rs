//! Content hashes identifying records across overlapping exports.

use std::collections::HashSet;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::types::{Batch, Cell, Record};

/// Separator placed between key field values before hashing.
const FIELD_SEPARATOR: &str = "|";

/// Computes the identity hash of records from a fixed list of key fields.
///
/// Only key fields contribute to the hash. Missing values, null tokens and non finite
/// floats all hash as an empty field, strings are trimmed, whole floats hash like the
/// equivalent integer and timestamps use `YYYY-MM-DD HH:MM:SS`.
#[derive(Debug, Clone)]
pub struct RecordHasher {
    key_fields: Vec<String>,
}

impl RecordHasher {
    pub fn new(key_fields: Vec<String>) -> EtlResult<Self> {
        if key_fields.is_empty() {
            bail!(
                ErrorKind::InvalidKeyFields,
                "Record hashing requires at least one key field"
            );
        }

        Ok(Self { key_fields })
    }

    pub fn key_fields(&self) -> &[String] {
        &self.key_fields
    }

    /// Returns the lowercase hex SHA-256 digest of the record's key fields.
    pub fn hash<R: Record>(&self, record: &R) -> String {
        let mut hasher = Sha256::new();

        for (index, field) in self.key_fields.iter().enumerate() {
            if index > 0 {
                hasher.update(FIELD_SEPARATOR.as_bytes());
            }

            if let Some(value) = record.value(field) {
                hasher.update(value.to_string().as_bytes());
            }
        }

        hex::encode(hasher.finalize())
    }

    /// Writes the hash of every row into `hash_column`, replacing existing values.
    pub fn assign_hashes(&self, batch: &mut Batch, hash_column: &str) -> EtlResult<()> {
        if self.key_fields.iter().any(|field| field == hash_column) {
            bail!(
                ErrorKind::InvalidKeyFields,
                "The hash column cannot be one of its own key fields",
                format!("hash column `{hash_column}`")
            );
        }

        let hashes = batch
            .rows()
            .map(|row| Cell::String(self.hash(&row)))
            .collect();

        batch.set_column(hash_column, hashes)
    }
}

/// Drops rows whose hash occurs again later in the batch, keeping the last occurrence.
///
/// The relative order of the kept rows is preserved. Rows without a hash are kept.
/// Returns how many rows were dropped.
pub fn dedup_keep_last(batch: &mut Batch, hash_column: &str) -> EtlResult<usize> {
    let Some(hashes) = batch.column_values(hash_column) else {
        bail!(
            ErrorKind::InvalidBatch,
            "Hash column is missing from the batch",
            format!("column `{hash_column}`")
        );
    };

    let hashes: Vec<&Cell> = hashes.collect();
    let mut seen = HashSet::with_capacity(hashes.len());
    let mut keep = vec![true; hashes.len()];

    for (index, hash) in hashes.iter().enumerate().rev() {
        if hash.is_missing() {
            continue;
        }

        if !seen.insert(hash.to_string()) {
            keep[index] = false;
        }
    }

    let dropped = keep.iter().filter(|keep| !**keep).count();
    if dropped > 0 {
        debug!(dropped, "dropped duplicate records within batch");
        batch.retain_rows(&keep);
    }

    Ok(dropped)
}
