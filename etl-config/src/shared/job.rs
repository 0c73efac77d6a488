use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// One directory of exports synced into one target table.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct JobConfig {
    /// Identifies the job in the file state store. Renaming a job reprocesses its files.
    pub name: String,
    pub directory: PathBuf,
    /// File extensions picked up from `directory`, matched case-insensitively.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_schema")]
    pub schema: String,
    pub table: String,
    /// Fields whose values make up the record identity hash.
    pub key_fields: Vec<String>,
    #[serde(default = "default_hash_column")]
    pub hash_column: String,
    /// Columns always created as text, typically join keys such as lot numbers.
    #[serde(default)]
    pub text_columns: Vec<String>,
}

impl JobConfig {
    pub const DEFAULT_SCHEMA: &'static str = "public";

    pub const DEFAULT_HASH_COLUMN: &'static str = "record_hash";

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "jobs.name".to_string(),
                constraint: "must not be empty".to_string(),
            });
        }

        if self.table.trim().is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: format!("jobs.{}.table", self.name),
                constraint: "must not be empty".to_string(),
            });
        }

        if self.key_fields.is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: format!("jobs.{}.key_fields", self.name),
                constraint: "must name at least one field".to_string(),
            });
        }

        if self.key_fields.iter().any(|field| field == &self.hash_column) {
            return Err(ValidationError::InvalidFieldValue {
                field: format!("jobs.{}.key_fields", self.name),
                constraint: format!("must not contain the hash column `{}`", self.hash_column),
            });
        }

        if self.extensions.is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: format!("jobs.{}.extensions", self.name),
                constraint: "must name at least one extension".to_string(),
            });
        }

        Ok(())
    }

    /// Whether `extension` is one of the job's extensions, ignoring case and a leading dot.
    pub fn matches_extension(&self, extension: &str) -> bool {
        let extension = extension.trim_start_matches('.');

        self.extensions
            .iter()
            .any(|candidate| candidate.trim_start_matches('.').eq_ignore_ascii_case(extension))
    }
}

fn default_extensions() -> Vec<String> {
    vec!["csv".to_string()]
}

fn default_schema() -> String {
    JobConfig::DEFAULT_SCHEMA.to_string()
}

fn default_hash_column() -> String {
    JobConfig::DEFAULT_HASH_COLUMN.to_string()
}
