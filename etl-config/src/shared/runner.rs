use std::collections::HashSet;

use serde::Deserialize;

use crate::Config;
use crate::shared::{JobConfig, PgConnectionConfig, SyncConfig, ValidationError};

/// Top level configuration of the sync runner binary.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RunnerConfig {
    pub database: PgConnectionConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.database.validate()?;
        self.sync.validate()?;

        let mut names = HashSet::with_capacity(self.jobs.len());
        for job in &self.jobs {
            job.validate()?;

            if !names.insert(job.name.as_str()) {
                return Err(ValidationError::DuplicateJobName(job.name.clone()));
            }
        }

        Ok(())
    }

    pub fn job(&self, name: &str) -> Option<&JobConfig> {
        self.jobs.iter().find(|job| job.name == name)
    }
}

impl Config for RunnerConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "database": {"host": "localhost", "port": 5432, "name": "mes", "username": "etl"},
        "jobs": [
            {"name": "sfc", "directory": "/data/sfc", "table": "sfc", "key_fields": ["lot"]},
            {"name": "aoi", "directory": "/data/aoi", "table": "aoi", "key_fields": ["board"]}
        ]
    }"#;

    #[test]
    fn valid_config_passes_validation() {
        let config: RunnerConfig = serde_json::from_str(CONFIG).unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.job("aoi").unwrap().table, "aoi");
        assert!(config.job("missing").is_none());
    }

    #[test]
    fn duplicate_job_names_are_rejected() {
        let mut config: RunnerConfig = serde_json::from_str(CONFIG).unwrap();
        config.jobs[1].name = "sfc".to_string();

        assert!(matches!(
            config.validate(),
            Err(ValidationError::DuplicateJobName(name)) if name == "sfc"
        ));
    }
}
