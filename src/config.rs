//! Pipeline configuration
//!
//! Tuning comes from `config.toml`; the target table, bucket and region come
//! from the process environment and override whatever the file says.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Deserialize;
use thiserror::Error;

/// Environment variable naming the aggregate table
pub const TABLE_VAR: &str = "Table";
/// Environment variable naming the image bucket
pub const BUCKET_VAR: &str = "Bucket";
/// Environment variable naming the region
pub const REGION_VAR: &str = "Region";

/// Missing required configuration. Fatal for the invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(&'static str),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Where aggregates and images live
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TargetConfig {
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub region: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Time budget for one batch, in milliseconds
    pub deadline_ms: Option<u64>,
    /// Skip appending a URL an identity already holds
    pub deduplicate_images: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Memory,
    Sqlite,
    Dynamodb,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    pub sqlite_path: Option<PathBuf>,
    /// Endpoint override for DynamoDB (e.g. LocalStack)
    pub endpoint: Option<String>,
    pub timeout_ms: Option<u64>,
    /// Bound on optimistic merge attempts
    pub max_merge_attempts: u32,
}

impl TargetConfig {
    /// Build from a key lookup, e.g. the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut target = Self::default();
        target.overlay(lookup);
        target.validate()?;
        Ok(target)
    }

    /// Replace fields with non-empty values from `lookup`
    pub fn overlay<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let fields = [
            (TABLE_VAR, &mut self.table),
            (BUCKET_VAR, &mut self.bucket),
            (REGION_VAR, &mut self.region),
        ];
        for (key, field) in fields {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                *field = value;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.table.is_empty() {
            return Err(ConfigError::Missing(TABLE_VAR));
        }
        if self.bucket.is_empty() {
            return Err(ConfigError::Missing(BUCKET_VAR));
        }
        if self.region.is_empty() {
            return Err(ConfigError::Missing(REGION_VAR));
        }
        Ok(())
    }
}

impl PipelineConfig {
    /// Absolute deadline for a batch starting now
    pub fn deadline_from_now(&self) -> Option<Instant> {
        self.deadline_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms))
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn default_path() -> &'static str {
        "config.toml"
    }

    /// Overlay the environment onto the target section and validate it
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_lookup(|key| std::env::var(key).ok())
    }

    pub fn apply_lookup<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.target.overlay(lookup);
        self.target.validate()
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            deadline_ms: Some(30_000),
            deduplicate_images: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: StorageType::Dynamodb,
            sqlite_path: Some(PathBuf::from("data/aggregates.db")),
            endpoint: None,
            timeout_ms: Some(5_000),
            max_merge_attempts: crate::storage::memory::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_target_from_lookup() {
        let target =
            TargetConfig::from_lookup(lookup(&[("Table", "celebs"), ("Bucket", "b"), ("Region", "r")]))
                .unwrap();
        assert_eq!(target.table, "celebs");
        assert_eq!(target.bucket, "b");
        assert_eq!(target.region, "r");
    }

    #[test]
    fn test_missing_table_is_fatal() {
        let err = TargetConfig::from_lookup(lookup(&[("Bucket", "b"), ("Region", "r")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("Table"));
    }

    #[test]
    fn test_empty_value_counts_as_missing() {
        let err =
            TargetConfig::from_lookup(lookup(&[("Table", "t"), ("Bucket", ""), ("Region", "r")]))
                .unwrap_err();
        assert_eq!(err, ConfigError::Missing("Bucket"));
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut config: Config = toml::from_str(
            r#"
            [target]
            table = "from-file"
            bucket = "file-bucket"
            region = "eu-west-1"
            "#,
        )
        .unwrap();

        config.target.overlay(lookup(&[("Table", "from-env")]));
        assert_eq!(config.target.table, "from-env");
        assert_eq!(config.target.bucket, "file-bucket");
        assert!(config.target.validate().is_ok());
    }

    #[test]
    fn test_parse_full_file() {
        let config: Config = toml::from_str(
            r#"
            [pipeline]
            deadline_ms = 1500
            deduplicate_images = false

            [storage]
            type = "sqlite"
            sqlite_path = "/tmp/agg.db"
            max_merge_attempts = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.pipeline.deadline_ms, Some(1500));
        assert!(!config.pipeline.deduplicate_images);
        assert_eq!(config.storage.storage_type, StorageType::Sqlite);
        assert_eq!(config.storage.max_merge_attempts, 8);
        assert!(config.storage.endpoint.is_none());
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.pipeline.deduplicate_images);
        assert_eq!(config.storage.storage_type, StorageType::Dynamodb);
        assert!(config.target.validate().is_err());
    }

    #[test]
    fn test_apply_lookup_fills_and_validates() {
        let mut config: Config = toml::from_str(
            r#"
            [target]
            region = "eu-west-1"
            "#,
        )
        .unwrap();

        let err = config.apply_lookup(lookup(&[("Table", "celebs")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("Bucket"));

        config
            .apply_lookup(lookup(&[("Bucket", "images")]))
            .unwrap();
        assert_eq!(config.target.table, "celebs");
        assert_eq!(config.target.bucket, "images");
        assert_eq!(config.target.region, "eu-west-1");
    }
}
