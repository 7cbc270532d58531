//! Datasource configuration
//!
//! Example `datasource.toml`:
//!
//! ```toml
//! index = "[logs-]YYYY.MM.DD"
//! interval = "Daily"
//! time_field = "@timestamp"
//! log_message_field = "line"
//! log_level_field = "lvl"
//! max_concurrent_shard_requests = 5
//! time_interval = "10s"
//! ```

use crate::dsl::interval::parse_interval_ms;
use crate::error::EsFramesError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Interval used to expand a dated index pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
pub enum IndexInterval {
    #[default]
    #[serde(rename = "none", alias = "", alias = "None")]
    None,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// Elasticsearch datasource settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DataSourceConfig {
    /// Index name or dated pattern such as `[logs-]YYYY.MM.DD`
    #[serde(default)]
    pub index: String,
    #[serde(default)]
    pub interval: IndexInterval,
    #[serde(default = "default_time_field")]
    pub time_field: String,
    #[serde(default)]
    pub log_message_field: String,
    #[serde(default)]
    pub log_level_field: String,
    #[serde(default)]
    pub max_concurrent_shard_requests: Option<u32>,
    /// Lower bound for the date histogram interval (default: 10s)
    #[serde(default = "default_time_interval")]
    pub time_interval: String,
    #[serde(default)]
    pub include_frozen: bool,
}

fn default_time_field() -> String {
    "@timestamp".to_string()
}

fn default_time_interval() -> String {
    "10s".to_string()
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self {
            index: String::new(),
            interval: IndexInterval::None,
            time_field: default_time_field(),
            log_message_field: String::new(),
            log_level_field: String::new(),
            max_concurrent_shard_requests: None,
            time_interval: default_time_interval(),
            include_frozen: false,
        }
    }
}

impl DataSourceConfig {
    /// Load a datasource config from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: DataSourceConfig = toml::from_str(&content)
            .map_err(|e| EsFramesError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.time_field.is_empty() {
            return Err(EsFramesError::Config("time_field must not be empty".into()));
        }
        if parse_interval_ms(&self.time_interval).is_none() {
            return Err(EsFramesError::Config(format!(
                "invalid time_interval '{}'",
                self.time_interval
            )));
        }
        Ok(())
    }

    /// Minimum date histogram interval in milliseconds
    pub fn min_interval_ms(&self) -> i64 {
        parse_interval_ms(&self.time_interval).unwrap_or(10_000)
    }

    pub fn configured_fields(&self) -> ConfiguredFields {
        ConfiguredFields {
            time_field: self.time_field.clone(),
            log_message_field: self.log_message_field.clone(),
            log_level_field: self.log_level_field.clone(),
        }
    }
}

/// Field names the response processor needs to shape document frames
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConfiguredFields {
    pub time_field: String,
    pub log_message_field: String,
    pub log_level_field: String,
}

impl Default for ConfiguredFields {
    fn default() -> Self {
        DataSourceConfig::default().configured_fields()
    }
}
