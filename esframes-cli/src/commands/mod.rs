pub mod build;
pub mod parse_raw;
pub mod replay;

pub use build::run_build;
pub use parse_raw::run_parse_raw;
pub use replay::run_replay;

use anyhow::{bail, Context, Result};
use chrono::DateTime;
use esframes::model::{parse_queries, TimeRange};
use esframes::{DataSourceConfig, Query};
use std::path::Path;

/// `--from` / `--to` as given on the command line
#[derive(Debug, Default)]
pub struct TimeRangeArgs {
    from: Option<String>,
    to: Option<String>,
}

impl TimeRangeArgs {
    pub fn new(from: Option<String>, to: Option<String>) -> Self {
        Self { from, to }
    }

    /// Apply to `range`, keeping the bounds that were not given.
    fn apply(&self, range: &mut TimeRange) -> Result<()> {
        if let Some(from) = &self.from {
            range.from = parse_time(from)?;
        }
        if let Some(to) = &self.to {
            range.to = parse_time(to)?;
        }
        Ok(())
    }
}

/// Epoch milliseconds or an RFC 3339 timestamp.
pub fn parse_time(value: &str) -> Result<i64> {
    let value = value.trim();
    if let Ok(ms) = value.parse::<i64>() {
        return Ok(ms);
    }
    match DateTime::parse_from_rfc3339(value) {
        Ok(time) => Ok(time.timestamp_millis()),
        Err(e) => bail!("invalid time '{}': expected epoch ms or RFC 3339 ({})", value, e),
    }
}

pub fn load_config(path: Option<&Path>) -> Result<DataSourceConfig> {
    match path {
        Some(path) => DataSourceConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(DataSourceConfig::default()),
    }
}

pub fn load_queries(path: &Path, range: &TimeRangeArgs) -> Result<Vec<Query>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read queries {}", path.display()))?;
    let mut queries = parse_queries(&text).context("Failed to parse queries")?;
    for query in &mut queries {
        range.apply(&mut query.time_range)?;
    }
    Ok(queries)
}
