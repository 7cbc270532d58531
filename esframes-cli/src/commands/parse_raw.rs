//! `esframes parse-raw`

use anyhow::{Context, Result};
use esframes::parser::RawDslParser;
use std::path::Path;
use tracing::debug;

/// Print the bucket and metric lists recovered from a raw request body.
pub fn run_parse_raw(dsl: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(dsl)
        .with_context(|| format!("Failed to read {}", dsl.display()))?;

    let parsed = RawDslParser::default()
        .parse(&raw)
        .context("Failed to parse raw DSL")?;
    debug!(
        buckets = parsed.bucket_aggs.len(),
        metrics = parsed.metrics.len(),
        "parsed raw DSL"
    );

    println!("{}", serde_json::to_string_pretty(&parsed)?);
    Ok(())
}
