//! `esframes build`

use super::{load_config, load_queries, TimeRangeArgs};
use anyhow::{Context, Result};
use esframes::builder::SearchRequestFactory;
use std::path::Path;
use tracing::info;

/// Print the multi-search body for the queries in `queries`.
pub fn run_build(queries: &Path, range: &TimeRangeArgs, config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let queries = load_queries(queries, range)?;

    let body = build_body(&config, &queries)?;
    info!(queries = queries.len(), bytes = body.len(), "built multi-search body");
    print!("{}", body);
    Ok(())
}

fn build_body(config: &esframes::DataSourceConfig, queries: &[esframes::Query]) -> Result<String> {
    let request = SearchRequestFactory::new(config)
        .build_multisearch(queries)
        .context("Failed to build search requests")?;
    Ok(request.encode()?)
}
