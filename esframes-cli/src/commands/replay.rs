//! `esframes replay`
//!
//! Runs the executor with a client that answers every request with a
//! recorded multi-search response, read from disk as it is decoded.

use super::{load_config, load_queries, TimeRangeArgs};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use esframes::{ConfiguredFields, DataQueryExecutor, EsFramesError, MultiSearchClient, ResponseBody};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Answers with the contents of a recorded response file
pub struct ReplayClient {
    response: PathBuf,
    fields: ConfiguredFields,
}

impl ReplayClient {
    pub fn new(response: impl Into<PathBuf>, fields: ConfiguredFields) -> Self {
        Self {
            response: response.into(),
            fields,
        }
    }
}

#[async_trait]
impl MultiSearchClient for ReplayClient {
    fn configured_fields(&self) -> ConfiguredFields {
        self.fields.clone()
    }

    async fn execute_multisearch(&self, body: String) -> esframes::Result<ResponseBody> {
        debug!(request_bytes = body.len(), response = %self.response.display(), "replaying recorded response");
        let file = File::open(&self.response).map_err(|e| {
            EsFramesError::Downstream(format!("cannot open {}: {}", self.response.display(), e))
        })?;
        Ok(Box::new(BufReader::new(file)))
    }
}

pub async fn run_replay(
    queries: &Path,
    response: &Path,
    range: &TimeRangeArgs,
    config: Option<&Path>,
    keep_labels: bool,
) -> Result<()> {
    let config = load_config(config)?;
    let queries = load_queries(queries, range)?;
    if !response.is_file() {
        bail!("Response file {} does not exist", response.display());
    }

    let client = ReplayClient::new(response, config.configured_fields());
    let executor = DataQueryExecutor::new(client, config).keep_labels(keep_labels);
    let result = executor
        .execute(&queries)
        .await
        .context("Failed to execute queries")?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use esframes::model::parse_queries;
    use esframes::DataSourceConfig;
    use serde_json::json;
    use std::io::Write;

    #[tokio::test]
    async fn test_replay_client_drives_executor() {
        let queries = parse_queries(
            r#"[{"refId": "A", "metrics": [{"type": "count", "id": "1"}],
                 "bucketAggs": [{"type": "terms", "field": "host", "id": "2"},
                                {"type": "date_histogram", "field": "@timestamp", "id": "3"}]}]"#,
        )
        .unwrap();
        let recorded = json!({"responses": [{"aggregations": {"2": {"buckets": [
            {"key": "server1", "3": {"buckets": [{"key": 1000, "doc_count": 1}]}}
        ]}}}]});
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", recorded).unwrap();
        let config = DataSourceConfig::default();
        let client = ReplayClient::new(file.path(), config.configured_fields());

        let result = DataQueryExecutor::new(client, config)
            .keep_labels(true)
            .execute(&queries)
            .await
            .unwrap();

        let frames = &result.get("A").unwrap().frames;
        assert_eq!(frames.len(), 1);
        let value = serde_json::to_value(&frames[0]).unwrap();
        assert_eq!(value["fields"][1]["labels"], json!({"host": "server1"}));
        assert_eq!(value["fields"][1]["config"]["displayNameFromDS"], "server1");
    }

    #[tokio::test]
    async fn test_missing_recording_is_a_query_error() {
        let queries = parse_queries(r#"[{"refId": "A", "metrics": [{"type": "count", "id": "1"}]}]"#).unwrap();
        let config = DataSourceConfig::default();
        let client = ReplayClient::new("/nonexistent/response.json", config.configured_fields());

        let result = DataQueryExecutor::new(client, config).execute(&queries).await.unwrap();

        let error = result.get("A").unwrap().error.as_ref().unwrap();
        assert!(error.is_downstream());
    }
}
