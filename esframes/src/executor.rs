//! Batch execution
//!
//! [`DataQueryExecutor`] builds one multi-search request for a batch of
//! queries, hands it to a [`MultiSearchClient`], stream-decodes the reply and
//! pairs every sub-response with the query at the same index. Failures that
//! concern a single query end up in that query's [`DataResponse`]; only
//! build errors fail the whole batch.

use crate::builder::SearchRequestFactory;
use crate::config::{ConfiguredFields, DataSourceConfig};
use crate::decoder::StreamingDecoder;
use crate::error::EsFramesError;
use crate::frame::Frame;
use crate::model::Query;
use crate::parser::RawDslParser;
use crate::processor::ResponseProcessor;
use crate::Result;
use async_trait::async_trait;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::io::Read;
use tracing::{debug, info, instrument, warn};

/// Response body as handed over by the transport, read once front to back
pub type ResponseBody = Box<dyn Read + Send>;

/// Transport for multi-search requests
#[async_trait]
pub trait MultiSearchClient: Send + Sync {
    /// Field names used to shape document frames
    fn configured_fields(&self) -> ConfiguredFields;

    /// POST an NDJSON multi-search body and return a reader over the
    /// response body. The reader is decoded as it is read.
    async fn execute_multisearch(&self, body: String) -> Result<ResponseBody>;
}

/// Frames or error of one query
#[derive(Debug, Clone, Default, Serialize)]
pub struct DataResponse {
    pub frames: Vec<Frame>,
    #[serde(serialize_with = "error_text", skip_serializing_if = "Option::is_none")]
    pub error: Option<EsFramesError>,
}

impl DataResponse {
    fn failed(error: EsFramesError) -> Self {
        Self {
            frames: Vec::new(),
            error: Some(error),
        }
    }
}

fn error_text<S: Serializer>(error: &Option<EsFramesError>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_str(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Results of a batch keyed by query `refId`
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryDataResponse {
    pub responses: BTreeMap<String, DataResponse>,
}

impl QueryDataResponse {
    pub fn get(&self, ref_id: &str) -> Option<&DataResponse> {
        self.responses.get(ref_id)
    }
}

/// Runs query batches against one datasource
pub struct DataQueryExecutor<C> {
    client: C,
    config: DataSourceConfig,
    parser: RawDslParser,
    keep_labels: bool,
}

impl<C: MultiSearchClient> DataQueryExecutor<C> {
    pub fn new(client: C, config: DataSourceConfig) -> Self {
        Self {
            client,
            config,
            parser: RawDslParser::default(),
            keep_labels: false,
        }
    }

    /// Use a custom raw DSL parser (e.g. one with extra registry entries).
    pub fn with_parser(mut self, parser: RawDslParser) -> Self {
        self.parser = parser;
        self
    }

    /// Keep bucket labels on time-series value fields.
    pub fn keep_labels(mut self, keep: bool) -> Self {
        self.keep_labels = keep;
        self
    }

    #[instrument(skip_all, fields(queries = queries.len()))]
    pub async fn execute(&self, queries: &[Query]) -> Result<QueryDataResponse> {
        let mut result = QueryDataResponse::default();
        if queries.is_empty() {
            return Ok(result);
        }

        // raw bodies are sent as written; frames come from their parsed aggregations
        let resolved = queries
            .iter()
            .map(|q| self.parser.resolve_query(q))
            .collect::<Result<Vec<_>>>()?;
        let body = SearchRequestFactory::new(&self.config)
            .build_multisearch(queries)?
            .encode()?;
        debug!(bytes = body.len(), "sending multi-search request");

        let reader = match self.client.execute_multisearch(body).await {
            Ok(reader) => reader,
            Err(e) => {
                warn!(error = %e, "multi-search request failed");
                for query in queries {
                    result
                        .responses
                        .insert(query.ref_id.clone(), DataResponse::failed(e.clone()));
                }
                return Ok(result);
            }
        };

        let outcome = StreamingDecoder::new(reader).decode();
        if let Some(e) = &outcome.error {
            warn!(decoded = outcome.responses.len(), error = %e, "multi-search response incomplete");
        }

        let fields = self.client.configured_fields();
        let processor = ResponseProcessor::new(&fields).keep_labels(self.keep_labels);

        for (index, query) in resolved.iter().enumerate() {
            let response = match outcome.responses.get(index) {
                Some(response) => match processor.process(query, response) {
                    Ok(frames) => DataResponse {
                        frames,
                        error: None,
                    },
                    Err(e) => DataResponse::failed(e),
                },
                None => DataResponse::failed(outcome.error.clone().unwrap_or_else(|| {
                    EsFramesError::Downstream(format!("no response for query {}", query.ref_id))
                })),
            };
            result.responses.insert(query.ref_id.clone(), response);
        }

        info!(
            queries = queries.len(),
            failed = result.responses.values().filter(|r| r.error.is_some()).count(),
            "batch executed"
        );
        Ok(result)
    }
}
