//! Query model
//!
//! A [`Query`] carries an ordered list of bucket aggregations (index 0 is the
//! outermost) and a list of metric aggregations. The same lists drive request
//! building and response processing.

pub mod settings;

pub use settings::Settings;

use crate::error::EsFramesError;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use settings::null_as_default;
use std::collections::BTreeMap;
use std::fmt;

/// Bucket aggregation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketAggType {
    DateHistogram,
    Histogram,
    Terms,
    Filters,
    Nested,
    GeohashGrid,
}

impl BucketAggType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DateHistogram => "date_histogram",
            Self::Histogram => "histogram",
            Self::Terms => "terms",
            Self::Filters => "filters",
            Self::Nested => "nested",
            Self::GeohashGrid => "geohash_grid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "date_histogram" => Some(Self::DateHistogram),
            "histogram" => Some(Self::Histogram),
            "terms" => Some(Self::Terms),
            "filters" => Some(Self::Filters),
            "nested" => Some(Self::Nested),
            "geohash_grid" => Some(Self::GeohashGrid),
            _ => None,
        }
    }
}

/// Metric aggregation kinds. Unknown kinds are carried through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum MetricAggType {
    Count,
    Avg,
    Sum,
    Min,
    Max,
    Cardinality,
    Rate,
    Percentiles,
    ExtendedStats,
    TopMetrics,
    MovingAvg,
    MovingFn,
    CumulativeSum,
    Derivative,
    SerialDiff,
    BucketScript,
    RawData,
    RawDocument,
    Logs,
    Other(String),
}

impl MetricAggType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Count => "count",
            Self::Avg => "avg",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::Cardinality => "cardinality",
            Self::Rate => "rate",
            Self::Percentiles => "percentiles",
            Self::ExtendedStats => "extended_stats",
            Self::TopMetrics => "top_metrics",
            Self::MovingAvg => "moving_avg",
            Self::MovingFn => "moving_fn",
            Self::CumulativeSum => "cumulative_sum",
            Self::Derivative => "derivative",
            Self::SerialDiff => "serial_diff",
            Self::BucketScript => "bucket_script",
            Self::RawData => "raw_data",
            Self::RawDocument => "raw_document",
            Self::Logs => "logs",
            Self::Other(s) => s,
        }
    }

    /// Aggregations computed from sibling metric results
    pub fn is_pipeline(&self) -> bool {
        matches!(
            self,
            Self::MovingAvg
                | Self::MovingFn
                | Self::CumulativeSum
                | Self::Derivative
                | Self::SerialDiff
                | Self::BucketScript
        )
    }

    /// Pipelines whose `buckets_path` is a map of named variables
    pub fn has_multiple_bucket_paths(&self) -> bool {
        matches!(self, Self::BucketScript)
    }

    /// Metrics that return documents instead of aggregations
    pub fn is_document(&self) -> bool {
        matches!(self, Self::RawData | Self::RawDocument | Self::Logs)
    }
}

impl From<String> for MetricAggType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "count" => Self::Count,
            "avg" => Self::Avg,
            "sum" => Self::Sum,
            "min" => Self::Min,
            "max" => Self::Max,
            "cardinality" => Self::Cardinality,
            "rate" => Self::Rate,
            "percentiles" => Self::Percentiles,
            "extended_stats" => Self::ExtendedStats,
            "top_metrics" => Self::TopMetrics,
            "moving_avg" => Self::MovingAvg,
            "moving_fn" => Self::MovingFn,
            "cumulative_sum" => Self::CumulativeSum,
            "derivative" => Self::Derivative,
            "serial_diff" => Self::SerialDiff,
            "bucket_script" => Self::BucketScript,
            "raw_data" => Self::RawData,
            "raw_document" => Self::RawDocument,
            "logs" => Self::Logs,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for MetricAggType {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<MetricAggType> for String {
    fn from(t: MetricAggType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for MetricAggType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bucket aggregation definition
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BucketAgg {
    pub id: String,
    #[serde(rename = "type")]
    pub agg_type: BucketAggType,
    #[serde(default, deserialize_with = "null_as_default")]
    pub field: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub settings: Settings,
}

impl BucketAgg {
    pub fn new(id: impl Into<String>, agg_type: BucketAggType, field: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agg_type,
            field: field.into(),
            settings: Settings::new(),
        }
    }

    pub fn with_settings(mut self, settings: Value) -> Self {
        if let Value::Object(map) = settings {
            self.settings = map;
        }
        self
    }
}

/// One named variable of a multi-path pipeline
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineVariable {
    pub name: String,
    #[serde(default)]
    pub pipeline_agg: String,
}

/// A metric aggregation definition
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricAgg {
    pub id: String,
    #[serde(rename = "type")]
    pub agg_type: MetricAggType,
    #[serde(default, deserialize_with = "null_as_default")]
    pub field: String,
    #[serde(
        default,
        rename = "pipelineAgg",
        deserialize_with = "null_as_default",
        skip_serializing_if = "String::is_empty"
    )]
    pub pipeline_aggregate: String,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub pipeline_variables: Vec<PipelineVariable>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub settings: Settings,
    /// Which sub-statistics of `extended_stats` are displayed
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, Value>,
    #[serde(default)]
    pub hide: bool,
}

impl MetricAgg {
    pub fn new(id: impl Into<String>, agg_type: impl Into<MetricAggType>, field: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agg_type: agg_type.into(),
            field: field.into(),
            pipeline_aggregate: String::new(),
            pipeline_variables: Vec::new(),
            settings: Settings::new(),
            meta: BTreeMap::new(),
            hide: false,
        }
    }

    pub fn with_settings(mut self, settings: Value) -> Self {
        if let Value::Object(map) = settings {
            self.settings = map;
        }
        self
    }

    /// Sibling metric id a single-path pipeline aggregates over.
    ///
    /// Falls back to `field` when `pipelineAgg` is empty.
    pub fn pipeline_reference(&self) -> &str {
        if self.pipeline_aggregate.is_empty() {
            &self.field
        } else {
            &self.pipeline_aggregate
        }
    }

    pub fn meta_enabled(&self, key: &str) -> bool {
        self.meta.get(key).and_then(Value::as_bool).unwrap_or(false)
    }
}

/// Absolute query time range in epoch milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct TimeRange {
    pub from: i64,
    pub to: i64,
}

/// A single panel query
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub ref_id: String,
    /// Lucene query string
    pub query: String,
    pub alias: String,
    pub bucket_aggs: Vec<BucketAgg>,
    pub metrics: Vec<MetricAgg>,
    /// Interval suggested by the panel, 0 when unknown
    pub interval_ms: i64,
    /// Explicit minimum interval override such as `1m`
    pub interval: String,
    pub time_field: Option<String>,
    pub time_range: TimeRange,
    /// Hand-written request body, set when the code editor is active
    #[serde(rename = "rawDSLQuery", skip_serializing_if = "Option::is_none")]
    pub raw_dsl_query: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryJson {
    #[serde(default)]
    ref_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    query: String,
    #[serde(default, deserialize_with = "null_as_default")]
    alias: String,
    #[serde(default)]
    bucket_aggs: Option<Vec<BucketAgg>>,
    #[serde(default)]
    metrics: Option<Vec<MetricAggJson>>,
    #[serde(default)]
    interval_ms: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    interval: String,
    #[serde(default)]
    time_field: Option<String>,
    #[serde(default)]
    time_range: Option<TimeRange>,
    #[serde(default, rename = "rawDSLQuery", deserialize_with = "null_as_default")]
    raw_dsl_query: String,
    #[serde(default, deserialize_with = "null_as_default")]
    editor_type: String,
}

/// Metric as sent by the editor; `type` is checked after parsing so a
/// missing type reports which metric is broken.
#[derive(Debug, Deserialize)]
struct MetricAggJson {
    #[serde(default)]
    id: String,
    #[serde(default, rename = "type")]
    agg_type: Option<MetricAggType>,
    #[serde(flatten)]
    rest: serde_json::Map<String, Value>,
}

impl MetricAggJson {
    fn into_metric(self) -> Result<MetricAgg> {
        let agg_type = self
            .agg_type
            .ok_or_else(|| EsFramesError::InvalidQuery(format!("metric '{}' has no type", self.id)))?;
        let mut object = self.rest;
        object.insert("id".into(), Value::String(self.id));
        object.insert("type".into(), Value::String(agg_type.into()));
        serde_json::from_value(Value::Object(object))
            .map_err(|e| EsFramesError::InvalidQuery(e.to_string()))
    }
}

impl Query {
    /// Parse a single query object as sent by the panel editor.
    pub fn from_json(value: Value) -> Result<Self> {
        let wire: QueryJson =
            serde_json::from_value(value).map_err(|e| EsFramesError::InvalidQuery(e.to_string()))?;

        let metrics = match wire.metrics {
            Some(metrics) => metrics
                .into_iter()
                .map(MetricAggJson::into_metric)
                .collect::<Result<Vec<_>>>()?,
            None => vec![MetricAgg::new("1", MetricAggType::Count, "")],
        };

        let bucket_aggs = match wire.bucket_aggs {
            Some(aggs) => aggs,
            None if metrics.first().is_some_and(|m| m.agg_type.is_document()) => Vec::new(),
            None => vec![BucketAgg::new("2", BucketAggType::DateHistogram, "")
                .with_settings(serde_json::json!({"interval": "auto"}))],
        };

        let raw_dsl_query = (wire.editor_type == "code" && !wire.raw_dsl_query.trim().is_empty())
            .then_some(wire.raw_dsl_query);

        Ok(Query {
            ref_id: wire.ref_id,
            query: wire.query,
            alias: wire.alias,
            bucket_aggs,
            metrics,
            interval_ms: wire.interval_ms.unwrap_or(0),
            interval: wire.interval,
            time_field: wire.time_field.filter(|f| !f.is_empty()),
            time_range: wire.time_range.unwrap_or_default(),
            raw_dsl_query,
        })
    }

    /// Kind of the document metric when this query returns documents.
    pub fn document_kind(&self) -> Option<&MetricAggType> {
        self.metrics
            .first()
            .map(|m| &m.agg_type)
            .filter(|t| t.is_document())
    }

    pub fn metric(&self, id: &str) -> Option<&MetricAgg> {
        self.metrics.iter().find(|m| m.id == id)
    }

    pub fn bucket_agg(&self, id: &str) -> Option<&BucketAgg> {
        self.bucket_aggs.iter().find(|b| b.id == id)
    }
}

/// Parse a JSON array of queries.
pub fn parse_queries(json: &str) -> Result<Vec<Query>> {
    let values: Vec<Value> =
        serde_json::from_str(json).map_err(|e| EsFramesError::InvalidQuery(e.to_string()))?;
    values.into_iter().map(Query::from_json).collect()
}
