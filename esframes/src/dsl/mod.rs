//! Elasticsearch request DSL
//!
//! [`AggNode`] is the aggregation tree the builder produces: one typed payload
//! per node, children nested under the wire key `aggs`.

pub mod index_pattern;
pub mod interval;
pub mod search;

pub use search::{MultiSearchRequest, SearchRequest};

use crate::model::Settings;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A node of the aggregation tree
#[derive(Debug, Clone, PartialEq)]
pub struct AggNode {
    pub key: String,
    pub payload: AggPayload,
    pub children: Vec<AggNode>,
}

impl AggNode {
    pub fn new(key: impl Into<String>, payload: AggPayload) -> Self {
        Self {
            key: key.into(),
            payload,
            children: Vec::new(),
        }
    }

    /// The ES aggregation keyword of this node
    pub fn kind(&self) -> &str {
        self.payload.kind()
    }

    /// Wire form of this node's value: `{kind: payload, "aggs": {...}}`
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert(self.kind().to_string(), self.payload.to_json());
        if !self.children.is_empty() {
            object.insert("aggs".into(), aggs_to_json(&self.children));
        }
        Value::Object(object)
    }

    pub fn child(&self, key: &str) -> Option<&AggNode> {
        self.children.iter().find(|c| c.key == key)
    }
}

/// Wire form of a list of sibling aggregations
pub fn aggs_to_json(nodes: &[AggNode]) -> Value {
    let object: Map<String, Value> = nodes
        .iter()
        .map(|node| (node.key.clone(), node.to_json()))
        .collect();
    Value::Object(object)
}

/// Type-specific body of an aggregation node
#[derive(Debug, Clone, PartialEq)]
pub enum AggPayload {
    DateHistogram(DateHistogramAgg),
    Histogram(HistogramAgg),
    Terms(TermsAgg),
    Filters(FiltersAgg),
    Nested(NestedAgg),
    GeohashGrid(GeohashGridAgg),
    Metric(MetricAggBody),
    Pipeline(PipelineAggBody),
}

impl AggPayload {
    pub fn kind(&self) -> &str {
        match self {
            Self::DateHistogram(_) => "date_histogram",
            Self::Histogram(_) => "histogram",
            Self::Terms(_) => "terms",
            Self::Filters(_) => "filters",
            Self::Nested(_) => "nested",
            Self::GeohashGrid(_) => "geohash_grid",
            Self::Metric(m) => &m.kind,
            Self::Pipeline(p) => &p.kind,
        }
    }

    pub fn to_json(&self) -> Value {
        let value = match self {
            Self::DateHistogram(a) => serde_json::to_value(a),
            Self::Histogram(a) => serde_json::to_value(a),
            Self::Terms(a) => serde_json::to_value(a),
            Self::Filters(a) => serde_json::to_value(a),
            Self::Nested(a) => serde_json::to_value(a),
            Self::GeohashGrid(a) => serde_json::to_value(a),
            Self::Metric(a) => serde_json::to_value(a),
            Self::Pipeline(a) => serde_json::to_value(a),
        };
        // Plain structs of strings, numbers and maps always serialize.
        value.unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtendedBounds {
    pub min: i64,
    pub max: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateHistogramAgg {
    pub field: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calendar_interval: Option<String>,
    pub min_doc_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extended_bounds: Option<ExtendedBounds>,
    pub format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramAgg {
    pub field: String,
    pub interval: Value,
    pub min_doc_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TermsAgg {
    pub field: String,
    pub size: i64,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub order: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_doc_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FiltersAgg {
    pub filters: BTreeMap<String, QueryStringFilter>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryStringFilter {
    pub query_string: QueryString,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryString {
    pub analyze_wildcard: bool,
    pub query: String,
}

impl QueryStringFilter {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query_string: QueryString {
                analyze_wildcard: true,
                query: query.into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NestedAgg {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeohashGridAgg {
    pub field: String,
    pub precision: i64,
}

/// Leaf metric such as `avg` or `percentiles`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricAggBody {
    #[serde(skip)]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(flatten)]
    pub settings: Settings,
}

/// Pipeline aggregation over sibling metric results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineAggBody {
    #[serde(skip)]
    pub kind: String,
    pub buckets_path: BucketsPath,
    #[serde(flatten)]
    pub settings: Settings,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BucketsPath {
    Single(String),
    Named(BTreeMap<String, String>),
}
