//! Search request bodies and multi-search NDJSON encoding

use super::interval::substitute;
use super::{aggs_to_json, AggNode, QueryStringFilter};
use crate::Result;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::{json, Map, Value};

pub const DATE_FORMAT_EPOCH_MS: &str = "epoch_millis";
pub const HIGHLIGHT_PRE_TAG: &str = "@HIGHLIGHT@";
pub const HIGHLIGHT_POST_TAG: &str = "@/HIGHLIGHT@";
pub const HIGHLIGHT_FRAGMENT_SIZE: i64 = 2147483647;

/// A filter clause of the bool query
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Range {
        field: String,
        gte: i64,
        lte: i64,
        format: String,
    },
    QueryString(QueryStringFilter),
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Filter::Range {
                field,
                gte,
                lte,
                format,
            } => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(
                    "range",
                    &json!({ field.as_str(): {"gte": gte, "lte": lte, "format": format} }),
                )?;
                map.end()
            }
            Filter::QueryString(q) => q.serialize(serializer),
        }
    }
}

/// `{"bool": {"filter": [...]}}`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoolQuery {
    pub filters: Vec<Filter>,
}

impl Serialize for BoolQuery {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("bool", &json!({ "filter": self.filters }))?;
        map.end()
    }
}

fn serialize_aggs<S: Serializer>(aggs: &[AggNode], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    aggs_to_json(aggs).serialize(serializer)
}

/// Body of one search request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchRequestBody {
    pub size: i64,
    pub query: BoolQuery,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_fields: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub docvalue_fields: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlight: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub search_after: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty", serialize_with = "serialize_aggs")]
    pub aggs: Vec<AggNode>,
}

impl SearchRequestBody {
    pub fn new(size: i64) -> Self {
        Self {
            size,
            query: BoolQuery::default(),
            sort: Vec::new(),
            script_fields: None,
            docvalue_fields: Vec::new(),
            fields: Vec::new(),
            highlight: None,
            search_after: Vec::new(),
            aggs: Vec::new(),
        }
    }

    pub fn add_sort(&mut self, field: &str, order: &str, unmapped_type: Option<&str>) {
        let mut spec = Map::new();
        spec.insert("order".into(), Value::String(order.to_string()));
        if let Some(unmapped) = unmapped_type {
            spec.insert("unmapped_type".into(), Value::String(unmapped.to_string()));
        }
        self.sort.push(json!({ field: spec }));
    }

    pub fn add_highlight(&mut self) {
        self.highlight = Some(json!({
            "fields": {"*": {}},
            "pre_tags": [HIGHLIGHT_PRE_TAG],
            "post_tags": [HIGHLIGHT_POST_TAG],
            "fragment_size": HIGHLIGHT_FRAGMENT_SIZE,
        }));
    }
}

/// Request body as sent: built from the query model or hand-written
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Built(SearchRequestBody),
    Raw(Value),
}

impl RequestBody {
    pub fn to_json(&self) -> Result<Value> {
        match self {
            RequestBody::Built(body) => Ok(serde_json::to_value(body)?),
            RequestBody::Raw(value) => Ok(value.clone()),
        }
    }
}

/// One entry of a multi-search batch
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    /// Comma-joined index names
    pub index: String,
    /// Effective date histogram interval used for placeholder substitution
    pub interval_ms: i64,
    pub body: RequestBody,
}

#[derive(Debug, Serialize)]
struct MultiSearchHeader<'a> {
    ignore_unavailable: bool,
    index: &'a str,
    search_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    ignore_throttled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_concurrent_shard_requests: Option<u32>,
}

/// A batch of search requests sent as one `_msearch` call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultiSearchRequest {
    pub requests: Vec<SearchRequest>,
    pub max_concurrent_shard_requests: Option<u32>,
    pub include_frozen: bool,
}

impl MultiSearchRequest {
    /// Encode as newline-delimited header/body pairs.
    pub fn encode(&self) -> Result<String> {
        let mut out = String::new();
        for request in &self.requests {
            let header = MultiSearchHeader {
                ignore_unavailable: true,
                index: &request.index,
                search_type: "query_then_fetch",
                ignore_throttled: self.include_frozen.then_some(false),
                max_concurrent_shard_requests: self.max_concurrent_shard_requests,
            };
            out.push_str(&serde_json::to_string(&header)?);
            out.push('\n');

            let body = serde_json::to_string(&request.body.to_json()?)?;
            out.push_str(&substitute(&body, request.interval_ms));
            out.push('\n');
        }
        Ok(out)
    }
}
