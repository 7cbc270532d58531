//! Raw DSL aggregation parser
//!
//! Reconstructs bucket and metric definitions from a hand-written request
//! body so raw queries go through the same response processing as queries
//! built in the editor. Parsing is best effort: aggregation keywords with no
//! registered parser are skipped.

use crate::error::EsFramesError;
use crate::model::{BucketAgg, BucketAggType, MetricAgg, MetricAggType, PipelineVariable, Query, Settings};
use crate::Result;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, instrument};

/// Stats enabled on `extended_stats` metrics recovered from raw DSL
const EXTENDED_STATS_DEFAULTS: [&str; 3] = ["avg", "min", "max"];

/// Bucket and metric lists recovered from a raw request body
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedAggs {
    pub bucket_aggs: Vec<BucketAgg>,
    pub metrics: Vec<MetricAgg>,
}

/// What a registered parser produced for one aggregation
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedAgg {
    Bucket(BucketAgg),
    Metric(MetricAgg),
}

/// Parse function: aggregation key, keyword and keyword body.
pub type AggParseFn = fn(id: &str, kind: &str, body: &Map<String, Value>) -> ParsedAgg;

/// One row of the parser registry
#[derive(Clone, Copy)]
pub struct AggParserEntry {
    pub matches: fn(&str) -> bool,
    pub parse: AggParseFn,
}

impl AggParserEntry {
    pub fn new(matches: fn(&str) -> bool, parse: AggParseFn) -> Self {
        Self { matches, parse }
    }
}

impl std::fmt::Debug for AggParserEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggParserEntry").finish_non_exhaustive()
    }
}

/// Parser over an explicit registry of aggregation parsers
#[derive(Debug, Clone)]
pub struct RawDslParser {
    registry: Vec<AggParserEntry>,
}

impl Default for RawDslParser {
    fn default() -> Self {
        Self::new(default_registry())
    }
}

impl RawDslParser {
    pub fn new(registry: Vec<AggParserEntry>) -> Self {
        Self { registry }
    }

    /// Add a parser ahead of the existing ones.
    pub fn with_entry(mut self, entry: AggParserEntry) -> Self {
        self.registry.insert(0, entry);
        self
    }

    /// Parse a raw request body given as JSON text.
    pub fn parse(&self, raw: &str) -> Result<ParsedAggs> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| EsFramesError::InvalidRawDsl(e.to_string()))?;
        self.parse_value(&value)
    }

    /// Parse a raw request body.
    #[instrument(level = "debug", skip_all)]
    pub fn parse_value(&self, body: &Value) -> Result<ParsedAggs> {
        let body = body
            .as_object()
            .ok_or_else(|| EsFramesError::InvalidRawDsl("request body must be a JSON object".into()))?;

        let mut parsed = ParsedAggs::default();
        if let Some(aggs) = nested_aggs(body) {
            self.walk(aggs, &mut parsed);
        }

        if !parsed.bucket_aggs.is_empty() && parsed.metrics.is_empty() {
            let id = unused_id(&parsed);
            parsed.metrics.push(MetricAgg::new(id, MetricAggType::Count, ""));
        }
        Ok(parsed)
    }

    fn walk(&self, aggs: &Map<String, Value>, parsed: &mut ParsedAggs) {
        for (id, definition) in aggs {
            let Some(definition) = definition.as_object() else {
                debug!(agg = %id, "aggregation definition is not an object");
                continue;
            };

            let keyword = definition
                .iter()
                .find(|(k, _)| !matches!(k.as_str(), "aggs" | "aggregations" | "meta"));

            if let Some((kind, body)) = keyword {
                let body = body.as_object().cloned().unwrap_or_default();
                match self.registry.iter().find(|entry| (entry.matches)(kind.as_str())) {
                    Some(entry) => match (entry.parse)(id.as_str(), kind.as_str(), &body) {
                        ParsedAgg::Bucket(bucket) => parsed.bucket_aggs.push(bucket),
                        ParsedAgg::Metric(metric) => {
                            // a terms order metric repeats a leaf metric; the deepest copy wins
                            parsed.metrics.retain(|m| m.id != metric.id);
                            parsed.metrics.push(metric);
                        }
                    },
                    None => debug!(agg = %id, kind = %kind, "no parser for aggregation keyword, skipped"),
                }
            }

            if let Some(children) = nested_aggs(definition) {
                self.walk(children, parsed);
            }
        }
    }

    /// A copy of `query` whose bucket and metric lists come from its raw
    /// request body. Queries without one are returned unchanged.
    ///
    /// A raw body without aggregations keeps the query's document metric,
    /// or becomes a `raw_document` query.
    pub fn resolve_query(&self, query: &Query) -> Result<Query> {
        let Some(raw) = &query.raw_dsl_query else {
            return Ok(query.clone());
        };
        let parsed = self.parse(raw)?;
        let mut resolved = query.clone();

        if parsed.bucket_aggs.is_empty() && parsed.metrics.is_empty() {
            resolved.bucket_aggs.clear();
            if query.document_kind().is_none() {
                resolved.metrics = vec![MetricAgg::new("1", MetricAggType::RawDocument, "")];
            }
        } else {
            resolved.bucket_aggs = parsed.bucket_aggs;
            resolved.metrics = parsed.metrics;
        }
        Ok(resolved)
    }
}

fn nested_aggs(object: &Map<String, Value>) -> Option<&Map<String, Value>> {
    object
        .get("aggs")
        .or_else(|| object.get("aggregations"))
        .and_then(Value::as_object)
}

fn unused_id(parsed: &ParsedAggs) -> String {
    let taken = |id: &str| {
        parsed.bucket_aggs.iter().any(|b| b.id == id) || parsed.metrics.iter().any(|m| m.id == id)
    };
    (1..)
        .map(|n: u32| n.to_string())
        .find(|id| !taken(id))
        .unwrap_or_else(|| "count".to_string())
}

/// The parsers every [`RawDslParser::default`] starts with.
pub fn default_registry() -> Vec<AggParserEntry> {
    vec![
        AggParserEntry::new(|k| k == "date_histogram", parse_date_histogram),
        AggParserEntry::new(|k| k == "histogram", parse_histogram),
        AggParserEntry::new(|k| k == "terms", parse_terms),
        AggParserEntry::new(|k| k == "filters", parse_filters),
        AggParserEntry::new(|k| k == "geohash_grid", parse_geohash_grid),
        AggParserEntry::new(|k| k == "nested", parse_nested),
        AggParserEntry::new(
            |k| matches!(k, "avg" | "sum" | "min" | "max" | "cardinality" | "rate" | "percentiles"),
            parse_field_metric,
        ),
        AggParserEntry::new(|k| k == "extended_stats", parse_extended_stats),
        AggParserEntry::new(|k| k == "top_metrics", parse_top_metrics),
        AggParserEntry::new(
            |k| matches!(k, "moving_avg" | "moving_fn" | "derivative" | "cumulative_sum" | "serial_diff"),
            parse_pipeline,
        ),
        AggParserEntry::new(|k| k == "bucket_script", parse_bucket_script),
    ]
}

fn field_of(body: &Map<String, Value>) -> String {
    body.get("field").and_then(Value::as_str).unwrap_or_default().to_string()
}

/// Copy the listed keys that are present.
fn pick(body: &Map<String, Value>, keys: &[&str]) -> Settings {
    keys.iter()
        .filter_map(|k| body.get(*k).map(|v| (k.to_string(), v.clone())))
        .collect()
}

fn parse_date_histogram(id: &str, _kind: &str, body: &Map<String, Value>) -> ParsedAgg {
    let mut settings = pick(body, &["min_doc_count", "offset", "format", "missing"]);
    let interval = ["fixed_interval", "calendar_interval", "interval"]
        .iter()
        .find_map(|k| body.get(*k).and_then(Value::as_str))
        .map(|i| if i.starts_with("$__interval") { "auto" } else { i })
        .unwrap_or("auto");
    settings.insert("interval".into(), Value::String(interval.to_string()));
    if let Some(tz) = body.get("time_zone") {
        settings.insert("timeZone".into(), tz.clone());
    }
    ParsedAgg::Bucket(BucketAgg {
        id: id.to_string(),
        agg_type: BucketAggType::DateHistogram,
        field: field_of(body),
        settings,
    })
}

fn parse_histogram(id: &str, _kind: &str, body: &Map<String, Value>) -> ParsedAgg {
    ParsedAgg::Bucket(BucketAgg {
        id: id.to_string(),
        agg_type: BucketAggType::Histogram,
        field: field_of(body),
        settings: pick(body, &["interval", "min_doc_count", "missing"]),
    })
}

fn parse_terms(id: &str, _kind: &str, body: &Map<String, Value>) -> ParsedAgg {
    let mut settings = pick(body, &["size", "min_doc_count", "missing"]);

    let order = match body.get("order") {
        Some(Value::Array(items)) => items.first().and_then(Value::as_object),
        Some(Value::Object(o)) => Some(o),
        _ => None,
    };
    if let Some((key, direction)) = order.and_then(|o| o.iter().next()) {
        let order_by = if key == "_key" { "_term" } else { key.as_str() };
        settings.insert("orderBy".into(), Value::String(order_by.to_string()));
        settings.insert("order".into(), direction.clone());
    }

    ParsedAgg::Bucket(BucketAgg {
        id: id.to_string(),
        agg_type: BucketAggType::Terms,
        field: field_of(body),
        settings,
    })
}

fn parse_filters(id: &str, _kind: &str, body: &Map<String, Value>) -> ParsedAgg {
    let filters: Vec<Value> = body
        .get("filters")
        .and_then(Value::as_object)
        .map(|filters| {
            filters
                .iter()
                .map(|(label, filter)| {
                    let query = filter
                        .pointer("/query_string/query")
                        .and_then(Value::as_str)
                        .unwrap_or("*");
                    json!({ "query": query, "label": label })
                })
                .collect()
        })
        .unwrap_or_default();

    let mut settings = Settings::new();
    settings.insert("filters".into(), Value::Array(filters));
    ParsedAgg::Bucket(BucketAgg {
        id: id.to_string(),
        agg_type: BucketAggType::Filters,
        field: String::new(),
        settings,
    })
}

fn parse_geohash_grid(id: &str, _kind: &str, body: &Map<String, Value>) -> ParsedAgg {
    ParsedAgg::Bucket(BucketAgg {
        id: id.to_string(),
        agg_type: BucketAggType::GeohashGrid,
        field: field_of(body),
        settings: pick(body, &["precision"]),
    })
}

fn parse_nested(id: &str, _kind: &str, body: &Map<String, Value>) -> ParsedAgg {
    ParsedAgg::Bucket(BucketAgg {
        id: id.to_string(),
        agg_type: BucketAggType::Nested,
        field: body.get("path").and_then(Value::as_str).unwrap_or_default().to_string(),
        settings: Settings::new(),
    })
}

fn field_metric(id: &str, kind: &str, body: &Map<String, Value>) -> MetricAgg {
    let mut metric = MetricAgg::new(id, kind, field_of(body));
    metric.settings = body
        .iter()
        .filter(|(k, _)| k.as_str() != "field")
        .map(|(k, v)| (k.clone(), script_text(k, v)))
        .collect();
    metric
}

fn parse_field_metric(id: &str, kind: &str, body: &Map<String, Value>) -> ParsedAgg {
    ParsedAgg::Metric(field_metric(id, kind, body))
}

fn parse_extended_stats(id: &str, kind: &str, body: &Map<String, Value>) -> ParsedAgg {
    let mut metric = field_metric(id, kind, body);
    for stat in EXTENDED_STATS_DEFAULTS {
        metric.meta.insert(stat.to_string(), Value::Bool(true));
    }
    ParsedAgg::Metric(metric)
}

fn parse_top_metrics(id: &str, kind: &str, body: &Map<String, Value>) -> ParsedAgg {
    let fields: Vec<Value> = match body.get("metrics") {
        Some(Value::Array(items)) => items.iter().filter_map(|m| m.get("field").cloned()).collect(),
        Some(Value::Object(m)) => m.get("field").cloned().into_iter().collect(),
        _ => Vec::new(),
    };

    let mut metric = MetricAgg::new(id, kind, "");
    metric.settings.insert("metrics".into(), Value::Array(fields));

    let sort = match body.get("sort") {
        Some(Value::Array(items)) => items.first().and_then(Value::as_object),
        Some(Value::Object(o)) => Some(o),
        _ => None,
    };
    if let Some((field, order)) = sort.and_then(|s| s.iter().next()) {
        let order = order
            .as_str()
            .or_else(|| order.get("order").and_then(Value::as_str))
            .unwrap_or("desc");
        metric.settings.insert("orderBy".into(), Value::String(field.clone()));
        metric.settings.insert("order".into(), Value::String(order.to_string()));
    }
    ParsedAgg::Metric(metric)
}

fn parse_pipeline(id: &str, kind: &str, body: &Map<String, Value>) -> ParsedAgg {
    let path = body.get("buckets_path").and_then(Value::as_str).unwrap_or_default();
    let mut metric = MetricAgg::new(id, kind, path);
    metric.pipeline_aggregate = path.to_string();
    metric.settings = body
        .iter()
        .filter(|(k, _)| k.as_str() != "buckets_path")
        .map(|(k, v)| (k.clone(), script_text(k, v)))
        .collect();
    ParsedAgg::Metric(metric)
}

fn parse_bucket_script(id: &str, kind: &str, body: &Map<String, Value>) -> ParsedAgg {
    let mut metric = MetricAgg::new(id, kind, "");
    metric.pipeline_variables = match body.get("buckets_path") {
        Some(Value::String(path)) => vec![PipelineVariable {
            name: "var1".into(),
            pipeline_agg: path.clone(),
        }],
        Some(Value::Object(paths)) => paths
            .iter()
            .filter_map(|(name, path)| {
                Some(PipelineVariable {
                    name: name.clone(),
                    pipeline_agg: path.as_str()?.to_string(),
                })
            })
            .collect(),
        _ => Vec::new(),
    };
    metric.settings = body
        .iter()
        .filter(|(k, _)| k.as_str() != "buckets_path")
        .map(|(k, v)| (k.clone(), script_text(k, v)))
        .collect();
    ParsedAgg::Metric(metric)
}

/// `script` objects (`{source}` / `{inline}`) flattened to their text.
fn script_text(key: &str, value: &Value) -> Value {
    if key != "script" {
        return value.clone();
    }
    value
        .get("source")
        .or_else(|| value.get("inline"))
        .cloned()
        .unwrap_or_else(|| value.clone())
}
