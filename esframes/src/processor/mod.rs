//! Decoded search responses to frames
//!
//! Aggregation responses are walked depth-first along the query's bucket
//! aggregations. Bucket keys seen on the way down accumulate as `props`; the
//! innermost bucket produces time-series frames when it is a
//! `date_histogram` and rows of a single table frame otherwise. Document
//! queries (`raw_document`, `raw_data`, `logs`) are turned into frames from
//! the hits.

mod documents;
mod table;
mod time_series;

pub use documents::flatten;

use crate::config::ConfiguredFields;
use crate::decoder::SearchResponse;
use crate::error::EsFramesError;
use crate::frame::{Frame, Labels};
use crate::model::settings::coerce_int;
use crate::model::{BucketAgg, BucketAggType, Query};
use crate::naming;
use crate::Result;
use serde_json::{Map, Value};
use table::TableBuilder;
use tracing::{debug, instrument, warn};

/// Turns one decoded [`SearchResponse`] into the frames of its query.
#[derive(Debug, Clone)]
pub struct ResponseProcessor<'a> {
    fields: &'a ConfiguredFields,
    keep_labels: bool,
}

impl<'a> ResponseProcessor<'a> {
    pub fn new(fields: &'a ConfiguredFields) -> Self {
        Self {
            fields,
            keep_labels: false,
        }
    }

    /// Keep bucket labels on time-series value fields instead of folding
    /// them into the frame name.
    pub fn keep_labels(mut self, keep: bool) -> Self {
        self.keep_labels = keep;
        self
    }

    #[instrument(skip_all, fields(ref_id = %query.ref_id))]
    pub fn process(&self, query: &Query, response: &SearchResponse) -> Result<Vec<Frame>> {
        if let Some(message) = response.error_message() {
            warn!(status = ?response.status, error = %message, "search returned an error");
            return Err(EsFramesError::Downstream(message));
        }

        let mut frames = match query.document_kind() {
            Some(kind) => documents::document_frames(query, kind, response, self.fields)?,
            None => self.aggregation_frames(query, response),
        };

        for frame in &mut frames {
            frame.ref_id = query.ref_id.clone();
        }
        debug!(frames = frames.len(), "processed response");
        Ok(frames)
    }

    fn aggregation_frames(&self, query: &Query, response: &SearchResponse) -> Vec<Frame> {
        let Some(aggregations) = &response.aggregations else {
            debug!("response has no aggregations");
            return Vec::new();
        };

        let mut walker = BucketWalker::new(query);
        walker.walk(aggregations, 0, &Labels::new());
        let mut frames = walker.finish();

        naming::name_series(&mut frames, query, self.keep_labels);
        if let Some(k) = trim_edges(query) {
            for frame in frames.iter_mut().filter(|f| f.is_time_series()) {
                frame.trim_edges(k);
            }
        }
        frames
    }
}

/// `trimEdges` of the first `date_histogram`, when positive.
fn trim_edges(query: &Query) -> Option<usize> {
    let histogram = query
        .bucket_aggs
        .iter()
        .find(|b| b.agg_type == BucketAggType::DateHistogram)?;
    let k = histogram.settings.get("trimEdges").and_then(coerce_int)?;
    usize::try_from(k).ok().filter(|k| *k > 0)
}

/// Depth-first walk state. Time-series frames are collected as they are
/// produced; table rows from every branch go into one table.
struct BucketWalker<'q> {
    query: &'q Query,
    frames: Vec<Frame>,
    table: TableBuilder,
}

impl<'q> BucketWalker<'q> {
    fn new(query: &'q Query) -> Self {
        Self {
            query,
            frames: Vec::new(),
            table: TableBuilder::default(),
        }
    }

    fn walk(&mut self, aggregations: &Map<String, Value>, depth: usize, props: &Labels) {
        let Some(agg_def) = self.query.bucket_aggs.get(depth) else {
            return;
        };
        let Some(agg) = aggregations.get(&agg_def.id).and_then(Value::as_object) else {
            debug!(agg = %agg_def.id, depth, "bucket aggregation missing from response");
            return;
        };
        let innermost = depth + 1 == self.query.bucket_aggs.len();

        if innermost && agg_def.agg_type == BucketAggType::DateHistogram {
            let buckets: Vec<&Map<String, Value>> =
                buckets_of(agg_def, agg).into_iter().map(|(_, b)| b).collect();
            self.frames
                .extend(time_series::series_frames(&buckets, &self.query.metrics, props));
            return;
        }

        for (key, bucket) in buckets_of(agg_def, agg) {
            if innermost {
                self.table
                    .add_row(agg_def, key.as_ref(), bucket, props, &self.query.metrics);
                continue;
            }

            match key_text(key.as_ref(), bucket) {
                Some(text) => {
                    let mut props = props.clone();
                    props.insert(prop_name(agg_def), text);
                    self.walk(bucket, depth + 1, &props);
                }
                None => self.walk(bucket, depth + 1, props),
            }
        }
    }

    fn finish(mut self) -> Vec<Frame> {
        if let Some(table) = self.table.build() {
            self.frames.push(table);
        }
        self.frames
    }
}

/// Buckets of one aggregation result with their keys. Keyed buckets
/// (`filters`) use the map key; a `nested` result is its own single bucket.
fn buckets_of<'v>(
    agg_def: &BucketAgg,
    agg: &'v Map<String, Value>,
) -> Vec<(Option<Value>, &'v Map<String, Value>)> {
    if agg_def.agg_type == BucketAggType::Nested {
        return vec![(None, agg)];
    }

    match agg.get("buckets") {
        Some(Value::Array(buckets)) => buckets
            .iter()
            .filter_map(Value::as_object)
            .map(|b| (b.get("key").cloned(), b))
            .collect(),
        Some(Value::Object(buckets)) => buckets
            .iter()
            .filter_map(|(k, b)| b.as_object().map(|b| (Some(Value::String(k.clone())), b)))
            .collect(),
        _ => Vec::new(),
    }
}

/// Column or label name a bucket key is recorded under.
fn prop_name(agg_def: &BucketAgg) -> String {
    if agg_def.agg_type == BucketAggType::Filters || agg_def.field.is_empty() {
        "filter".to_string()
    } else {
        agg_def.field.clone()
    }
}

/// Textual bucket key; `key_as_string` wins over `key`.
fn key_text(key: Option<&Value>, bucket: &Map<String, Value>) -> Option<String> {
    if let Some(Value::String(s)) = bucket.get("key_as_string") {
        return Some(s.clone());
    }
    match key? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Numeric value of a metric result, accepting numeric strings.
pub(crate) fn number_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// `value` of a single-value metric result, preferring `normalized_value`.
pub(crate) fn metric_value(bucket: &Map<String, Value>, id: &str) -> Option<f64> {
    let result = bucket.get(id)?;
    result
        .get("normalized_value")
        .or_else(|| result.get("value"))
        .and_then(number_value)
}

/// Percentile labels of a percentiles result, numerically ordered.
pub(crate) fn percentile_keys(bucket: &Map<String, Value>, id: &str) -> Vec<String> {
    let Some(values) = bucket
        .get(id)
        .and_then(|r| r.get("values"))
        .and_then(Value::as_object)
    else {
        return Vec::new();
    };

    let mut keys: Vec<&String> = values.keys().collect();
    keys.sort_by(|a, b| {
        let (x, y) = (a.parse::<f64>().ok(), b.parse::<f64>().ok());
        match (x, y) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            _ => a.cmp(b),
        }
    });
    keys.into_iter().cloned().collect()
}

pub(crate) fn percentile_value(bucket: &Map<String, Value>, id: &str, key: &str) -> Option<f64> {
    bucket
        .get(id)?
        .get("values")?
        .get(key)
        .and_then(number_value)
}

/// Value of an `extended_stats` sub-statistic; the deviation bounds are nested.
pub(crate) fn extended_stat_value(bucket: &Map<String, Value>, id: &str, stat: &str) -> Option<f64> {
    let result = bucket.get(id)?;
    let value = match stat {
        "std_deviation_bounds_upper" => result.get("std_deviation_bounds")?.get("upper"),
        "std_deviation_bounds_lower" => result.get("std_deviation_bounds")?.get("lower"),
        _ => result.get(stat),
    };
    value.and_then(number_value)
}

/// Value of one `top_metrics` field from the first top hit.
pub(crate) fn top_metric_value(bucket: &Map<String, Value>, id: &str, field: &str) -> Option<f64> {
    bucket
        .get(id)?
        .get("top")?
        .get(0)?
        .get("metrics")?
        .get(field)
        .and_then(number_value)
}

/// Requested `top_metrics` field names.
pub(crate) fn top_metric_fields(metric: &crate::model::MetricAgg) -> Vec<String> {
    metric
        .settings
        .get("metrics")
        .and_then(Value::as_array)
        .map(|fields| {
            fields
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn doc_count(bucket: &Map<String, Value>) -> Option<f64> {
    bucket.get("doc_count").and_then(number_value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode_whole;
    use crate::frame::FieldValues;
    use serde_json::json;

    fn fields() -> ConfiguredFields {
        ConfiguredFields {
            time_field: "@timestamp".to_string(),
            log_message_field: "line".to_string(),
            log_level_field: "lvl".to_string(),
        }
    }

    fn process(query: Value, response: Value) -> Result<Vec<Frame>> {
        let query = Query::from_json(query).unwrap();
        let body = json!({"responses": [response]});
        let decoded = decode_whole(body.to_string().as_bytes()).unwrap();
        let fields = fields();
        ResponseProcessor::new(&fields).process(&query, &decoded.responses[0])
    }

    fn numbers(frame: &Frame, column: usize) -> Vec<Option<f64>> {
        match &frame.fields[column].values {
            FieldValues::Number(v) => v.clone(),
            other => panic!("Expected number column, got {}", other.type_name()),
        }
    }

    fn times(frame: &Frame) -> Vec<Option<i64>> {
        match &frame.fields[0].values {
            FieldValues::Time(v) => v.clone(),
            other => panic!("Expected time column, got {}", other.type_name()),
        }
    }

    // ========================================================================
    // Time series
    // ========================================================================

    #[test]
    fn test_count_date_histogram() {
        let frames = process(
            json!({
                "refId": "A",
                "metrics": [{"type": "count", "id": "1"}],
                "bucketAggs": [{"type": "date_histogram", "field": "@timestamp", "id": "2"}]
            }),
            json!({"aggregations": {"2": {"buckets": [
                {"key": 1000, "doc_count": 10},
                {"key": 2000, "doc_count": 15}
            ]}}}),
        )
        .unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].name, "Count");
        assert_eq!(frames[0].ref_id, "A");
        assert_eq!(times(&frames[0]), vec![Some(1000), Some(2000)]);
        assert_eq!(numbers(&frames[0], 1), vec![Some(10.0), Some(15.0)]);
    }

    #[test]
    fn test_avg_with_moving_avg() {
        let frames = process(
            json!({
                "refId": "A",
                "metrics": [
                    {"type": "avg", "field": "v", "id": "2", "pipelineAgg": ""},
                    {"type": "moving_avg", "field": "2", "id": "3"}
                ],
                "bucketAggs": [{"type": "date_histogram", "field": "@timestamp", "id": "4"}]
            }),
            json!({"aggregations": {"4": {"buckets": [
                {"key": 1000, "doc_count": 1, "2": {"value": 2.0}},
                {"key": 2000, "doc_count": 1, "2": {"value": 4.0}, "3": {"value": 3.0}}
            ]}}}),
        )
        .unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].name, "Average v");
        assert_eq!(frames[1].name, "Moving Average Average v");
        assert_eq!(numbers(&frames[1], 1), vec![None, Some(3.0)]);
    }

    #[test]
    fn test_percentiles_fan_out() {
        let frames = process(
            json!({
                "refId": "A",
                "metrics": [{"type": "percentiles", "field": "value", "id": "1",
                             "settings": {"percents": ["75", "90"]}}],
                "bucketAggs": [{"type": "date_histogram", "field": "@timestamp", "id": "3"}]
            }),
            json!({"aggregations": {"3": {"buckets": [
                {"key": 1000, "doc_count": 4, "1": {"values": {"90": 5.0, "75": 3.3}}},
                {"key": 2000, "doc_count": 2, "1": {"values": {"75": 2.3, "90": 4.0}}},
                {"key": 3000, "doc_count": 2, "1": {"values": {"75": 1.0, "90": 2.0}}}
            ]}}}),
        )
        .unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].name, "p75 value");
        assert_eq!(frames[1].name, "p90 value");
        assert_eq!(numbers(&frames[0], 1), vec![Some(3.3), Some(2.3), Some(1.0)]);
        assert!(frames.iter().all(|f| f.rows() == 3));
    }

    #[test]
    fn test_extended_stats_with_terms() {
        let frames = process(
            json!({
                "refId": "A",
                "metrics": [{"type": "extended_stats", "field": "@value", "id": "1",
                             "meta": {"max": true, "std_deviation_bounds_upper": true,
                                      "std_deviation_bounds_lower": true, "min": false}}],
                "bucketAggs": [
                    {"type": "terms", "field": "host", "id": "3"},
                    {"type": "date_histogram", "field": "@timestamp", "id": "4"}
                ]
            }),
            json!({"aggregations": {"3": {"buckets": [
                {"key": "server1", "4": {"buckets": [{"key": 1000, "doc_count": 1,
                    "1": {"max": 10.2, "min": 5.5, "std_deviation_bounds": {"upper": 3, "lower": -2}}}]}},
                {"key": "server2", "4": {"buckets": [{"key": 1000, "doc_count": 1,
                    "1": {"max": 10.2, "min": 5.5, "std_deviation_bounds": {"upper": 3, "lower": -2}}}]}}
            ]}}}),
        )
        .unwrap();

        assert_eq!(frames.len(), 6);
        let names: Vec<&str> = frames.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "server1 Max @value",
                "server1 Std Dev Lower @value",
                "server1 Std Dev Upper @value",
                "server2 Max @value",
                "server2 Std Dev Lower @value",
                "server2 Std Dev Upper @value",
            ]
        );
        assert_eq!(numbers(&frames[1], 1), vec![Some(-2.0)]);
        assert_eq!(numbers(&frames[2], 1), vec![Some(3.0)]);
    }

    #[test]
    fn test_top_metrics_series() {
        let frames = process(
            json!({
                "refId": "A",
                "metrics": [{"type": "top_metrics", "id": "2",
                             "settings": {"order": "top", "orderBy": "@timestamp",
                                          "metrics": ["@value", "@anotherValue"]}}],
                "bucketAggs": [{"type": "date_histogram", "id": "3"}]
            }),
            json!({"aggregations": {"3": {"buckets": [
                {"key": 1000, "doc_count": 1,
                 "2": {"top": [{"sort": ["x"], "metrics": {"@value": 1, "@anotherValue": 2}}]}},
                {"key": 2000, "doc_count": 1,
                 "2": {"top": [{"sort": ["y"], "metrics": {"@value": "299", "@anotherValue": 3}}]}}
            ]}}}),
        )
        .unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].name, "Top Metrics @value");
        assert_eq!(frames[1].name, "Top Metrics @anotherValue");
        assert_eq!(numbers(&frames[0], 1), vec![Some(1.0), Some(299.0)]);
    }

    #[test]
    fn test_normalized_value_preferred() {
        let frames = process(
            json!({
                "refId": "A",
                "metrics": [
                    {"type": "sum", "field": "b", "id": "1"},
                    {"type": "derivative", "field": "1", "id": "2", "settings": {"unit": "1s"}}
                ],
                "bucketAggs": [{"type": "date_histogram", "id": "3"}]
            }),
            json!({"aggregations": {"3": {"buckets": [
                {"key": 1000, "doc_count": 1, "1": {"value": 10},
                 "2": {"value": 60, "normalized_value": 1}}
            ]}}}),
        )
        .unwrap();

        assert_eq!(numbers(&frames[1], 1), vec![Some(1.0)]);
    }

    #[test]
    fn test_trim_edges() {
        let buckets: Vec<Value> = (1..=6)
            .map(|i| json!({"key": i * 1000, "doc_count": i}))
            .collect();
        let frames = process(
            json!({
                "refId": "A",
                "metrics": [{"type": "count", "id": "1"}],
                "bucketAggs": [{"type": "date_histogram", "id": "2", "settings": {"trimEdges": "2"}}]
            }),
            json!({"aggregations": {"2": {"buckets": buckets}}}),
        )
        .unwrap();

        assert_eq!(times(&frames[0]), vec![Some(3000), Some(4000)]);
        assert_eq!(numbers(&frames[0], 1), vec![Some(3.0), Some(4.0)]);
    }

    #[test]
    fn test_trim_edges_too_short_is_untouched() {
        let frames = process(
            json!({
                "refId": "A",
                "metrics": [{"type": "count", "id": "1"}],
                "bucketAggs": [{"type": "date_histogram", "id": "2", "settings": {"trimEdges": 1}}]
            }),
            json!({"aggregations": {"2": {"buckets": [
                {"key": 1000, "doc_count": 1},
                {"key": 2000, "doc_count": 2}
            ]}}}),
        )
        .unwrap();

        assert_eq!(frames[0].rows(), 2);
    }

    #[test]
    fn test_hidden_metric_skipped() {
        let frames = process(
            json!({
                "refId": "A",
                "metrics": [
                    {"type": "count", "id": "1", "hide": true},
                    {"type": "avg", "field": "v", "id": "2"}
                ],
                "bucketAggs": [{"type": "date_histogram", "id": "3"}]
            }),
            json!({"aggregations": {"3": {"buckets": [
                {"key": 1000, "doc_count": 1, "2": {"value": 1}}
            ]}}}),
        )
        .unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].name, "Average v");
    }

    #[test]
    fn test_filters_label() {
        let frames = process(
            json!({
                "refId": "A",
                "metrics": [{"type": "count", "id": "1"}],
                "bucketAggs": [
                    {"type": "filters", "id": "2", "settings": {"filters": [
                        {"query": "@metric:cpu", "label": ""},
                        {"query": "@metric:logins.count", "label": ""}
                    ]}},
                    {"type": "date_histogram", "field": "@timestamp", "id": "3"}
                ]
            }),
            json!({"aggregations": {"2": {"buckets": {
                "@metric:cpu": {"3": {"buckets": [{"key": 1000, "doc_count": 1}]}},
                "@metric:logins.count": {"3": {"buckets": [{"key": 1000, "doc_count": 3}]}}
            }}}}),
        )
        .unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].name, "@metric:cpu");
        assert_eq!(frames[1].name, "@metric:logins.count");
    }

    #[test]
    fn test_keep_labels() {
        let query = Query::from_json(json!({
            "refId": "A",
            "metrics": [{"type": "count", "id": "1"}],
            "bucketAggs": [
                {"type": "terms", "field": "host", "id": "2"},
                {"type": "date_histogram", "id": "3"}
            ]
        }))
        .unwrap();
        let body = json!({"responses": [{"aggregations": {"2": {"buckets": [
            {"key": "server1", "3": {"buckets": [{"key": 1000, "doc_count": 1}]}}
        ]}}}]});
        let decoded = decode_whole(body.to_string().as_bytes()).unwrap();
        let fields = fields();

        let frames = ResponseProcessor::new(&fields)
            .keep_labels(true)
            .process(&query, &decoded.responses[0])
            .unwrap();

        let value = &frames[0].fields[1];
        assert_eq!(value.labels, Labels::new().with("host", "server1"));
        assert_eq!(
            value.config.as_ref().and_then(|c| c.display_name_from_ds.as_deref()),
            Some("server1")
        );
    }

    // ========================================================================
    // Errors and empty responses
    // ========================================================================

    #[test]
    fn test_error_response() {
        let result = process(
            json!({"refId": "A", "metrics": [{"type": "count", "id": "1"}]}),
            json!({"status": 400, "error": {"root_cause": [{"reason": "bad field"}], "reason": "all shards failed"}}),
        );

        match result {
            Err(EsFramesError::Downstream(msg)) => assert_eq!(msg, "bad field"),
            other => panic!("Expected downstream error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_aggregations() {
        let frames = process(
            json!({"refId": "A", "metrics": [{"type": "count", "id": "1"}]}),
            json!({"hits": {"hits": []}}),
        )
        .unwrap();

        assert!(frames.is_empty());
    }
}
