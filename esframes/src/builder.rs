//! Aggregation tree builder and search request construction
//!
//! Bucket aggregations nest in list order (index 0 outermost). Metric
//! aggregations become the leaves of the innermost bucket. `count` never
//! produces a node since every bucket reports `doc_count`.

use crate::config::DataSourceConfig;
use crate::dsl::index_pattern::IndexPattern;
use crate::dsl::interval::parse_interval_ms;
use crate::dsl::search::{Filter, RequestBody, SearchRequestBody, DATE_FORMAT_EPOCH_MS};
use crate::dsl::{
    AggNode, AggPayload, BucketsPath, DateHistogramAgg, ExtendedBounds, FiltersAgg, GeohashGridAgg,
    HistogramAgg, MetricAggBody, MultiSearchRequest, NestedAgg, PipelineAggBody, QueryStringFilter,
    SearchRequest, TermsAgg,
};
use crate::error::EsFramesError;
use crate::model::settings::{coerce_bool, coerce_float, coerce_int, json_number, setting_str, strip_null_strings};
use crate::model::{BucketAgg, BucketAggType, MetricAgg, MetricAggType, Query, Settings, TimeRange};
use crate::Result;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// Terms size and document limit when none is given
pub const DEFAULT_SIZE: i64 = 500;

const CALENDAR_INTERVALS: [&str; 4] = ["1w", "1M", "1q", "1y"];
const AUTO_FIXED_INTERVAL: &str = "$__interval_msms";

/// Compiles bucket and metric lists into an aggregation tree
pub struct AggTreeBuilder<'a> {
    time_field: &'a str,
    time_range: TimeRange,
}

impl<'a> AggTreeBuilder<'a> {
    pub fn new(time_field: &'a str, time_range: TimeRange) -> Self {
        Self {
            time_field,
            time_range,
        }
    }

    /// Build the top-level aggregations.
    ///
    /// Either the whole tree is returned or the first definition error.
    #[instrument(level = "debug", skip_all, fields(buckets = bucket_aggs.len(), metrics = metrics.len()))]
    pub fn build(&self, bucket_aggs: &[BucketAgg], metrics: &[MetricAgg]) -> Result<Vec<AggNode>> {
        let mut children: Vec<AggNode> = metrics
            .iter()
            .filter_map(|m| metric_node(m, metrics))
            .collect();

        for bucket in bucket_aggs.iter().rev() {
            let Some((mut node, mut first_children)) = self.bucket_node(bucket, metrics)? else {
                continue;
            };
            first_children.retain(|c| !children.iter().any(|existing| existing.key == c.key));
            first_children.append(&mut children);
            node.children = first_children;
            children = vec![node];
        }

        Ok(children)
    }

    /// The node for one bucket plus any children it needs ahead of the
    /// nested ones. `None` skips the level.
    fn bucket_node(&self, bucket: &BucketAgg, metrics: &[MetricAgg]) -> Result<Option<(AggNode, Vec<AggNode>)>> {
        let settings = &bucket.settings;
        let payload = match bucket.agg_type {
            BucketAggType::DateHistogram => AggPayload::DateHistogram(self.date_histogram(bucket)),
            BucketAggType::Histogram => {
                require_field(bucket)?;
                AggPayload::Histogram(HistogramAgg {
                    field: bucket.field.clone(),
                    interval: json_number(settings.get("interval").and_then(coerce_float).unwrap_or(1000.0)),
                    min_doc_count: settings.get("min_doc_count").and_then(coerce_int).unwrap_or(0),
                    missing: settings.get("missing").and_then(coerce_int).map(Value::from),
                })
            }
            BucketAggType::Terms => {
                require_field(bucket)?;
                let (terms, order_child) = terms(bucket, metrics);
                let node = AggNode::new(bucket.id.clone(), AggPayload::Terms(terms));
                return Ok(Some((node, order_child.into_iter().collect())));
            }
            BucketAggType::Filters => {
                let filters = filters(settings);
                if filters.is_empty() {
                    debug!(bucket = %bucket.id, "filters aggregation without filters skipped");
                    return Ok(None);
                }
                AggPayload::Filters(FiltersAgg { filters })
            }
            BucketAggType::Nested => {
                require_field(bucket)?;
                AggPayload::Nested(NestedAgg {
                    path: bucket.field.clone(),
                })
            }
            BucketAggType::GeohashGrid => {
                require_field(bucket)?;
                AggPayload::GeohashGrid(GeohashGridAgg {
                    field: bucket.field.clone(),
                    precision: settings.get("precision").and_then(coerce_int).unwrap_or(3),
                })
            }
        };
        Ok(Some((AggNode::new(bucket.id.clone(), payload), Vec::new())))
    }

    fn date_histogram(&self, bucket: &BucketAgg) -> DateHistogramAgg {
        let settings = &bucket.settings;
        let interval = setting_str(settings, "interval").unwrap_or_else(|| "auto".to_string());
        let (fixed_interval, calendar_interval) = if CALENDAR_INTERVALS.contains(&interval.as_str()) {
            (None, Some(interval))
        } else if interval.is_empty() || interval == "auto" {
            (Some(AUTO_FIXED_INTERVAL.to_string()), None)
        } else {
            (Some(interval), None)
        };

        let field = if bucket.field.is_empty() {
            self.time_field.to_string()
        } else {
            bucket.field.clone()
        };

        let time_zone = setting_str(settings, "timeZone")
            .or_else(|| setting_str(settings, "time_zone"))
            .filter(|tz| !tz.is_empty() && tz != "utc");

        DateHistogramAgg {
            field,
            fixed_interval,
            calendar_interval,
            min_doc_count: settings.get("min_doc_count").and_then(coerce_int).unwrap_or(0),
            extended_bounds: Some(ExtendedBounds {
                min: self.time_range.from,
                max: self.time_range.to,
            }),
            format: setting_str(settings, "format").unwrap_or_else(|| DATE_FORMAT_EPOCH_MS.to_string()),
            time_zone,
            offset: setting_str(settings, "offset").filter(|o| !o.is_empty()),
            missing: settings
                .get("missing")
                .filter(|v| v.as_str() != Some("null"))
                .cloned(),
        }
    }
}

fn require_field(bucket: &BucketAgg) -> Result<()> {
    if bucket.field.is_empty() {
        return Err(EsFramesError::MissingField(format!(
            "{} aggregation '{}' has no field",
            bucket.agg_type.as_str(),
            bucket.id
        )));
    }
    Ok(())
}

/// Terms payload plus the metric node its ordering needs, if any.
fn terms(bucket: &BucketAgg, metrics: &[MetricAgg]) -> (TermsAgg, Option<AggNode>) {
    let settings = &bucket.settings;
    let size = settings
        .get("size")
        .and_then(coerce_int)
        .filter(|s| *s > 0)
        .unwrap_or(DEFAULT_SIZE);

    let mut agg = TermsAgg {
        field: bucket.field.clone(),
        size,
        order: Map::new(),
        min_doc_count: settings.get("min_doc_count").and_then(coerce_int),
        missing: settings
            .get("missing")
            .filter(|v| v.as_str() != Some("null"))
            .cloned(),
    };

    let mut order_child = None;
    if let Some(order_by) = setting_str(settings, "orderBy").filter(|o| !o.is_empty()) {
        let direction = Value::String(setting_str(settings, "order").unwrap_or_else(|| "desc".into()));
        // Percentile and extended stats orderings look like `1[95.0]`.
        let metric_id = order_by.split('[').next().unwrap_or_default();

        match metrics.iter().find(|m| m.id == metric_id) {
            Some(m) if m.agg_type == MetricAggType::Count => {
                agg.order.insert("_count".into(), direction);
            }
            Some(m) => {
                agg.order.insert(order_by.clone(), direction);
                order_child = Some(AggNode::new(
                    m.id.clone(),
                    AggPayload::Metric(MetricAggBody {
                        kind: m.agg_type.to_string(),
                        field: Some(m.field.clone()).filter(|f| !f.is_empty()),
                        settings: Settings::new(),
                    }),
                ));
            }
            None if order_by == "_term" => {
                agg.order.insert("_key".into(), direction);
            }
            None if order_by.starts_with('_') => {
                agg.order.insert(order_by.clone(), direction);
            }
            None => {
                debug!(bucket = %bucket.id, order_by = %order_by, "terms ordering references an unknown metric");
            }
        }
    }

    (agg, order_child)
}

fn filters(settings: &Settings) -> BTreeMap<String, QueryStringFilter> {
    settings
        .get("filters")
        .and_then(Value::as_array)
        .map(|filters| {
            filters
                .iter()
                .map(|filter| {
                    let query = filter.get("query").and_then(Value::as_str).unwrap_or_default();
                    let label = filter
                        .get("label")
                        .and_then(Value::as_str)
                        .filter(|l| !l.is_empty())
                        .unwrap_or(query);
                    (label.to_string(), QueryStringFilter::new(query))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// The leaf node for `metric`, or `None` when it produces no aggregation.
fn metric_node(metric: &MetricAgg, metrics: &[MetricAgg]) -> Option<AggNode> {
    if metric.agg_type == MetricAggType::Count || metric.agg_type.is_document() {
        return None;
    }

    let payload = if metric.agg_type.has_multiple_bucket_paths() {
        let paths: BTreeMap<String, String> = metric
            .pipeline_variables
            .iter()
            .filter_map(|var| Some((var.name.clone(), bucket_path(&var.pipeline_agg, metrics)?)))
            .collect();
        if paths.is_empty() {
            debug!(metric = %metric.id, "bucket_script without resolvable variables dropped");
            return None;
        }
        AggPayload::Pipeline(PipelineAggBody {
            kind: metric.agg_type.to_string(),
            buckets_path: BucketsPath::Named(paths),
            settings: dsl_settings(metric),
        })
    } else if metric.agg_type.is_pipeline() {
        let reference = metric.pipeline_reference();
        let Some(path) = bucket_path(reference, metrics) else {
            debug!(metric = %metric.id, reference = %reference, "pipeline aggregation with unresolved reference dropped");
            return None;
        };
        AggPayload::Pipeline(PipelineAggBody {
            kind: metric.agg_type.to_string(),
            buckets_path: BucketsPath::Single(path),
            settings: dsl_settings(metric),
        })
    } else {
        AggPayload::Metric(MetricAggBody {
            kind: metric.agg_type.to_string(),
            field: Some(metric.field.clone()).filter(|f| !f.is_empty()),
            settings: dsl_settings(metric),
        })
    };

    Some(AggNode::new(metric.id.clone(), payload))
}

/// Bucket path for a sibling reference: `_count` for count metrics,
/// otherwise the sibling id.
fn bucket_path(reference: &str, metrics: &[MetricAgg]) -> Option<String> {
    if reference == "_count" {
        return Some("_count".into());
    }
    let sibling = metrics.iter().find(|m| m.id == reference)?;
    if sibling.agg_type == MetricAggType::Count {
        Some("_count".into())
    } else {
        Some(sibling.id.clone())
    }
}

/// Settings as sent to Elasticsearch, with editor strings coerced.
fn dsl_settings(metric: &MetricAgg) -> Settings {
    let mut settings = metric.settings.clone();
    strip_null_strings(&mut settings);

    if metric.agg_type == MetricAggType::TopMetrics {
        return top_metrics_settings(&settings);
    }

    for key in ["window", "predict"] {
        coerce_in_place(&mut settings, key, |v| coerce_float(v).map(json_number));
    }

    match metric.agg_type {
        MetricAggType::MovingAvg => {
            if let Some(Value::Object(model)) = settings.get_mut("settings") {
                for key in ["alpha", "beta", "gamma", "period"] {
                    coerce_in_place(model, key, |v| coerce_float(v).map(json_number));
                }
            }
            coerce_in_place(&mut settings, "minimize", |v| coerce_bool(v).map(Value::Bool));
        }
        MetricAggType::SerialDiff => {
            coerce_in_place(&mut settings, "lag", |v| coerce_float(v).map(json_number));
        }
        _ => {}
    }

    match settings.get("script") {
        Some(Value::Object(script)) => {
            let inline = script.get("inline").cloned().unwrap_or(Value::Null);
            match inline {
                Value::String(s) if !s.is_empty() => {
                    settings.insert("script".into(), Value::String(s));
                }
                _ => {
                    settings.remove("script");
                }
            }
        }
        Some(Value::String(s)) if s.is_empty() => {
            settings.remove("script");
        }
        _ => {}
    }

    settings
}

fn coerce_in_place(settings: &mut Settings, key: &str, coerce: impl Fn(&Value) -> Option<Value>) {
    if let Some(value) = settings.get_mut(key) {
        if let Some(coerced) = coerce(value) {
            *value = coerced;
        }
    }
}

fn top_metrics_settings(settings: &Settings) -> Settings {
    let metrics: Vec<Value> = settings
        .get("metrics")
        .and_then(Value::as_array)
        .map(|fields| {
            fields
                .iter()
                .filter_map(Value::as_str)
                .map(|field| json!({ "field": field }))
                .collect()
        })
        .unwrap_or_default();

    let mut out = Settings::new();
    out.insert("metrics".into(), Value::Array(metrics));
    out.insert("size".into(), Value::String("1".into()));
    if let Some(order_by) = setting_str(settings, "orderBy").filter(|o| !o.is_empty()) {
        let order = setting_str(settings, "order").unwrap_or_else(|| "desc".into());
        out.insert("sort".into(), json!([{ order_by: order }]));
    }
    out
}

/// Builds search requests for queries against one datasource
pub struct SearchRequestFactory<'a> {
    config: &'a DataSourceConfig,
}

impl<'a> SearchRequestFactory<'a> {
    pub fn new(config: &'a DataSourceConfig) -> Self {
        Self { config }
    }

    /// Build one multi-search entry per query, in query order.
    #[instrument(skip_all, fields(queries = queries.len()))]
    pub fn build_multisearch(&self, queries: &[Query]) -> Result<MultiSearchRequest> {
        let requests = queries
            .iter()
            .map(|q| self.build(q))
            .collect::<Result<Vec<_>>>()?;
        Ok(MultiSearchRequest {
            requests,
            max_concurrent_shard_requests: self.config.max_concurrent_shard_requests,
            include_frozen: self.config.include_frozen,
        })
    }

    pub fn build(&self, query: &Query) -> Result<SearchRequest> {
        let pattern = IndexPattern::new(self.config.index.clone(), self.config.interval)?;
        let index = pattern.indices(&query.time_range).join(",");
        let interval_ms = self.effective_interval_ms(query);

        let body = match &query.raw_dsl_query {
            Some(raw) => RequestBody::Raw(parse_raw_body(raw)?),
            None => RequestBody::Built(self.body(query)?),
        };

        Ok(SearchRequest {
            index,
            interval_ms,
            body,
        })
    }

    fn effective_interval_ms(&self, query: &Query) -> i64 {
        let min = parse_interval_ms(&query.interval).unwrap_or_else(|| self.config.min_interval_ms());
        query.interval_ms.max(min)
    }

    fn time_field<'q>(&'q self, query: &'q Query) -> &'q str {
        query.time_field.as_deref().unwrap_or(&self.config.time_field)
    }

    fn body(&self, query: &Query) -> Result<SearchRequestBody> {
        let document = query.document_kind();
        if query.metrics.is_empty() || (query.bucket_aggs.is_empty() && document.is_none()) {
            return Err(EsFramesError::InvalidQuery(
                "invalid query, missing metrics and aggregations".into(),
            ));
        }

        let time_field = self.time_field(query);
        let range = query.time_range;

        let mut body = SearchRequestBody::new(0);
        body.query.filters.push(Filter::Range {
            field: time_field.to_string(),
            gte: range.from,
            lte: range.to,
            format: DATE_FORMAT_EPOCH_MS.to_string(),
        });
        if !query.query.trim().is_empty() {
            body.query
                .filters
                .push(Filter::QueryString(QueryStringFilter::new(query.query.clone())));
        }

        match document {
            Some(kind) => {
                let histogram_key = query
                    .bucket_aggs
                    .first()
                    .map(|b| b.id.as_str())
                    .unwrap_or("1");
                self.document_body(&mut body, kind, &query.metrics[0], time_field, range, histogram_key)
            }
            None => {
                body.aggs = AggTreeBuilder::new(time_field, range).build(&query.bucket_aggs, &query.metrics)?;
            }
        }

        Ok(body)
    }

    fn document_body(
        &self,
        body: &mut SearchRequestBody,
        kind: &MetricAggType,
        metric: &MetricAgg,
        time_field: &str,
        range: TimeRange,
        histogram_key: &str,
    ) {
        let size_key = if *kind == MetricAggType::Logs { "limit" } else { "size" };
        body.size = metric
            .settings
            .get(size_key)
            .and_then(coerce_int)
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_SIZE);

        let order = match setting_str(&metric.settings, "sortDirection").as_deref() {
            Some("asc") if *kind == MetricAggType::Logs => "asc",
            _ => "desc",
        };
        body.add_sort(time_field, order, Some("boolean"));
        body.add_sort("_doc", order, None);
        body.script_fields = Some(Map::new());
        body.docvalue_fields.push(time_field.to_string());

        if *kind != MetricAggType::RawDocument {
            body.fields.push(json!({
                "field": time_field,
                "format": "strict_date_optional_time_nanos"
            }));
        }

        if *kind == MetricAggType::Logs {
            body.add_highlight();
            if let Some(after) = metric.settings.get("searchAfter").and_then(Value::as_array) {
                body.search_after = after.clone();
            }
            let histogram = BucketAgg::new(histogram_key, BucketAggType::DateHistogram, time_field)
                .with_settings(json!({"interval": "auto"}));
            let builder = AggTreeBuilder::new(time_field, range);
            body.aggs = vec![AggNode::new(
                histogram_key,
                AggPayload::DateHistogram(builder.date_histogram(&histogram)),
            )];
        }
    }
}

fn parse_raw_body(raw: &str) -> Result<Value> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| EsFramesError::InvalidRawDsl(e.to_string()))?;
    if !value.is_object() {
        return Err(EsFramesError::InvalidRawDsl(
            "request body must be a JSON object".into(),
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FROM: i64 = 1526406600000;
    const TO: i64 = 1526406900000;

    fn query(value: Value) -> Query {
        let mut query = Query::from_json(value).unwrap();
        query.time_range = TimeRange { from: FROM, to: TO };
        query
    }

    fn build_body(value: Value) -> Value {
        let config = DataSourceConfig::default();
        let request = SearchRequestFactory::new(&config).build(&query(value)).unwrap();
        request.body.to_json().unwrap()
    }

    // ===================================================================
    // Tree shape
    // ===================================================================

    #[test]
    fn test_count_date_histogram() {
        let body = build_body(json!({
            "refId": "A",
            "bucketAggs": [{"type": "date_histogram", "field": "@timestamp", "id": "2"}],
            "metrics": [{"type": "count", "id": "1"}]
        }));

        let hist = &body["aggs"]["2"]["date_histogram"];
        assert_eq!(hist["field"], "@timestamp");
        assert_eq!(hist["fixed_interval"], "$__interval_msms");
        assert_eq!(hist["min_doc_count"], 0);
        assert_eq!(hist["extended_bounds"], json!({"min": FROM, "max": TO}));
        assert_eq!(hist["format"], "epoch_millis");
        assert!(body["aggs"]["2"].get("aggs").is_none());
        assert_eq!(body["size"], 0);
        assert_eq!(
            body["query"]["bool"]["filter"][0]["range"]["@timestamp"],
            json!({"gte": FROM, "lte": TO, "format": "epoch_millis"})
        );
    }

    #[test]
    fn test_multiple_bucket_aggs_nest_in_order() {
        let q = query(json!({
            "refId": "A",
            "bucketAggs": [
                {"type": "terms", "field": "@host", "id": "2", "settings": {"size": "0", "order": "asc"}},
                {"type": "date_histogram", "field": "@timestamp", "id": "3"}
            ],
            "metrics": [{"type": "avg", "field": "@value", "id": "1"}]
        }));
        let tree = AggTreeBuilder::new("@timestamp", q.time_range)
            .build(&q.bucket_aggs, &q.metrics)
            .unwrap();

        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].key, "2");
        match &tree[0].payload {
            AggPayload::Terms(t) => {
                assert_eq!(t.field, "@host");
                assert_eq!(t.size, 500);
            }
            _ => panic!("Expected Terms"),
        }
        let hist = &tree[0].children[0];
        assert_eq!(hist.key, "3");
        assert_eq!(hist.kind(), "date_histogram");
        assert_eq!(hist.children[0].key, "1");
        assert_eq!(hist.children[0].kind(), "avg");
    }

    #[test]
    fn test_null_settings_removed_and_inline_script() {
        let body = build_body(json!({
            "refId": "A",
            "bucketAggs": [{"type": "date_histogram", "field": "@timestamp", "id": "2"}],
            "metrics": [
                {"type": "avg", "id": "1", "settings": {"missing": "null", "script": "1"}},
                {"type": "avg", "id": "3", "settings": {"script": {"inline": "my_script"}}}
            ]
        }));
        let aggs = &body["aggs"]["2"]["aggs"];
        assert_eq!(aggs["1"]["avg"], json!({"script": "1"}));
        assert_eq!(aggs["3"]["avg"]["script"], "my_script");
    }

    // ===================================================================
    // Terms ordering
    // ===================================================================

    #[test]
    fn test_terms_order_by_term() {
        let body = build_body(json!({
            "refId": "A",
            "bucketAggs": [
                {"type": "terms", "field": "@host", "id": "2", "settings": {"size": "5", "order": "asc", "orderBy": "_term"}},
                {"type": "date_histogram", "field": "@timestamp", "id": "3"}
            ],
            "metrics": [{"type": "count", "id": "1"}]
        }));
        assert_eq!(body["aggs"]["2"]["terms"]["order"], json!({"_key": "asc"}));
        assert_eq!(body["aggs"]["2"]["terms"]["size"], 5);
    }

    #[test]
    fn test_terms_order_by_metric_embeds_metric_first() {
        let q = query(json!({
            "refId": "A",
            "bucketAggs": [
                {"type": "terms", "field": "@host", "id": "2", "settings": {"size": "5", "order": "asc", "orderBy": "5"}},
                {"type": "date_histogram", "field": "@timestamp", "id": "3"}
            ],
            "metrics": [
                {"type": "count", "id": "1"},
                {"type": "avg", "field": "@value", "id": "5"}
            ]
        }));
        let tree = AggTreeBuilder::new("@timestamp", q.time_range)
            .build(&q.bucket_aggs, &q.metrics)
            .unwrap();

        let terms = &tree[0];
        assert_eq!(terms.children[0].key, "5");
        assert_eq!(terms.children[0].kind(), "avg");
        assert_eq!(terms.children[1].key, "3");
        assert_eq!(terms.children[1].children[0].key, "5");
        match &terms.payload {
            AggPayload::Terms(t) => assert_eq!(t.order.get("5"), Some(&json!("asc"))),
            _ => panic!("Expected Terms"),
        }
    }

    #[test]
    fn test_terms_order_by_count_metric() {
        let q = query(json!({
            "refId": "A",
            "bucketAggs": [
                {"type": "terms", "field": "@host", "id": "2", "settings": {"order": "asc", "orderBy": "1"}},
                {"type": "date_histogram", "field": "@timestamp", "id": "3"}
            ],
            "metrics": [{"type": "count", "id": "1"}, {"type": "avg", "field": "@value", "id": "5"}]
        }));
        let tree = AggTreeBuilder::new("@timestamp", q.time_range)
            .build(&q.bucket_aggs, &q.metrics)
            .unwrap();
        match &tree[0].payload {
            AggPayload::Terms(t) => assert_eq!(t.order.get("_count"), Some(&json!("asc"))),
            _ => panic!("Expected Terms"),
        }
        assert_ne!(tree[0].children[0].key, "1");
    }

    #[test]
    fn test_terms_order_by_percentile() {
        let body = build_body(json!({
            "refId": "A",
            "bucketAggs": [
                {"type": "terms", "field": "@host", "id": "2", "settings": {"order": "asc", "orderBy": "1[95.0]"}},
                {"type": "date_histogram", "field": "@timestamp", "id": "3"}
            ],
            "metrics": [{"type": "percentiles", "field": "@value", "id": "1", "settings": {"percents": ["95", "99"]}}]
        }));
        let terms = &body["aggs"]["2"];
        assert_eq!(terms["terms"]["order"], json!({"1[95.0]": "asc"}));
        assert_eq!(terms["aggs"]["1"]["percentiles"]["field"], "@value");
        assert_eq!(
            terms["aggs"]["3"]["aggs"]["1"]["percentiles"]["percents"],
            json!(["95", "99"])
        );
    }

    #[test]
    fn test_terms_min_doc_count_coerced() {
        let body = build_body(json!({
            "refId": "A",
            "bucketAggs": [
                {"type": "terms", "field": "@host", "id": "2", "settings": {"min_doc_count": "1"}},
                {"type": "date_histogram", "field": "@timestamp", "id": "3"}
            ],
            "metrics": [{"type": "count", "id": "1"}]
        }));
        assert_eq!(body["aggs"]["2"]["terms"]["min_doc_count"], 1);
    }

    #[test]
    fn test_terms_without_field_is_error() {
        let config = DataSourceConfig::default();
        let q = query(json!({
            "refId": "A",
            "bucketAggs": [{"type": "terms", "id": "2"}],
            "metrics": [{"type": "count", "id": "1"}]
        }));
        let err = SearchRequestFactory::new(&config).build(&q).unwrap_err();
        assert!(matches!(err, EsFramesError::MissingField(_)));
    }

    // ===================================================================
    // Other bucket kinds
    // ===================================================================

    #[test]
    fn test_filters_use_label_or_query() {
        let body = build_body(json!({
            "refId": "A",
            "bucketAggs": [
                {"id": "2", "type": "filters", "settings": {"filters": [
                    {"query": "@metric:cpu", "label": ""},
                    {"query": "@metric:logins.count", "label": "logins"}
                ]}},
                {"type": "date_histogram", "field": "@timestamp", "id": "4"}
            ],
            "metrics": [{"type": "count", "id": "1"}]
        }));
        let filters = &body["aggs"]["2"]["filters"]["filters"];
        assert_eq!(filters["@metric:cpu"]["query_string"]["query"], "@metric:cpu");
        assert_eq!(filters["logins"]["query_string"]["query"], "@metric:logins.count");
        assert_eq!(filters["logins"]["query_string"]["analyze_wildcard"], true);
        assert!(body["aggs"]["2"]["aggs"]["4"]["date_histogram"].is_object());
    }

    #[test]
    fn test_histogram_geohash_nested() {
        let body = build_body(json!({
            "refId": "A",
            "bucketAggs": [
                {"id": "5", "type": "nested", "field": "nested_field"},
                {"id": "4", "type": "geohash_grid", "field": "@location", "settings": {"precision": "3"}},
                {"id": "3", "type": "histogram", "field": "bytes", "settings": {"interval": 10, "min_doc_count": 2, "missing": 5}}
            ],
            "metrics": [{"type": "count", "id": "1"}]
        }));
        let nested = &body["aggs"]["5"];
        assert_eq!(nested["nested"], json!({"path": "nested_field"}));
        let geo = &nested["aggs"]["4"];
        assert_eq!(geo["geohash_grid"], json!({"field": "@location", "precision": 3}));
        assert_eq!(
            geo["aggs"]["3"]["histogram"],
            json!({"field": "bytes", "interval": 10, "min_doc_count": 2, "missing": 5})
        );
    }

    #[test]
    fn test_date_histogram_settings() {
        let body = build_body(json!({
            "refId": "A",
            "bucketAggs": [
                {"id": "2", "type": "date_histogram", "settings": {"interval": "1d", "min_doc_count": "1", "timeZone": "America/Los_Angeles", "offset": "1h"}}
            ],
            "metrics": [{"type": "count", "id": "1"}]
        }));
        let hist = &body["aggs"]["2"]["date_histogram"];
        assert_eq!(hist["field"], "@timestamp");
        assert_eq!(hist["fixed_interval"], "1d");
        assert_eq!(hist["min_doc_count"], 1);
        assert_eq!(hist["time_zone"], "America/Los_Angeles");
        assert_eq!(hist["offset"], "1h");
    }

    #[test]
    fn test_date_histogram_utc_and_calendar() {
        let body = build_body(json!({
            "refId": "A",
            "bucketAggs": [
                {"id": "2", "type": "date_histogram", "field": "@time", "settings": {"interval": "1M", "timeZone": "utc"}}
            ],
            "metrics": [{"type": "count", "id": "1"}]
        }));
        let hist = &body["aggs"]["2"]["date_histogram"];
        assert_eq!(hist["field"], "@time");
        assert_eq!(hist["calendar_interval"], "1M");
        assert!(hist.get("fixed_interval").is_none());
        assert!(hist.get("time_zone").is_none());
    }

    // ===================================================================
    // Pipelines
    // ===================================================================

    #[test]
    fn test_pipeline_resolves_sibling_id() {
        let body = build_body(json!({
            "refId": "A",
            "bucketAggs": [{"type": "date_histogram", "field": "@timestamp", "id": "4"}],
            "metrics": [
                {"id": "2", "type": "avg", "field": "v"},
                {"id": "3", "type": "moving_avg", "field": "2"}
            ]
        }));
        let aggs = &body["aggs"]["4"]["aggs"];
        assert_eq!(aggs["3"]["moving_avg"]["buckets_path"], "2");
        assert_eq!(aggs["2"]["avg"]["field"], "v");
    }

    #[test]
    fn test_pipeline_on_count_uses_count_path() {
        let body = build_body(json!({
            "refId": "A",
            "bucketAggs": [{"type": "date_histogram", "field": "@timestamp", "id": "4"}],
            "metrics": [
                {"id": "3", "type": "count", "field": "select field"},
                {"id": "2", "type": "derivative", "field": "3", "pipelineAgg": "3"}
            ]
        }));
        let aggs = body["aggs"]["4"]["aggs"].as_object().unwrap();
        assert_eq!(aggs.len(), 1);
        assert_eq!(aggs["2"]["derivative"]["buckets_path"], "_count");
    }

    #[test]
    fn test_dangling_pipeline_is_dropped() {
        let q = query(json!({
            "refId": "A",
            "bucketAggs": [{"type": "date_histogram", "field": "@timestamp", "id": "5"}],
            "metrics": [
                {"id": "3", "type": "sum", "field": "@value"},
                {"id": "2", "type": "moving_avg", "pipelineAgg": "3"},
                {"id": "4", "type": "moving_avg", "pipelineAgg": "Metric to apply moving average"},
                {"id": "6", "type": "cumulative_sum"}
            ]
        }));
        let tree = AggTreeBuilder::new("@timestamp", q.time_range)
            .build(&q.bucket_aggs, &q.metrics)
            .unwrap();
        let keys: Vec<&str> = tree[0].children.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["3", "2"]);
        match &tree[0].children[1].payload {
            AggPayload::Pipeline(p) => assert_eq!(p.buckets_path, BucketsPath::Single("3".into())),
            _ => panic!("Expected Pipeline"),
        }
    }

    #[test]
    fn test_bucket_script_paths() {
        let body = build_body(json!({
            "refId": "A",
            "bucketAggs": [{"type": "date_histogram", "field": "@timestamp", "id": "2"}],
            "metrics": [
                {"id": "1", "type": "sum", "field": "@value"},
                {"id": "3", "type": "count"},
                {"id": "4", "type": "bucket_script",
                 "pipelineVariables": [
                    {"name": "var1", "pipelineAgg": "1"},
                    {"name": "var2", "pipelineAgg": "3"},
                    {"name": "var3", "pipelineAgg": "9"}
                 ],
                 "settings": {"script": "params.var1 * params.var2"}}
            ]
        }));
        let script = &body["aggs"]["2"]["aggs"]["4"]["bucket_script"];
        assert_eq!(script["buckets_path"], json!({"var1": "1", "var2": "_count"}));
        assert_eq!(script["script"], "params.var1 * params.var2");
    }

    #[test]
    fn test_bucket_script_without_resolvable_vars_dropped() {
        let body = build_body(json!({
            "refId": "A",
            "bucketAggs": [{"type": "date_histogram", "field": "@timestamp", "id": "2"}],
            "metrics": [
                {"id": "1", "type": "sum", "field": "@value"},
                {"id": "4", "type": "bucket_script",
                 "pipelineVariables": [{"name": "var1", "pipelineAgg": "7"}],
                 "settings": {"script": "params.var1"}}
            ]
        }));
        assert!(body["aggs"]["2"]["aggs"].get("4").is_none());
    }

    #[test]
    fn test_moving_avg_settings_coerced() {
        let body = build_body(json!({
            "refId": "A",
            "bucketAggs": [{"type": "date_histogram", "field": "@timestamp", "id": "2"}],
            "metrics": [
                {"id": "1", "type": "average", "field": "@value"},
                {"id": "3", "type": "moving_avg", "field": "1", "pipelineAgg": "1",
                 "settings": {
                    "model": "holt_winters", "window": "10", "predict": "5", "minimize": "true",
                    "settings": {"alpha": "0.5", "beta": "0.7", "gamma": "SHOULD NOT CHANGE", "period": "4"}
                 }},
                {"id": "4", "type": "serial_diff", "field": "1", "settings": {"lag": "1"}}
            ]
        }));
        let aggs = &body["aggs"]["2"]["aggs"];
        let moving = &aggs["3"]["moving_avg"];
        assert_eq!(moving["window"], 10);
        assert_eq!(moving["predict"], 5);
        assert_eq!(moving["minimize"], true);
        assert_eq!(moving["settings"]["alpha"], 0.5);
        assert_eq!(moving["settings"]["beta"], 0.7);
        assert_eq!(moving["settings"]["gamma"], "SHOULD NOT CHANGE");
        assert_eq!(moving["settings"]["period"], 4);
        assert_eq!(aggs["4"]["serial_diff"]["lag"], 1);
        assert_eq!(aggs["1"]["average"]["field"], "@value");
    }

    #[test]
    fn test_top_metrics_shape() {
        let body = build_body(json!({
            "refId": "A",
            "bucketAggs": [{"type": "date_histogram", "field": "@timestamp", "id": "3"}],
            "metrics": [{"id": "2", "type": "top_metrics",
                         "settings": {"order": "desc", "orderBy": "@timestamp", "metrics": ["@value"]}}]
        }));
        assert_eq!(
            serde_json::to_string(&body["aggs"]["3"]["aggs"]["2"]["top_metrics"]).unwrap(),
            r#"{"metrics":[{"field":"@value"}],"size":"1","sort":[{"@timestamp":"desc"}]}"#
        );
    }

    // ===================================================================
    // Documents and request level
    // ===================================================================

    #[test]
    fn test_missing_buckets_is_invalid() {
        let config = DataSourceConfig::default();
        let q = query(json!({"refId": "A", "bucketAggs": [], "metrics": [{"type": "avg", "id": "1"}]}));
        let err = SearchRequestFactory::new(&config).build(&q).unwrap_err();
        assert!(matches!(err, EsFramesError::InvalidQuery(_)));
    }

    #[test]
    fn test_raw_document_query() {
        let body = build_body(json!({
            "refId": "A",
            "bucketAggs": [],
            "metrics": [{"id": "1", "type": "raw_document", "settings": {"size": "1337"}}]
        }));
        assert_eq!(body["size"], 1337);
        assert_eq!(
            body["sort"],
            json!([
                {"@timestamp": {"order": "desc", "unmapped_type": "boolean"}},
                {"_doc": {"order": "desc"}}
            ])
        );
        assert_eq!(body["script_fields"], json!({}));
        assert!(body.get("aggs").is_none());
    }

    #[test]
    fn test_logs_query_defaults() {
        let body = build_body(json!({
            "refId": "A",
            "query": "foo",
            "metrics": [{"type": "logs", "id": "1", "settings": {"limit": "1000"}}]
        }));
        assert_eq!(body["size"], 1000);
        assert_eq!(body["highlight"]["post_tags"], json!(["@/HIGHLIGHT@"]));
        assert_eq!(body["aggs"]["1"]["date_histogram"]["fixed_interval"], "$__interval_msms");
        assert_eq!(body["query"]["bool"]["filter"][1]["query_string"]["query"], "foo");
        assert_eq!(body["fields"][0]["field"], "@timestamp");
    }

    #[test]
    fn test_multisearch_interval_and_index() {
        let config = DataSourceConfig {
            index: "[logs-]YYYY.MM.DD".into(),
            interval: crate::config::IndexInterval::Daily,
            max_concurrent_shard_requests: Some(5),
            ..Default::default()
        };
        let mut q = query(json!({
            "refId": "A",
            "intervalMs": 1000,
            "bucketAggs": [{"type": "date_histogram", "field": "@timestamp", "id": "2"}],
            "metrics": [{"type": "count", "id": "1"}]
        }));
        q.time_range = TimeRange {
            from: 1526342400000,
            to: 1526428800000,
        };

        let request = SearchRequestFactory::new(&config).build_multisearch(&[q]).unwrap();
        assert_eq!(request.requests[0].index, "logs-2018.05.15,logs-2018.05.16");
        assert_eq!(request.requests[0].interval_ms, 10_000);

        let encoded = request.encode().unwrap();
        assert!(encoded.contains(r#""fixed_interval":"10000ms""#));
        assert!(encoded.contains(r#""max_concurrent_shard_requests":5"#));
    }

    #[test]
    fn test_raw_dsl_body_passthrough() {
        let config = DataSourceConfig::default();
        let q = query(json!({
            "refId": "A",
            "editorType": "code",
            "rawDSLQuery": r#"{"size": 0, "aggs": {"2": {"terms": {"field": "host"}}}}"#
        }));
        let request = SearchRequestFactory::new(&config).build(&q).unwrap();
        match request.body {
            RequestBody::Raw(v) => assert_eq!(v["aggs"]["2"]["terms"]["field"], "host"),
            _ => panic!("Expected Raw"),
        }

        let bad = query(json!({"refId": "A", "editorType": "code", "rawDSLQuery": "[1, 2]"}));
        let err = SearchRequestFactory::new(&config).build(&bad).unwrap_err();
        assert!(matches!(err, EsFramesError::InvalidRawDsl(_)));
    }
}
