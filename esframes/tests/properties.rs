//! Property-based tests for the builder/parser round trip, trimming,
//! percentile fan-out and `hits.total` compatibility.

use esframes::builder::AggTreeBuilder;
use esframes::config::ConfiguredFields;
use esframes::decoder::{decode_whole, StreamingDecoder};
use esframes::dsl::aggs_to_json;
use esframes::model::{BucketAggType, TimeRange};
use esframes::parser::RawDslParser;
use esframes::processor::ResponseProcessor;
use esframes::{BucketAgg, MetricAgg, Query};
use proptest::prelude::*;
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

fn field_name() -> impl Strategy<Value = String> {
    "[a-z]{1,8}"
}

fn bucket_kind() -> impl Strategy<Value = (BucketAggType, String)> {
    prop_oneof![
        field_name().prop_map(|f| (BucketAggType::Terms, f)),
        field_name().prop_map(|f| (BucketAggType::Histogram, f)),
        field_name().prop_map(|f| (BucketAggType::GeohashGrid, f)),
        Just((BucketAggType::DateHistogram, "@timestamp".to_string())),
    ]
}

fn metric_kind() -> impl Strategy<Value = (&'static str, String)> {
    (
        prop_oneof![Just("avg"), Just("sum"), Just("min"), Just("max"), Just("cardinality")],
        field_name(),
    )
}

fn process(query: Value, response: Value) -> Vec<esframes::Frame> {
    let query = Query::from_json(query).unwrap();
    let body = json!({ "responses": [response] });
    let decoded = decode_whole(body.to_string().as_bytes()).unwrap();
    let fields = ConfiguredFields::default();
    ResponseProcessor::new(&fields)
        .process(&query, &decoded.responses[0])
        .unwrap()
}

// ---------------------------------------------------------------------------
// Builder output parses back to the same aggregations
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_builder_parser_round_trip(
        buckets in prop::collection::vec(bucket_kind(), 1..=3),
        metrics in prop::collection::vec(metric_kind(), 1..=4),
    ) {
        let buckets: Vec<BucketAgg> = buckets
            .into_iter()
            .enumerate()
            .map(|(i, (kind, field))| {
                let agg = BucketAgg::new((10 + i).to_string(), kind, field);
                if kind == BucketAggType::Histogram {
                    agg.with_settings(json!({"interval": "10"}))
                } else {
                    agg
                }
            })
            .collect();
        let metrics: Vec<MetricAgg> = metrics
            .into_iter()
            .enumerate()
            .map(|(i, (kind, field))| MetricAgg::new((i + 1).to_string(), kind, field))
            .collect();

        let tree = AggTreeBuilder::new("@timestamp", TimeRange { from: 0, to: 60_000 })
            .build(&buckets, &metrics)
            .unwrap();
        let body = json!({ "size": 0, "aggs": aggs_to_json(&tree) });
        let parsed = RawDslParser::default().parse_value(&body).unwrap();

        let bucket_keys = |aggs: &[BucketAgg]| -> Vec<(String, BucketAggType, String)> {
            aggs.iter().map(|b| (b.id.clone(), b.agg_type, b.field.clone())).collect()
        };
        let metric_keys = |aggs: &[MetricAgg]| -> Vec<(String, String, String)> {
            let mut keys: Vec<_> = aggs
                .iter()
                .map(|m| (m.id.clone(), m.agg_type.to_string(), m.field.clone()))
                .collect();
            keys.sort();
            keys
        };

        prop_assert_eq!(bucket_keys(&parsed.bucket_aggs), bucket_keys(&buckets));
        prop_assert_eq!(metric_keys(&parsed.metrics), metric_keys(&metrics));
    }
}

// ---------------------------------------------------------------------------
// Response shaping
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_trim_edges_length(b in 0usize..20, k in 0usize..6) {
        let buckets: Vec<Value> = (0..b)
            .map(|i| json!({"key": (i as i64 + 1) * 1000, "doc_count": i}))
            .collect();

        let frames = process(
            json!({
                "refId": "A",
                "metrics": [{"type": "count", "id": "1"}],
                "bucketAggs": [{"type": "date_histogram", "id": "2", "settings": {"trimEdges": k}}]
            }),
            json!({"aggregations": {"2": {"buckets": buckets}}}),
        );

        let expected = if k > 0 && b > 2 * k { b - 2 * k } else { b };
        prop_assert_eq!(frames.len(), 1);
        prop_assert!(frames[0].fields.iter().all(|f| f.len() == expected));
    }

    #[test]
    fn test_percentile_fan_out(n in 1usize..6, m in 1usize..12) {
        let percents: Vec<String> = (1..=n).map(|i| (i * 10).to_string()).collect();
        let buckets: Vec<Value> = (0..m)
            .map(|i| {
                let values: serde_json::Map<String, Value> = percents
                    .iter()
                    .map(|p| (p.clone(), json!(i as f64)))
                    .collect();
                json!({"key": (i as i64 + 1) * 1000, "doc_count": 1, "1": {"values": values}})
            })
            .collect();

        let frames = process(
            json!({
                "refId": "A",
                "metrics": [{"type": "percentiles", "field": "latency", "id": "1",
                             "settings": {"percents": percents}}],
                "bucketAggs": [{"type": "date_histogram", "id": "2"}]
            }),
            json!({"aggregations": {"2": {"buckets": buckets}}}),
        );

        prop_assert_eq!(frames.len(), n);
        prop_assert!(frames.iter().all(|f| f.rows() == m));
    }

    #[test]
    fn test_total_shapes_agree(value in any::<u32>()) {
        let object = json!({"responses": [{"hits": {"total": {"value": value, "relation": "eq"}, "hits": []}}]});
        let number = json!({"responses": [{"hits": {"total": value, "hits": []}}]});

        let total = |body: &Value| {
            let bytes = body.to_string().into_bytes();
            let outcome = StreamingDecoder::new(bytes.as_slice()).decode();
            outcome.responses[0]
                .hits
                .as_ref()
                .and_then(|h| h.total.as_ref())
                .map(|t| t.value)
        };

        prop_assert_eq!(total(&object), Some(u64::from(value)));
        prop_assert_eq!(total(&number), Some(u64::from(value)));
    }
}
