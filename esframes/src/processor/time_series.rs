//! Time-series frames from the innermost `date_histogram`

use super::{
    doc_count, extended_stat_value, metric_value, number_value, percentile_keys, percentile_value,
    top_metric_fields, top_metric_value,
};
use crate::frame::{Frame, Labels};
use crate::model::{MetricAgg, MetricAggType};
use crate::naming::{LABEL_FIELD, LABEL_METRIC, LABEL_METRIC_ID};
use chrono::DateTime;
use serde_json::{Map, Value};

type Bucket<'v> = &'v Map<String, Value>;

/// One frame per visible metric (more for percentiles, extended stats and
/// top metrics), each labeled with `props`.
pub(super) fn series_frames(buckets: &[Bucket<'_>], metrics: &[MetricAgg], props: &Labels) -> Vec<Frame> {
    let times: Vec<Option<i64>> = buckets.iter().map(|b| bucket_time(b)).collect();
    let mut frames = Vec::new();
    let mut push = |kind: &str, field: &str, metric: &MetricAgg, values: Vec<Option<f64>>| {
        let mut labels = props.clone();
        labels.insert(LABEL_METRIC, kind);
        if !field.is_empty() {
            labels.insert(LABEL_FIELD, field);
        }
        labels.insert(LABEL_METRIC_ID, metric.id.as_str());
        frames.push(Frame::time_series(times.clone(), values, labels));
    };

    for metric in metrics.iter().filter(|m| !m.hide) {
        let id = metric.id.as_str();
        match &metric.agg_type {
            MetricAggType::Count => {
                let values = buckets.iter().map(|b| doc_count(b)).collect();
                push("count", "", metric, values);
            }
            MetricAggType::Percentiles => {
                let Some(first) = buckets.first() else {
                    continue;
                };
                for key in percentile_keys(first, id) {
                    let values = buckets.iter().map(|b| percentile_value(b, id, &key)).collect();
                    push(&format!("p{key}"), &metric.field, metric, values);
                }
            }
            MetricAggType::ExtendedStats => {
                for stat in metric.meta.keys().filter(|k| metric.meta_enabled(k)) {
                    let values = buckets
                        .iter()
                        .map(|b| extended_stat_value(b, id, stat))
                        .collect();
                    push(stat, &metric.field, metric, values);
                }
            }
            MetricAggType::TopMetrics => {
                for field in top_metric_fields(metric) {
                    let values = buckets
                        .iter()
                        .map(|b| top_metric_value(b, id, &field))
                        .collect();
                    push(metric.agg_type.as_str(), &field, metric, values);
                }
            }
            kind => {
                let values = buckets.iter().map(|b| metric_value(b, id)).collect();
                push(kind.as_str(), &metric.field, metric, values);
            }
        }
    }

    frames
}

/// Bucket timestamp in epoch milliseconds.
fn bucket_time(bucket: Bucket<'_>) -> Option<i64> {
    if let Some(ms) = bucket.get("key").and_then(number_value) {
        return Some(ms as i64);
    }
    bucket
        .get("key_as_string")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.timestamp_millis())
}
