//! Series and column naming
//!
//! Time-series frames come out of the processor with their value field
//! labeled by the bucket keys they belong to plus three bookkeeping labels
//! (`metric`, `field`, `metricId`). [`name_series`] turns those labels into a
//! display name, either from the query alias template or from the metric
//! descriptions below.

use crate::frame::{FieldConfig, Frame, Labels};
use crate::model::{MetricAgg, MetricAggType, Query};
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::OnceLock;

pub const LABEL_METRIC: &str = "metric";
pub const LABEL_FIELD: &str = "field";
pub const LABEL_METRIC_ID: &str = "metricId";

/// Pipeline references are followed at most this deep.
const MAX_DESCRIBE_DEPTH: usize = 8;

/// Display name of a metric aggregation type.
pub fn metric_name(kind: &str) -> Option<&'static str> {
    let name = match kind {
        "count" => "Count",
        "avg" => "Average",
        "sum" => "Sum",
        "max" => "Max",
        "min" => "Min",
        "extended_stats" => "Extended Stats",
        "percentiles" => "Percentiles",
        "cardinality" => "Unique Count",
        "moving_avg" => "Moving Average",
        "moving_fn" => "Moving Function",
        "cumulative_sum" => "Cumulative Sum",
        "derivative" => "Derivative",
        "serial_diff" => "Serial Difference",
        "bucket_script" => "Bucket Script",
        "raw_document" => "Raw Document",
        "raw_data" => "Raw Data",
        "logs" => "Logs",
        "rate" => "Rate",
        "top_metrics" => "Top Metrics",
        _ => return None,
    };
    Some(name)
}

/// Display name of an `extended_stats` sub-statistic.
pub fn extended_stat_name(stat: &str) -> Option<&'static str> {
    let name = match stat {
        "avg" => "Avg",
        "min" => "Min",
        "max" => "Max",
        "sum" => "Sum",
        "count" => "Count",
        "std_deviation" => "Std Dev",
        "std_deviation_bounds_upper" => "Std Dev Upper",
        "std_deviation_bounds_lower" => "Std Dev Lower",
        _ => return None,
    };
    Some(name)
}

/// Table lookup with passthrough for unknown names (`p95`, custom types).
pub fn friendly_name(name: &str) -> String {
    metric_name(name)
        .or_else(|| extended_stat_name(name))
        .map(str::to_string)
        .unwrap_or_else(|| name.to_string())
}

/// `"Average @value"`, or just the name when there is no field.
pub fn describe(kind: &str, field: &str) -> String {
    join_words(&[&friendly_name(kind), field])
}

/// Script source of a `bucket_script` metric.
pub fn script_text(metric: &MetricAgg) -> String {
    match metric.settings.get("script") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(script)) => script
            .get("source")
            .or_else(|| script.get("inline"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}

/// Human-readable description of a metric. Pipelines describe what they
/// reference and `bucket_script` substitutes its `params.<var>` names.
pub fn describe_metric(metric: &MetricAgg, query: &Query) -> String {
    describe_metric_at(metric, query, 0)
}

fn describe_metric_at(metric: &MetricAgg, query: &Query, depth: usize) -> String {
    let kind = metric.agg_type.as_str();
    if depth >= MAX_DESCRIBE_DEPTH || !metric.agg_type.is_pipeline() {
        return describe(kind, &metric.field);
    }

    if metric.agg_type == MetricAggType::BucketScript {
        let mut text = script_text(metric);
        let mut variables: Vec<_> = metric.pipeline_variables.iter().collect();
        // params.var10 must be replaced before params.var1
        variables.sort_by_key(|v| std::cmp::Reverse(v.name.len()));
        for variable in variables {
            let description = query
                .metric(&variable.pipeline_agg)
                .map(|m| describe_metric_at(m, query, depth + 1))
                .unwrap_or_else(|| "Unset".to_string());
            text = text.replace(&format!("params.{}", variable.name), &description);
        }
        return text;
    }

    let referenced = query
        .metric(metric.pipeline_reference())
        .map(|m| describe_metric_at(m, query, depth + 1))
        .unwrap_or_else(|| "Unset".to_string());
    join_words(&[&friendly_name(kind), &referenced])
}

fn join_words(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}

fn alias_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\{\{([\s\S]+?)\}\}").ok())
        .as_ref()
}

/// Expand `{{term X}}`, `{{X}}`, `{{metric}}` and `{{field}}` in an alias.
/// Placeholders with nothing to substitute are kept verbatim.
pub fn render_alias(alias: &str, labels: &Labels, metric: &str, field: &str) -> String {
    let Some(pattern) = alias_pattern() else {
        return alias.to_string();
    };

    pattern
        .replace_all(alias, |caps: &Captures| {
            let group = caps[1].trim();
            if group == "metric" {
                return metric.to_string();
            }
            if group == "field" {
                return field.to_string();
            }
            let key = group.strip_prefix("term ").map(str::trim).unwrap_or(group);
            labels
                .get(key)
                .map(str::to_string)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Name every time-series frame of one query.
///
/// With `keep_labels` the bucket labels stay on the value field and the name
/// goes into its `display_name_from_ds`; otherwise it becomes the frame name
/// and the labels are dropped.
pub fn name_series(frames: &mut [Frame], query: &Query, keep_labels: bool) {
    let metric_kinds: BTreeSet<String> = frames
        .iter()
        .filter(|f| f.is_time_series())
        .filter_map(|f| f.fields[1].labels.get(LABEL_METRIC))
        .map(str::to_string)
        .collect();

    for frame in frames.iter_mut() {
        let Some(value) = frame.value_field_mut() else {
            continue;
        };
        let name = series_name(&value.labels, query, metric_kinds.len());

        let mut labels = std::mem::take(&mut value.labels);
        labels.remove(LABEL_METRIC);
        labels.remove(LABEL_FIELD);
        labels.remove(LABEL_METRIC_ID);

        if keep_labels {
            value.labels = labels;
            value
                .config
                .get_or_insert_with(FieldConfig::default)
                .display_name_from_ds = Some(name);
        } else {
            frame.name = name;
        }
    }
}

fn series_name(labels: &Labels, query: &Query, metric_kinds: usize) -> String {
    let kind = labels.get(LABEL_METRIC).unwrap_or_default();
    let field = labels.get(LABEL_FIELD).unwrap_or_default();

    if !query.alias.is_empty() {
        return render_alias(&query.alias, labels, &friendly_name(kind), field);
    }

    let description = match labels.get(LABEL_METRIC_ID).and_then(|id| query.metric(id)) {
        Some(metric) if metric.agg_type.is_pipeline() => describe_metric(metric, query),
        _ => describe(kind, field),
    };

    let terms: Vec<&str> = labels
        .iter()
        .filter(|(k, _)| ![LABEL_METRIC, LABEL_FIELD, LABEL_METRIC_ID].contains(k))
        .map(|(_, v)| v)
        .collect();

    if terms.is_empty() {
        return description;
    }

    let mut name = terms.join(" ");
    if metric_kinds != 1 {
        name.push(' ');
        name.push_str(&description);
    }
    name
}

/// Column name of a metric in a table frame. Same-type siblings are told
/// apart by field, then by id.
pub fn table_column_name(metric: &MetricAgg, metrics: &[MetricAgg]) -> String {
    if metric.agg_type == MetricAggType::BucketScript {
        let script = script_text(metric);
        if !script.is_empty() {
            return script;
        }
    }

    let name = friendly_name(metric.agg_type.as_str());
    let siblings: Vec<&MetricAgg> = metrics
        .iter()
        .filter(|m| m.id != metric.id && m.agg_type == metric.agg_type)
        .collect();
    if siblings.is_empty() {
        return name;
    }

    if siblings.iter().any(|m| m.field == metric.field) {
        join_words(&[&name, &metric.field, &metric.id])
    } else {
        join_words(&[&name, &metric.field])
    }
}
