//! Document frames for `raw_document`, `raw_data` and `logs` queries

use super::number_value;
use crate::builder::DEFAULT_SIZE;
use crate::config::ConfiguredFields;
use crate::decoder::{Document, SearchResponse};
use crate::dsl::search::{HIGHLIGHT_POST_TAG, HIGHLIGHT_PRE_TAG};
use crate::frame::{Field, FieldConfig, FieldValues, Frame, FrameMeta};
use crate::model::settings::coerce_int;
use crate::model::{MetricAggType, Query};
use crate::Result;
use chrono::DateTime;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::OnceLock;
use tracing::debug;

/// Nesting depth up to which `_source` objects are flattened.
const MAX_FLATTEN_DEPTH: usize = 10;

/// Hit metadata that always gets a column.
const HIT_KEYS: [&str; 5] = ["_id", "_type", "_index", "sort", "highlight"];

pub(super) fn document_frames(
    query: &Query,
    kind: &MetricAggType,
    response: &SearchResponse,
    fields: &ConfiguredFields,
) -> Result<Vec<Frame>> {
    let hits: &[Document] = response
        .hits
        .as_ref()
        .map(|h| h.hits.as_slice())
        .unwrap_or_default();
    debug!(kind = kind.as_str(), hits = hits.len(), "processing documents");

    if *kind == MetricAggType::RawDocument {
        return Ok(vec![raw_document_frame(query, hits)]);
    }

    let time_field = query.time_field.as_deref().unwrap_or(&fields.time_field);
    let logs = *kind == MetricAggType::Logs;

    let docs = hits
        .iter()
        .map(|hit| hit_document(hit, time_field, fields, logs))
        .collect::<Result<Vec<_>>>()?;

    let message_field = logs.then_some(fields.log_message_field.as_str());
    let columns = column_order(&docs, time_field, message_field);

    let frame_fields = columns
        .into_iter()
        .map(|name| {
            let values = if name == time_field {
                FieldValues::Time(docs.iter().map(|d| d.get(&name).and_then(time_value)).collect())
            } else {
                column_values(&docs, &name)
            };
            Field::new(name, values).with_config(FieldConfig::filterable())
        })
        .collect();

    let meta = if logs {
        FrameMeta {
            preferred_visualisation_type: Some("logs".to_string()),
            custom: Some(logs_custom_meta(query, response, hits)),
        }
    } else {
        FrameMeta {
            preferred_visualisation_type: Some("table".to_string()),
            custom: None,
        }
    };

    Ok(vec![Frame::new(frame_fields).with_meta(meta)])
}

/// One JSON column named after the query; each row is `_source` merged
/// with `fields` and the hit metadata.
fn raw_document_frame(query: &Query, hits: &[Document]) -> Frame {
    let rows = hits
        .iter()
        .map(|hit| {
            let mut doc = hit
                .get("_source")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            if let Some(Value::Object(fields)) = hit.get("fields") {
                for (k, v) in fields {
                    doc.insert(k.clone(), v.clone());
                }
            }
            for key in ["_id", "_type", "_index"] {
                if let Some(v) = hit.get(key) {
                    doc.insert(key.to_string(), v.clone());
                }
            }
            Some(Value::Object(doc))
        })
        .collect();

    Frame::new(vec![Field::new(query.ref_id.as_str(), FieldValues::Json(rows))])
}

fn hit_document(
    hit: &Document,
    time_field: &str,
    fields: &ConfiguredFields,
    logs: bool,
) -> Result<Map<String, Value>> {
    let source = hit
        .get("_source")
        .and_then(Value::as_object)
        .map(|s| flatten(s, MAX_FLATTEN_DEPTH))
        .unwrap_or_default();

    let mut doc = Map::new();
    for key in HIT_KEYS {
        doc.insert(key.to_string(), hit.get(key).cloned().unwrap_or(Value::Null));
    }
    for (k, v) in &source {
        doc.insert(k.clone(), v.clone());
    }

    if let Some(time) = hit
        .get("fields")
        .and_then(|f| f.get(time_field))
        .and_then(|t| t.get(0))
    {
        doc.insert(time_field.to_string(), time.clone());
    }

    if logs {
        doc.insert("_source".to_string(), Value::String(serde_json::to_string(&source)?));
        doc.insert("id".to_string(), hit.get("_id").cloned().unwrap_or(Value::Null));

        let level = fields.log_level_field.as_str();
        if !level.is_empty() && level != "level" {
            if let Some(value) = doc.remove(level) {
                doc.insert("level".to_string(), value);
            }
        }
    }

    Ok(doc)
}

/// Flatten nested objects into dotted keys. Objects deeper than
/// `max_depth` levels are kept whole.
pub fn flatten(source: &Map<String, Value>, max_depth: usize) -> Map<String, Value> {
    fn step(
        prefix: Option<&str>,
        object: &Map<String, Value>,
        depth: usize,
        max_depth: usize,
        out: &mut Map<String, Value>,
    ) {
        for (k, v) in object {
            let key = match prefix {
                Some(prefix) => format!("{prefix}.{k}"),
                None => k.clone(),
            };
            match v {
                Value::Object(inner) if depth < max_depth => {
                    step(Some(&key), inner, depth + 1, max_depth, out)
                }
                _ => {
                    out.insert(key, v.clone());
                }
            }
        }
    }

    let mut out = Map::new();
    step(None, source, 0, max_depth, &mut out);
    out
}

/// Time field first, then the log message field, then everything else sorted.
fn column_order(docs: &[Map<String, Value>], time_field: &str, message_field: Option<&str>) -> Vec<String> {
    let mut names: BTreeSet<&str> = docs.iter().flat_map(|d| d.keys().map(String::as_str)).collect();
    let mut ordered = Vec::with_capacity(names.len());

    for first in [Some(time_field), message_field].into_iter().flatten() {
        if !first.is_empty() && names.remove(first) {
            ordered.push(first.to_string());
        }
    }
    ordered.extend(names.into_iter().map(str::to_string));
    ordered
}

/// Column typed after its first non-null value.
fn column_values(docs: &[Map<String, Value>], name: &str) -> FieldValues {
    let cells: Vec<Option<&Value>> = docs
        .iter()
        .map(|d| d.get(name).filter(|v| !v.is_null()))
        .collect();

    match cells.iter().flatten().next() {
        Some(Value::String(_)) => FieldValues::String(
            cells
                .iter()
                .map(|c| {
                    c.map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                })
                .collect(),
        ),
        Some(Value::Number(_)) => {
            FieldValues::Number(cells.iter().map(|c| c.and_then(number_value)).collect())
        }
        Some(Value::Bool(_)) => {
            FieldValues::Bool(cells.iter().map(|c| c.and_then(Value::as_bool)).collect())
        }
        _ => FieldValues::Json(cells.iter().map(|c| c.cloned()).collect()),
    }
}

/// Epoch milliseconds from an RFC 3339 string or a number.
fn time_value(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.timestamp_millis())
            .ok()
            .or_else(|| s.parse::<i64>().ok()),
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        _ => None,
    }
}

fn logs_custom_meta(query: &Query, response: &SearchResponse, hits: &[Document]) -> Value {
    let limit = query
        .metrics
        .first()
        .and_then(|m| m.settings.get("limit"))
        .and_then(coerce_int)
        .unwrap_or(DEFAULT_SIZE);
    let total = response
        .hits
        .as_ref()
        .and_then(|h| h.total.as_ref())
        .map(|t| json!(t.value))
        .unwrap_or(Value::Null);

    json!({
        "searchWords": search_words(hits),
        "limit": limit,
        "total": total,
    })
}

fn highlight_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            let pattern = format!(
                "{}(.*?){}",
                regex::escape(HIGHLIGHT_PRE_TAG),
                regex::escape(HIGHLIGHT_POST_TAG)
            );
            Regex::new(&pattern).ok()
        })
        .as_ref()
}

/// Distinct highlighted terms across all hits, sorted.
fn search_words(hits: &[Document]) -> Vec<String> {
    let Some(pattern) = highlight_pattern() else {
        return Vec::new();
    };

    let words: BTreeSet<String> = hits
        .iter()
        .filter_map(|hit| hit.get("highlight").and_then(Value::as_object))
        .flat_map(|highlight| highlight.values())
        .filter_map(Value::as_array)
        .flatten()
        .filter_map(Value::as_str)
        .flat_map(|text| pattern.captures_iter(text))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect();

    words.into_iter().collect()
}
