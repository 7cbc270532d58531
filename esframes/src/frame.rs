//! Output frames
//!
//! Column-oriented tables handed to the visualization layer. Every column is
//! nullable and carries its own type, optional labels and display config.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

/// Name of the time column in a time-series frame.
pub const TIME_FIELD_NAME: &str = "Time";
/// Name of the value column in a time-series frame.
pub const VALUE_FIELD_NAME: &str = "Value";

/// Typed column values
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "values", rename_all = "snake_case")]
pub enum FieldValues {
    /// Epoch milliseconds
    Time(Vec<Option<i64>>),
    Number(Vec<Option<f64>>),
    String(Vec<Option<String>>),
    Bool(Vec<Option<bool>>),
    Json(Vec<Option<Value>>),
}

impl FieldValues {
    pub fn len(&self) -> usize {
        match self {
            FieldValues::Time(v) => v.len(),
            FieldValues::Number(v) => v.len(),
            FieldValues::String(v) => v.len(),
            FieldValues::Bool(v) => v.len(),
            FieldValues::Json(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValues::Time(_) => "time",
            FieldValues::Number(_) => "number",
            FieldValues::String(_) => "string",
            FieldValues::Bool(_) => "bool",
            FieldValues::Json(_) => "json",
        }
    }

    /// Drop `k` values from both ends. Columns with `2k` or fewer values are
    /// left alone.
    pub fn trim_edges(&mut self, k: usize) {
        fn trim<T>(values: &mut Vec<T>, k: usize) {
            if k == 0 || values.len() <= 2 * k {
                return;
            }
            values.truncate(values.len() - k);
            values.drain(..k);
        }

        match self {
            FieldValues::Time(v) => trim(v, k),
            FieldValues::Number(v) => trim(v, k),
            FieldValues::String(v) => trim(v, k),
            FieldValues::Bool(v) => trim(v, k),
            FieldValues::Json(v) => trim(v, k),
        }
    }
}

/// Display configuration attached to a column
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConfig {
    #[serde(rename = "displayNameFromDS", skip_serializing_if = "Option::is_none")]
    pub display_name_from_ds: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filterable: Option<bool>,
}

impl FieldConfig {
    pub fn filterable() -> Self {
        Self {
            filterable: Some(true),
            ..Default::default()
        }
    }
}

/// Insertion-ordered label set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Labels(Vec<(String, String)>);

impl Labels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a label, replacing an existing value in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let pos = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(pos).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Labels {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// A single named column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub name: String,
    #[serde(skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<FieldConfig>,
    #[serde(flatten)]
    pub values: FieldValues,
}

impl Field {
    pub fn new(name: impl Into<String>, values: FieldValues) -> Self {
        Self {
            name: name.into(),
            labels: Labels::new(),
            config: None,
            values,
        }
    }

    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_config(mut self, config: FieldConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_visualisation_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<Value>,
}

/// Output frame
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub ref_id: String,
    pub fields: Vec<Field>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<FrameMeta>,
}

impl Frame {
    pub fn new(fields: Vec<Field>) -> Self {
        Self {
            fields,
            ..Default::default()
        }
    }

    /// Two-column time series: `Time` and a labeled `Value`.
    pub fn time_series(times: Vec<Option<i64>>, values: Vec<Option<f64>>, labels: Labels) -> Self {
        Self::new(vec![
            Field::new(TIME_FIELD_NAME, FieldValues::Time(times)),
            Field::new(VALUE_FIELD_NAME, FieldValues::Number(values)).with_labels(labels),
        ])
    }

    pub fn with_meta(mut self, meta: FrameMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Number of rows (length of the first column).
    pub fn rows(&self) -> usize {
        self.fields.first().map(Field::len).unwrap_or(0)
    }

    /// The value column of a time-series frame.
    pub fn value_field_mut(&mut self) -> Option<&mut Field> {
        if self.is_time_series() {
            self.fields.get_mut(1)
        } else {
            None
        }
    }

    pub fn is_time_series(&self) -> bool {
        self.fields.len() == 2
            && self.fields[0].name == TIME_FIELD_NAME
            && matches!(self.fields[0].values, FieldValues::Time(_))
            && self.fields[1].name == VALUE_FIELD_NAME
    }

    pub fn trim_edges(&mut self, k: usize) {
        for field in &mut self.fields {
            field.values.trim_edges(k);
        }
    }
}
