//! Table frames from a non-histogram innermost bucket

use super::{
    doc_count, extended_stat_value, metric_value, number_value, percentile_keys, percentile_value,
    prop_name, top_metric_fields, top_metric_value,
};
use crate::frame::{Field, FieldConfig, FieldValues, Frame, Labels};
use crate::model::{BucketAgg, MetricAgg, MetricAggType};
use crate::naming;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Text(String),
    Number(f64),
    Null,
}

impl Cell {
    fn from_key(key: &Value) -> Self {
        match key {
            Value::String(s) => Cell::Text(s.clone()),
            other => number_value(other).map(Cell::Number).unwrap_or(Cell::Null),
        }
    }
}

impl From<Option<f64>> for Cell {
    fn from(value: Option<f64>) -> Self {
        value.map(Cell::Number).unwrap_or(Cell::Null)
    }
}

#[derive(Debug)]
struct Column {
    name: String,
    filterable: bool,
    cells: Vec<Cell>,
}

/// Rows from every branch of the bucket walk, collected column-wise.
/// Columns are created in first-seen order and padded with nulls.
#[derive(Debug, Default)]
pub(super) struct TableBuilder {
    columns: Vec<Column>,
    rows: usize,
}

impl TableBuilder {
    pub(super) fn add_row(
        &mut self,
        agg_def: &BucketAgg,
        key: Option<&Value>,
        bucket: &Map<String, Value>,
        props: &Labels,
        metrics: &[MetricAgg],
    ) {
        let mut row: Vec<(String, bool, Cell)> = props
            .iter()
            .map(|(k, v)| (k.to_string(), true, Cell::Text(v.to_string())))
            .collect();

        if let Some(key) = key {
            row.push((prop_name(agg_def), true, Cell::from_key(key)));
        }

        for metric in metrics.iter().filter(|m| !m.hide) {
            let id = metric.id.as_str();
            match &metric.agg_type {
                MetricAggType::Count => {
                    row.push((naming::table_column_name(metric, metrics), false, doc_count(bucket).into()));
                }
                MetricAggType::Percentiles => {
                    for key in percentile_keys(bucket, id) {
                        let name = format!("p{key} {}", metric.field);
                        let cell = percentile_value(bucket, id, &key).into();
                        row.push((name.trim_end().to_string(), false, cell));
                    }
                }
                MetricAggType::ExtendedStats => {
                    for stat in metric.meta.keys().filter(|k| metric.meta_enabled(k)) {
                        let label = naming::extended_stat_name(stat).unwrap_or(stat);
                        let name = format!("{label} {}", metric.field);
                        let cell = extended_stat_value(bucket, id, stat).into();
                        row.push((name.trim_end().to_string(), false, cell));
                    }
                }
                MetricAggType::TopMetrics => {
                    let fields = top_metric_fields(metric);
                    for field in &fields {
                        let mut name = naming::friendly_name(metric.agg_type.as_str());
                        if fields.len() > 1 {
                            name = format!("{name} {field}");
                        }
                        row.push((name, false, top_metric_value(bucket, id, field).into()));
                    }
                }
                _ => {
                    let cell = metric_value(bucket, id).into();
                    row.push((naming::table_column_name(metric, metrics), false, cell));
                }
            }
        }

        self.push_row(row);
    }

    fn push_row(&mut self, row: Vec<(String, bool, Cell)>) {
        for (name, filterable, cell) in row {
            let index = match self.columns.iter().position(|c| c.name == name) {
                Some(index) => index,
                None => {
                    self.columns.push(Column {
                        name,
                        filterable,
                        cells: vec![Cell::Null; self.rows],
                    });
                    self.columns.len() - 1
                }
            };
            let column = &mut self.columns[index];
            column.cells.resize(self.rows, Cell::Null);
            column.cells.push(cell);
        }

        self.rows += 1;
        for column in &mut self.columns {
            column.cells.resize(self.rows, Cell::Null);
        }
    }

    /// The table frame, or `None` when no row was added.
    pub(super) fn build(self) -> Option<Frame> {
        if self.rows == 0 {
            return None;
        }

        let fields = self
            .columns
            .into_iter()
            .map(|column| {
                let numeric = column
                    .cells
                    .iter()
                    .all(|c| matches!(c, Cell::Number(_) | Cell::Null));
                let values = if numeric {
                    FieldValues::Number(
                        column
                            .cells
                            .into_iter()
                            .map(|c| match c {
                                Cell::Number(n) => Some(n),
                                _ => None,
                            })
                            .collect(),
                    )
                } else {
                    FieldValues::String(
                        column
                            .cells
                            .into_iter()
                            .map(|c| match c {
                                Cell::Text(s) => Some(s),
                                Cell::Number(n) => Some(n.to_string()),
                                Cell::Null => None,
                            })
                            .collect(),
                    )
                };
                let field = Field::new(column.name, values);
                if column.filterable {
                    field.with_config(FieldConfig::filterable())
                } else {
                    field
                }
            })
            .collect();

        Some(Frame::new(fields))
    }
}
