//! Request payload → table conversion
//!
//! Accepted layouts:
//! - columns: `{"f1": [1, 2], "f2": [3, 4]}`
//! - records: `[{"f1": 1, "f2": 3}, {"f1": 2, "f2": 4}]`
//! - split:   `{"columns": ["f1", "f2"], "data": [[1, 3], [2, 4]]}`
//! - MLflow envelopes `{"dataframe_split": ...}` and `{"dataframe_records": ...}`
//!
//! Values are checked against the [`InputSchema`] and laid out in schema order.

use ndarray::Array2;
use serde_json::{Map, Value};

use super::schema::{ColumnSpec, ColumnType, InputSchema};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TableError {
    #[error("Unsupported payload shape: {0}")]
    UnsupportedShape(String),
    #[error("Missing column '{0}'")]
    MissingColumn(String),
    #[error("Column '{column}' has {actual} values, expected {expected}")]
    RaggedColumns {
        column: String,
        expected: usize,
        actual: usize,
    },
    #[error("Row {row} has {actual} values, expected {expected}")]
    RowArity {
        row: usize,
        expected: usize,
        actual: usize,
    },
    #[error("Missing value for column '{column}' in row {row}")]
    MissingValue { column: String, row: usize },
    #[error("Column '{column}' row {row}: expected {expected}, found {found}")]
    TypeMismatch {
        column: String,
        row: usize,
        expected: ColumnType,
        found: &'static str,
    },
}

/// Model input: one row per sample, columns in schema order
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    values: Array2<f64>,
}

impl Table {
    /// Build a table from a decoded JSON payload
    pub fn from_json(payload: &Value, schema: &InputSchema) -> Result<Self, TableError> {
        match payload {
            Value::Object(map) => {
                if map.len() == 1 {
                    if let Some(inner) = map.get("dataframe_split") {
                        return match inner.as_object() {
                            Some(split) if is_split(split) => from_split(split, schema),
                            _ => Err(TableError::UnsupportedShape(
                                "'dataframe_split' needs 'columns' and 'data'".to_string(),
                            )),
                        };
                    }
                    if let Some(inner) = map.get("dataframe_records") {
                        return match inner.as_array() {
                            Some(rows) => from_records(rows, schema),
                            None => Err(TableError::UnsupportedShape(
                                "'dataframe_records' must be an array".to_string(),
                            )),
                        };
                    }
                }

                if is_split(map) {
                    from_split(map, schema)
                } else if map.values().all(Value::is_array) {
                    from_columns(map, schema)
                } else {
                    Err(TableError::UnsupportedShape(
                        "object values must all be arrays".to_string(),
                    ))
                }
            }
            Value::Array(rows) => from_records(rows, schema),
            other => Err(TableError::UnsupportedShape(format!(
                "expected an object or an array, found {}",
                json_type(other)
            ))),
        }
    }

    /// All-zero table with the schema's columns
    pub fn zeros(schema: &InputSchema, rows: usize) -> Self {
        Self {
            values: Array2::zeros((rows, schema.len())),
        }
    }

    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_columns(&self) -> usize {
        self.values.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows() == 0
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    /// Single precision copy, the layout ONNX exports of sklearn models expect
    pub fn to_f32(&self) -> Array2<f32> {
        self.values.mapv(|v| v as f32)
    }
}

fn is_split(map: &Map<String, Value>) -> bool {
    let columns_ok = map
        .get("columns")
        .and_then(Value::as_array)
        .is_some_and(|cols| cols.iter().all(Value::is_string));
    let data_ok = map
        .get("data")
        .and_then(Value::as_array)
        .is_some_and(|rows| rows.iter().all(Value::is_array));
    let keys_ok = map.keys().all(|k| matches!(k.as_str(), "columns" | "data" | "index"));

    columns_ok && data_ok && keys_ok
}

fn from_columns(map: &Map<String, Value>, schema: &InputSchema) -> Result<Table, TableError> {
    let mut arrays = Vec::with_capacity(schema.len());
    for spec in schema.columns() {
        let values = map
            .get(&spec.name)
            .and_then(Value::as_array)
            .ok_or_else(|| TableError::MissingColumn(spec.name.clone()))?;
        arrays.push(values);
    }

    let n_rows = arrays.first().map(|a| a.len()).unwrap_or(0);
    for (spec, values) in schema.columns().iter().zip(&arrays) {
        if values.len() != n_rows {
            return Err(TableError::RaggedColumns {
                column: spec.name.clone(),
                expected: n_rows,
                actual: values.len(),
            });
        }
    }

    let ignored = map.len().saturating_sub(schema.len());
    if ignored > 0 {
        tracing::debug!("Ignoring {} column(s) not in the model schema", ignored);
    }

    let mut table = Table::zeros(schema, n_rows);
    for (col, (spec, values)) in schema.columns().iter().zip(&arrays).enumerate() {
        for (row, value) in values.iter().enumerate() {
            table.values[[row, col]] = coerce(value, spec, row)?;
        }
    }

    Ok(table)
}

fn from_records(rows: &[Value], schema: &InputSchema) -> Result<Table, TableError> {
    let mut table = Table::zeros(schema, rows.len());

    for (row, record) in rows.iter().enumerate() {
        let record = record.as_object().ok_or_else(|| {
            TableError::UnsupportedShape(format!(
                "row {} is {}, expected an object",
                row,
                json_type(record)
            ))
        })?;

        for (col, spec) in schema.columns().iter().enumerate() {
            let value = record.get(&spec.name).ok_or_else(|| TableError::MissingValue {
                column: spec.name.clone(),
                row,
            })?;
            table.values[[row, col]] = coerce(value, spec, row)?;
        }
    }

    Ok(table)
}

fn from_split(map: &Map<String, Value>, schema: &InputSchema) -> Result<Table, TableError> {
    let names: Vec<&str> = map
        .get("columns")
        .and_then(Value::as_array)
        .map(|cols| cols.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let rows = map
        .get("data")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    // Position of each schema column in the payload rows
    let positions = schema
        .columns()
        .iter()
        .map(|spec| {
            names
                .iter()
                .position(|name| *name == spec.name)
                .ok_or_else(|| TableError::MissingColumn(spec.name.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut table = Table::zeros(schema, rows.len());
    for (row, values) in rows.iter().enumerate() {
        let values = values.as_array().map(Vec::as_slice).unwrap_or_default();
        if values.len() != names.len() {
            return Err(TableError::RowArity {
                row,
                expected: names.len(),
                actual: values.len(),
            });
        }

        for (col, (spec, pos)) in schema.columns().iter().zip(&positions).enumerate() {
            table.values[[row, col]] = coerce(&values[*pos], spec, row)?;
        }
    }

    Ok(table)
}

fn coerce(value: &Value, spec: &ColumnSpec, row: usize) -> Result<f64, TableError> {
    if value.is_null() {
        return Err(TableError::MissingValue {
            column: spec.name.clone(),
            row,
        });
    }

    let converted = match spec.dtype {
        ColumnType::Double | ColumnType::Float => value.as_f64(),
        ColumnType::Long | ColumnType::Integer => value
            .as_i64()
            .map(|v| v as f64)
            .or_else(|| value.as_u64().map(|v| v as f64)),
        ColumnType::Boolean => value.as_bool().map(|b| if b { 1.0 } else { 0.0 }),
    };

    converted.ok_or_else(|| TableError::TypeMismatch {
        column: spec.name.clone(),
        row,
        expected: spec.dtype,
        found: json_type(value),
    })
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
