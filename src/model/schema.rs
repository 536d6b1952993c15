//! Input schema - named, typed columns in model feature order

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Column value type, using MLflow signature type names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Double,
    Float,
    Long,
    Integer,
    Boolean,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Double => "double",
            ColumnType::Float => "float",
            ColumnType::Long => "long",
            ColumnType::Integer => "integer",
            ColumnType::Boolean => "boolean",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "double" | "float64" => Ok(ColumnType::Double),
            "float" | "float32" => Ok(ColumnType::Float),
            "long" | "int64" => Ok(ColumnType::Long),
            "integer" | "int" | "int32" => Ok(ColumnType::Integer),
            "boolean" | "bool" => Ok(ColumnType::Boolean),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub dtype: ColumnType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, dtype: ColumnType) -> Self {
        Self { name: name.into(), dtype }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SchemaError {
    #[error("Schema has no columns")]
    Empty,
    #[error("Duplicate column '{0}'")]
    DuplicateColumn(String),
    #[error("Unknown type '{ty}' for column '{column}'")]
    UnknownType { column: String, ty: String },
    #[error("Invalid input example: {0}")]
    InvalidExample(String),
    #[error("Invalid model signature: {0}")]
    InvalidSignature(String),
}

/// One entry of a column-based MLmodel signature
#[derive(Debug, Deserialize)]
struct SignatureColumn {
    #[serde(rename = "type")]
    ty: String,
    name: Option<String>,
}

/// Ordered input columns expected by the model
#[derive(Debug, Clone, PartialEq)]
pub struct InputSchema {
    columns: Vec<ColumnSpec>,
}

impl InputSchema {
    pub fn new(columns: Vec<ColumnSpec>) -> Result<Self, SchemaError> {
        if columns.is_empty() {
            return Err(SchemaError::Empty);
        }

        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(SchemaError::DuplicateColumn(column.name.clone()));
            }
        }

        Ok(Self { columns })
    }

    /// Parse `name[:type],...`; columns without a type are doubles.
    pub fn parse(spec: &str) -> Result<Self, SchemaError> {
        let columns = spec
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| match part.split_once(':') {
                Some((name, ty)) => ty
                    .parse()
                    .map(|dtype| ColumnSpec::new(name.trim(), dtype))
                    .map_err(|ty| SchemaError::UnknownType {
                        column: name.trim().to_string(),
                        ty,
                    }),
                None => Ok(ColumnSpec::new(part, ColumnType::Double)),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(columns)
    }

    /// Schema from the `signature.inputs` string of an MLmodel file, e.g.
    /// `[{"type": "double", "name": "feature1", "required": true}]`.
    ///
    /// Tensor-based signatures carry no column names and are rejected.
    pub fn from_signature(inputs: &str) -> Result<Self, SchemaError> {
        let entries: Vec<SignatureColumn> = serde_json::from_str(inputs)
            .map_err(|e| SchemaError::InvalidSignature(e.to_string()))?;

        let columns = entries
            .into_iter()
            .enumerate()
            .map(|(idx, entry)| {
                if entry.ty == "tensor" {
                    return Err(SchemaError::InvalidSignature(
                        "tensor-based signature has no column names".to_string(),
                    ));
                }
                let name = entry
                    .name
                    .ok_or_else(|| SchemaError::InvalidSignature(format!("input {} has no name", idx)))?;
                let dtype = entry
                    .ty
                    .parse()
                    .map_err(|ty| SchemaError::UnknownType { column: name.clone(), ty })?;
                Ok(ColumnSpec::new(name, dtype))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(columns)
    }

    /// Infer the schema from a logged input example.
    ///
    /// Only the split layout (`{"columns": [...], "data": [[...]]}`) carries a
    /// reliable column order, so other layouts are rejected. A column is
    /// `boolean` when every example value is a bool and `double` when every
    /// value is a number. A few integral sample values say nothing about the
    /// column, so numbers are never narrowed to `long`.
    pub fn from_input_example(example: &Value) -> Result<Self, SchemaError> {
        let split = example.get("dataframe_split").unwrap_or(example);

        let names = split
            .get("columns")
            .and_then(Value::as_array)
            .ok_or_else(|| SchemaError::InvalidExample("missing 'columns' list".to_string()))?;
        let rows = split
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| SchemaError::InvalidExample("missing 'data' rows".to_string()))?;

        let mut columns = Vec::with_capacity(names.len());
        for (idx, name) in names.iter().enumerate() {
            let name = name
                .as_str()
                .ok_or_else(|| SchemaError::InvalidExample(format!("column {} has no name", idx)))?;

            let values: Vec<&Value> = rows
                .iter()
                .filter_map(|row| row.as_array().and_then(|r| r.get(idx)))
                .filter(|v| !v.is_null())
                .collect();

            let dtype = if values.is_empty() {
                ColumnType::Double
            } else if values.iter().all(|v| v.is_boolean()) {
                ColumnType::Boolean
            } else if values.iter().all(|v| v.is_number()) {
                ColumnType::Double
            } else {
                return Err(SchemaError::InvalidExample(format!(
                    "column '{}' is not numeric",
                    name
                )));
            };

            columns.push(ColumnSpec::new(name, dtype));
        }

        Self::new(columns)
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_with_types() {
        let schema = InputSchema::parse("feature1, feature2:long ,flag:bool").unwrap();
        assert_eq!(schema.len(), 3);
        assert_eq!(schema.columns()[0], ColumnSpec::new("feature1", ColumnType::Double));
        assert_eq!(schema.columns()[1], ColumnSpec::new("feature2", ColumnType::Long));
        assert_eq!(schema.columns()[2], ColumnSpec::new("flag", ColumnType::Boolean));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(InputSchema::parse(" , "), Err(SchemaError::Empty));
        assert_eq!(
            InputSchema::parse("a,b,a"),
            Err(SchemaError::DuplicateColumn("a".to_string()))
        );
        assert!(matches!(
            InputSchema::parse("a:string"),
            Err(SchemaError::UnknownType { .. })
        ));
    }

    #[test]
    fn test_from_input_example() {
        let example = json!({
            "columns": ["age", "income", "member"],
            "data": [[31, 1200.5, true], [45, 900, false]]
        });

        let schema = InputSchema::from_input_example(&example).unwrap();
        assert_eq!(schema.names(), vec!["age", "income", "member"]);
        assert_eq!(schema.columns()[0].dtype, ColumnType::Double);
        assert_eq!(schema.columns()[1].dtype, ColumnType::Double);
        assert_eq!(schema.columns()[2].dtype, ColumnType::Boolean);
    }

    #[test]
    fn test_input_example_needs_column_order() {
        let records = json!([{ "a": 1, "b": 2 }]);
        assert!(matches!(
            InputSchema::from_input_example(&records),
            Err(SchemaError::InvalidExample(_))
        ));

        let text = json!({ "columns": ["city"], "data": [["Paris"]] });
        assert!(matches!(
            InputSchema::from_input_example(&text),
            Err(SchemaError::InvalidExample(_))
        ));
    }

    #[test]
    fn test_integral_example_accepts_fractional_requests() {
        let example = json!({ "columns": ["rooms"], "data": [[2], [3]] });
        let schema = InputSchema::from_input_example(&example).unwrap();

        let table = crate::model::Table::from_json(&json!({"rooms": [2.5]}), &schema).unwrap();
        assert_eq!(table.values()[[0, 0]], 2.5);
    }

    #[test]
    fn test_from_signature() {
        let inputs = r#"[{"type": "double", "name": "feature1", "required": true},
                         {"type": "long", "name": "feature2", "required": true}]"#;

        let schema = InputSchema::from_signature(inputs).unwrap();
        assert_eq!(schema.columns()[0], ColumnSpec::new("feature1", ColumnType::Double));
        assert_eq!(schema.columns()[1], ColumnSpec::new("feature2", ColumnType::Long));
    }

    #[test]
    fn test_from_signature_rejects_unusable_inputs() {
        let tensor = r#"[{"type": "tensor", "tensor-spec": {"dtype": "float64", "shape": [-1, 2]}}]"#;
        assert!(matches!(
            InputSchema::from_signature(tensor),
            Err(SchemaError::InvalidSignature(_))
        ));

        let text = r#"[{"type": "string", "name": "city"}]"#;
        assert!(matches!(
            InputSchema::from_signature(text),
            Err(SchemaError::UnknownType { .. })
        ));

        assert!(matches!(
            InputSchema::from_signature("not json"),
            Err(SchemaError::InvalidSignature(_))
        ));
    }
}
