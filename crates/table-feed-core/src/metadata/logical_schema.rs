//! The structured field list a shared table advertises.
//!
//! Rows are never decoded here, so a schema is only names, types,
//! nullability, and nesting. Type names on the wire follow the lowercase
//! vocabulary of table-sharing endpoints (`long`, `string`, `decimal`, ...).
use std::{collections::HashSet, fmt};

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

/// Largest decimal precision a shared table may declare.
pub const MAX_DECIMAL_PRECISION: u8 = 38;

/// One named, typed column (or nested field).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalField {
    /// Field name.
    pub name: String,
    /// Field type.
    #[serde(rename = "type")]
    pub data_type: LogicalDataType,
    /// Nulls allowed. Absent on the wire means true.
    #[serde(default = "nullable_by_default")]
    pub nullable: bool,
}

fn nullable_by_default() -> bool {
    true
}

impl LogicalField {
    /// A field that admits nulls.
    pub fn nullable(name: impl Into<String>, data_type: LogicalDataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    /// A field that never holds nulls.
    pub fn required(name: impl Into<String>, data_type: LogicalDataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: false,
        }
    }
}

impl fmt::Display for LogicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.data_type)?;
        if !self.nullable {
            f.write_str(" not null")?;
        }
        Ok(())
    }
}

/// Column types of a shared table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogicalDataType {
    /// `boolean`
    #[serde(rename = "boolean")]
    Bool,
    /// `integer` (32-bit)
    #[serde(rename = "integer")]
    Int32,
    /// `long` (64-bit)
    #[serde(rename = "long")]
    Int64,
    /// `float`
    #[serde(rename = "float")]
    Float32,
    /// `double`
    #[serde(rename = "double")]
    Float64,
    /// `binary`
    Binary,
    /// `string`
    #[serde(rename = "string")]
    Utf8,
    /// `date`
    Date,
    /// Microsecond instant, adjusted to UTC.
    Timestamp,
    /// Microsecond wall-clock time without a zone.
    TimestampNtz,
    /// `decimal(precision, scale)`
    Decimal {
        /// Total digits, 1 to [`MAX_DECIMAL_PRECISION`].
        precision: u8,
        /// Digits after the point; at most `precision`.
        scale: u8,
    },
    /// Named child fields.
    Struct {
        /// Children, in order.
        fields: Vec<LogicalField>,
    },
    /// Repeated values of one element field.
    #[serde(rename = "array")]
    List {
        /// The element field; its name only appears in error paths.
        elements: Box<LogicalField>,
    },
    /// Key/value pairs. Keys are never null.
    Map {
        /// Key field.
        key: Box<LogicalField>,
        /// Value field.
        value: Box<LogicalField>,
    },
}

impl LogicalDataType {
    /// True for types without children.
    pub fn is_primitive(&self) -> bool {
        !matches!(
            self,
            LogicalDataType::Struct { .. } | LogicalDataType::List { .. } | LogicalDataType::Map { .. }
        )
    }
}

impl fmt::Display for LogicalDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogicalDataType::Bool => "boolean",
            LogicalDataType::Int32 => "integer",
            LogicalDataType::Int64 => "long",
            LogicalDataType::Float32 => "float",
            LogicalDataType::Float64 => "double",
            LogicalDataType::Binary => "binary",
            LogicalDataType::Utf8 => "string",
            LogicalDataType::Date => "date",
            LogicalDataType::Timestamp => "timestamp",
            LogicalDataType::TimestampNtz => "timestamp_ntz",
            LogicalDataType::Decimal { precision, scale } => {
                return write!(f, "decimal({precision},{scale})");
            }
            LogicalDataType::Struct { fields } => {
                f.write_str("struct<")?;
                write_joined(f, fields)?;
                return f.write_str(">");
            }
            LogicalDataType::List { elements } => {
                return write!(f, "array<{}>", elements.data_type);
            }
            LogicalDataType::Map { key, value } => {
                return write!(f, "map<{},{}>", key.data_type, value.data_type);
            }
        };
        f.write_str(name)
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, fields: &[LogicalField]) -> fmt::Result {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{field}")?;
    }
    Ok(())
}

/// Why a field list is not a valid schema. `path` is the dotted path of the
/// offending field (`addr.city`), or of the container for empty structs.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum LogicalSchemaError {
    /// A field has a blank name.
    #[snafu(display("blank field name under '{path}'"))]
    BlankName {
        /// Path of the parent (empty at the top level).
        path: String,
    },

    /// Two siblings share a name.
    #[snafu(display("field '{path}' is declared more than once"))]
    DuplicateName {
        /// Path of the repeated field.
        path: String,
    },

    /// A struct without children.
    #[snafu(display("struct '{path}' has no fields"))]
    EmptyStruct {
        /// Path of the struct.
        path: String,
    },

    /// A map whose key field admits nulls.
    #[snafu(display("map '{path}' has a nullable key"))]
    NullableMapKey {
        /// Path of the map.
        path: String,
    },

    /// Precision out of range, or scale above precision.
    #[snafu(display("decimal '{path}' has invalid precision {precision} / scale {scale}"))]
    InvalidDecimal {
        /// Path of the decimal field.
        path: String,
        /// Declared precision.
        precision: u8,
        /// Declared scale.
        scale: u8,
    },
}

/// A validated, ordered list of top-level columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<LogicalField>", into = "Vec<LogicalField>")]
pub struct LogicalSchema {
    columns: Vec<LogicalField>,
}

impl LogicalSchema {
    /// Validate `columns` recursively and wrap them.
    pub fn new(columns: Vec<LogicalField>) -> Result<Self, LogicalSchemaError> {
        validate_fields(&columns, "")?;
        Ok(Self { columns })
    }

    /// Top-level columns in order.
    pub fn columns(&self) -> &[LogicalField] {
        &self.columns
    }

    /// Top-level column called `name`.
    pub fn column(&self, name: &str) -> Option<&LogicalField> {
        self.columns.iter().find(|c| c.name == name)
    }
}

impl TryFrom<Vec<LogicalField>> for LogicalSchema {
    type Error = LogicalSchemaError;

    fn try_from(columns: Vec<LogicalField>) -> Result<Self, Self::Error> {
        Self::new(columns)
    }
}

impl From<LogicalSchema> for Vec<LogicalField> {
    fn from(schema: LogicalSchema) -> Self {
        schema.columns
    }
}

impl fmt::Display for LogicalSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("struct<")?;
        write_joined(f, &self.columns)?;
        f.write_str(">")
    }
}

fn child_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}.{name}")
    }
}

fn validate_fields(fields: &[LogicalField], parent: &str) -> Result<(), LogicalSchemaError> {
    let mut names = HashSet::with_capacity(fields.len());
    for field in fields {
        ensure!(
            !field.name.trim().is_empty(),
            BlankNameSnafu { path: parent }
        );
        let path = child_path(parent, &field.name);
        ensure!(
            names.insert(field.name.as_str()),
            DuplicateNameSnafu { path: path.clone() }
        );
        validate_type(&field.data_type, &path)?;
    }
    Ok(())
}

fn validate_type(data_type: &LogicalDataType, path: &str) -> Result<(), LogicalSchemaError> {
    match data_type {
        LogicalDataType::Decimal { precision, scale } => {
            ensure!(
                (1..=MAX_DECIMAL_PRECISION).contains(precision) && scale <= precision,
                InvalidDecimalSnafu {
                    path,
                    precision: *precision,
                    scale: *scale,
                }
            );
            Ok(())
        }
        LogicalDataType::Struct { fields } => {
            ensure!(!fields.is_empty(), EmptyStructSnafu { path });
            validate_fields(fields, path)
        }
        LogicalDataType::List { elements } => {
            validate_type(&elements.data_type, &child_path(path, &elements.name))
        }
        LogicalDataType::Map { key, value } => {
            ensure!(!key.nullable, NullableMapKeySnafu { path });
            validate_type(&key.data_type, &child_path(path, "key"))?;
            validate_type(&value.data_type, &child_path(path, "value"))
        }
        LogicalDataType::Bool
        | LogicalDataType::Int32
        | LogicalDataType::Int64
        | LogicalDataType::Float32
        | LogicalDataType::Float64
        | LogicalDataType::Binary
        | LogicalDataType::Utf8
        | LogicalDataType::Date
        | LogicalDataType::Timestamp
        | LogicalDataType::TimestampNtz => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> LogicalDataType {
        LogicalDataType::Struct {
            fields: vec![
                LogicalField::nullable("city", LogicalDataType::Utf8),
                LogicalField::nullable("zip", LogicalDataType::Int32),
            ],
        }
    }

    #[test]
    fn duplicate_names_report_their_path() {
        let err = LogicalSchema::new(vec![
            LogicalField::required("id", LogicalDataType::Int64),
            LogicalField::nullable("id", LogicalDataType::Utf8),
        ])
        .expect_err("duplicate top-level column");
        assert_eq!(err, LogicalSchemaError::DuplicateName { path: "id".into() });

        let err = LogicalSchema::new(vec![LogicalField::nullable(
            "addr",
            LogicalDataType::Struct {
                fields: vec![
                    LogicalField::nullable("city", LogicalDataType::Utf8),
                    LogicalField::nullable("city", LogicalDataType::Utf8),
                ],
            },
        )])
        .expect_err("duplicate nested field");
        assert_eq!(
            err,
            LogicalSchemaError::DuplicateName {
                path: "addr.city".into()
            }
        );
    }

    #[test]
    fn map_keys_must_not_be_nullable() {
        let err = LogicalSchema::new(vec![LogicalField::nullable(
            "tags",
            LogicalDataType::Map {
                key: Box::new(LogicalField::nullable("key", LogicalDataType::Utf8)),
                value: Box::new(LogicalField::nullable("value", LogicalDataType::Utf8)),
            },
        )])
        .expect_err("nullable key");
        assert_eq!(err, LogicalSchemaError::NullableMapKey { path: "tags".into() });
    }

    #[test]
    fn decimal_bounds_are_checked() {
        for (precision, scale) in [(0, 0), (4, 6), (39, 2)] {
            let result = LogicalSchema::new(vec![LogicalField::nullable(
                "amount",
                LogicalDataType::Decimal { precision, scale },
            )]);
            assert!(
                matches!(result, Err(LogicalSchemaError::InvalidDecimal { .. })),
                "decimal({precision},{scale})"
            );
        }
        assert!(
            LogicalSchema::new(vec![LogicalField::nullable(
                "amount",
                LogicalDataType::Decimal {
                    precision: 38,
                    scale: 38
                },
            )])
            .is_ok()
        );
    }

    #[test]
    fn empty_structs_and_blank_names_are_rejected() {
        let err = LogicalSchema::new(vec![LogicalField::nullable(
            "s",
            LogicalDataType::Struct { fields: vec![] },
        )])
        .expect_err("empty struct");
        assert!(matches!(err, LogicalSchemaError::EmptyStruct { .. }));

        let err = LogicalSchema::new(vec![LogicalField::nullable(" ", LogicalDataType::Bool)])
            .expect_err("blank name");
        assert_eq!(err, LogicalSchemaError::BlankName { path: String::new() });
    }

    #[test]
    fn wire_format_uses_sharing_type_names() -> Result<(), Box<dyn std::error::Error>> {
        let json = r#"[
            {"name": "id", "type": {"type": "long"}, "nullable": false},
            {"name": "price", "type": {"type": "decimal", "precision": 10, "scale": 2}},
            {"name": "seen_at", "type": {"type": "timestamp_ntz"}}
        ]"#;
        let schema: LogicalSchema = serde_json::from_str(json)?;

        let id = schema.column("id").expect("id column");
        assert_eq!(id.data_type, LogicalDataType::Int64);
        assert!(!id.nullable);
        assert!(schema.column("price").expect("price column").nullable);
        assert_eq!(
            schema.column("seen_at").map(|c| &c.data_type),
            Some(&LogicalDataType::TimestampNtz)
        );

        let back: LogicalSchema = serde_json::from_str(&serde_json::to_string(&schema)?)?;
        assert_eq!(back, schema);
        Ok(())
    }

    #[test]
    fn invalid_schemas_fail_to_deserialize() {
        let json = r#"[
            {"name": "id", "type": {"type": "long"}},
            {"name": "id", "type": {"type": "string"}}
        ]"#;
        assert!(serde_json::from_str::<LogicalSchema>(json).is_err());
    }

    #[test]
    fn display_reads_like_a_type_string() {
        let schema = LogicalSchema::new(vec![
            LogicalField::required("id", LogicalDataType::Int64),
            LogicalField::nullable("addr", address()),
            LogicalField::nullable(
                "scores",
                LogicalDataType::List {
                    elements: Box::new(LogicalField::nullable("element", LogicalDataType::Float64)),
                },
            ),
        ])
        .expect("valid schema");

        assert_eq!(
            schema.to_string(),
            "struct<id: long not null, addr: struct<city: string, zip: integer>, scores: array<double>>"
        );
        assert!(!address().is_primitive());
        assert!(LogicalDataType::Date.is_primitive());
    }
}
