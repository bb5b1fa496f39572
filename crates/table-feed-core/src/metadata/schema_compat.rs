//! Schema read-compatibility rules (pure metadata).
//!
//! A stream fixes a reference schema when it starts; every later table
//! version must stay readable by a consumer built against that reference:
//!
//! - every reference column stays present, at the same position, with the
//!   same name and the same type;
//! - a column may widen from non-nullable to nullable, never the reverse;
//! - new columns may only be appended at the end, and must be nullable.
//!
//! Nested struct, list, and map types are checked recursively with the same
//! rules, using dotted paths (`addr.city`) in error messages.

use snafu::prelude::*;

use crate::metadata::logical_schema::{LogicalDataType, LogicalField, LogicalSchema};

/// Errors raised when a newer schema is not read-compatible with the reference.
#[derive(Debug, Clone, Snafu, PartialEq, Eq)]
pub enum SchemaCompatibilityError {
    /// A reference column no longer exists.
    #[snafu(display("column {column} was removed"))]
    MissingColumn {
        /// Dotted path of the removed column.
        column: String,
    },

    /// A reference column still exists but moved.
    #[snafu(display("column {column} moved from position {expected} to {found}"))]
    ColumnReordered {
        /// Dotted path of the moved column.
        column: String,
        /// Position in the reference schema.
        expected: usize,
        /// Position in the newer schema.
        found: usize,
    },

    /// A column changed its type.
    #[snafu(display("column {column} changed type from {reference_type} to {new_type}"))]
    TypeChanged {
        /// Dotted path of the column.
        column: String,
        /// Type in the reference schema.
        reference_type: LogicalDataType,
        /// Type in the newer schema.
        new_type: LogicalDataType,
    },

    /// A nullable column became non-nullable.
    #[snafu(display("column {column} changed from nullable to non-nullable"))]
    NullabilityNarrowed {
        /// Dotted path of the column.
        column: String,
    },

    /// A new column was added without allowing nulls.
    #[snafu(display("new column {column} is non-nullable"))]
    NewColumnNotNullable {
        /// Dotted path of the added column.
        column: String,
    },
}

/// A convenience type alias for results of schema compatibility operations.
pub type SchemaResult<T> = Result<T, SchemaCompatibilityError>;

fn join_path(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{parent}.{child}")
    }
}

/// Check that `new_schema` can be read by a consumer built against `reference`.
pub fn ensure_read_compatible(
    reference: &LogicalSchema,
    new_schema: &LogicalSchema,
) -> SchemaResult<()> {
    check_fields(reference.columns(), new_schema.columns(), "")
}

fn check_fields(reference: &[LogicalField], new: &[LogicalField], parent: &str) -> SchemaResult<()> {
    for (pos, ref_field) in reference.iter().enumerate() {
        let column = join_path(parent, &ref_field.name);

        let found_pos = new
            .iter()
            .position(|f| f.name == ref_field.name)
            .context(MissingColumnSnafu {
                column: column.clone(),
            })?;

        if found_pos != pos {
            return ColumnReorderedSnafu {
                column,
                expected: pos,
                found: found_pos,
            }
            .fail();
        }

        check_field(ref_field, &new[found_pos], &column)?;
    }

    for added in new.iter().skip(reference.len()) {
        if !added.nullable {
            return NewColumnNotNullableSnafu {
                column: join_path(parent, &added.name),
            }
            .fail();
        }
    }

    Ok(())
}

fn check_field(reference: &LogicalField, new: &LogicalField, column: &str) -> SchemaResult<()> {
    if reference.nullable && !new.nullable {
        return NullabilityNarrowedSnafu { column }.fail();
    }
    check_type(&reference.data_type, &new.data_type, column)
}

fn check_type(reference: &LogicalDataType, new: &LogicalDataType, column: &str) -> SchemaResult<()> {
    match (reference, new) {
        (LogicalDataType::Struct { fields: ref_fields }, LogicalDataType::Struct { fields }) => {
            check_fields(ref_fields, fields, column)
        }
        (LogicalDataType::List { elements: ref_el }, LogicalDataType::List { elements }) => {
            check_field(ref_el, elements, &join_path(column, &ref_el.name))
        }
        (
            LogicalDataType::Map {
                key: ref_key,
                value: ref_value,
            },
            LogicalDataType::Map { key, value },
        ) => {
            check_field(ref_key, key, &join_path(column, "key"))?;
            check_field(ref_value, value, &join_path(column, "value"))
        }
        (a, b) if a.is_primitive() && a == b => Ok(()),
        (a, b) => TypeChangedSnafu {
            column,
            reference_type: a.clone(),
            new_type: b.clone(),
        }
        .fail(),
    }
}
