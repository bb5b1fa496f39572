//! Table-level metadata advertised by a shared table.
//!
//! A remote table publishes, for every version, a protocol (which reader
//! features are required) and a metadata record (identity, schema, partition
//! columns, free-form configuration). Both are immutable per version.
use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::metadata::logical_schema::LogicalSchema;

/// Highest `min_reader_version` this engine can consume.
pub const SUPPORTED_READER_VERSION: u32 = 1;

/// Opaque identifier of a logical table.
///
/// Stable across versions of the same table; a different id at the same
/// endpoint means the table was dropped and re-created.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableId(pub String);

impl TableId {
    /// Create a table id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        TableId(id.into())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// File format of the data files a table is made of.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    /// Apache Parquet.
    #[default]
    Parquet,
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileFormat::Parquet => write!(f, "parquet"),
        }
    }
}

/// Reader protocol requirements of a table version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Protocol {
    /// Minimum reader version needed to interpret the table.
    pub min_reader_version: u32,
}

impl Default for Protocol {
    fn default() -> Self {
        Self {
            min_reader_version: SUPPORTED_READER_VERSION,
        }
    }
}

impl Protocol {
    /// Returns true when this engine can read tables with this protocol.
    pub fn is_supported(&self) -> bool {
        self.min_reader_version <= SUPPORTED_READER_VERSION
    }
}

/// Errors raised while validating table metadata.
#[derive(Debug, Clone, Snafu, PartialEq, Eq)]
pub enum TableMetaError {
    /// A partition column is not part of the schema.
    #[snafu(display("Partition column {column} is not present in the table schema"))]
    UnknownPartitionColumn {
        /// The offending partition column.
        column: String,
    },

    /// The table id is empty.
    #[snafu(display("Table id must be non-empty"))]
    EmptyTableId,
}

/// Table metadata in effect at one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMeta {
    /// Stable identity of the logical table.
    pub id: TableId,
    /// Optional human-readable table name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Data file format.
    #[serde(default)]
    pub format: FileFormat,
    /// Logical schema of the table rows.
    pub schema: LogicalSchema,
    /// Ordered partition column names.
    #[serde(default)]
    pub partition_columns: Vec<String>,
    /// Free-form table configuration.
    #[serde(default)]
    pub configuration: BTreeMap<String, String>,
}

impl TableMeta {
    /// Build metadata for an unpartitioned Parquet table.
    pub fn new(id: TableId, schema: LogicalSchema) -> Self {
        Self {
            id,
            name: None,
            format: FileFormat::Parquet,
            schema,
            partition_columns: Vec::new(),
            configuration: BTreeMap::new(),
        }
    }

    /// Check structural invariants (non-empty id, known partition columns).
    pub fn validate(&self) -> Result<(), TableMetaError> {
        ensure!(!self.id.as_str().is_empty(), EmptyTableIdSnafu);
        for column in &self.partition_columns {
            ensure!(
                self.schema.column(column).is_some(),
                UnknownPartitionColumnSnafu {
                    column: column.clone()
                }
            );
        }
        Ok(())
    }
}
