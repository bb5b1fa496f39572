//! Metadata layer.
//!
//! Pure data model of a shared table: schemas and their compatibility rules,
//! table-level metadata, file actions, and snapshots. Nothing in here performs
//! I/O.

pub mod actions;
pub mod logical_schema;
pub mod schema_compat;
pub mod snapshot;
pub mod table_metadata;

pub use actions::{ActionKind, DataFile, FileAction, PartitionValues, RemovedFile};
pub use logical_schema::{LogicalDataType, LogicalField, LogicalSchema, LogicalSchemaError};
pub use schema_compat::{SchemaCompatibilityError, ensure_read_compatible};
pub use snapshot::{Snapshot, VersionMetadata};
pub use table_metadata::{
    FileFormat, Protocol, SUPPORTED_READER_VERSION, TableId, TableMeta, TableMetaError,
};
