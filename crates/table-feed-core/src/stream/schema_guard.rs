//! Guards a stream against table versions it could misread.
use snafu::prelude::*;

use crate::{
    metadata::{
        FileFormat, LogicalSchema, SUPPORTED_READER_VERSION, TableId, VersionMetadata,
        ensure_read_compatible,
    },
    stream::{
        error::{
            InvalidTableMetadataSnafu, SchemaIncompatibleSnafu, StreamResult,
            TableIdentityMismatchSnafu, UnsupportedReaderVersionSnafu,
        },
        offset::Offset,
    },
};

/// Holds the schema a stream was opened with and rejects versions that
/// narrow it, change the table identity, need a newer reader, or carry
/// malformed metadata.
#[derive(Debug, Clone)]
pub struct SchemaCompatibilityGuard {
    table_id: TableId,
    reference_version: u64,
    schema: LogicalSchema,
    format: FileFormat,
}

impl SchemaCompatibilityGuard {
    /// The version whose schema a stream positioned at `offset` reads with.
    ///
    /// A starting snapshot reads with the snapshot's schema, a boundary offset
    /// with the schema of the last fully consumed version, and a mid-version
    /// offset with the schema of that version.
    pub fn reference_version_for(offset: &Offset) -> u64 {
        if offset.is_boundary() {
            offset.table_version.saturating_sub(1)
        } else {
            offset.table_version
        }
    }

    /// Fix `reference` as the stream schema, checking it belongs to
    /// `table_id` and is readable.
    pub fn new(table_id: TableId, reference: &VersionMetadata) -> StreamResult<Self> {
        let guard = Self {
            table_id,
            reference_version: reference.version,
            schema: reference.metadata.schema.clone(),
            format: reference.metadata.format,
        };
        guard.check_identity_and_protocol(reference)?;
        Ok(guard)
    }

    /// Table identity the stream is bound to.
    pub fn table_id(&self) -> &TableId {
        &self.table_id
    }

    /// The stream schema.
    pub fn schema(&self) -> &LogicalSchema {
        &self.schema
    }

    /// Version the stream schema was taken from.
    pub fn reference_version(&self) -> u64 {
        self.reference_version
    }

    /// Data file format of the reference version.
    pub fn format(&self) -> FileFormat {
        self.format
    }

    fn check_identity_and_protocol(&self, meta: &VersionMetadata) -> StreamResult<()> {
        ensure!(
            meta.metadata.id == self.table_id,
            TableIdentityMismatchSnafu {
                expected: self.table_id.clone(),
                found: meta.metadata.id.clone(),
            }
        );
        ensure!(
            meta.protocol.is_supported(),
            UnsupportedReaderVersionSnafu {
                version: meta.version,
                required: meta.protocol.min_reader_version,
                supported: SUPPORTED_READER_VERSION,
            }
        );
        meta.metadata
            .validate()
            .context(InvalidTableMetadataSnafu {
                version: meta.version,
            })
    }

    /// Check a version the stream is about to cross.
    pub fn check(&self, meta: &VersionMetadata) -> StreamResult<()> {
        self.check_identity_and_protocol(meta)?;
        ensure_read_compatible(&self.schema, &meta.metadata.schema).context(
            SchemaIncompatibleSnafu {
                version: meta.version,
            },
        )
    }
}
