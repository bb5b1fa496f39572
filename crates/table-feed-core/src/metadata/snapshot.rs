//! Point-in-time views of a shared table.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metadata::{
    actions::{DataFile, FileAction},
    table_metadata::{Protocol, TableMeta},
};

/// Protocol and metadata in effect at one table version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionMetadata {
    /// The table version these records describe.
    pub version: u64,
    /// Reader protocol requirements.
    pub protocol: Protocol,
    /// Table metadata (identity, schema, partitioning).
    pub metadata: TableMeta,
}

/// Full metadata and live file listing of a table as of one version.
///
/// Invariant: every file in `files` has `commit_version <= version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// The version this snapshot reflects.
    pub version: u64,
    /// Commit timestamp of `version`.
    pub timestamp: DateTime<Utc>,
    /// Reader protocol requirements.
    pub protocol: Protocol,
    /// Table metadata.
    pub metadata: TableMeta,
    /// Live data files at `version`.
    pub files: Vec<DataFile>,
}

impl Snapshot {
    /// Project out the protocol and metadata of this snapshot.
    pub fn version_metadata(&self) -> VersionMetadata {
        VersionMetadata {
            version: self.version,
            protocol: self.protocol,
            metadata: self.metadata.clone(),
        }
    }

    /// The live files sorted by path, as `Add` actions.
    ///
    /// This is the order in which a starting snapshot is consumed.
    pub fn ordered_adds(&self) -> Vec<FileAction> {
        let mut files = self.files.clone();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files.into_iter().map(FileAction::Add).collect()
    }
}
