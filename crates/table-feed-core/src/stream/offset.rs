//! Stream positions and their checkpoint encoding.
//!
//! An [`Offset`] names a point in the change feed of one table:
//!
//! - With `is_starting_version = false`, every change of every version below
//!   `table_version` has been consumed, plus actions `0..=index` of
//!   `table_version` itself. `index = -1` therefore sits exactly on the
//!   boundary before `table_version`.
//! - With `is_starting_version = true`, the offset points into the initial
//!   snapshot at `table_version`: snapshot files `0..=index` (ordered by path)
//!   have been consumed.
//!
//! Consuming the last action of a version, or the last file of a starting
//! snapshot, always normalizes to `(table_version + 1, -1, false)`.
use std::{cmp::Ordering, fmt};

use log::info;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::{
    metadata::TableId,
    remote::RemoteTableClient,
    stream::{
        error::{
            DecodeSnafu, EncodeSnafu, InvalidIndexSnafu, OffsetError, StartingVersionAfterLatestSnafu,
            StreamResult, UnsupportedSourceVersionSnafu,
        },
        options::StartingPosition,
    },
};

/// Offset format version written by this engine.
pub const SOURCE_VERSION: u32 = 1;

/// A resumable position in a table's change feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offset {
    /// Offset format version.
    pub source_version: u32,
    /// Identity of the table this offset belongs to.
    pub table_id: TableId,
    /// Table version the position refers to.
    pub table_version: u64,
    /// Last consumed action (or snapshot file) of `table_version`; -1 if none.
    pub index: i64,
    /// True while the initial snapshot at `table_version` is being consumed.
    pub is_starting_version: bool,
}

impl Offset {
    /// Position before the first file of the snapshot at `version`.
    pub fn starting(table_id: TableId, version: u64) -> Self {
        Self::new(table_id, version, -1, true)
    }

    /// Position on the boundary before `version`: everything older is
    /// consumed, nothing of `version` is.
    pub fn boundary(table_id: TableId, version: u64) -> Self {
        Self::new(table_id, version, -1, false)
    }

    /// An arbitrary position.
    pub fn new(table_id: TableId, table_version: u64, index: i64, is_starting_version: bool) -> Self {
        Self {
            source_version: SOURCE_VERSION,
            table_id,
            table_version,
            index,
            is_starting_version,
        }
    }

    /// Same table, different position.
    pub(crate) fn moved_to(&self, table_version: u64, index: i64, is_starting_version: bool) -> Self {
        Self::new(
            self.table_id.clone(),
            table_version,
            index,
            is_starting_version,
        )
    }

    /// True when no action of `table_version` has been consumed yet.
    pub fn is_boundary(&self) -> bool {
        !self.is_starting_version && self.index == -1
    }

    /// First action index of `table_version` not consumed yet.
    pub(crate) fn next_index(&self) -> Result<usize, OffsetError> {
        self.index
            .checked_add(1)
            .and_then(|next| usize::try_from(next).ok())
            .context(InvalidIndexSnafu { index: self.index })
    }

    /// Check the invariants every offset must satisfy.
    pub fn validate(&self) -> Result<(), OffsetError> {
        ensure!(
            self.source_version <= SOURCE_VERSION,
            UnsupportedSourceVersionSnafu {
                found: self.source_version,
                supported: SOURCE_VERSION,
            }
        );
        self.next_index()?;
        Ok(())
    }

    /// Serialize for checkpointing.
    pub fn encode(&self) -> Result<String, OffsetError> {
        serde_json::to_string(self).context(EncodeSnafu)
    }

    /// Parse a checkpointed offset and validate it.
    pub fn decode(json: &str) -> Result<Self, OffsetError> {
        let offset: Offset = serde_json::from_str(json).context(DecodeSnafu)?;
        offset.validate()?;
        Ok(offset)
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.table_id, self.table_version, self.index)?;
        if self.is_starting_version {
            write!(f, " (starting)")?;
        }
        Ok(())
    }
}

impl Ord for Offset {
    fn cmp(&self, other: &Self) -> Ordering {
        self.table_version
            .cmp(&other.table_version)
            .then_with(|| self.index.cmp(&other.index))
            // Starting offsets order first on a tie.
            .then_with(|| other.is_starting_version.cmp(&self.is_starting_version))
            .then_with(|| self.table_id.cmp(&other.table_id))
            .then_with(|| self.source_version.cmp(&other.source_version))
    }
}

impl PartialOrd for Offset {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Turn a configured starting position into the first offset of a stream.
///
/// `latest` is the latest table version observed when the stream opens.
pub async fn resolve_initial_offset<C>(
    client: &C,
    table_id: TableId,
    latest: u64,
    starting: &StartingPosition,
) -> StreamResult<Offset>
where
    C: RemoteTableClient + ?Sized,
{
    let offset = match starting {
        StartingPosition::Latest => Offset::boundary(table_id, latest + 1),
        StartingPosition::Version(version) => {
            ensure!(
                *version <= latest,
                StartingVersionAfterLatestSnafu {
                    version: *version,
                    latest,
                }
            );
            Offset::starting(table_id, *version)
        }
        StartingPosition::Timestamp(ts) => {
            let version = client.resolve_version_for_timestamp(*ts).await?;
            info!("Resolved starting timestamp {ts} to table version {version}");
            Offset::starting(table_id, version)
        }
    };
    Ok(offset)
}
