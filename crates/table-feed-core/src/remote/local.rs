//! Read-only client over a table log stored in a local directory.
//!
//! This module owns every on-disk interaction with `_table_feed_log/`:
//! - Reading the `CURRENT` pointer, which names the latest committed version.
//! - Loading zero-padded JSON commit files and checking that the payload
//!   version matches the file name.
//! - Replaying commits to rebuild snapshots, protocol, and metadata.
//!
//! Old commit files may be deleted to expire history. The earliest commit file
//! still present is then the start of retained history and must restate the
//! protocol, metadata, and every live file of the table (a checkpoint).
//! Requests for earlier versions fail with
//! [`RemoteError::VersionOutOfRetention`].
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::{
    metadata::{
        DataFile, FileAction, PartitionValues, Protocol, RemovedFile, Snapshot, TableMeta,
        VersionMetadata,
    },
    remote::{
        InvalidRangeSnafu, MalformedSnafu, RemoteResult, RemoteTableClient, SnapshotSpec,
        StorageSnafu, TimestampAfterLatestSnafu, TimestampBeforeEarliestSnafu,
        VersionNotFoundSnafu, VersionOutOfRetentionSnafu,
    },
    storage::{self, TableLocation},
};

/// A data file entry inside a log commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFile {
    /// File path.
    pub path: String,
    /// File size in bytes.
    pub size_bytes: u64,
    /// Partition values of the file.
    #[serde(default)]
    pub partition_values: PartitionValues,
}

/// One action of a log commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogAction {
    /// Replace the reader protocol.
    Protocol(Protocol),
    /// Replace the table metadata.
    Metadata(TableMeta),
    /// Make a data file visible.
    Add(LogFile),
    /// Make a data file invisible.
    Remove {
        /// File path.
        path: String,
    },
    /// Record a change-data file.
    Cdc(LogFile),
}

/// A commit file in `_table_feed_log/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogCommit {
    /// Table version created by this commit.
    pub version: u64,
    /// Commit timestamp.
    pub timestamp: DateTime<Utc>,
    /// Actions in commit order.
    pub actions: Vec<LogAction>,
}

#[derive(Debug)]
struct ReplayState {
    protocol: Protocol,
    metadata: Option<TableMeta>,
    live: BTreeMap<String, DataFile>,
}

/// Serves a table from `<root>/_table_feed_log/`.
///
/// Layout:
///   <root>/_table_feed_log/0000000000.json
///   <root>/_table_feed_log/0000000001.json
///   <root>/_table_feed_log/CURRENT
#[derive(Debug, Clone)]
pub struct LocalLogClient {
    location: TableLocation,
    /// Protocol and metadata already replayed, by version. Commits are
    /// immutable, so entries stay valid while the log grows.
    replayed: Arc<Mutex<BTreeMap<u64, VersionMetadata>>>,
}

impl LocalLogClient {
    /// Name of the subdirectory containing the commit log.
    pub const LOG_DIR_NAME: &str = "_table_feed_log";
    /// Name of the file that stores the latest version.
    pub const CURRENT_FILE_NAME: &str = "CURRENT";
    /// Number of digits used in zero-padded commit file names.
    pub const COMMIT_FILENAME_DIGITS: usize = 10;

    /// Serve the table rooted at `location`.
    pub fn new(location: TableLocation) -> Self {
        Self {
            location,
            replayed: Arc::default(),
        }
    }

    /// The table root.
    pub fn location(&self) -> &TableLocation {
        &self.location
    }

    fn log_rel_dir() -> PathBuf {
        PathBuf::from(Self::LOG_DIR_NAME)
    }

    /// Log-relative path of the commit file for `version`.
    pub fn commit_rel_path(version: u64) -> PathBuf {
        let file_name = format!(
            "{:0width$}.json",
            version,
            width = Self::COMMIT_FILENAME_DIGITS
        );
        Self::log_rel_dir().join(file_name)
    }

    /// Log-relative path of the `CURRENT` pointer.
    pub fn current_rel_path() -> PathBuf {
        Self::log_rel_dir().join(Self::CURRENT_FILE_NAME)
    }

    fn parse_commit_file_name(name: &str) -> Option<u64> {
        let stem = name.strip_suffix(".json")?;
        if stem.len() != Self::COMMIT_FILENAME_DIGITS || !stem.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }
        stem.parse().ok()
    }

    async fn read_rel(&self, rel: &Path) -> RemoteResult<String> {
        storage::read_to_string(&self.location, rel)
            .await
            .context(StorageSnafu)
    }

    async fn load_current_version(&self) -> RemoteResult<u64> {
        let contents = self.read_rel(&Self::current_rel_path()).await?;
        let trimmed = contents.trim();
        trimmed.parse::<u64>().map_err(|e| {
            MalformedSnafu {
                message: format!("CURRENT has invalid content {trimmed:?}: {e}"),
            }
            .build()
        })
    }

    /// Smallest version whose commit file is still present.
    async fn earliest_retained_version(&self) -> RemoteResult<u64> {
        let names = storage::list_file_names(&self.location, &Self::log_rel_dir())
            .await
            .context(StorageSnafu)?;
        names
            .iter()
            .filter_map(|n| Self::parse_commit_file_name(n))
            .min()
            .context(MalformedSnafu {
                message: format!("no commit files under {}", self.location),
            })
    }

    /// Returns `(earliest, latest)` after checking `version` lies within.
    async fn retained_bounds(&self, version: u64) -> RemoteResult<(u64, u64)> {
        let latest = self.load_current_version().await?;
        ensure!(version <= latest, VersionNotFoundSnafu { version, latest });
        let earliest = self.earliest_retained_version().await?;
        ensure!(
            version >= earliest,
            VersionOutOfRetentionSnafu { version, earliest }
        );
        Ok((earliest, latest))
    }

    async fn load_commit(&self, version: u64) -> RemoteResult<LogCommit> {
        let json = self.read_rel(&Self::commit_rel_path(version)).await?;
        let commit: LogCommit = serde_json::from_str(&json).map_err(|e| {
            MalformedSnafu {
                message: format!("failed to parse commit {version}: {e}"),
            }
            .build()
        })?;

        ensure!(
            commit.version == version,
            MalformedSnafu {
                message: format!(
                    "commit version mismatch: expected {version}, found {} in payload",
                    commit.version
                ),
            }
        );
        Ok(commit)
    }

    async fn replay(&self, earliest: u64, through: u64) -> RemoteResult<(ReplayState, DateTime<Utc>)> {
        let mut state = ReplayState {
            protocol: Protocol::default(),
            metadata: None,
            live: BTreeMap::new(),
        };
        let mut timestamp = None;

        for v in earliest..=through {
            let commit = self.load_commit(v).await?;
            timestamp = Some(commit.timestamp);
            for action in commit.actions {
                match action {
                    LogAction::Protocol(protocol) => state.protocol = protocol,
                    LogAction::Metadata(meta) => state.metadata = Some(meta),
                    LogAction::Add(file) => {
                        let file = to_data_file(file, v, commit.timestamp);
                        state.live.insert(file.path.clone(), file);
                    }
                    LogAction::Remove { path } => {
                        state.live.remove(&path);
                    }
                    LogAction::Cdc(_) => {}
                }
            }
        }

        let timestamp = timestamp.context(MalformedSnafu {
            message: format!("no commits between {earliest} and {through}"),
        })?;
        Ok((state, timestamp))
    }

    async fn snapshot_at(&self, version: u64) -> RemoteResult<Snapshot> {
        let (earliest, _) = self.retained_bounds(version).await?;
        let (state, timestamp) = self.replay(earliest, version).await?;
        let metadata = state.metadata.context(MalformedSnafu {
            message: format!("no table metadata found in commits up to version {version}"),
        })?;

        Ok(Snapshot {
            version,
            timestamp,
            protocol: state.protocol,
            metadata,
            files: state.live.into_values().collect(),
        })
    }

    fn replayed(&self) -> MutexGuard<'_, BTreeMap<u64, VersionMetadata>> {
        self.replayed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Protocol and metadata at `version`. Replays only the commits after the
    /// closest retained version resolved before.
    async fn metadata_at(&self, version: u64) -> RemoteResult<VersionMetadata> {
        let (earliest, _) = self.retained_bounds(version).await?;
        let base = self
            .replayed()
            .range(earliest..=version)
            .next_back()
            .map(|(_, meta)| meta.clone());

        let (mut protocol, mut metadata, first) = match base {
            Some(meta) if meta.version == version => return Ok(meta),
            Some(meta) => (meta.protocol, Some(meta.metadata), meta.version + 1),
            None => (Protocol::default(), None, earliest),
        };
        for v in first..=version {
            for action in self.load_commit(v).await?.actions {
                match action {
                    LogAction::Protocol(p) => protocol = p,
                    LogAction::Metadata(m) => metadata = Some(m),
                    LogAction::Add(_) | LogAction::Remove { .. } | LogAction::Cdc(_) => {}
                }
            }
        }

        let metadata = metadata.context(MalformedSnafu {
            message: format!("no table metadata found in commits up to version {version}"),
        })?;
        let resolved = VersionMetadata {
            version,
            protocol,
            metadata,
        };
        self.replayed().insert(version, resolved.clone());
        Ok(resolved)
    }

    async fn commit_timestamps(&self) -> RemoteResult<Vec<(u64, DateTime<Utc>)>> {
        let latest = self.load_current_version().await?;
        let earliest = self.earliest_retained_version().await?;
        let mut out = Vec::new();
        for v in earliest..=latest {
            out.push((v, self.load_commit(v).await?.timestamp));
        }
        Ok(out)
    }
}

fn to_data_file(file: LogFile, version: u64, timestamp: DateTime<Utc>) -> DataFile {
    DataFile {
        path: file.path,
        size_bytes: file.size_bytes,
        partition_values: file.partition_values,
        commit_version: version,
        commit_timestamp: timestamp,
    }
}

#[async_trait]
impl RemoteTableClient for LocalLogClient {
    async fn latest_version(&self) -> RemoteResult<u64> {
        self.load_current_version().await
    }

    async fn get_snapshot(&self, at: SnapshotSpec) -> RemoteResult<Snapshot> {
        match at {
            SnapshotSpec::Version(v) => self.snapshot_at(v).await,
            SnapshotSpec::Timestamp(ts) => {
                let timestamps = self.commit_timestamps().await?;
                let earliest = timestamps.first().map(|(v, _)| *v).unwrap_or_default();
                let version = timestamps
                    .iter()
                    .rev()
                    .find(|(_, committed)| *committed <= ts)
                    .map(|(v, _)| *v)
                    .context(TimestampBeforeEarliestSnafu {
                        timestamp: ts,
                        earliest_version: earliest,
                    })?;
                self.snapshot_at(version).await
            }
        }
    }

    async fn get_metadata(&self, version: u64) -> RemoteResult<VersionMetadata> {
        self.metadata_at(version).await
    }

    async fn resolve_version_for_timestamp(&self, timestamp: DateTime<Utc>) -> RemoteResult<u64> {
        let timestamps = self.commit_timestamps().await?;
        if let Some((v, _)) = timestamps.iter().find(|(_, committed)| *committed >= timestamp) {
            return Ok(*v);
        }
        let (latest_version, latest_timestamp) =
            timestamps.last().copied().context(MalformedSnafu {
                message: "table log has no commits".to_string(),
            })?;
        TimestampAfterLatestSnafu {
            timestamp,
            latest_version,
            latest_timestamp,
        }
        .fail()
    }

    async fn list_changes(
        &self,
        start_version: u64,
        end_version: u64,
    ) -> RemoteResult<Vec<FileAction>> {
        ensure!(
            start_version <= end_version,
            InvalidRangeSnafu {
                start: start_version,
                end: end_version,
            }
        );
        self.retained_bounds(start_version).await?;
        self.retained_bounds(end_version).await?;

        let mut actions = Vec::new();
        for v in start_version..=end_version {
            let commit = self.load_commit(v).await?;
            let ts = commit.timestamp;
            for action in commit.actions {
                match action {
                    LogAction::Add(file) => actions.push(FileAction::Add(to_data_file(file, v, ts))),
                    LogAction::Cdc(file) => {
                        actions.push(FileAction::AddChange(to_data_file(file, v, ts)))
                    }
                    LogAction::Remove { path } => actions.push(FileAction::Remove(RemovedFile {
                        path,
                        commit_version: v,
                        commit_timestamp: ts,
                    })),
                    LogAction::Protocol(_) | LogAction::Metadata(_) => {}
                }
            }
        }
        Ok(actions)
    }
}
