//! In-process shared table.
//!
//! [`MemoryTableClient`] keeps a table's whole commit history in memory and
//! answers [`RemoteTableClient`] calls from it. It is used to embed the engine
//! against tables produced in the same process and as the fixture for the
//! engine's own tests, which is why it can also simulate table replacement,
//! history expiry, and transient server failures.
use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use snafu::prelude::*;

use crate::{
    metadata::{
        DataFile, FileAction, PartitionValues, Protocol, RemovedFile, Snapshot, TableMeta,
        VersionMetadata,
    },
    remote::{
        InvalidRangeSnafu, RemoteError, RemoteResult, RemoteTableClient, ServerSnafu,
        SnapshotSpec, TimestampAfterLatestSnafu, TimestampBeforeEarliestSnafu,
        VersionNotFoundSnafu, VersionOutOfRetentionSnafu,
    },
};

/// A file-level change to commit into a [`MemoryTableClient`].
///
/// Version and timestamp are filled in by the table at commit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Make a data file visible.
    Add {
        /// File path.
        path: String,
        /// File size in bytes.
        size_bytes: u64,
        /// Partition values of the file.
        partition_values: PartitionValues,
    },
    /// Make a data file invisible.
    Remove {
        /// File path.
        path: String,
    },
    /// Record a change-data file.
    AddChange {
        /// File path.
        path: String,
        /// File size in bytes.
        size_bytes: u64,
        /// Partition values of the file.
        partition_values: PartitionValues,
    },
}

impl Change {
    /// Add an unpartitioned file.
    pub fn add(path: impl Into<String>, size_bytes: u64) -> Self {
        Change::Add {
            path: path.into(),
            size_bytes,
            partition_values: PartitionValues::new(),
        }
    }

    /// Remove a file.
    pub fn remove(path: impl Into<String>) -> Self {
        Change::Remove { path: path.into() }
    }

    /// Add an unpartitioned change-data file.
    pub fn add_change(path: impl Into<String>, size_bytes: u64) -> Self {
        Change::AddChange {
            path: path.into(),
            size_bytes,
            partition_values: PartitionValues::new(),
        }
    }

    /// Attach a partition value (no-op for removals).
    pub fn with_partition(mut self, column: impl Into<String>, value: Option<&str>) -> Self {
        match &mut self {
            Change::Add {
                partition_values, ..
            }
            | Change::AddChange {
                partition_values, ..
            } => {
                partition_values.insert(column.into(), value.map(str::to_string));
            }
            Change::Remove { .. } => {}
        }
        self
    }

    fn into_action(self, version: u64, timestamp: DateTime<Utc>) -> FileAction {
        match self {
            Change::Add {
                path,
                size_bytes,
                partition_values,
            } => FileAction::Add(DataFile {
                path,
                size_bytes,
                partition_values,
                commit_version: version,
                commit_timestamp: timestamp,
            }),
            Change::AddChange {
                path,
                size_bytes,
                partition_values,
            } => FileAction::AddChange(DataFile {
                path,
                size_bytes,
                partition_values,
                commit_version: version,
                commit_timestamp: timestamp,
            }),
            Change::Remove { path } => FileAction::Remove(RemovedFile {
                path,
                commit_version: version,
                commit_timestamp: timestamp,
            }),
        }
    }
}

#[derive(Debug, Clone)]
struct CommitRecord {
    timestamp: DateTime<Utc>,
    protocol: Protocol,
    metadata: TableMeta,
    actions: Vec<FileAction>,
}

/// Number of calls served per client operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// `latest_version` calls.
    pub latest_version: usize,
    /// `get_snapshot` calls.
    pub get_snapshot: usize,
    /// `get_metadata` calls.
    pub get_metadata: usize,
    /// `resolve_version_for_timestamp` calls.
    pub resolve_version_for_timestamp: usize,
    /// `list_changes` calls.
    pub list_changes: usize,
}

#[derive(Debug)]
struct TableState {
    /// Commit `i` is table version `i`.
    commits: Vec<CommitRecord>,
    earliest_retained: u64,
    pending_failures: usize,
    failure_status: u16,
    calls: CallCounts,
}

impl TableState {
    fn latest(&self) -> u64 {
        (self.commits.len() as u64).saturating_sub(1)
    }

    /// Consume one injected failure, if any are pending.
    fn take_failure(&mut self) -> RemoteResult<()> {
        if self.pending_failures > 0 {
            self.pending_failures -= 1;
            return ServerSnafu {
                status: self.failure_status,
                message: "injected failure".to_string(),
            }
            .fail();
        }
        Ok(())
    }

    fn check_version(&self, version: u64) -> RemoteResult<()> {
        let latest = self.latest();
        ensure!(version <= latest, VersionNotFoundSnafu { version, latest });
        ensure!(
            version >= self.earliest_retained,
            VersionOutOfRetentionSnafu {
                version,
                earliest: self.earliest_retained,
            }
        );
        Ok(())
    }

    fn commit(&self, version: u64) -> &CommitRecord {
        &self.commits[version as usize]
    }

    fn snapshot_at(&self, version: u64) -> Snapshot {
        let mut live: BTreeMap<String, DataFile> = BTreeMap::new();
        for record in &self.commits[..=version as usize] {
            for action in &record.actions {
                match action {
                    FileAction::Add(file) => {
                        live.insert(file.path.clone(), file.clone());
                    }
                    FileAction::Remove(removed) => {
                        live.remove(&removed.path);
                    }
                    FileAction::AddChange(_) => {}
                }
            }
        }

        let record = self.commit(version);
        Snapshot {
            version,
            timestamp: record.timestamp,
            protocol: record.protocol,
            metadata: record.metadata.clone(),
            files: live.into_values().collect(),
        }
    }
}

/// A shared table held entirely in memory.
///
/// Version 0 is the table creation commit. Every later commit increments the
/// version by one.
#[derive(Debug)]
pub struct MemoryTableClient {
    state: Mutex<TableState>,
}

impl MemoryTableClient {
    /// Create a table whose version 0 carries `metadata` and no files.
    pub fn create(metadata: TableMeta, timestamp: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(TableState {
                commits: vec![CommitRecord {
                    timestamp,
                    protocol: Protocol::default(),
                    metadata,
                    actions: Vec::new(),
                }],
                earliest_retained: 0,
                pending_failures: 0,
                failure_status: 503,
                calls: CallCounts::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(
        &self,
        timestamp: DateTime<Utc>,
        protocol: Option<Protocol>,
        metadata: Option<TableMeta>,
        changes: Vec<Change>,
    ) -> u64 {
        let mut state = self.lock();
        let version = state.commits.len() as u64;
        let previous = state.commit(version - 1).clone();
        // Commit timestamps never go backwards.
        let timestamp = timestamp.max(previous.timestamp);
        let actions = changes
            .into_iter()
            .map(|c| c.into_action(version, timestamp))
            .collect();
        state.commits.push(CommitRecord {
            timestamp,
            protocol: protocol.unwrap_or(previous.protocol),
            metadata: metadata.unwrap_or(previous.metadata),
            actions,
        });
        version
    }

    /// Commit file changes at `timestamp`, returning the new version.
    pub fn commit_at(&self, timestamp: DateTime<Utc>, changes: Vec<Change>) -> u64 {
        self.push(timestamp, None, None, changes)
    }

    /// Commit file changes at the current wall-clock time.
    pub fn commit(&self, changes: Vec<Change>) -> u64 {
        self.commit_at(Utc::now(), changes)
    }

    /// Commit new table metadata without file changes.
    pub fn update_metadata_at(&self, timestamp: DateTime<Utc>, metadata: TableMeta) -> u64 {
        self.push(timestamp, None, Some(metadata), Vec::new())
    }

    /// Commit a new reader protocol without file changes.
    pub fn update_protocol_at(&self, timestamp: DateTime<Utc>, protocol: Protocol) -> u64 {
        self.push(timestamp, Some(protocol), None, Vec::new())
    }

    /// Drop and re-create the table: history restarts at version 0 with new
    /// metadata (typically carrying a new table id).
    pub fn replace_table(&self, metadata: TableMeta, timestamp: DateTime<Utc>) {
        let mut state = self.lock();
        state.commits = vec![CommitRecord {
            timestamp,
            protocol: Protocol::default(),
            metadata,
            actions: Vec::new(),
        }];
        state.earliest_retained = 0;
    }

    /// Forget every version below `version`.
    pub fn expire_history_before(&self, version: u64) {
        let mut state = self.lock();
        let latest = state.latest();
        state.earliest_retained = version.min(latest);
    }

    /// Make the next `count` calls fail with a server error of `status`.
    pub fn fail_next_calls(&self, count: usize, status: u16) {
        let mut state = self.lock();
        state.pending_failures = count;
        state.failure_status = status;
    }

    /// Calls served so far, per operation.
    pub fn call_counts(&self) -> CallCounts {
        self.lock().calls
    }
}

#[async_trait]
impl RemoteTableClient for MemoryTableClient {
    async fn latest_version(&self) -> RemoteResult<u64> {
        let mut state = self.lock();
        state.calls.latest_version += 1;
        state.take_failure()?;
        Ok(state.latest())
    }

    async fn get_snapshot(&self, at: SnapshotSpec) -> RemoteResult<Snapshot> {
        let mut state = self.lock();
        state.calls.get_snapshot += 1;
        state.take_failure()?;

        let version = match at {
            SnapshotSpec::Version(v) => v,
            SnapshotSpec::Timestamp(ts) => {
                let earliest = state.earliest_retained;
                let found = (earliest..=state.latest())
                    .rev()
                    .find(|v| state.commit(*v).timestamp <= ts);
                found.context(TimestampBeforeEarliestSnafu {
                    timestamp: ts,
                    earliest_version: earliest,
                })?
            }
        };
        state.check_version(version)?;
        Ok(state.snapshot_at(version))
    }

    async fn get_metadata(&self, version: u64) -> RemoteResult<VersionMetadata> {
        let mut state = self.lock();
        state.calls.get_metadata += 1;
        state.take_failure()?;
        state.check_version(version)?;

        let record = state.commit(version);
        Ok(VersionMetadata {
            version,
            protocol: record.protocol,
            metadata: record.metadata.clone(),
        })
    }

    async fn resolve_version_for_timestamp(&self, timestamp: DateTime<Utc>) -> RemoteResult<u64> {
        let mut state = self.lock();
        state.calls.resolve_version_for_timestamp += 1;
        state.take_failure()?;

        let latest = state.latest();
        let found = (state.earliest_retained..=latest).find(|v| state.commit(*v).timestamp >= timestamp);
        found.with_context(|| TimestampAfterLatestSnafu {
            timestamp,
            latest_version: latest,
            latest_timestamp: state.commit(latest).timestamp,
        })
    }

    async fn list_changes(
        &self,
        start_version: u64,
        end_version: u64,
    ) -> RemoteResult<Vec<FileAction>> {
        let mut state = self.lock();
        state.calls.list_changes += 1;
        state.take_failure()?;

        ensure!(
            start_version <= end_version,
            InvalidRangeSnafu {
                start: start_version,
                end: end_version,
            }
        );
        state.check_version(start_version)?;
        state.check_version(end_version)?;

        Ok((start_version..=end_version)
            .flat_map(|v| state.commit(v).actions.iter().cloned())
            .collect())
    }
}
