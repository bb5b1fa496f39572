//! Remote table client boundary.
//!
//! The engine never talks HTTP itself. Everything it needs from the sharing
//! endpoint goes through [`RemoteTableClient`]:
//!
//! - the latest committed version,
//! - full snapshots (protocol, metadata, live files) by version or timestamp,
//! - per-version protocol/metadata,
//! - timestamp → version resolution,
//! - the per-version change log for an inclusive version range.
//!
//! Errors are split into transport-level faults (retryable, see
//! [`RemoteError::is_retryable`]) and protocol-level failures (fatal). The
//! [`retry::RetryingClient`] decorator adds timeouts and bounded backoff on top
//! of any client.
//!
//! Shipped implementations: [`memory::MemoryTableClient`] for in-process
//! tables and tests, and [`local::LocalLogClient`] for a table log served from
//! a local directory.
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use snafu::prelude::*;

use crate::{
    metadata::{FileAction, Snapshot, VersionMetadata},
    storage::StorageError,
};

pub mod local;
pub mod memory;
pub mod retry;

/// Result alias for remote client calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Point in time a snapshot is requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSpec {
    /// Snapshot as of an exact table version.
    Version(u64),
    /// Snapshot as of the latest version committed at or before a timestamp.
    Timestamp(DateTime<Utc>),
}

/// Errors returned by a [`RemoteTableClient`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RemoteError {
    /// The connection failed or was reset.
    #[snafu(display("Transport error during {operation}: {message}"))]
    Transport {
        /// The client operation that failed.
        operation: String,
        /// Transport-level description.
        message: String,
    },

    /// The call did not finish within its deadline.
    #[snafu(display("{operation} timed out after {timeout:?}"))]
    Timeout {
        /// The client operation that timed out.
        operation: String,
        /// The deadline that was exceeded.
        timeout: Duration,
    },

    /// The server answered with an error status.
    #[snafu(display("Server returned status {status}: {message}"))]
    Server {
        /// HTTP-like status code.
        status: u16,
        /// Server-provided message.
        message: String,
    },

    /// The credentials were rejected.
    #[snafu(display("Authentication rejected: {message}"))]
    Unauthorized {
        /// Server-provided message.
        message: String,
    },

    /// The requested version does not exist (yet).
    #[snafu(display("Table version {version} does not exist (latest is {latest})"))]
    VersionNotFound {
        /// The requested version.
        version: u64,
        /// Latest version known to the server.
        latest: u64,
    },

    /// The requested version is older than the retained history.
    #[snafu(display(
        "Table version {version} is no longer retained (earliest available is {earliest})"
    ))]
    VersionOutOfRetention {
        /// The requested version.
        version: u64,
        /// Earliest version still available.
        earliest: u64,
    },

    /// The timestamp is after the latest commit.
    #[snafu(display(
        "Timestamp {timestamp} is after the latest commit (version {latest_version} at {latest_timestamp})"
    ))]
    TimestampAfterLatest {
        /// The requested timestamp.
        timestamp: DateTime<Utc>,
        /// Latest committed version.
        latest_version: u64,
        /// Commit timestamp of the latest version.
        latest_timestamp: DateTime<Utc>,
    },

    /// The timestamp is before the earliest retained commit.
    #[snafu(display(
        "Timestamp {timestamp} is before the earliest available commit (version {earliest_version})"
    ))]
    TimestampBeforeEarliest {
        /// The requested timestamp.
        timestamp: DateTime<Utc>,
        /// Earliest retained version.
        earliest_version: u64,
    },

    /// The version range is empty or reversed.
    #[snafu(display("Invalid version range {start}..={end}"))]
    InvalidRange {
        /// First version of the range.
        start: u64,
        /// Last version of the range.
        end: u64,
    },

    /// The server response could not be interpreted.
    #[snafu(display("Malformed response: {message}"))]
    Malformed {
        /// What was wrong with the response.
        message: String,
    },

    /// Storage failure of a locally served table.
    #[snafu(display("Storage error while reading table log: {source}"))]
    Storage {
        /// Underlying storage error.
        source: StorageError,
    },

    /// A transient failure persisted through every retry attempt.
    #[snafu(display("Giving up after {attempts} attempts: {source}"))]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: usize,
        /// The last transient error observed.
        #[snafu(source(from(RemoteError, Box::new)))]
        source: Box<RemoteError>,
    },
}

impl RemoteError {
    /// True for transport-level faults worth retrying: connection failures,
    /// timeouts, throttling, and server-side 5xx responses.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Transport { .. } | RemoteError::Timeout { .. } => true,
            RemoteError::Server { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// The error at the root of a `RetriesExhausted` chain (or `self`).
    pub fn root(&self) -> &RemoteError {
        match self {
            RemoteError::RetriesExhausted { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Read-only access to a remotely shared, versioned table.
///
/// Implementations must be deterministic per version: once a version is
/// committed, its metadata, snapshot, and change list never change.
#[async_trait]
pub trait RemoteTableClient: Send + Sync {
    /// Latest committed table version.
    async fn latest_version(&self) -> RemoteResult<u64>;

    /// Full metadata and file listing as of a version or timestamp.
    async fn get_snapshot(&self, at: SnapshotSpec) -> RemoteResult<Snapshot>;

    /// Protocol and metadata in effect at `version`.
    ///
    /// The default derives it from a full snapshot; clients with a cheaper
    /// metadata-only endpoint should override it.
    async fn get_metadata(&self, version: u64) -> RemoteResult<VersionMetadata> {
        Ok(self
            .get_snapshot(SnapshotSpec::Version(version))
            .await?
            .version_metadata())
    }

    /// Smallest version whose commit timestamp is at or after `timestamp`.
    async fn resolve_version_for_timestamp(&self, timestamp: DateTime<Utc>) -> RemoteResult<u64>;

    /// File actions of every version in `start_version..=end_version`, ordered
    /// by version. Versions without file actions contribute nothing.
    async fn list_changes(
        &self,
        start_version: u64,
        end_version: u64,
    ) -> RemoteResult<Vec<FileAction>>;
}

#[async_trait]
impl<C> RemoteTableClient for Arc<C>
where
    C: RemoteTableClient + ?Sized,
{
    async fn latest_version(&self) -> RemoteResult<u64> {
        (**self).latest_version().await
    }

    async fn get_snapshot(&self, at: SnapshotSpec) -> RemoteResult<Snapshot> {
        (**self).get_snapshot(at).await
    }

    async fn get_metadata(&self, version: u64) -> RemoteResult<VersionMetadata> {
        (**self).get_metadata(version).await
    }

    async fn resolve_version_for_timestamp(&self, timestamp: DateTime<Utc>) -> RemoteResult<u64> {
        (**self).resolve_version_for_timestamp(timestamp).await
    }

    async fn list_changes(
        &self,
        start_version: u64,
        end_version: u64,
    ) -> RemoteResult<Vec<FileAction>> {
        (**self).list_changes(start_version, end_version).await
    }
}
