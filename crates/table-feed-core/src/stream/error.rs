//! Error types and SNAFU context selectors for the streaming layer.
//!
//! [`StreamError`] is the single failure type surfaced to the host poll loop.
//! Every fatal variant names the offending table version and ends with a
//! remediation hint, so the message alone tells an operator how to recover.
//! Transient transport faults never reach this layer directly: they are
//! retried by [`RetryingClient`](crate::remote::retry::RetryingClient) and only
//! show up here, wrapped in [`RemoteError::RetriesExhausted`], once the retry
//! policy gives up. At that point they are fatal to the stream.

use chrono::{DateTime, Utc};
use snafu::prelude::*;

use crate::{
    metadata::{SchemaCompatibilityError, TableId, TableMetaError},
    remote::RemoteError,
    stream::change_guard::ChangeKind,
};

/// Result alias for streaming operations.
pub type StreamResult<T> = Result<T, StreamError>;

/// Invalid or conflicting stream options.
#[derive(Debug, Clone, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    /// Both starting options were supplied.
    #[snafu(display(
        "Please either provide 'startingVersion' or 'startingTimestamp', not both"
    ))]
    ConflictingStartingOptions,

    /// `startingVersion` is neither `latest` nor a non-negative integer.
    #[snafu(display(
        "Invalid value '{value}' for option 'startingVersion', must be >= 0 or 'latest'"
    ))]
    InvalidStartingVersion {
        /// The literal that was supplied.
        value: String,
    },

    /// `startingTimestamp` could not be parsed.
    #[snafu(display(
        "Invalid value '{value}' for option 'startingTimestamp'; expected an RFC 3339 timestamp, \
         'YYYY-MM-DD HH:MM:SS[.fff]', or 'YYYY-MM-DD'"
    ))]
    InvalidStartingTimestamp {
        /// The literal that was supplied.
        value: String,
    },

    /// A limit option is not a positive integer.
    #[snafu(display("Invalid value '{value}' for option '{option}', must be a positive integer"))]
    InvalidPositiveInteger {
        /// Option name.
        option: String,
        /// The literal that was supplied.
        value: String,
    },

    /// A flag option is not `true` or `false`.
    #[snafu(display("Invalid value '{value}' for option '{option}', must be 'true' or 'false'"))]
    InvalidBoolean {
        /// Option name.
        option: String,
        /// The literal that was supplied.
        value: String,
    },

    /// A point-in-time option was supplied.
    #[snafu(display("Option '{option}': time travel is not supported for incremental streams"))]
    TimeTravelNotSupported {
        /// Option name.
        option: String,
    },

    /// The caller tried to impose its own schema.
    #[snafu(display(
        "A shared table source does not accept a user-specified schema; the schema is read from the table"
    ))]
    UserSchemaNotSupported,
}

/// Errors raised while encoding or decoding a checkpointed offset.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum OffsetError {
    /// The offset is not valid JSON of the expected shape.
    #[snafu(display("Failed to decode offset: {source}"))]
    Decode {
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// The offset could not be serialized.
    #[snafu(display("Failed to encode offset: {source}"))]
    Encode {
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// The offset was written by a newer engine.
    #[snafu(display(
        "Offset format version {found} is newer than the supported version {supported}; upgrade the reader"
    ))]
    UnsupportedSourceVersion {
        /// Version found in the offset.
        found: u32,
        /// Highest version this engine reads.
        supported: u32,
    },

    /// The action index is below -1, or has no successor.
    #[snafu(display("Offset index {index} is out of range, must be >= -1 and below i64::MAX"))]
    InvalidIndex {
        /// The offending index.
        index: i64,
    },
}

fn describe_unsupported_change(version: u64, kind: ChangeKind) -> String {
    match kind {
        ChangeKind::Update => format!(
            "a data update was detected at version {version}. Set 'ignoreChanges' to re-emit \
             updated files as inserts (rows may be duplicated downstream), or restart the \
             stream with startingVersion > {version}"
        ),
        ChangeKind::Delete | ChangeKind::Append => format!(
            "deleted data detected at version {version}. Set 'ignoreDeletes' (or \
             'ignoreChanges') to skip deletes, or restart the stream with startingVersion > {version}"
        ),
    }
}

/// Failures surfaced to the host by a shared table stream.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StreamError {
    /// Options were invalid or conflicting.
    #[snafu(display("Invalid stream configuration: {source}"))]
    Configuration {
        /// What was wrong with the options.
        source: ConfigError,
    },

    /// A remote call failed for good.
    #[snafu(display("Remote table request failed: {source}"))]
    Remote {
        /// Underlying client error.
        #[snafu(source(from(RemoteError, Box::new)))]
        source: Box<RemoteError>,
    },

    /// A crossed version narrows the stream's schema.
    #[snafu(display(
        "Schema at table version {version} is not read-compatible with the stream schema: \
         {source}. Restart the stream with startingVersion >= {version} to read the new schema"
    ))]
    SchemaIncompatible {
        /// The first incompatible version.
        version: u64,
        /// The violated rule.
        source: SchemaCompatibilityError,
    },

    /// A version deletes or updates data and the policy does not tolerate it.
    #[snafu(display("{}", describe_unsupported_change(*version, *kind)))]
    UnsupportedChange {
        /// The offending version.
        version: u64,
        /// How the version was classified.
        kind: ChangeKind,
    },

    /// A version advertises metadata that contradicts itself.
    #[snafu(display(
        "Table metadata at version {version} is invalid: {source}. The shared table must be \
         repaired by its provider"
    ))]
    InvalidTableMetadata {
        /// The offending version.
        version: u64,
        /// The violated rule.
        source: TableMetaError,
    },

    /// The table id changed under the stream.
    #[snafu(display(
        "Table id changed from {expected} to {found}: the shared table was replaced. \
         Start a new stream without the old checkpoint"
    ))]
    TableIdentityMismatch {
        /// Id the stream was started against.
        expected: TableId,
        /// Id observed now.
        found: TableId,
    },

    /// The stream needs history the server no longer retains.
    #[snafu(display(
        "Table version {version} is no longer available (earliest retained version is \
         {earliest}). Restart the stream with startingVersion >= {earliest}"
    ))]
    VersionUnavailable {
        /// The version that was requested.
        version: u64,
        /// Earliest retained version.
        earliest: u64,
    },

    /// `startingVersion` is past the latest version.
    #[snafu(display(
        "Starting version {version} is after the latest table version {latest}; \
         retry once the version has been committed"
    ))]
    StartingVersionAfterLatest {
        /// Requested starting version.
        version: u64,
        /// Latest committed version.
        latest: u64,
    },

    /// `startingTimestamp` is after the latest commit.
    #[snafu(display(
        "Starting timestamp {timestamp} is after the latest commit (version {latest_version} \
         at {latest_timestamp}); use a timestamp at or before {latest_timestamp}"
    ))]
    StartingTimestampAfterLatest {
        /// Requested starting timestamp.
        timestamp: DateTime<Utc>,
        /// Latest committed version.
        latest_version: u64,
        /// Commit timestamp of the latest version.
        latest_timestamp: DateTime<Utc>,
    },

    /// A version requires reader features this engine lacks.
    #[snafu(display(
        "Table version {version} requires reader version {required}, but this reader supports \
         up to {supported}; upgrade the reader"
    ))]
    UnsupportedReaderVersion {
        /// The offending version.
        version: u64,
        /// Required reader version.
        required: u32,
        /// Supported reader version.
        supported: u32,
    },

    /// The server returned two different change lists for one version.
    #[snafu(display(
        "Change list for table version {version} differs from an earlier response for the same version"
    ))]
    InconsistentChangeLog {
        /// The affected version.
        version: u64,
    },

    /// An offset or offset range is malformed.
    #[snafu(display("Invalid offset: {reason}"))]
    InvalidOffset {
        /// What is wrong with it.
        reason: String,
    },
}

impl StreamError {
    /// True when retrying the same call later may succeed without any
    /// configuration change.
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamError::StartingVersionAfterLatest { .. }
            | StreamError::StartingTimestampAfterLatest { .. } => true,
            StreamError::Remote { source } => source.is_retryable(),
            _ => false,
        }
    }

    /// The table version the failure is attributed to, if any.
    pub fn version(&self) -> Option<u64> {
        match self {
            StreamError::SchemaIncompatible { version, .. }
            | StreamError::UnsupportedChange { version, .. }
            | StreamError::InvalidTableMetadata { version, .. }
            | StreamError::VersionUnavailable { version, .. }
            | StreamError::StartingVersionAfterLatest { version, .. }
            | StreamError::UnsupportedReaderVersion { version, .. }
            | StreamError::InconsistentChangeLog { version } => Some(*version),
            _ => None,
        }
    }
}

impl From<RemoteError> for StreamError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::VersionOutOfRetention { version, earliest } => {
                StreamError::VersionUnavailable { version, earliest }
            }
            RemoteError::TimestampAfterLatest {
                timestamp,
                latest_version,
                latest_timestamp,
            } => StreamError::StartingTimestampAfterLatest {
                timestamp,
                latest_version,
                latest_timestamp,
            },
            other => StreamError::Remote {
                source: Box::new(other),
            },
        }
    }
}

impl From<ConfigError> for StreamError {
    fn from(source: ConfigError) -> Self {
        StreamError::Configuration { source }
    }
}

impl From<OffsetError> for StreamError {
    fn from(err: OffsetError) -> Self {
        StreamError::InvalidOffset {
            reason: err.to_string(),
        }
    }
}
