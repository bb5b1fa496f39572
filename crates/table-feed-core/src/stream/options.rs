//! Stream configuration.
//!
//! Options arrive either as a string map (`from_options`, the shape host
//! frameworks pass through) or through builder-style setters. Both paths end
//! in [`StreamOptions::validate`], so a source never opens with options it
//! would reject later.
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use log::debug;
use snafu::prelude::*;

use crate::{
    metadata::LogicalSchema,
    remote::retry::RetryPolicy,
    stream::{
        change_guard::ChangePolicy,
        error::{
            ConfigError, ConflictingStartingOptionsSnafu, InvalidBooleanSnafu,
            InvalidPositiveIntegerSnafu, InvalidStartingTimestampSnafu,
            InvalidStartingVersionSnafu, TimeTravelNotSupportedSnafu,
            UserSchemaNotSupportedSnafu,
        },
    },
};

/// Option key: first version to read (integer or `latest`).
pub const STARTING_VERSION: &str = "startingVersion";
/// Option key: first commit timestamp to read.
pub const STARTING_TIMESTAMP: &str = "startingTimestamp";
/// Option key: maximum actions per batch.
pub const MAX_FILES_PER_TRIGGER: &str = "maxFilesPerTrigger";
/// Option key: soft byte limit per batch.
pub const MAX_BYTES_PER_TRIGGER: &str = "maxBytesPerTrigger";
/// Option key: tolerate versions that only delete data.
pub const IGNORE_DELETES: &str = "ignoreDeletes";
/// Option key: tolerate versions that rewrite data.
pub const IGNORE_CHANGES: &str = "ignoreChanges";

const TIME_TRAVEL_OPTIONS: [&str; 2] = ["versionAsOf", "timestampAsOf"];

/// Where a new stream (one without a checkpoint) begins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StartingPosition {
    /// Only commits after the latest version observed at start.
    #[default]
    Latest,
    /// The full snapshot at this version, then every later commit.
    Version(u64),
    /// Like `Version`, for the first commit at or after this timestamp.
    Timestamp(DateTime<Utc>),
}

/// Per-batch admission limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadLimit {
    /// Maximum number of actions (removals included) per batch.
    pub max_files: usize,
    /// Soft limit on accumulated file bytes; at least one action is always
    /// admitted.
    pub max_bytes: Option<u64>,
}

impl ReadLimit {
    /// Default action limit per batch.
    pub const DEFAULT_MAX_FILES: usize = 1000;

    /// Limit batches to `max_files` actions.
    pub fn max_files(max_files: usize) -> Self {
        Self {
            max_files,
            max_bytes: None,
        }
    }

    /// Add a soft byte limit.
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    /// Both limits must admit at least one action, or a stream with pending
    /// changes would never advance.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(
            self.max_files > 0,
            InvalidPositiveIntegerSnafu {
                option: MAX_FILES_PER_TRIGGER,
                value: self.max_files.to_string(),
            }
        );
        if let Some(max_bytes) = self.max_bytes {
            ensure!(
                max_bytes > 0,
                InvalidPositiveIntegerSnafu {
                    option: MAX_BYTES_PER_TRIGGER,
                    value: max_bytes.to_string(),
                }
            );
        }
        Ok(())
    }
}

impl Default for ReadLimit {
    fn default() -> Self {
        Self::max_files(Self::DEFAULT_MAX_FILES)
    }
}

/// How remote metadata and change lists are fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Versions covered by one `list_changes` request.
    pub versions_per_request: u64,
    /// Requests in flight at once.
    pub fetch_concurrency: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            versions_per_request: 100,
            fetch_concurrency: 4,
        }
    }
}

/// Validated configuration of one shared table stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamOptions {
    /// Where a stream without checkpoint starts.
    pub starting: StartingPosition,
    /// `maxFilesPerTrigger`.
    pub max_files_per_trigger: Option<usize>,
    /// `maxBytesPerTrigger`.
    pub max_bytes_per_trigger: Option<u64>,
    /// `ignoreDeletes`.
    pub ignore_deletes: bool,
    /// `ignoreChanges`.
    pub ignore_changes: bool,
    /// Schema imposed by the caller; always rejected.
    pub user_schema: Option<LogicalSchema>,
    /// Remote fetch fan-out.
    pub fetch: FetchOptions,
    /// Timeouts and retries of remote calls.
    pub retry: RetryPolicy,
}

impl StreamOptions {
    /// Parse options from string key/value pairs.
    ///
    /// Keys match case-insensitively. Unknown keys are ignored.
    pub fn from_options<I, K, V>(options: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut parsed = StreamOptions::default();
        let mut starting_version = None;
        let mut starting_timestamp = None;

        for (key, value) in options {
            let (key, value) = (key.as_ref(), value.as_ref().trim());

            if let Some(option) = TIME_TRAVEL_OPTIONS
                .iter()
                .find(|o| o.eq_ignore_ascii_case(key))
            {
                return TimeTravelNotSupportedSnafu {
                    option: option.to_string(),
                }
                .fail();
            }

            if key.eq_ignore_ascii_case(STARTING_VERSION) {
                starting_version = Some(parse_starting_version(value)?);
            } else if key.eq_ignore_ascii_case(STARTING_TIMESTAMP) {
                starting_timestamp = Some(parse_starting_timestamp(value)?);
            } else if key.eq_ignore_ascii_case(MAX_FILES_PER_TRIGGER) {
                let n = parse_positive(MAX_FILES_PER_TRIGGER, value)?;
                parsed.max_files_per_trigger = Some(usize::try_from(n).unwrap_or(usize::MAX));
            } else if key.eq_ignore_ascii_case(MAX_BYTES_PER_TRIGGER) {
                parsed.max_bytes_per_trigger = Some(parse_positive(MAX_BYTES_PER_TRIGGER, value)?);
            } else if key.eq_ignore_ascii_case(IGNORE_DELETES) {
                parsed.ignore_deletes = parse_bool(IGNORE_DELETES, value)?;
            } else if key.eq_ignore_ascii_case(IGNORE_CHANGES) {
                parsed.ignore_changes = parse_bool(IGNORE_CHANGES, value)?;
            } else {
                debug!("Ignoring unknown stream option '{key}'");
            }
        }

        parsed.starting = match (starting_version, starting_timestamp) {
            (Some(_), Some(_)) => return ConflictingStartingOptionsSnafu.fail(),
            (Some(position), None) => position,
            (None, Some(ts)) => StartingPosition::Timestamp(ts),
            (None, None) => StartingPosition::Latest,
        };
        parsed.validate()?;
        Ok(parsed)
    }

    /// Start from the snapshot at `version`.
    pub fn starting_version(mut self, version: u64) -> Self {
        self.starting = StartingPosition::Version(version);
        self
    }

    /// Start from the first commit at or after `timestamp`.
    pub fn starting_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.starting = StartingPosition::Timestamp(timestamp);
        self
    }

    /// Cap actions per batch.
    pub fn max_files_per_trigger(mut self, max_files: usize) -> Self {
        self.max_files_per_trigger = Some(max_files);
        self
    }

    /// Soft cap on bytes per batch.
    pub fn max_bytes_per_trigger(mut self, max_bytes: u64) -> Self {
        self.max_bytes_per_trigger = Some(max_bytes);
        self
    }

    /// Tolerate delete-only versions.
    pub fn ignore_deletes(mut self, ignore: bool) -> Self {
        self.ignore_deletes = ignore;
        self
    }

    /// Tolerate deletes and updates.
    pub fn ignore_changes(mut self, ignore: bool) -> Self {
        self.ignore_changes = ignore;
        self
    }

    /// Impose a schema (rejected by [`validate`](Self::validate)).
    pub fn user_schema(mut self, schema: LogicalSchema) -> Self {
        self.user_schema = Some(schema);
        self
    }

    /// Override fetch fan-out.
    pub fn fetch_options(mut self, fetch: FetchOptions) -> Self {
        self.fetch = fetch;
        self
    }

    /// Override the retry policy.
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Reject options a stream cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(self.user_schema.is_none(), UserSchemaNotSupportedSnafu);
        self.read_limit().validate()
    }

    /// The limit used when the host does not supply one.
    pub fn read_limit(&self) -> ReadLimit {
        ReadLimit {
            max_files: self
                .max_files_per_trigger
                .unwrap_or(ReadLimit::DEFAULT_MAX_FILES),
            max_bytes: self.max_bytes_per_trigger,
        }
    }

    /// Tolerance for deletes and updates.
    pub fn change_policy(&self) -> ChangePolicy {
        ChangePolicy {
            ignore_deletes: self.ignore_deletes,
            ignore_changes: self.ignore_changes,
        }
    }
}

fn parse_starting_version(value: &str) -> Result<StartingPosition, ConfigError> {
    if value.eq_ignore_ascii_case("latest") {
        return Ok(StartingPosition::Latest);
    }
    match value.parse::<i64>() {
        Ok(v) if v >= 0 => Ok(StartingPosition::Version(v as u64)),
        _ => InvalidStartingVersionSnafu { value }.fail(),
    }
}

fn parse_starting_timestamp(value: &str) -> Result<DateTime<Utc>, ConfigError> {
    parse_timestamp(value).context(InvalidStartingTimestampSnafu { value })
}

/// Parse an RFC 3339 timestamp, `YYYY-MM-DD HH:MM:SS[.fff]` (UTC), or
/// `YYYY-MM-DD` (UTC midnight).
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(ts.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
}

fn parse_positive(option: &str, value: &str) -> Result<u64, ConfigError> {
    match value.parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => InvalidPositiveIntegerSnafu { option, value }.fail(),
    }
}

fn parse_bool(option: &str, value: &str) -> Result<bool, ConfigError> {
    if value.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        InvalidBooleanSnafu { option, value }.fail()
    }
}
