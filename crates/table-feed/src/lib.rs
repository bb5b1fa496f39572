//! # table-feed
//!
//! Incremental, crash-resumable consumption of remotely shared, versioned
//! tables.
//!
//! This crate is the supported public entry point and provides a small, stable
//! surface over `table-feed-core`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use table_feed::prelude::*;
//!
//! let options = StreamOptions::from_options([("startingVersion", "0")])?;
//! let mut source = SharedTableSource::open(client, options, None).await?;
//! ```

/// Convenience prelude with the stable, supported surface.
pub mod prelude;

/// Remote clients (wrapper-only).
pub mod remote {
    pub use table_feed_core::remote::local::{LocalLogClient, LogAction, LogCommit, LogFile};
    pub use table_feed_core::remote::memory::{Change, MemoryTableClient};
    pub use table_feed_core::remote::retry::{RetryPolicy, RetryingClient};
    pub use table_feed_core::remote::{
        RemoteError, RemoteResult, RemoteTableClient, SnapshotSpec,
    };
}

pub use table_feed_core::metadata::{
    DataFile, FileAction, FileFormat, LogicalDataType, LogicalField, LogicalSchema,
    PartitionValues, Protocol, RemovedFile, Snapshot, TableId, TableMeta, VersionMetadata,
};
pub use table_feed_core::storage::TableLocation;
pub use table_feed_core::stream::{
    ChangeKind, ConfigError, FetchOptions, Offset, OffsetError, ReadLimit, ScanTask,
    SharedTableSource, StartingPosition, StreamError, StreamOptions, StreamResult,
};
