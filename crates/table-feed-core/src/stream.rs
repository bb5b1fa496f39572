//! Incremental streaming over a shared table.
//!
//! The pieces, leaves first:
//!
//! - [`offset`]: stream positions, their total order, and checkpoint encoding.
//! - [`options`]: option parsing and validation, read limits.
//! - [`cache`]: per-stream memo of remote responses.
//! - [`schema_guard`] and [`change_guard`]: refuse versions the stream would
//!   misread.
//! - [`context`]: the per-stream aggregate of all of the above.
//! - [`planner`]: proposes offsets and materializes batches.
//! - [`source`]: the interface a host poll loop drives.

pub mod cache;
pub mod change_guard;
pub mod context;
pub mod error;
pub mod offset;
pub mod options;
pub mod planner;
pub mod schema_guard;
pub mod source;

pub use cache::SnapshotCache;
pub use change_guard::{ChangeKind, ChangePolicy, ChangeSemanticsGuard};
pub use context::StreamContext;
pub use error::{ConfigError, OffsetError, StreamError, StreamResult};
pub use offset::{Offset, SOURCE_VERSION, resolve_initial_offset};
pub use options::{FetchOptions, ReadLimit, StartingPosition, StreamOptions};
pub use planner::ChangeFeedPlanner;
pub use schema_guard::SchemaCompatibilityGuard;
pub use source::{ScanTask, SharedTableSource};
