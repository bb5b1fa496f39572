//! Wrapper prelude.
//!
//! The `table-feed` crate is the supported public entry point. Downstream code
//! should prefer importing from this prelude instead of depending on core
//! module paths.

pub use crate::remote::{MemoryTableClient, RemoteTableClient, RetryPolicy};
pub use crate::{
    FileAction, LogicalDataType, LogicalField, LogicalSchema, Offset, ReadLimit, ScanTask,
    SharedTableSource, StreamError, StreamOptions, StreamResult, TableId, TableLocation,
    TableMeta,
};
