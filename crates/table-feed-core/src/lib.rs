//! Incremental change-feed consumption for remotely shared, versioned tables.
//!
//! A shared table evolves through numbered commits that add, remove, or
//! rewrite file-backed row groups, and is only reachable through a remote
//! "changes since version V" API. This crate turns that API into a
//! crash-resumable stream of bounded batches:
//!
//! - Typed table metadata, file actions, and schema compatibility rules
//!   (`metadata` module).
//! - The [`RemoteTableClient`](remote::RemoteTableClient) boundary, with an
//!   in-memory table, a local directory-backed log, and a timeout/backoff
//!   decorator (`remote` module).
//! - Offsets, planning, schema and change-semantics guards, and the
//!   host-facing [`SharedTableSource`](stream::SharedTableSource) (`stream`
//!   module).
//! - Read-only filesystem helpers for locally served logs (`storage` module).
//!
//! The crate emits log records through the `log` facade and never installs a
//! logger.
#![deny(missing_docs)]
pub mod metadata;
pub mod remote;
pub mod storage;
pub mod stream;
