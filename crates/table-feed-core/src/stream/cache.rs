//! Per-stream memo of remote responses, keyed by table version.
//!
//! Committed versions are immutable, so every entry is inserted at most once
//! and never changed afterwards. Entries go away only through
//! [`SnapshotCache::evict_below`], once the host has committed past them.
use std::{collections::BTreeMap, sync::Arc};

use log::debug;
use snafu::prelude::*;

use crate::{
    metadata::{FileAction, Snapshot, VersionMetadata},
    stream::error::{InconsistentChangeLogSnafu, StreamResult},
};

/// Cached snapshots, metadata, and canonical per-version change lists.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    snapshots: BTreeMap<u64, Arc<Snapshot>>,
    metadata: BTreeMap<u64, Arc<VersionMetadata>>,
    changes: BTreeMap<u64, Arc<[FileAction]>>,
}

impl SnapshotCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached snapshot at `version`.
    pub fn snapshot(&self, version: u64) -> Option<Arc<Snapshot>> {
        self.snapshots.get(&version).cloned()
    }

    /// Cache a snapshot (and its metadata). The first insert wins.
    pub fn insert_snapshot(&mut self, snapshot: Snapshot) -> Arc<Snapshot> {
        let version = snapshot.version;
        self.metadata
            .entry(version)
            .or_insert_with(|| Arc::new(snapshot.version_metadata()));
        self.snapshots
            .entry(version)
            .or_insert_with(|| Arc::new(snapshot))
            .clone()
    }

    /// Cached protocol and metadata at `version`.
    pub fn metadata(&self, version: u64) -> Option<Arc<VersionMetadata>> {
        self.metadata.get(&version).cloned()
    }

    /// Cache version metadata. The first insert wins.
    pub fn insert_metadata(&mut self, metadata: VersionMetadata) -> Arc<VersionMetadata> {
        self.metadata
            .entry(metadata.version)
            .or_insert_with(|| Arc::new(metadata))
            .clone()
    }

    /// Cached canonical action list of `version`.
    pub fn changes(&self, version: u64) -> Option<Arc<[FileAction]>> {
        self.changes.get(&version).cloned()
    }

    /// Cache the canonical action list of `version`.
    ///
    /// A list that differs from one cached earlier for the same version means
    /// the server is not deterministic, which is fatal.
    pub fn insert_changes(
        &mut self,
        version: u64,
        actions: Vec<FileAction>,
    ) -> StreamResult<Arc<[FileAction]>> {
        if let Some(existing) = self.changes.get(&version) {
            ensure!(
                existing.as_ref() == actions.as_slice(),
                InconsistentChangeLogSnafu { version }
            );
            debug!("Re-fetched change list of version {version} matches the cache");
            return Ok(existing.clone());
        }
        let actions: Arc<[FileAction]> = actions.into();
        self.changes.insert(version, actions.clone());
        Ok(actions)
    }

    /// Drop every entry for versions below `version`.
    pub fn evict_below(&mut self, version: u64) {
        self.snapshots = self.snapshots.split_off(&version);
        self.metadata = self.metadata.split_off(&version);
        self.changes = self.changes.split_off(&version);
    }

    /// Versions with a cached change list, ascending.
    pub fn cached_change_versions(&self) -> Vec<u64> {
        self.changes.keys().copied().collect()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty() && self.metadata.is_empty() && self.changes.is_empty()
    }
}
