//! Per-stream state: the remote client, the response cache, and both guards.
//!
//! A [`StreamContext`] is created when a stream opens and dropped when it
//! stops. Nothing in it is shared between streams.
use std::{collections::BTreeMap, sync::Arc};

use futures::{StreamExt, TryStreamExt, stream};
use log::debug;

use crate::{
    metadata::{
        FileAction, FileFormat, LogicalSchema, Snapshot, TableId, VersionMetadata,
        actions::sort_canonical,
    },
    remote::{MalformedSnafu, RemoteTableClient, SnapshotSpec, retry::RetryingClient},
    stream::{
        cache::SnapshotCache,
        change_guard::{ChangeKind, ChangeSemanticsGuard},
        error::StreamResult,
        offset::Offset,
        options::FetchOptions,
        schema_guard::SchemaCompatibilityGuard,
    },
};

/// Everything one stream needs between polls.
#[derive(Debug)]
pub struct StreamContext<C> {
    client: RetryingClient<C>,
    cache: SnapshotCache,
    schema_guard: SchemaCompatibilityGuard,
    change_guard: ChangeSemanticsGuard,
    fetch: FetchOptions,
}

impl<C: RemoteTableClient> StreamContext<C> {
    /// Build the context of a stream positioned at `initial`.
    ///
    /// Fixes the reference schema from the version
    /// [`SchemaCompatibilityGuard::reference_version_for`] picks, and fails if
    /// that version belongs to a different table than `initial`.
    pub async fn open(
        client: RetryingClient<C>,
        cache: SnapshotCache,
        initial: &Offset,
        change_guard: ChangeSemanticsGuard,
        fetch: FetchOptions,
    ) -> StreamResult<Self> {
        let reference_version = SchemaCompatibilityGuard::reference_version_for(initial);
        let mut cache = cache;
        let reference = match cache.metadata(reference_version) {
            Some(meta) => meta,
            None => cache.insert_metadata(client.get_metadata(reference_version).await?),
        };
        let schema_guard = SchemaCompatibilityGuard::new(initial.table_id.clone(), &reference)?;
        debug!(
            "Stream schema fixed at table version {reference_version}: {}",
            schema_guard.schema()
        );

        Ok(Self {
            client,
            cache,
            schema_guard,
            change_guard,
            fetch,
        })
    }

    /// Identity of the streamed table.
    pub fn table_id(&self) -> &TableId {
        self.schema_guard.table_id()
    }

    /// Schema of the stream.
    pub fn schema(&self) -> &LogicalSchema {
        self.schema_guard.schema()
    }

    /// Data file format of the stream.
    pub fn format(&self) -> FileFormat {
        self.schema_guard.format()
    }

    /// The response cache.
    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    /// The wrapped remote client.
    pub fn client(&self) -> &RetryingClient<C> {
        &self.client
    }

    /// Remote fetch fan-out.
    pub fn fetch_options(&self) -> FetchOptions {
        self.fetch
    }

    /// Latest committed version, straight from the server.
    pub async fn latest_version(&self) -> StreamResult<u64> {
        Ok(self.client.latest_version().await?)
    }

    /// Snapshot at `version`, cached.
    pub async fn snapshot(&mut self, version: u64) -> StreamResult<Arc<Snapshot>> {
        if let Some(snapshot) = self.cache.snapshot(version) {
            return Ok(snapshot);
        }
        let snapshot = self
            .client
            .get_snapshot(SnapshotSpec::Version(version))
            .await?;
        debug!(
            "Fetched snapshot of version {version} with {} files",
            snapshot.files.len()
        );
        Ok(self.cache.insert_snapshot(snapshot))
    }

    /// Metadata of every version in `start..=end`, ascending.
    ///
    /// Missing versions are fetched concurrently, bounded by
    /// `fetch_concurrency`.
    pub async fn metadata_range(
        &mut self,
        start: u64,
        end: u64,
    ) -> StreamResult<Vec<Arc<VersionMetadata>>> {
        let mut found: BTreeMap<u64, Arc<VersionMetadata>> = BTreeMap::new();
        let mut missing = Vec::new();
        for v in start..=end {
            match self.cache.metadata(v) {
                Some(meta) => {
                    found.insert(v, meta);
                }
                None => missing.push(v),
            }
        }

        if !missing.is_empty() {
            let client = &self.client;
            let fetched: Vec<VersionMetadata> = stream::iter(missing)
                .map(|v| client.get_metadata(v))
                .buffered(self.fetch.fetch_concurrency.max(1))
                .try_collect()
                .await?;
            for meta in fetched {
                let meta = self.cache.insert_metadata(meta);
                found.insert(meta.version, meta);
            }
        }
        Ok(found.into_values().collect())
    }

    /// Canonically ordered action lists of every version in `start..=end`,
    /// ascending. Versions without file actions map to an empty list.
    ///
    /// Everything from the first uncached version onwards is fetched in
    /// windows of `versions_per_request` versions. Re-fetched versions that
    /// were already cached must match the cached list exactly.
    pub async fn changes_range(
        &mut self,
        start: u64,
        end: u64,
    ) -> StreamResult<Vec<(u64, Arc<[FileAction]>)>> {
        let mut found: BTreeMap<u64, Arc<[FileAction]>> = BTreeMap::new();
        let first_missing = (start..=end).find(|v| self.cache.changes(*v).is_none());
        let cached_end = first_missing.map_or(Some(end), |v| v.checked_sub(1));
        if let Some(cached_end) = cached_end {
            for v in start..=cached_end {
                if let Some(actions) = self.cache.changes(v) {
                    found.insert(v, actions);
                }
            }
        }

        if let Some(first) = first_missing {
            let step = self.fetch.versions_per_request.max(1);
            let mut windows = Vec::new();
            let mut window_start = first;
            loop {
                let window_end = end.min(window_start.saturating_add(step - 1));
                windows.push((window_start, window_end));
                match window_end.checked_add(1) {
                    Some(next) if next <= end => window_start = next,
                    _ => break,
                }
            }

            let client = &self.client;
            let fetched: Vec<(u64, u64, Vec<FileAction>)> = stream::iter(windows)
                .map(|(s, e)| async move {
                    client
                        .list_changes(s, e)
                        .await
                        .map(|actions| (s, e, actions))
                })
                .buffered(self.fetch.fetch_concurrency.max(1))
                .try_collect()
                .await?;

            for (s, e, actions) in fetched {
                let mut per_version: BTreeMap<u64, Vec<FileAction>> =
                    (s..=e).map(|v| (v, Vec::new())).collect();
                for action in actions {
                    let version = action.commit_version();
                    let Some(list) = per_version.get_mut(&version) else {
                        return Err(MalformedSnafu {
                            message: format!(
                                "list_changes({s}, {e}) returned an action of version {version}"
                            ),
                        }
                        .build()
                        .into());
                    };
                    list.push(action);
                }
                for (v, mut list) in per_version {
                    sort_canonical(&mut list);
                    found.insert(v, self.cache.insert_changes(v, list)?);
                }
            }
            debug!("Fetched change lists of versions {first}..={end}");
        }
        Ok(found.into_iter().collect())
    }

    /// Check a version's metadata before the stream crosses it.
    pub fn check_version(&self, meta: &VersionMetadata) -> StreamResult<()> {
        self.schema_guard.check(meta)
    }

    /// Check a version's actions before any of them is emitted.
    pub fn admit_changes(&self, version: u64, actions: &[FileAction]) -> StreamResult<ChangeKind> {
        self.change_guard.admit(version, actions)
    }

    /// Release cache entries no longer reachable from `committed`.
    pub fn release(&mut self, committed: &Offset) {
        self.cache.evict_below(committed.table_version);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::{LogicalDataType, LogicalField, TableMeta},
        remote::{
            memory::{Change, MemoryTableClient},
            retry::RetryPolicy,
        },
        stream::{change_guard::ChangePolicy, error::StreamError},
    };
    use chrono::Utc;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn client(versions: u64) -> RetryingClient<Arc<MemoryTableClient>> {
        let schema = LogicalSchema::new(vec![LogicalField::nullable("id", LogicalDataType::Int64)])
            .expect("valid schema");
        let table = Arc::new(MemoryTableClient::create(
            TableMeta::new(TableId::new("t"), schema),
            Utc::now(),
        ));
        for v in 1..=versions {
            table.commit(vec![
                Change::add(format!("v{v}-b"), 1),
                Change::add(format!("v{v}-a"), 1),
            ]);
        }
        RetryingClient::new(table, RetryPolicy::default())
    }

    async fn open(
        client: RetryingClient<Arc<MemoryTableClient>>,
        fetch: FetchOptions,
    ) -> StreamResult<StreamContext<Arc<MemoryTableClient>>> {
        StreamContext::open(
            client,
            SnapshotCache::new(),
            &Offset::starting(TableId::new("t"), 0),
            ChangeSemanticsGuard::new(ChangePolicy::default()),
            fetch,
        )
        .await
    }

    #[tokio::test]
    async fn changes_are_fetched_in_windows_and_cached() -> TestResult {
        let client = client(5);
        let table = client.inner().clone();
        let fetch = FetchOptions {
            versions_per_request: 2,
            fetch_concurrency: 2,
        };
        let mut ctx = open(client, fetch).await?;

        let changes = ctx.changes_range(1, 5).await?;
        let versions: Vec<u64> = changes.iter().map(|(v, _)| *v).collect();
        assert_eq!(versions, vec![1, 2, 3, 4, 5]);
        assert_eq!(changes[0].1[0].path(), "v1-a");
        assert_eq!(table.call_counts().list_changes, 3);

        ctx.changes_range(2, 4).await?;
        assert_eq!(table.call_counts().list_changes, 3);
        Ok(())
    }

    #[tokio::test]
    async fn empty_versions_map_to_empty_lists() -> TestResult {
        let client = client(1);
        let table = client.inner().clone();
        table.commit(vec![]);
        let mut ctx = open(client, FetchOptions::default()).await?;

        let changes = ctx.changes_range(2, 2).await?;
        assert_eq!(changes.len(), 1);
        assert!(changes[0].1.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn metadata_range_covers_every_version() -> TestResult {
        let mut ctx = open(client(3), FetchOptions::default()).await?;

        let metas = ctx.metadata_range(0, 3).await?;
        let versions: Vec<u64> = metas.iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![0, 1, 2, 3]);
        Ok(())
    }

    #[tokio::test]
    async fn open_rejects_a_checkpoint_from_another_table() {
        let err = StreamContext::open(
            client(1),
            SnapshotCache::new(),
            &Offset::boundary(TableId::new("other"), 2),
            ChangeSemanticsGuard::new(ChangePolicy::default()),
            FetchOptions::default(),
        )
        .await
        .expect_err("different table");
        assert!(matches!(err, StreamError::TableIdentityMismatch { .. }));
    }

    #[tokio::test]
    async fn release_evicts_consumed_versions() -> TestResult {
        let mut ctx = open(client(3), FetchOptions::default()).await?;
        ctx.changes_range(1, 3).await?;

        ctx.release(&Offset::boundary(TableId::new("t"), 3));
        assert_eq!(ctx.cache().cached_change_versions(), vec![3]);
        Ok(())
    }
}
