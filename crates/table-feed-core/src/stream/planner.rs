//! Turns "new commits since offset O" into bounded, replayable batches.
//!
//! [`ChangeFeedPlanner::latest_offset`] proposes how far the next batch
//! reaches; [`ChangeFeedPlanner::get_batch`] later re-derives exactly the
//! actions between two offsets. Both walk the same canonical ordering:
//!
//! 1. the files of a starting snapshot, sorted by path;
//! 2. then each version's actions, sorted by (path, kind).
//!
//! Both run the schema guard on every version they cross and the change guard
//! on every version they take actions from, so a failing version fails the
//! proposal and the batch alike, and a batch is never partially returned.
use log::debug;
use snafu::prelude::*;

use crate::{
    metadata::FileAction,
    remote::RemoteTableClient,
    stream::{
        change_guard::ChangeSemanticsGuard,
        context::StreamContext,
        error::{InvalidOffsetSnafu, StreamResult, TableIdentityMismatchSnafu},
        offset::Offset,
        options::ReadLimit,
        schema_guard::SchemaCompatibilityGuard,
    },
};

/// Running admission count of one proposal.
#[derive(Debug)]
struct Budget {
    limit: ReadLimit,
    files: usize,
    bytes: u64,
}

impl Budget {
    fn new(limit: ReadLimit) -> Self {
        Self {
            limit,
            files: 0,
            bytes: 0,
        }
    }

    fn is_exhausted(&self) -> bool {
        if self.files >= self.limit.max_files {
            return true;
        }
        match self.limit.max_bytes {
            Some(max_bytes) => self.files > 0 && self.bytes >= max_bytes,
            None => false,
        }
    }

    fn admit(&mut self, action: &FileAction) -> bool {
        if self.is_exhausted() {
            return false;
        }
        self.files += 1;
        self.bytes = self.bytes.saturating_add(action.size_bytes());
        true
    }
}

/// Plans and materializes batches for one stream.
#[derive(Debug)]
pub struct ChangeFeedPlanner<C> {
    ctx: StreamContext<C>,
}

impl<C: RemoteTableClient> ChangeFeedPlanner<C> {
    /// Plan over the given stream context.
    pub fn new(ctx: StreamContext<C>) -> Self {
        Self { ctx }
    }

    /// The stream context.
    pub fn context(&self) -> &StreamContext<C> {
        &self.ctx
    }

    /// Mutable access to the stream context.
    pub fn context_mut(&mut self) -> &mut StreamContext<C> {
        &mut self.ctx
    }

    fn check_offset(&self, offset: &Offset) -> StreamResult<()> {
        offset.validate()?;
        ensure!(
            offset.table_id == *self.ctx.table_id(),
            TableIdentityMismatchSnafu {
                expected: self.ctx.table_id().clone(),
                found: offset.table_id.clone(),
            }
        );
        Ok(())
    }

    /// Propose the end offset of the next batch after `prior`, admitting at
    /// most `limit` actions. Returns `None` when there is nothing to consume.
    /// A limit that admits nothing is a configuration error.
    pub async fn latest_offset(
        &mut self,
        prior: &Offset,
        limit: ReadLimit,
    ) -> StreamResult<Option<Offset>> {
        self.check_offset(prior)?;
        limit.validate()?;
        let latest = self.ctx.latest_version().await?;
        if SchemaCompatibilityGuard::reference_version_for(prior) > latest {
            self.check_history_rewound(prior, latest).await?;
        }
        let mut budget = Budget::new(limit);
        let mut position = prior.clone();

        if position.is_starting_version {
            position = self.drain_snapshot(position, &mut budget).await?;
        }
        if !position.is_starting_version && !budget.is_exhausted() {
            position = self.scan_changes(position, latest, &mut budget).await?;
        }

        if budget.files == 0 {
            debug!("No new actions after {prior} (latest version {latest})");
            return Ok(None);
        }
        debug!(
            "Proposing {position} after {prior}: {} actions, {} bytes",
            budget.files, budget.bytes
        );
        Ok(Some(position))
    }

    /// The server's latest version is older than versions `prior` has
    /// already consumed. A replaced table fails the identity check; otherwise
    /// the offset does not belong to this history.
    async fn check_history_rewound(&self, prior: &Offset, latest: u64) -> StreamResult<()> {
        let meta = self.ctx.client().get_metadata(latest).await?;
        self.ctx.check_version(&meta)?;
        InvalidOffsetSnafu {
            reason: format!("{prior} is ahead of the latest table version {latest}"),
        }
        .fail()
    }

    async fn drain_snapshot(&mut self, position: Offset, budget: &mut Budget) -> StreamResult<Offset> {
        let version = position.table_version;
        let snapshot = self.ctx.snapshot(version).await?;
        self.ctx.check_version(&snapshot.version_metadata())?;
        let files = snapshot.ordered_adds();
        let next = position.next_index()?;
        ensure!(
            next <= files.len(),
            InvalidOffsetSnafu {
                reason: format!(
                    "{position} points past the {} files of the snapshot at version {version}",
                    files.len()
                ),
            }
        );

        let mut consumed = position.index;
        for file in &files[next..] {
            if !budget.admit(file) {
                break;
            }
            consumed += 1;
        }

        if consumed + 1 >= files.len() as i64 {
            Ok(position.moved_to(version + 1, -1, false))
        } else {
            Ok(position.moved_to(version, consumed, true))
        }
    }

    async fn scan_changes(
        &mut self,
        mut position: Offset,
        latest: u64,
        budget: &mut Budget,
    ) -> StreamResult<Offset> {
        let step = self.ctx.fetch_options().versions_per_request.max(1);
        let mut window_start = position.table_version;

        'scan: while window_start <= latest {
            let window_end = latest.min(window_start.saturating_add(step - 1));
            let metas = self.ctx.metadata_range(window_start, window_end).await?;
            let changes = self.ctx.changes_range(window_start, window_end).await?;

            for (meta, (version, actions)) in metas.iter().zip(changes.iter()) {
                if budget.is_exhausted() {
                    break 'scan;
                }
                self.ctx.check_version(meta)?;

                let first = if *version == position.table_version {
                    position.next_index()?
                } else {
                    0
                };
                ensure!(
                    first <= actions.len(),
                    InvalidOffsetSnafu {
                        reason: format!(
                            "{position} points past the {} actions of version {version}",
                            actions.len()
                        ),
                    }
                );
                if first == actions.len() {
                    position = position.moved_to(version + 1, -1, false);
                    continue;
                }

                self.ctx.admit_changes(*version, actions)?;
                let mut last = None;
                for (i, action) in actions.iter().enumerate().skip(first) {
                    if !budget.admit(action) {
                        break;
                    }
                    last = Some(i);
                }
                match last {
                    Some(i) if i + 1 == actions.len() => {
                        position = position.moved_to(version + 1, -1, false);
                    }
                    Some(i) => {
                        position = position.moved_to(*version, i as i64, false);
                        break 'scan;
                    }
                    None => break 'scan,
                }
            }

            match window_end.checked_add(1) {
                Some(next) => window_start = next,
                None => break,
            }
        }
        Ok(position)
    }

    /// Every action after `start` up to and including `end`, as emitted
    /// inserts.
    ///
    /// Re-derived from cached or re-fetched remote data, so the same pair of
    /// offsets always yields the same batch.
    pub async fn get_batch(&mut self, start: &Offset, end: &Offset) -> StreamResult<Vec<FileAction>> {
        ensure!(
            start.table_id == end.table_id,
            InvalidOffsetSnafu {
                reason: format!("{start} and {end} belong to different tables"),
            }
        );
        self.check_offset(start)?;
        end.validate()?;
        ensure!(
            end >= start,
            InvalidOffsetSnafu {
                reason: format!("end offset {end} is before start offset {start}"),
            }
        );
        if end.is_starting_version {
            ensure!(
                start.is_starting_version && start.table_version == end.table_version,
                InvalidOffsetSnafu {
                    reason: format!("end offset {end} lies inside a different starting snapshot"),
                }
            );
        }

        let mut batch = Vec::new();
        let mut position = start.clone();

        if start.is_starting_version {
            let version = start.table_version;
            let snapshot = self.ctx.snapshot(version).await?;
            self.ctx.check_version(&snapshot.version_metadata())?;
            let files = snapshot.ordered_adds();
            let from = start.next_index()?;
            let to = if end.is_starting_version {
                end.next_index()?
            } else {
                files.len()
            };
            ensure!(
                from <= to && to <= files.len(),
                InvalidOffsetSnafu {
                    reason: format!(
                        "{start}..{end} exceeds the {} files of the snapshot at version {version}",
                        files.len()
                    ),
                }
            );
            batch.extend(files[from..to].iter().cloned());
            if end.is_starting_version {
                return Ok(batch);
            }
            position = start.moved_to(version + 1, -1, false);
        }

        let last_version = if end.index < 0 {
            end.table_version.checked_sub(1)
        } else {
            Some(end.table_version)
        };
        if let Some(last_version) = last_version.filter(|v| *v >= position.table_version) {
            let metas = self
                .ctx
                .metadata_range(position.table_version, last_version)
                .await?;
            let changes = self
                .ctx
                .changes_range(position.table_version, last_version)
                .await?;

            for (meta, (version, actions)) in metas.iter().zip(changes.iter()) {
                self.ctx.check_version(meta)?;
                let from = if *version == position.table_version {
                    position.next_index()?
                } else {
                    0
                };
                let to = if *version == end.table_version {
                    end.next_index()?
                } else {
                    actions.len()
                };
                ensure!(
                    from <= to && to <= actions.len(),
                    InvalidOffsetSnafu {
                        reason: format!(
                            "{start}..{end} exceeds the {} actions of version {version}",
                            actions.len()
                        ),
                    }
                );
                if from == to {
                    continue;
                }
                self.ctx.admit_changes(*version, actions)?;
                batch.extend(ChangeSemanticsGuard::emit(&actions[from..to]));
            }
        }

        debug!("Batch {start} -> {end}: {} files", batch.len());
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        metadata::{LogicalDataType, LogicalField, LogicalSchema, TableId, TableMeta},
        remote::{
            memory::{Change, MemoryTableClient},
            retry::{RetryPolicy, RetryingClient},
        },
        stream::{
            cache::SnapshotCache,
            change_guard::{ChangePolicy, ChangeSemanticsGuard},
            error::StreamError,
            options::FetchOptions,
        },
    };
    use chrono::Utc;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn id() -> TableId {
        TableId::new("t")
    }

    fn table() -> Arc<MemoryTableClient> {
        let schema = LogicalSchema::new(vec![LogicalField::nullable("id", LogicalDataType::Int64)])
            .expect("valid schema");
        Arc::new(MemoryTableClient::create(
            TableMeta::new(id(), schema),
            Utc::now(),
        ))
    }

    async fn planner(
        table: &Arc<MemoryTableClient>,
        initial: &Offset,
        fetch: FetchOptions,
    ) -> StreamResult<ChangeFeedPlanner<Arc<MemoryTableClient>>> {
        let ctx = StreamContext::open(
            RetryingClient::new(table.clone(), RetryPolicy::default()),
            SnapshotCache::new(),
            initial,
            ChangeSemanticsGuard::new(ChangePolicy::default()),
            fetch,
        )
        .await?;
        Ok(ChangeFeedPlanner::new(ctx))
    }

    fn paths(actions: &[FileAction]) -> Vec<&str> {
        actions.iter().map(FileAction::path).collect()
    }

    #[tokio::test]
    async fn nothing_new_yields_none() -> TestResult {
        let table = table();
        table.commit(vec![Change::add("a", 1)]);
        let start = Offset::boundary(id(), 2);
        let mut planner = planner(&table, &start, FetchOptions::default()).await?;

        assert_eq!(planner.latest_offset(&start, ReadLimit::default()).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn actions_within_a_version_follow_path_order() -> TestResult {
        let table = table();
        table.commit(vec![Change::add("c", 1), Change::add("a", 1), Change::add("b", 1)]);
        let start = Offset::boundary(id(), 1);
        let mut planner = planner(&table, &start, FetchOptions::default()).await?;

        let end = planner
            .latest_offset(&start, ReadLimit::max_files(2))
            .await?
            .expect("progress");
        assert_eq!(end, Offset::new(id(), 1, 1, false));
        assert_eq!(paths(&planner.get_batch(&start, &end).await?), vec!["a", "b"]);
        Ok(())
    }

    #[tokio::test]
    async fn snapshot_drains_before_changes() -> TestResult {
        let table = table();
        table.commit(vec![Change::add("s2", 1), Change::add("s1", 1)]);
        table.commit(vec![Change::add("c1", 1)]);
        let start = Offset::starting(id(), 1);
        let mut planner = planner(&table, &start, FetchOptions::default()).await?;

        let first = planner
            .latest_offset(&start, ReadLimit::max_files(1))
            .await?
            .expect("progress");
        assert_eq!(first, Offset::new(id(), 1, 0, true));
        assert_eq!(paths(&planner.get_batch(&start, &first).await?), vec!["s1"]);

        let rest = planner
            .latest_offset(&first, ReadLimit::default())
            .await?
            .expect("progress");
        assert_eq!(rest, Offset::boundary(id(), 3));
        assert_eq!(
            paths(&planner.get_batch(&first, &rest).await?),
            vec!["s2", "c1"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn byte_limit_is_soft() -> TestResult {
        let table = table();
        table.commit(vec![Change::add("a", 600), Change::add("b", 600), Change::add("c", 10)]);
        let start = Offset::boundary(id(), 1);
        let mut planner = planner(&table, &start, FetchOptions::default()).await?;

        let limit = ReadLimit::default().with_max_bytes(100);
        let end = planner.latest_offset(&start, limit).await?.expect("progress");
        assert_eq!(end, Offset::new(id(), 1, 0, false));

        let limit = ReadLimit::default().with_max_bytes(1000);
        let end = planner.latest_offset(&start, limit).await?.expect("progress");
        assert_eq!(end, Offset::new(id(), 1, 1, false));
        Ok(())
    }

    #[tokio::test]
    async fn scan_spans_fetch_windows_and_empty_versions() -> TestResult {
        let table = table();
        table.commit(vec![Change::add("v1", 1)]);
        table.commit(vec![]);
        table.commit(vec![Change::add("v3", 1)]);
        table.commit(vec![Change::add("v4", 1)]);
        let start = Offset::boundary(id(), 1);
        let fetch = FetchOptions {
            versions_per_request: 1,
            fetch_concurrency: 1,
        };
        let mut planner = planner(&table, &start, fetch).await?;

        let end = planner
            .latest_offset(&start, ReadLimit::default())
            .await?
            .expect("progress");
        assert_eq!(end, Offset::boundary(id(), 5));
        assert_eq!(
            paths(&planner.get_batch(&start, &end).await?),
            vec!["v1", "v3", "v4"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn invalid_ranges_are_rejected() -> TestResult {
        let table = table();
        table.commit(vec![Change::add("a", 1)]);
        table.commit(vec![Change::add("b", 1)]);
        let start = Offset::boundary(id(), 1);
        let mut planner = planner(&table, &start, FetchOptions::default()).await?;

        let later = Offset::boundary(id(), 3);
        let err = planner.get_batch(&later, &start).await.expect_err("reversed");
        assert!(matches!(err, StreamError::InvalidOffset { .. }));

        let foreign = Offset::boundary(TableId::new("other"), 3);
        let err = planner.get_batch(&start, &foreign).await.expect_err("foreign");
        assert!(matches!(err, StreamError::InvalidOffset { .. }));

        let snapshot_end = Offset::new(id(), 2, 0, true);
        let err = planner
            .get_batch(&start, &snapshot_end)
            .await
            .expect_err("other snapshot");
        assert!(matches!(err, StreamError::InvalidOffset { .. }));

        let past_end = Offset::new(id(), 1, 5, false);
        let err = planner.get_batch(&start, &past_end).await.expect_err("past end");
        assert!(matches!(err, StreamError::InvalidOffset { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn equal_offsets_yield_an_empty_batch() -> TestResult {
        let table = table();
        table.commit(vec![Change::add("a", 1)]);
        let start = Offset::boundary(id(), 1);
        let mut planner = planner(&table, &start, FetchOptions::default()).await?;

        assert!(planner.get_batch(&start, &start).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn prior_offset_ahead_of_history_is_invalid() -> TestResult {
        let table = table();
        table.commit(vec![Change::add("a", 1)]);
        let start = Offset::boundary(id(), 2);
        let mut planner = planner(&table, &start, FetchOptions::default()).await?;

        let err = planner
            .latest_offset(&Offset::boundary(id(), 6), ReadLimit::default())
            .await
            .expect_err("ahead of latest");
        assert!(matches!(err, StreamError::InvalidOffset { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn limits_that_admit_nothing_are_rejected() -> TestResult {
        let table = table();
        table.commit(vec![Change::add("a", 1), Change::add("b", 1)]);
        let start = Offset::starting(id(), 1);
        let mut planner = planner(&table, &start, FetchOptions::default()).await?;

        let err = planner
            .latest_offset(&start, ReadLimit::max_files(0))
            .await
            .expect_err("zero files");
        assert!(matches!(err, StreamError::Configuration { .. }));

        let err = planner
            .latest_offset(&start, ReadLimit::default().with_max_bytes(0))
            .await
            .expect_err("zero bytes");
        assert!(matches!(err, StreamError::Configuration { .. }));

        let end = planner
            .latest_offset(&start, ReadLimit::max_files(1))
            .await?
            .expect("one file pending");
        assert_eq!(end, Offset::new(id(), 1, 0, true));
        Ok(())
    }

    #[tokio::test]
    async fn index_without_successor_is_invalid_not_a_restart() -> TestResult {
        let table = table();
        table.commit(vec![Change::add("a", 1)]);
        let start = Offset::boundary(id(), 1);
        let mut planner = planner(&table, &start, FetchOptions::default()).await?;

        let huge = Offset::new(id(), 1, i64::MAX, false);
        let err = planner
            .latest_offset(&huge, ReadLimit::default())
            .await
            .expect_err("index overflows");
        assert!(matches!(err, StreamError::InvalidOffset { .. }));

        let err = planner.get_batch(&start, &huge).await.expect_err("index overflows");
        assert!(matches!(err, StreamError::InvalidOffset { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn foreign_prior_offset_is_an_identity_mismatch() -> TestResult {
        let table = table();
        let start = Offset::boundary(id(), 1);
        let mut planner = planner(&table, &start, FetchOptions::default()).await?;

        let err = planner
            .latest_offset(&Offset::boundary(TableId::new("other"), 1), ReadLimit::default())
            .await
            .expect_err("foreign");
        assert!(matches!(err, StreamError::TableIdentityMismatch { .. }));
        Ok(())
    }
}
