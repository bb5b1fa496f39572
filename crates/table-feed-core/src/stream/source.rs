//! Host-facing source of a shared table stream.
//!
//! A host poll loop drives a [`SharedTableSource`] like this:
//!
//! ```no_run
//! # use table_feed_core::{remote::memory::MemoryTableClient, stream::*};
//! # async fn poll(client: MemoryTableClient, checkpoint: Option<Offset>) -> StreamResult<()> {
//! let mut source = SharedTableSource::open(client, StreamOptions::default(), checkpoint).await?;
//! let mut offset = source.initial_offset().clone();
//! loop {
//!     let Some(end) = source.latest_offset(&offset, source.default_limit()).await? else {
//!         break;
//!     };
//!     let tasks = source.get_batch(&offset, &end).await?;
//!     // hand `tasks` off, persist `end.encode()`, then:
//!     source.commit(&end);
//!     offset = end;
//! #   let _ = tasks;
//! }
//! source.stop();
//! # Ok(())
//! # }
//! ```
use log::info;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::{
    metadata::{FileAction, FileFormat, LogicalSchema, PartitionValues, TableId},
    remote::{RemoteTableClient, retry::RetryingClient},
    stream::{
        cache::SnapshotCache,
        change_guard::ChangeSemanticsGuard,
        context::StreamContext,
        error::{StreamResult, TableIdentityMismatchSnafu},
        offset::{Offset, resolve_initial_offset},
        options::{ReadLimit, StreamOptions},
        planner::ChangeFeedPlanner,
    },
};

/// One data file to read, as handed to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanTask {
    /// Path or URL of the file.
    pub path: String,
    /// File size in bytes.
    pub size_bytes: u64,
    /// Partition values of every row in the file.
    pub partition_values: PartitionValues,
    /// Data file format.
    pub format: FileFormat,
    /// Version that committed the file.
    pub commit_version: u64,
}

impl ScanTask {
    fn from_action(action: FileAction, format: FileFormat) -> Option<Self> {
        match action {
            FileAction::Add(file) | FileAction::AddChange(file) => Some(ScanTask {
                path: file.path,
                size_bytes: file.size_bytes,
                partition_values: file.partition_values,
                format,
                commit_version: file.commit_version,
            }),
            FileAction::Remove(_) => None,
        }
    }
}

/// An incremental stream over one remotely shared table.
#[derive(Debug)]
pub struct SharedTableSource<C> {
    planner: ChangeFeedPlanner<C>,
    initial: Offset,
    limit: ReadLimit,
}

impl<C: RemoteTableClient> SharedTableSource<C> {
    /// Open a stream.
    ///
    /// Without a checkpoint the initial offset comes from the starting
    /// options. With one, the stream resumes from it and the starting options
    /// are ignored; the checkpoint must belong to the table currently served,
    /// or opening fails with [`StreamError::TableIdentityMismatch`].
    ///
    /// [`StreamError::TableIdentityMismatch`]: crate::stream::StreamError::TableIdentityMismatch
    pub async fn open(
        client: C,
        options: StreamOptions,
        checkpoint: Option<Offset>,
    ) -> StreamResult<Self> {
        options.validate()?;
        let client = RetryingClient::new(client, options.retry);
        let mut cache = SnapshotCache::new();

        let initial = match checkpoint {
            Some(offset) => {
                offset.validate()?;
                let latest = client.latest_version().await?;
                let meta = cache.insert_metadata(client.get_metadata(latest).await?);
                ensure!(
                    meta.metadata.id == offset.table_id,
                    TableIdentityMismatchSnafu {
                        expected: offset.table_id.clone(),
                        found: meta.metadata.id.clone(),
                    }
                );
                info!("Resuming shared table stream from checkpoint {offset} (latest version {latest})");
                offset
            }
            None => {
                let latest = client.latest_version().await?;
                let meta = cache.insert_metadata(client.get_metadata(latest).await?);
                let offset = resolve_initial_offset(
                    &client,
                    meta.metadata.id.clone(),
                    latest,
                    &options.starting,
                )
                .await?;
                info!("Starting shared table stream at {offset} (latest version {latest})");
                offset
            }
        };

        let ctx = StreamContext::open(
            client,
            cache,
            &initial,
            ChangeSemanticsGuard::new(options.change_policy()),
            options.fetch,
        )
        .await?;

        Ok(Self {
            planner: ChangeFeedPlanner::new(ctx),
            initial,
            limit: options.read_limit(),
        })
    }

    /// Limit from `maxFilesPerTrigger` / `maxBytesPerTrigger`, or 1000 files.
    pub fn default_limit(&self) -> ReadLimit {
        self.limit
    }

    /// Where the stream starts.
    pub fn initial_offset(&self) -> &Offset {
        &self.initial
    }

    /// The streamed table.
    pub fn table_id(&self) -> &TableId {
        self.planner.context().table_id()
    }

    /// Schema of every emitted file. Fixed for the life of the stream.
    pub fn schema(&self) -> &LogicalSchema {
        self.planner.context().schema()
    }

    /// Propose the end offset of the next batch, or `None` if there is
    /// nothing new.
    pub async fn latest_offset(
        &mut self,
        prior: &Offset,
        limit: ReadLimit,
    ) -> StreamResult<Option<Offset>> {
        self.planner.latest_offset(prior, limit).await
    }

    /// Files between `start` (exclusive) and `end` (inclusive).
    pub async fn get_batch(&mut self, start: &Offset, end: &Offset) -> StreamResult<Vec<ScanTask>> {
        let format = self.planner.context().format();
        let actions = self.planner.get_batch(start, end).await?;
        Ok(actions
            .into_iter()
            .filter_map(|action| ScanTask::from_action(action, format))
            .collect())
    }

    /// Tell the stream everything up to `end` has been durably handed off.
    pub fn commit(&mut self, end: &Offset) {
        self.planner.context_mut().release(end);
    }

    /// End the stream and discard its state.
    pub fn stop(self) {
        info!("Stopping shared table stream of table {}", self.table_id());
    }
}
