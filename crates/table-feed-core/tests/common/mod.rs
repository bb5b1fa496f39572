//! Shared fixtures for the stream integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use table_feed_core::{
    metadata::{LogicalDataType, LogicalField, LogicalSchema, TableId, TableMeta},
    remote::{
        RemoteTableClient,
        memory::{Change, MemoryTableClient},
    },
    stream::{Offset, ScanTask, SharedTableSource, StreamResult},
};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

pub const TABLE_ID: &str = "shared-orders";

pub fn table_id() -> TableId {
    TableId::new(TABLE_ID)
}

/// `2025-03-01T{hour}:00:00Z`.
pub fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, hour, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub fn schema(name_nullable: bool) -> LogicalSchema {
    let name = if name_nullable {
        LogicalField::nullable("name", LogicalDataType::Utf8)
    } else {
        LogicalField::required("name", LogicalDataType::Utf8)
    };
    LogicalSchema::new(vec![LogicalField::required("id", LogicalDataType::Int64), name])
        .expect("valid schema")
}

pub fn empty_table() -> Arc<MemoryTableClient> {
    Arc::new(MemoryTableClient::create(
        TableMeta::new(table_id(), schema(true)),
        at(1),
    ))
}

/// The four-commit history:
///
/// - v0 (01:00): create the table
/// - v1 (02:00): insert `a`, `b`, `c`
/// - v2 (03:00): delete `b`
/// - v3 (04:00): update `c` by replacing it with `c-v3`
pub fn four_commit_table() -> Arc<MemoryTableClient> {
    let table = empty_table();
    table.commit_at(
        at(2),
        vec![
            Change::add("a", 100),
            Change::add("b", 100),
            Change::add("c", 100),
        ],
    );
    table.commit_at(at(3), vec![Change::remove("b")]);
    table.commit_at(at(4), vec![Change::remove("c"), Change::add("c-v3", 100)]);
    table
}

/// A table whose `name` column becomes non-nullable at version 3:
///
/// - v0: create (nullable `name`)
/// - v1: insert `a`
/// - v2: insert `b`
/// - v3: narrow `name` to non-nullable
/// - v4: insert `c`
pub fn narrowing_table() -> Arc<MemoryTableClient> {
    let table = empty_table();
    table.commit_at(at(2), vec![Change::add("a", 10)]);
    table.commit_at(at(3), vec![Change::add("b", 10)]);
    table.update_metadata_at(at(4), TableMeta::new(table_id(), schema(false)));
    table.commit_at(at(5), vec![Change::add("c", 10)]);
    table
}

pub fn paths(tasks: &[ScanTask]) -> Vec<&str> {
    tasks.iter().map(|t| t.path.as_str()).collect()
}

/// Drive a source from `from` until it proposes nothing, committing every
/// batch. Returns each proposed end offset with its batch.
pub async fn drain<C: RemoteTableClient>(
    source: &mut SharedTableSource<C>,
    from: &Offset,
) -> StreamResult<Vec<(Offset, Vec<ScanTask>)>> {
    let mut batches = Vec::new();
    let mut offset = from.clone();
    while let Some(end) = source.latest_offset(&offset, source.default_limit()).await? {
        assert!(end > offset, "{end} does not advance past {offset}");
        let tasks = source.get_batch(&offset, &end).await?;
        source.commit(&end);
        batches.push((end.clone(), tasks));
        offset = end;
    }
    Ok(batches)
}
