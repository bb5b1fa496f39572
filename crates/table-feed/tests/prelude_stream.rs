#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use chrono::Utc;
use table_feed::prelude::*;
use table_feed::remote::Change;

type TestResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::test]
async fn stream_through_the_prelude() -> TestResult {
    let schema = LogicalSchema::new(vec![LogicalField::nullable("id", LogicalDataType::Int64)])?;
    let table = std::sync::Arc::new(MemoryTableClient::create(
        TableMeta::new(TableId::new("facade"), schema),
        Utc::now(),
    ));
    table.commit(vec![Change::add("part-0.parquet", 128)]);

    let options = StreamOptions::from_options([("startingVersion", "0")])?;
    let mut source = SharedTableSource::open(table.clone(), options, None).await?;

    let start = source.initial_offset().clone();
    let end = source
        .latest_offset(&start, source.default_limit())
        .await?
        .expect("one commit to read");
    let tasks: Vec<ScanTask> = source.get_batch(&start, &end).await?;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].path, "part-0.parquet");

    let checkpoint = end.encode()?;
    source.commit(&end);
    source.stop();

    let resumed = Offset::decode(&checkpoint)?;
    let mut source = SharedTableSource::open(table, StreamOptions::default(), Some(resumed.clone())).await?;
    assert_eq!(source.latest_offset(&resumed, ReadLimit::default()).await?, None);
    Ok(())
}
