use etl_config::shared::LoaderConfig;
use etl_sync::error::ErrorKind;
use etl_sync::loader::{BatchLoader, LoadReport};
use etl_sync::test_utils::database::{TestDatabase, test_table_name};
use etl_sync::types::{Batch, DataRecord};
use etl_telemetry::tracing::init_test_tracing;

fn small_chunks() -> LoaderConfig {
    LoaderConfig {
        chunk_size: 2,
        commit_interval: 2,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_rows_are_skipped_without_losing_their_chunk() {
    init_test_tracing();
    let database = TestDatabase::new().await;
    database
        .execute("create table test.codes (code varchar(3), qty bigint)")
        .await;
    let loader = BatchLoader::new(database.pool.clone(), small_chunks());
    let table = test_table_name("codes");

    let batch = Batch::from_records(
        ["A1", "B2", "TOOLONG", "C3", "D4"]
            .into_iter()
            .enumerate()
            .map(|(qty, code)| DataRecord::new().with("code", code).with("qty", qty as i64)),
    );

    let report = loader.insert_batch(&table, &batch).await.unwrap();

    assert_eq!(
        report,
        LoadReport {
            inserted: 4,
            failed: 1
        }
    );
    assert_eq!(
        database.column_as_text(&table, "code").await,
        vec![
            Some("A1".to_string()),
            Some("B2".to_string()),
            Some("C3".to_string()),
            Some("D4".to_string())
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_batch_columns_are_ignored() {
    init_test_tracing();
    let database = TestDatabase::new().await;
    database.execute("create table test.lots (lot text)").await;
    let loader = BatchLoader::new(database.pool.clone(), LoaderConfig::default());
    let table = test_table_name("lots");

    let batch = Batch::from_records([DataRecord::new().with("lot", "L1").with("operator", "ann")]);
    let report = loader.insert_batch(&table, &batch).await.unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(database.count_rows(&table).await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_tables_are_schema_errors() {
    init_test_tracing();
    let database = TestDatabase::new().await;
    let loader = BatchLoader::new(database.pool.clone(), LoaderConfig::default());

    let batch = Batch::from_records([DataRecord::new().with("lot", "L1")]);
    let err = loader
        .insert_batch(&test_table_name("absent"), &batch)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DestinationSchemaError);
}
