use etl_config::shared::{LoaderConfig, MergeConfig};
use etl_postgres::sqlx::columns::get_table_columns;
use etl_postgres::types::truncate_identifier;
use etl_sync::hashing::RecordHasher;
use etl_sync::merge::{MergeEngine, MergeTarget};
use etl_sync::test_utils::database::{TestDatabase, test_table_name};
use etl_sync::types::{Batch, DataRecord};
use etl_telemetry::tracing::init_test_tracing;

const HASH: &str = "record_hash";

fn hashed(records: Vec<DataRecord>) -> Batch {
    let hasher = RecordHasher::new(vec!["lot".to_string()]).unwrap();
    let mut batch = Batch::from_records(records);
    hasher.assign_hashes(&mut batch, HASH).unwrap();
    batch
}

async fn column_type(database: &TestDatabase, table: &str, column: &str) -> Option<String> {
    get_table_columns(&database.pool, &test_table_name(table))
        .await
        .unwrap()
        .into_iter()
        .find(|info| info.column_name == column)
        .map(|info| info.data_type)
}

#[tokio::test(flavor = "multi_thread")]
async fn new_columns_are_added_and_earlier_rows_stay_null() {
    init_test_tracing();
    let database = TestDatabase::new().await;
    let engine = MergeEngine::new(
        database.pool.clone(),
        LoaderConfig::default(),
        MergeConfig::default(),
    );
    let table = test_table_name("sfc");

    engine
        .merge_by_hash(
            &table,
            hashed(vec![DataRecord::new().with("lot", "L1").with("qty", 4)]),
            HASH,
            &[],
        )
        .await
        .unwrap();

    let report = engine
        .merge_by_hash(
            &table,
            hashed(vec![
                DataRecord::new()
                    .with("lot", "L2")
                    .with("qty", 6)
                    .with("defect_code", "D-17")
                    .with("measured_at", "2024-01-02 10:00:00")
                    .with("passed", "TRUE"),
            ]),
            HASH,
            &[],
        )
        .await
        .unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(
        report.columns_added,
        vec![
            "defect_code".to_string(),
            "measured_at".to_string(),
            "passed".to_string()
        ]
    );
    assert_eq!(
        column_type(&database, "sfc", "qty").await.as_deref(),
        Some("bigint")
    );
    assert_eq!(
        column_type(&database, "sfc", "defect_code").await.as_deref(),
        Some("text")
    );
    assert_eq!(
        column_type(&database, "sfc", "measured_at").await.as_deref(),
        Some("timestamp without time zone")
    );
    assert_eq!(
        column_type(&database, "sfc", "passed").await.as_deref(),
        Some("boolean")
    );
    assert_eq!(
        database.column_as_text(&table, "defect_code").await,
        vec![Some("D-17".to_string()), None]
    );
    assert_eq!(
        database.column_as_text(&table, "passed").await,
        vec![Some("true".to_string()), None]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn configured_text_columns_keep_leading_zeros() {
    init_test_tracing();
    let database = TestDatabase::new().await;
    let engine = MergeEngine::new(
        database.pool.clone(),
        LoaderConfig::default(),
        MergeConfig::default(),
    );
    let table = test_table_name("lots");

    engine
        .merge_by_hash(
            &table,
            hashed(vec![
                DataRecord::new().with("lot", "00123").with("order_no", "0042"),
            ]),
            HASH,
            &["lot".to_string()],
        )
        .await
        .unwrap();

    assert_eq!(
        column_type(&database, "lots", "lot").await.as_deref(),
        Some("text")
    );
    assert_eq!(
        column_type(&database, "lots", "order_no").await.as_deref(),
        Some("bigint")
    );
    assert_eq!(
        database.column_as_text(&table, "lot").await,
        vec![Some("00123".to_string())]
    );
    assert_eq!(
        database.column_as_text(&table, "order_no").await,
        vec![Some("42".to_string())]
    );
    assert_eq!(
        column_type(&database, "lots", "id").await.as_deref(),
        Some("bigint")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn long_column_names_keep_their_values_across_merges() {
    init_test_tracing();
    let database = TestDatabase::new().await;
    let engine = MergeEngine::new(
        database.pool.clone(),
        LoaderConfig::default(),
        MergeConfig::default(),
    );
    let table = test_table_name("routing");
    // 72 bytes, Postgres keeps the first 21 characters.
    let long = "工序名称".repeat(6);
    let stored = truncate_identifier(&long).to_string();

    engine
        .merge_by_hash(
            &table,
            hashed(vec![DataRecord::new().with("lot", "L0")]),
            HASH,
            &[],
        )
        .await
        .unwrap();

    let first = engine
        .merge_by_hash(
            &table,
            hashed(vec![
                DataRecord::new().with("lot", "L1").with(long.as_str(), "cut"),
                DataRecord::new().with("lot", "L2").with(long.as_str(), "weld"),
            ]),
            HASH,
            &[],
        )
        .await
        .unwrap();
    let second = engine
        .merge_by_hash(
            &table,
            hashed(vec![
                DataRecord::new().with("lot", "L3").with(long.as_str(), "paint"),
            ]),
            HASH,
            &[],
        )
        .await
        .unwrap();

    assert_eq!(first.columns_added, vec![stored.clone()]);
    assert!(second.columns_added.is_empty());
    assert_eq!(second.inserted, 1);
    assert_eq!(
        column_type(&database, "routing", &stored).await.as_deref(),
        Some("text")
    );
    assert_eq!(
        database.column_as_text(&table, &stored).await,
        vec![
            Some("cut".to_string()),
            Some("paint".to_string()),
            Some("weld".to_string()),
            None
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn columns_that_cannot_be_added_are_skipped() {
    init_test_tracing();
    let database = TestDatabase::new().await;
    let engine = MergeEngine::new(
        database.pool.clone(),
        LoaderConfig::default(),
        MergeConfig::default(),
    );
    let table = test_table_name("events");
    // Postgres refuses to add columns to a partition.
    database
        .execute(
            "create table test.all_events (record_hash varchar(64), lot text) \
             partition by list (lot)",
        )
        .await;
    database
        .execute("create table test.events partition of test.all_events default")
        .await;

    let report = engine
        .merge_by_hash(
            &table,
            hashed(vec![
                DataRecord::new().with("lot", "L1").with("shift", "night"),
                DataRecord::new().with("lot", "L2").with("shift", "day"),
            ]),
            HASH,
            &[],
        )
        .await
        .unwrap();

    assert!(report.columns_added.is_empty());
    assert_eq!(report.inserted, 2);
    assert_eq!(column_type(&database, "events", "shift").await, None);
    assert_eq!(
        database.column_as_text(&table, "lot").await,
        vec![Some("L1".to_string()), Some("L2".to_string())]
    );
}
