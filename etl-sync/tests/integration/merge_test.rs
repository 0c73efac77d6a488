use etl_config::shared::{LoaderConfig, MergeConfig};
use etl_postgres::sqlx::columns::{get_table_columns, table_exists};
use etl_sync::error::ErrorKind;
use etl_sync::hashing::RecordHasher;
use etl_sync::merge::{MergeEngine, MergeTarget, StagingState};
use etl_sync::test_utils::database::{TestDatabase, test_table_name};
use etl_sync::types::{Batch, Cell, DataRecord};
use etl_telemetry::tracing::init_test_tracing;

const HASH: &str = "record_hash";

fn engine(database: &TestDatabase) -> MergeEngine {
    MergeEngine::new(
        database.pool.clone(),
        LoaderConfig::default(),
        MergeConfig::default(),
    )
}

fn small_chunk_engine(database: &TestDatabase) -> MergeEngine {
    MergeEngine::new(
        database.pool.clone(),
        LoaderConfig {
            chunk_size: 2,
            commit_interval: 2,
        },
        MergeConfig::default(),
    )
}

fn hashed(records: Vec<DataRecord>, key_fields: &[&str]) -> Batch {
    let hasher = RecordHasher::new(key_fields.iter().map(|f| f.to_string()).collect()).unwrap();
    let mut batch = Batch::from_records(records);
    hasher.assign_hashes(&mut batch, HASH).unwrap();
    batch
}

fn lots(lots: &[&str]) -> Vec<DataRecord> {
    lots.iter()
        .map(|lot| DataRecord::new().with("lot", *lot).with("qty", 5))
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn merging_the_same_batch_twice_inserts_once() {
    init_test_tracing();
    let database = TestDatabase::new().await;
    let engine = engine(&database);
    let table = test_table_name("sfc");
    let batch = hashed(lots(&["L1", "L2", "L3"]), &["lot"]);

    let first = engine
        .merge_by_hash(&table, batch.clone(), HASH, &[])
        .await
        .unwrap();
    let second = engine.merge_by_hash(&table, batch, HASH, &[]).await.unwrap();

    assert_eq!(first.inserted, 3);
    assert_eq!(first.staged, 3);
    assert_eq!(second.inserted, 0);
    assert_eq!(database.count_rows(&table).await, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn overlapping_batches_store_one_row_per_hash() {
    init_test_tracing();
    let database = TestDatabase::new().await;
    let engine = engine(&database);
    let table = test_table_name("sfc");

    engine
        .merge_by_hash(&table, hashed(lots(&["L1", "L2"]), &["lot"]), HASH, &[])
        .await
        .unwrap();
    let report = engine
        .merge_by_hash(
            &table,
            hashed(lots(&["L2", "L3", "L3"]), &["lot"]),
            HASH,
            &[],
        )
        .await
        .unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(report.duplicates_dropped, 1);
    assert_eq!(
        database.column_as_text(&table, "lot").await,
        vec![
            Some("L1".to_string()),
            Some("L2".to_string()),
            Some("L3".to_string())
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn a_later_export_never_overwrites_an_earlier_record() {
    init_test_tracing();
    let database = TestDatabase::new().await;
    let engine = engine(&database);
    let table = test_table_name("scenario");

    let a = hashed(
        vec![DataRecord::new().with("id", "X1").with("key", "k1").with("v", 10)],
        &["key"],
    );
    let b = hashed(
        vec![DataRecord::new().with("id", "X2").with("key", "k1").with("v", 20)],
        &["key"],
    );

    engine.merge_by_hash(&table, a, HASH, &[]).await.unwrap();
    engine.merge_by_hash(&table, b, HASH, &[]).await.unwrap();

    assert_eq!(database.count_rows(&table).await, 1);
    assert_eq!(
        database.column_as_text(&table, "v").await,
        vec![Some("10".to_string())]
    );
    assert_eq!(
        database.column_as_text(&table, "id").await,
        vec![Some("X1".to_string())]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn non_finite_floats_are_stored_as_null() {
    init_test_tracing();
    let database = TestDatabase::new().await;
    let engine = engine(&database);
    let table = test_table_name("lot_yield");

    let batch = hashed(
        vec![
            DataRecord::new().with("lot", "L1").with("yield_rate", 0.5),
            DataRecord::new().with("lot", "L2").with("yield_rate", f64::NAN),
            DataRecord::new().with("lot", "L3").with("yield_rate", f64::INFINITY),
        ],
        &["lot"],
    );

    let report = engine.merge_by_hash(&table, batch, HASH, &[]).await.unwrap();

    assert_eq!(report.inserted, 3);
    assert_eq!(
        database.column_as_text(&table, "yield_rate").await,
        vec![Some("0.5".to_string()), None, None]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_batches_do_not_touch_the_database() {
    init_test_tracing();
    let database = TestDatabase::new().await;
    let engine = engine(&database);
    let table = test_table_name("empty");

    let report = engine
        .merge_by_hash(&table, Batch::default(), HASH, &[])
        .await
        .unwrap();

    assert_eq!(report.inserted, 0);
    assert!(!table_exists(&database.pool, &table).await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn batches_without_hashes_are_rejected() {
    init_test_tracing();
    let database = TestDatabase::new().await;
    let engine = engine(&database);
    let table = test_table_name("sfc");

    let mut batch = hashed(lots(&["L1"]), &["lot"]);
    batch.set_column(HASH, vec![Cell::Null]).unwrap();
    let err = engine
        .merge_by_hash(&table, batch, HASH, &[])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidBatch);
    assert!(!table_exists(&database.pool, &table).await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn staging_is_emptied_after_each_merge() {
    init_test_tracing();
    let database = TestDatabase::new().await;
    let engine = engine(&database);
    let table = test_table_name("sfc");
    let staging = engine.staging_table(&table);

    engine
        .merge_by_hash(&table, hashed(lots(&["L1", "L2"]), &["lot"]), HASH, &[])
        .await
        .unwrap();

    assert_eq!(staging, test_table_name("_stg_sfc"));
    assert_eq!(database.count_rows(&staging).await, 0);
    assert_eq!(engine.staging_state(&staging).await, StagingState::Empty);
}

#[tokio::test(flavor = "multi_thread")]
async fn existing_targets_with_identity_keys_are_merged_into() {
    init_test_tracing();
    let database = TestDatabase::new().await;
    let engine = engine(&database);
    let table = test_table_name("planner");
    database
        .execute(
            "create table test.planner (
                id bigint generated always as identity primary key,
                record_hash varchar(64),
                lot text,
                qty integer,
                due date
            )",
        )
        .await;

    let batch = hashed(
        vec![
            DataRecord::new()
                .with("lot", "00123")
                .with("qty", "12.0")
                .with("due", "2024-03-01"),
            DataRecord::new()
                .with("lot", "00124")
                .with("qty", 7.5)
                .with("due", "nat"),
        ],
        &["lot"],
    );

    let report = engine.merge_by_hash(&table, batch, HASH, &[]).await.unwrap();

    assert_eq!(report.inserted, 2);
    assert!(report.columns_added.is_empty());
    assert_eq!(
        database.column_as_text(&table, "qty").await,
        vec![Some("12".to_string()), None]
    );
    assert_eq!(
        database.column_as_text(&table, "due").await,
        vec![Some("2024-03-01".to_string()), None]
    );
    assert_eq!(
        database.column_as_text(&table, "id").await,
        vec![Some("1".to_string()), Some("2".to_string())]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn spelled_out_infinities_keep_float_columns_numeric() {
    init_test_tracing();
    let database = TestDatabase::new().await;
    let engine = engine(&database);
    let table = test_table_name("lot_yield");

    // Strings as the CSV reader yields them.
    let batch = hashed(
        vec![
            DataRecord::new().with("lot", "L1").with("yield_rate", "0.5"),
            DataRecord::new().with("lot", "L2").with("yield_rate", "inf"),
            DataRecord::new().with("lot", "L3").with("yield_rate", "-Infinity"),
        ],
        &["lot"],
    );

    let report = engine.merge_by_hash(&table, batch, HASH, &[]).await.unwrap();

    let yield_rate = get_table_columns(&database.pool, &table)
        .await
        .unwrap()
        .into_iter()
        .find(|column| column.column_name == "yield_rate")
        .unwrap();
    assert_eq!(report.inserted, 3);
    assert_eq!(yield_rate.data_type, "double precision");
    assert_eq!(
        database.column_as_text(&table, "yield_rate").await,
        vec![Some("0.5".to_string()), None, None]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn spelled_out_infinities_are_null_in_numeric_columns() {
    init_test_tracing();
    let database = TestDatabase::new().await;
    let engine = engine(&database);
    let table = test_table_name("lot_cost");
    database
        .execute(
            "create table test.lot_cost (record_hash varchar(64), lot text, cost numeric(10,2))",
        )
        .await;

    let batch = hashed(
        vec![
            DataRecord::new().with("lot", "L1").with("cost", "12.5"),
            DataRecord::new().with("lot", "L2").with("cost", "Infinity"),
        ],
        &["lot"],
    );

    let report = engine.merge_by_hash(&table, batch, HASH, &[]).await.unwrap();

    assert_eq!(report.inserted, 2);
    assert_eq!(report.failed_rows, 0);
    assert_eq!(
        database.column_as_text(&table, "cost").await,
        vec![Some("12.50".to_string()), None]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn surrogate_ids_follow_file_order() {
    init_test_tracing();
    let database = TestDatabase::new().await;
    let engine = engine(&database);
    let table = test_table_name("sfc");
    let file_order = ["L1", "L2", "L3", "L4", "L5", "L6"];

    engine
        .merge_by_hash(&table, hashed(lots(&file_order), &["lot"]), HASH, &[])
        .await
        .unwrap();

    assert_eq!(
        database.column_ordered_by(&table, "lot", "id").await,
        file_order
            .iter()
            .map(|lot| Some(lot.to_string()))
            .collect::<Vec<_>>()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn hash_column_gets_an_index() {
    init_test_tracing();
    let database = TestDatabase::new().await;
    let engine = engine(&database);
    let table = test_table_name("sfc");

    engine
        .merge_by_hash(&table, hashed(lots(&["L1"]), &["lot"]), HASH, &[])
        .await
        .unwrap();

    assert!(
        database
            .index_names(&table)
            .await
            .contains(&"idx_sfc_record_hash".to_string())
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_merges_leave_staging_empty() {
    init_test_tracing();
    let database = TestDatabase::new().await;
    let engine = engine(&database);
    let table = test_table_name("uq");
    let staging = engine.staging_table(&table);
    database
        .execute(
            "create table test.uq (
                id bigint generated always as identity primary key,
                record_hash varchar(64),
                lot text,
                code text
            )",
        )
        .await;
    database
        .execute("create unique index idx_uq_code on test.uq (code)")
        .await;

    // Staging has no unique index, so only the final insert into the target fails.
    let clashing = hashed(
        vec![
            DataRecord::new().with("lot", "L1").with("code", "C1"),
            DataRecord::new().with("lot", "L2").with("code", "C1"),
        ],
        &["lot"],
    );
    let err = engine
        .merge_by_hash(&table, clashing, HASH, &[])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DestinationConstraintViolation);
    assert_eq!(database.count_rows(&table).await, 0);
    assert_eq!(database.count_rows(&staging).await, 0);
    assert_eq!(engine.staging_state(&staging).await, StagingState::Empty);

    let report = engine
        .merge_by_hash(
            &table,
            hashed(
                vec![
                    DataRecord::new().with("lot", "L1").with("code", "C1"),
                    DataRecord::new().with("lot", "L2").with("code", "C2"),
                ],
                &["lot"],
            ),
            HASH,
            &[],
        )
        .await
        .unwrap();

    assert_eq!(report.inserted, 2);
    assert_eq!(database.count_rows(&staging).await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn merges_stay_correct_across_commit_intervals() {
    init_test_tracing();
    let database = TestDatabase::new().await;
    let engine = small_chunk_engine(&database);
    let table = test_table_name("sfc");
    let all = ["L1", "L2", "L3", "L4", "L5", "L6", "L7", "L8", "L9"];

    // Seven rows in chunks of two commit four times while staging.
    let report = engine
        .merge_by_hash(&table, hashed(lots(&all[..7]), &["lot"]), HASH, &[])
        .await
        .unwrap();

    assert_eq!(report.staged, 7);
    assert_eq!(report.inserted, 7);
    assert_eq!(database.count_rows(&table).await, 7);

    let report = engine
        .merge_by_hash(&table, hashed(lots(&all), &["lot"]), HASH, &[])
        .await
        .unwrap();

    assert_eq!(report.staged, 9);
    assert_eq!(report.inserted, 2);
    assert_eq!(database.count_rows(&table).await, 9);
    assert_eq!(database.count_rows(&engine.staging_table(&table)).await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn values_for_an_identity_key_fail_the_merge() {
    init_test_tracing();
    let database = TestDatabase::new().await;
    let engine = engine(&database);
    let table = test_table_name("planner");
    database
        .execute(
            "create table test.planner (
                id bigint generated always as identity primary key,
                record_hash varchar(64),
                key text
            )",
        )
        .await;

    let batch = hashed(
        vec![DataRecord::new().with("id", "X1").with("key", "k1")],
        &["key"],
    );
    let err = engine
        .merge_by_hash(&table, batch, HASH, &[])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DestinationSchemaError);
    assert_eq!(database.count_rows(&table).await, 0);
}
