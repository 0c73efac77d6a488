use etl_config::shared::TrackerConfig;
use etl_sync::test_utils::database::TestDatabase;
use etl_sync::tracker::{FileChangeTracker, PostgresFileStateStore};
use etl_telemetry::tracing::init_test_tracing;

#[tokio::test(flavor = "multi_thread")]
async fn processed_files_are_remembered_across_trackers() {
    init_test_tracing();
    let database = TestDatabase::new().await;
    let dir = tempfile::tempdir().unwrap();
    let export = dir.path().join("sfc_2024-01.csv");
    std::fs::write(&export, "lot,qty\nL1,4\n").unwrap();

    let tracker = FileChangeTracker::local(
        PostgresFileStateStore::new(database.pool.clone()),
        &TrackerConfig::default(),
    );
    assert_eq!(tracker.filter_changed("sfc", [&export]).await, vec![export.clone()]);
    tracker.mark_processed("sfc", &export).await.unwrap();

    // A new tracker sees the persisted state.
    let tracker = FileChangeTracker::local(
        PostgresFileStateStore::new(database.pool.clone()),
        &TrackerConfig::default(),
    );
    assert!(tracker.filter_changed("sfc", [&export]).await.is_empty());

    std::fs::write(&export, "lot,qty\nL1,4\nL2,5\n").unwrap();
    assert_eq!(tracker.filter_changed("sfc", [&export]).await.len(), 1);

    tracker.mark_processed("sfc", &export).await.unwrap();
    let states = tracker.store().file_states("sfc").await.unwrap();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].size, 18);
    assert_eq!(states[0].file_path, export.to_string_lossy());
}

#[tokio::test(flavor = "multi_thread")]
async fn purge_only_affects_one_etl() {
    init_test_tracing();
    let database = TestDatabase::new().await;
    let dir = tempfile::tempdir().unwrap();
    let export = dir.path().join("oee.csv");
    std::fs::write(&export, "line,oee\nA,0.8\n").unwrap();

    let tracker = FileChangeTracker::local(
        PostgresFileStateStore::new(database.pool.clone()),
        &TrackerConfig::default(),
    );
    tracker.mark_processed("oee", &export).await.unwrap();
    tracker.mark_processed("oee_backfill", &export).await.unwrap();

    assert_eq!(tracker.purge("oee").await.unwrap(), 1);
    assert_eq!(tracker.filter_changed("oee", [&export]).await.len(), 1);
    assert!(tracker.filter_changed("oee_backfill", [&export]).await.is_empty());
}
