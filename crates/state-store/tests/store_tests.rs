use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use state_store::{
    AnyMetricStore, FileLoadIntent, FileMetricStore, IntentSignal, LoadIntentSource,
    MemoryMetricStore, MetricStore, SqliteMetricStore,
};
use types::{LoadRequest, Metric};

#[tokio::test]
async fn file_store_round_trips_and_reports_missing() {
    let dir = temp_path("file_store");
    std::fs::create_dir_all(&dir).expect("mkdir");
    let store = FileMetricStore::new(&dir);

    assert_eq!(store.read(Metric::BatteryVoltage).await.expect("read"), None);

    store
        .write(Metric::BatteryVoltage, "13.2")
        .await
        .expect("write");
    store.write(Metric::LoadOn, "True").await.expect("write");

    assert_eq!(
        store.read(Metric::BatteryVoltage).await.expect("read"),
        Some("13.2".to_string())
    );
    assert_eq!(
        std::fs::read_to_string(dir.join("is_load_on")).expect("raw file"),
        "True"
    );

    cleanup_dir(&dir);
}

#[tokio::test]
async fn file_store_strips_trailing_newlines() {
    let dir = temp_path("file_store_newline");
    std::fs::create_dir_all(&dir).expect("mkdir");
    std::fs::write(dir.join("solar_voltage"), "18.7\n").expect("seed");

    let store = FileMetricStore::new(&dir);
    assert_eq!(
        store.read(Metric::SolarVoltage).await.expect("read"),
        Some("18.7".to_string())
    );

    cleanup_dir(&dir);
}

#[tokio::test]
async fn file_store_write_fails_without_directory() {
    let dir = temp_path("file_store_missing_dir");
    let store = FileMetricStore::new(&dir);
    assert!(store.write(Metric::LoadPower, "5").await.is_err());
}

#[tokio::test]
async fn sqlite_store_upserts_latest_value() {
    let path = temp_path("sqlite_store").with_extension("sqlite");
    let store = SqliteMetricStore::new(path.to_str().expect("path"))
        .await
        .expect("init");

    assert_eq!(store.read(Metric::LoadVoltage).await.expect("read"), None);
    store.write(Metric::LoadVoltage, "12.6").await.expect("write");
    store.write(Metric::LoadVoltage, "12.8").await.expect("write");

    assert_eq!(
        store.read(Metric::LoadVoltage).await.expect("read"),
        Some("12.8".to_string())
    );
    assert!(store
        .updated_at(Metric::LoadVoltage)
        .await
        .expect("updated_at")
        .is_some());

    drop(store);
    cleanup_db(&path);
}

#[tokio::test]
async fn any_store_dispatches_to_backend() {
    let memory = MemoryMetricStore::with_values([(Metric::BatteryCurrent, "2.57")]);
    let store = AnyMetricStore::Memory(memory.clone());

    assert_eq!(
        store.read(Metric::BatteryCurrent).await.expect("read"),
        Some("2.57".to_string())
    );
    store.write(Metric::BatteryPower, "34").await.expect("write");
    assert_eq!(memory.get(Metric::BatteryPower), Some("34".to_string()));
}

#[tokio::test]
async fn file_intent_reads_without_consuming() {
    let dir = temp_path("intent");
    std::fs::create_dir_all(&dir).expect("mkdir");
    let path = dir.join("load_action");

    let intent = FileLoadIntent::new(&path);
    assert_eq!(intent.read_request().await, LoadRequest::None);

    std::fs::write(&path, "on\n").expect("seed");
    assert_eq!(intent.read_request().await, LoadRequest::TurnOn);
    assert!(path.exists());

    std::fs::write(&path, "off").expect("seed");
    assert_eq!(intent.read_request().await, LoadRequest::TurnOff);

    std::fs::write(&path, "maybe").expect("seed");
    assert_eq!(intent.read_request().await, LoadRequest::None);

    let fixed = IntentSignal::Fixed(LoadRequest::TurnOff);
    assert_eq!(fixed.read_request().await, LoadRequest::TurnOff);

    cleanup_dir(&dir);
}

fn temp_path(prefix: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    let pid = std::process::id();
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    path.push(format!("{prefix}-{pid}-{ts}"));
    path
}

fn cleanup_dir(path: &Path) {
    let _ = std::fs::remove_dir_all(path);
}

fn cleanup_db(path: &PathBuf) {
    let _ = std::fs::remove_file(path);
    let wal = PathBuf::from(format!("{}-wal", path.display()));
    let shm = PathBuf::from(format!("{}-shm", path.display()));
    let _ = std::fs::remove_file(wal);
    let _ = std::fs::remove_file(shm);
}
