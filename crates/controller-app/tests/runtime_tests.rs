use std::future::Future;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ble_client::MockTransport;
use controller_app::{
    open_store, run_forever, ControllerConfig, LoopStats, StoreBackend, StoreConfig, Watchdog,
};
use protocol::{crc16, BATTERY_QUERY};
use session::{ControllerSession, DEFAULT_ADDRESS};
use state_store::{AnyMetricStore, MemoryMetricStore, MetricStore};
use tokio::time::{sleep, Instant};
use types::{LoadRequest, Metric};

#[tokio::test]
async fn unopenable_sqlite_store_falls_back_to_memory() {
    let config = StoreConfig {
        backend: StoreBackend::Sqlite,
        sqlite_path: "/nonexistent-solar-dir/state.sqlite".to_string(),
        ..StoreConfig::default()
    };

    let store = open_store(&config).await;
    assert!(matches!(store, AnyMetricStore::Memory(_)));
    assert_eq!(store.read(Metric::LoadOn).await.expect("read"), None);

    let battery = with_crc(vec![0x01, 0x03, 0x06, 0x00, 0x84, 0x00, 0x00, 0x00, 0x00]);
    let transport = MockTransport::new().respond_to(&BATTERY_QUERY, vec![battery]);
    let mut session = ControllerSession::new(
        transport.clone(),
        store,
        LoadRequest::None,
        DEFAULT_ADDRESS,
    );
    let report = tokio::time::timeout(Duration::from_secs(10), session.run())
        .await
        .expect("run finishes")
        .expect("run");

    assert_eq!(report.frames_decoded, 1);
    assert_eq!(transport.writes().len(), 3);
}

#[tokio::test]
async fn openable_sqlite_store_is_used() {
    let path = temp_db_path("runtime_sqlite");
    let config = StoreConfig {
        backend: StoreBackend::Sqlite,
        sqlite_path: path.to_string_lossy().to_string(),
        ..StoreConfig::default()
    };

    let store = open_store(&config).await;
    assert!(matches!(store, AnyMetricStore::Sqlite(_)));

    drop(store);
    cleanup_db(&path);
}

#[test]
fn default_build_carries_the_bluetooth_transport() {
    assert!(cfg!(feature = "ble"), "ble must be a default feature");
    #[cfg(feature = "ble")]
    let _transport = ble_client::BleTransport::new(ControllerConfig::default().client);
}

/// Records ping times relative to the start of the loop.
struct RecordingWatchdog {
    started: Instant,
    keepalive: Option<Duration>,
    ready: Mutex<u32>,
    pings: Mutex<Vec<Duration>>,
}

impl RecordingWatchdog {
    fn new(keepalive: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            keepalive,
            ready: Mutex::new(0),
            pings: Mutex::new(Vec::new()),
        }
    }

    fn pings(&self) -> Vec<Duration> {
        self.pings.lock().expect("pings lock").clone()
    }
}

impl Watchdog for RecordingWatchdog {
    fn ready(&self) {
        *self.ready.lock().expect("ready lock") += 1;
    }

    fn ping(&self) {
        self.pings
            .lock()
            .expect("pings lock")
            .push(self.started.elapsed());
    }

    fn keepalive(&self) -> Option<Duration> {
        self.keepalive
    }
}

fn quiet_session() -> ControllerSession<MockTransport, MemoryMetricStore, LoadRequest> {
    ControllerSession::new(
        MockTransport::new(),
        MemoryMetricStore::new(),
        LoadRequest::None,
        DEFAULT_ADDRESS,
    )
}

fn stop_after(seconds: u64) -> impl Future<Output = ()> {
    sleep(Duration::from_secs(seconds))
}

#[tokio::test(start_paused = true)]
async fn watchdog_is_pinged_after_each_completed_run() {
    let watchdog = RecordingWatchdog::new(None);
    let mut session = quiet_session();

    let stats = run_forever(
        &mut session,
        Duration::from_secs(10),
        &watchdog,
        None,
        stop_after(25),
    )
    .await;

    assert_eq!(stats, LoopStats { runs: 3, failures: 0 });
    assert_eq!(*watchdog.ready.lock().expect("ready lock"), 1);
    assert_eq!(
        watchdog.pings(),
        vec![
            Duration::from_secs(4),
            Duration::from_secs(14),
            Duration::from_secs(24),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn watchdog_stays_quiet_while_a_run_is_in_progress() {
    let watchdog = RecordingWatchdog::new(Some(Duration::from_secs(3)));
    let mut session = quiet_session();

    run_forever(
        &mut session,
        Duration::from_secs(10),
        &watchdog,
        None,
        stop_after(25),
    )
    .await;

    let pings = watchdog.pings();
    // runs occupy [0s, 4s], [10s, 14s] and [20s, 24s]
    for ping in &pings {
        let offset = ping.as_secs_f64() % 10.0;
        assert!(offset == 0.0 || offset >= 4.0, "ping during a run at {ping:?}");
    }
    assert_eq!(
        pings,
        vec![
            Duration::from_secs(4),
            Duration::from_secs(7),
            Duration::from_secs(14),
            Duration::from_secs(17),
            Duration::from_secs(24),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn failed_runs_do_not_stop_the_loop() {
    let watchdog = RecordingWatchdog::new(None);
    let mut session = ControllerSession::new(
        MockTransport::new().fail_open(),
        MemoryMetricStore::new(),
        LoadRequest::TurnOn,
        DEFAULT_ADDRESS,
    );

    let stats = run_forever(
        &mut session,
        Duration::from_secs(10),
        &watchdog,
        None,
        stop_after(25),
    )
    .await;

    assert_eq!(stats, LoopStats { runs: 3, failures: 3 });
    assert_eq!(watchdog.pings().len(), 3);
}

fn with_crc(mut body: Vec<u8>) -> Vec<u8> {
    let crc = crc16(&body).to_le_bytes();
    body.extend_from_slice(&crc);
    body
}

fn temp_db_path(prefix: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    let pid = std::process::id();
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    path.push(format!("{prefix}-{pid}-{ts}.sqlite"));
    path
}

fn cleanup_db(path: &PathBuf) {
    let _ = std::fs::remove_file(path);
    let _ = std::fs::remove_file(path.with_extension("sqlite-wal"));
    let _ = std::fs::remove_file(path.with_extension("sqlite-shm"));
}
