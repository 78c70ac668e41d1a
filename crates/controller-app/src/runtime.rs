use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::time::{sleep_until, Instant};
use tracing::{info, warn};

use ble_client::Transport;
use session::ControllerSession;
use state_store::{
    AnyMetricStore, FileMetricStore, LoadIntentSource, MemoryMetricStore, MetricStore,
    SqliteMetricStore,
};

use crate::config::{StoreBackend, StoreConfig};

/// Opens the configured backend. A SQLite database that cannot be opened
/// falls back to memory: the controller is still polled, but restored state
/// starts empty and nothing outlives the process.
pub async fn open_store(config: &StoreConfig) -> AnyMetricStore {
    match config.backend {
        StoreBackend::Files => AnyMetricStore::Files(FileMetricStore::new(&config.dir)),
        StoreBackend::Sqlite => match SqliteMetricStore::new(&config.sqlite_path).await {
            Ok(store) => AnyMetricStore::Sqlite(store),
            Err(err) => {
                warn!(
                    path = %config.sqlite_path,
                    error = %err,
                    "metric store unavailable, keeping state in memory"
                );
                AnyMetricStore::Memory(MemoryMetricStore::new())
            }
        },
        StoreBackend::Memory => AnyMetricStore::Memory(MemoryMetricStore::new()),
    }
}

/// Prometheus text exposition rewritten after every run, for a
/// node-exporter textfile collector.
pub struct MetricsTextfile {
    path: String,
    handle: PrometheusHandle,
}

impl MetricsTextfile {
    /// Installs the global recorder; call at most once per process.
    pub fn install(path: impl Into<String>) -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("metrics recorder install failed")?;
        Ok(Self {
            path: path.into(),
            handle,
        })
    }

    pub async fn export(&self) {
        if let Err(err) = tokio::fs::write(&self.path, self.handle.render()).await {
            warn!(path = %self.path, error = %err, "metrics export failed");
        }
    }
}

/// Liveness reporting to a service manager.
pub trait Watchdog {
    fn ready(&self);

    /// Only called once the loop has made progress.
    fn ping(&self);

    /// Longest gap between pings while waiting for the next run.
    fn keepalive(&self) -> Option<Duration>;
}

/// systemd notify socket. Pings are only due when the unit sets
/// `WatchdogSec=` for this process.
#[derive(Debug, Clone, Default)]
pub struct SystemdWatchdog {
    timeout: Option<Duration>,
}

impl SystemdWatchdog {
    #[cfg(target_os = "linux")]
    pub fn from_env() -> Self {
        let mut usec = 0;
        let timeout =
            sd_notify::watchdog_enabled(false, &mut usec).then(|| Duration::from_micros(usec));
        Self { timeout }
    }

    #[cfg(not(target_os = "linux"))]
    pub fn from_env() -> Self {
        Self::default()
    }
}

impl Watchdog for SystemdWatchdog {
    fn ready(&self) {
        notify_ready();
    }

    fn ping(&self) {
        if self.timeout.is_some() {
            notify_watchdog();
        }
    }

    fn keepalive(&self) -> Option<Duration> {
        self.timeout.map(|timeout| timeout / 2)
    }
}

#[cfg(target_os = "linux")]
fn notify_ready() {
    if let Err(err) = sd_notify::notify(false, &[sd_notify::NotifyState::Ready]) {
        warn!(error = %err, "systemd ready notify failed");
    }
}

#[cfg(not(target_os = "linux"))]
fn notify_ready() {}

#[cfg(target_os = "linux")]
fn notify_watchdog() {
    if let Err(err) = sd_notify::notify(false, &[sd_notify::NotifyState::Watchdog]) {
        warn!(error = %err, "systemd watchdog notify failed");
    }
}

#[cfg(not(target_os = "linux"))]
fn notify_watchdog() {}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub runs: u64,
    pub failures: u64,
}

/// Starts a run every `interval` until `shutdown` resolves. A failed run is
/// logged and the loop goes on. The watchdog is pinged after each run and
/// while idle, never during a run, so a run that hangs stops the pings.
/// `shutdown` is only observed between runs.
pub async fn run_forever<T, S, I, W, F>(
    session: &mut ControllerSession<T, S, I>,
    interval: Duration,
    watchdog: &W,
    metrics: Option<&MetricsTextfile>,
    shutdown: F,
) -> LoopStats
where
    T: Transport,
    S: MetricStore,
    I: LoadIntentSource,
    W: Watchdog,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    watchdog.ready();
    let mut stats = LoopStats::default();

    loop {
        let started = Instant::now();
        stats.runs += 1;
        if let Err(err) = session.run().await {
            stats.failures += 1;
            warn!(error = %err, failures = stats.failures, "run failed");
        }
        watchdog.ping();
        if let Some(metrics) = metrics {
            metrics.export().await;
        }

        let next_run = started + interval;
        loop {
            let now = Instant::now();
            let wake = match watchdog.keepalive() {
                Some(keepalive) if now + keepalive < next_run => now + keepalive,
                _ => next_run,
            };
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!(runs = stats.runs, failures = stats.failures, "shutdown signal received");
                    return stats;
                }
                _ = sleep_until(wake) => {}
            }
            if wake >= next_run {
                break;
            }
            watchdog.ping();
        }
    }
}
