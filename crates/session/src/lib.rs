use std::time::Duration;

use metrics::{counter, gauge};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use ble_client::{ClientError, Session, Transport};
use protocol::{Command, CHARACTERISTIC_UUID};
use state_store::{LoadIntentSource, MetricStore};
use types::{LoadRequest, Metric, MetricValue};

pub mod arbiter;
pub mod cache;

pub use arbiter::{decide, LoadDecision};
pub use cache::StateCache;

pub const DEFAULT_ADDRESS: &str = "00:11:22:33:44:55";

/// Wait after a load toggle so the controller reports its new state.
pub const SETTLE_DELAY: Duration = Duration::from_secs(5);
pub const PRE_QUERY_DELAY: Duration = Duration::from_secs(1);
/// Wait after each of [`Command::QUERIES`], in the same order. The protocol
/// has no request ids, so these windows are the only response correlation.
pub const QUERY_DELAYS: [Duration; 3] = [
    Duration::from_millis(500),
    Duration::from_millis(500),
    Duration::from_millis(2_000),
];

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to open session to {address}: {source}")]
    Open {
        address: String,
        #[source]
        source: ClientError,
    },
    #[error("transport fault during {stage}: {source}")]
    Transport {
        stage: &'static str,
        #[source]
        source: ClientError,
    },
}

impl SessionError {
    fn transport(stage: &'static str) -> impl FnOnce(ClientError) -> Self {
        move |source| SessionError::Transport { stage, source }
    }
}

/// Outcome of one completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub restored: usize,
    pub request: LoadRequest,
    pub decision: LoadDecision,
    pub frames_received: usize,
    pub frames_decoded: usize,
    pub metrics_changed: usize,
    pub persist_failures: usize,
}

/// Runs one query cycle against the controller: restore state, open the
/// link, toggle the load if requested, query all telemetry, close.
pub struct ControllerSession<T, S, I> {
    transport: T,
    store: S,
    intent: I,
    address: String,
    cache: StateCache,
}

impl<T, S, I> ControllerSession<T, S, I>
where
    T: Transport,
    S: MetricStore,
    I: LoadIntentSource,
{
    pub fn new(transport: T, store: S, intent: I, address: impl Into<String>) -> Self {
        Self {
            transport,
            store,
            intent,
            address: address.into(),
            cache: StateCache::new(),
        }
    }

    pub fn cache(&self) -> &StateCache {
        &self.cache
    }

    pub async fn run(&mut self) -> Result<RunReport, SessionError> {
        let mut report = RunReport {
            restored: self.cache.restore(&self.store).await,
            ..RunReport::default()
        };
        info!(address = %self.address, restored = report.restored, "run started");

        let mut session = self
            .transport
            .open(&self.address)
            .await
            .map_err(|source| SessionError::Open {
                address: self.address.clone(),
                source,
            })?;

        match self.drive(&mut session, &mut report).await {
            Ok(()) => {
                session.close().await.map_err(SessionError::transport("close"))?;
            }
            Err(err) => {
                if let Err(close_err) = session.close().await {
                    warn!(error = %close_err, "close after fault failed");
                }
                return Err(err);
            }
        }

        info!(
            address = %self.address,
            request = %report.request,
            decision = ?report.decision,
            frames_received = report.frames_received,
            frames_decoded = report.frames_decoded,
            metrics_changed = report.metrics_changed,
            persist_failures = report.persist_failures,
            "run complete"
        );
        Ok(report)
    }

    async fn drive(
        &mut self,
        session: &mut T::Session,
        report: &mut RunReport,
    ) -> Result<(), SessionError> {
        let mut notifications = session
            .subscribe(CHARACTERISTIC_UUID)
            .await
            .map_err(SessionError::transport("subscribe"))?;

        report.request = self.intent.read_request().await;
        report.decision = decide(report.request, self.cache.load_on());
        if let Some(command) = report.decision.command() {
            info!(request = %report.request, observed = ?self.cache.load_on(), "toggling load");
            send_command(session, command).await?;
            self.drain_for(&mut notifications, SETTLE_DELAY, report).await;
        }

        self.drain_for(&mut notifications, PRE_QUERY_DELAY, report).await;
        for (command, delay) in Command::QUERIES.into_iter().zip(QUERY_DELAYS) {
            send_command(session, command).await?;
            self.drain_for(&mut notifications, delay, report).await;
        }

        session
            .unsubscribe(CHARACTERISTIC_UUID)
            .await
            .map_err(SessionError::transport("unsubscribe"))?;
        while let Ok(frame) = notifications.try_recv() {
            self.handle_frame(&frame, report).await;
        }
        Ok(())
    }

    /// Handles notifications until `window` has elapsed. A closed channel
    /// does not shorten the window.
    async fn drain_for(
        &mut self,
        notifications: &mut mpsc::Receiver<Vec<u8>>,
        window: Duration,
        report: &mut RunReport,
    ) {
        let deadline = sleep(window);
        tokio::pin!(deadline);
        let mut open = true;

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                frame = notifications.recv(), if open => match frame {
                    Some(frame) => self.handle_frame(&frame, report).await,
                    None => open = false,
                },
            }
        }
    }

    async fn handle_frame(&mut self, frame: &[u8], report: &mut RunReport) {
        report.frames_received += 1;
        counter!("solar_frames_received_total").increment(1);
        if !protocol::has_valid_checksum(frame) {
            debug!(len = frame.len(), "frame checksum mismatch");
        }

        let updates = protocol::decode(frame);
        if updates.is_empty() {
            return;
        }
        report.frames_decoded += 1;
        counter!("solar_frames_decoded_total").increment(1);

        for (metric, value) in updates {
            record_gauge(metric, &value);
            if !self.cache.apply_if_changed(metric, value.clone()) {
                continue;
            }
            report.metrics_changed += 1;
            let text = value.to_string();
            debug!(%metric, value = %text, "metric changed");
            if let Err(err) = self.store.write(metric, &text).await {
                warn!(%metric, error = %err, "metric persist failed");
                report.persist_failures += 1;
                counter!("solar_store_write_failures_total").increment(1);
            }
        }
    }
}

async fn send_command<S: Session>(session: &mut S, command: Command) -> Result<(), SessionError> {
    session
        .write_command(CHARACTERISTIC_UUID, command.bytes())
        .await
        .map_err(SessionError::transport(command.label()))?;
    counter!("solar_commands_written_total", "command" => command.label()).increment(1);
    debug!(command = command.label(), "command written");
    Ok(())
}

fn record_gauge(metric: Metric, value: &MetricValue) {
    let reading = match value {
        MetricValue::Number(number) => *number,
        MetricValue::Flag(flag) => f64::from(u8::from(*flag)),
        MetricValue::Text(_) => return,
    };
    gauge!("solar_metric", "metric" => metric.name()).set(reading);
}
