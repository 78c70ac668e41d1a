use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use ble_client::BleTransport;
use controller_app::{
    open_store, run_forever, CliArgs, ControllerConfig, MetricsTextfile, SystemdWatchdog,
};
use session::ControllerSession;
use state_store::{FileLoadIntent, IntentSignal};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = CliArgs::parse_from(env::args().skip(1)).context("invalid arguments")?;
    let config = ControllerConfig::load_with_path(args.config.clone()).context("load config failed")?;
    config.validate().context("config validation failed")?;

    let metrics = config
        .metrics_textfile
        .as_deref()
        .map(|path| MetricsTextfile::install(path))
        .transpose()?;

    let store = open_store(&config.store).await;
    let intent = match args.load {
        Some(request) => {
            info!(%request, "load request from command line");
            IntentSignal::Fixed(request)
        }
        None => IntentSignal::File(FileLoadIntent::new(&config.load_intent_path)),
    };

    let transport = BleTransport::new(config.client.clone());
    let mut session = ControllerSession::new(transport, store, intent, config.address.clone());

    match config.run_interval_ms {
        Some(interval_ms) if !args.once => {
            let stats = run_forever(
                &mut session,
                Duration::from_millis(interval_ms),
                &SystemdWatchdog::from_env(),
                metrics.as_ref(),
                shutdown_signal(),
            )
            .await;
            info!(runs = stats.runs, failures = stats.failures, "controller stopped");
            Ok(())
        }
        _ => {
            let outcome = session.run().await;
            if let Some(metrics) = &metrics {
                metrics.export().await;
            }
            outcome.context("controller run failed")?;
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "ctrl-c handler unavailable, running until killed");
        std::future::pending::<()>().await;
    }
}
