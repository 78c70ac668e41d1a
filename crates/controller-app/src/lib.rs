mod config;
mod runtime;

use anyhow::Result;
use types::LoadRequest;

pub use config::{ControllerConfig, StoreBackend, StoreConfig};
pub use runtime::{
    open_store, run_forever, LoopStats, MetricsTextfile, SystemdWatchdog, Watchdog,
};

/// Command line options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliArgs {
    pub config: Option<String>,
    /// Overrides the intent file for this invocation.
    pub load: Option<LoadRequest>,
    /// Run once even when an interval is configured.
    pub once: bool,
}

impl CliArgs {
    pub fn parse_from<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Self::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            if arg == "--once" {
                parsed.once = true;
            } else if arg == "--config" {
                parsed.config = args.next();
            } else if let Some(path) = arg.strip_prefix("--config=") {
                parsed.config = Some(path.to_string());
            } else if arg == "--load" {
                parsed.load = Some(parse_load(args.next().as_deref())?);
            } else if let Some(value) = arg.strip_prefix("--load=") {
                parsed.load = Some(parse_load(Some(value))?);
            } else {
                anyhow::bail!("unknown argument {arg:?}");
            }
        }
        Ok(parsed)
    }
}

fn parse_load(value: Option<&str>) -> Result<LoadRequest> {
    match value {
        Some("on") => Ok(LoadRequest::TurnOn),
        Some("off") => Ok(LoadRequest::TurnOff),
        other => anyhow::bail!("--load expects on or off, got {other:?}"),
    }
}
