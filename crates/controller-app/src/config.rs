use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::Deserialize;

use ble_client::ClientConfig;
use session::DEFAULT_ADDRESS;

const DEFAULT_STORE_DIR: &str = "/tmp";
const DEFAULT_SQLITE_PATH: &str = "solar-state.sqlite";
const DEFAULT_LOAD_INTENT_PATH: &str = "/tmp/load_action";
/// A run with a load toggle takes about nine seconds.
const MIN_RUN_INTERVAL_MS: u64 = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Files,
    Sqlite,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "files" => Ok(StoreBackend::Files),
            "sqlite" => Ok(StoreBackend::Sqlite),
            "memory" => Ok(StoreBackend::Memory),
            other => anyhow::bail!("unknown store backend {other:?} (expected files, sqlite or memory)"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Directory holding one file per metric for the `files` backend.
    pub dir: String,
    pub sqlite_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Files,
            dir: DEFAULT_STORE_DIR.to_string(),
            sqlite_path: DEFAULT_SQLITE_PATH.to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ControllerConfig {
    pub address: String,
    pub client: ClientConfig,
    pub store: StoreConfig,
    pub load_intent_path: String,
    /// Absent means a single run per invocation.
    pub run_interval_ms: Option<u64>,
    pub metrics_textfile: Option<String>,
}

impl ControllerConfig {
    pub fn load() -> Result<Self> {
        Self::load_with_path(None)
    }

    pub fn load_with_path(config_path: Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(file_config) = load_file_config(config_path.as_deref())? {
            apply_file_config(&mut config, file_config);
        }

        apply_env_overrides(&mut config)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_address(&self.address)?;
        if self.client.scan_timeout_ms == 0 {
            anyhow::bail!("device.scan_timeout_ms must be >= 1");
        }
        if self.client.connect_timeout_ms == 0 {
            anyhow::bail!("device.connect_timeout_ms must be >= 1");
        }
        if self.client.write_timeout_ms == 0 {
            anyhow::bail!("device.write_timeout_ms must be >= 1");
        }
        if self.client.channel_capacity == 0 {
            anyhow::bail!("device.channel_capacity must be >= 1");
        }
        match self.store.backend {
            StoreBackend::Files if self.store.dir.trim().is_empty() => {
                anyhow::bail!("store.dir must be non-empty for the files backend");
            }
            StoreBackend::Sqlite if self.store.sqlite_path.trim().is_empty() => {
                anyhow::bail!("store.sqlite_path must be non-empty for the sqlite backend");
            }
            _ => {}
        }
        if self.load_intent_path.trim().is_empty() {
            anyhow::bail!("load.intent_path must be non-empty");
        }
        if let Some(interval) = self.run_interval_ms {
            if interval < MIN_RUN_INTERVAL_MS {
                anyhow::bail!("run.interval_ms must be >= {MIN_RUN_INTERVAL_MS}");
            }
        }
        if let Some(ref path) = self.metrics_textfile {
            if path.trim().is_empty() {
                anyhow::bail!("run.metrics_textfile must be non-empty when set");
            }
        }

        Ok(())
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            client: ClientConfig::default(),
            store: StoreConfig::default(),
            load_intent_path: DEFAULT_LOAD_INTENT_PATH.to_string(),
            run_interval_ms: None,
            metrics_textfile: None,
        }
    }
}

fn apply_env_overrides(config: &mut ControllerConfig) -> Result<()> {
    if let Ok(value) = env::var("SOLAR_ADDRESS") {
        config.address = value;
    }

    if let Some(timeout_ms) = parse_env_u64("SOLAR_SCAN_TIMEOUT_MS") {
        config.client.scan_timeout_ms = timeout_ms;
    }

    if let Some(timeout_ms) = parse_env_u64("SOLAR_CONNECT_TIMEOUT_MS") {
        config.client.connect_timeout_ms = timeout_ms;
    }

    if let Some(timeout_ms) = parse_env_u64("SOLAR_WRITE_TIMEOUT_MS") {
        config.client.write_timeout_ms = timeout_ms;
    }

    config.client.channel_capacity =
        parse_env_usize("SOLAR_CHANNEL_CAPACITY").unwrap_or(config.client.channel_capacity);

    if let Ok(value) = env::var("SOLAR_STORE_BACKEND") {
        config.store.backend = value.parse().context("SOLAR_STORE_BACKEND")?;
    }

    if let Ok(value) = env::var("SOLAR_STORE_DIR") {
        config.store.dir = value;
    }

    if let Ok(value) = env::var("SOLAR_STORE_SQLITE_PATH") {
        config.store.sqlite_path = value;
    }

    if let Ok(value) = env::var("SOLAR_LOAD_INTENT_PATH") {
        config.load_intent_path = value;
    }

    config.run_interval_ms = parse_env_u64("SOLAR_RUN_INTERVAL_MS").or(config.run_interval_ms);
    config.metrics_textfile = env::var("SOLAR_METRICS_TEXTFILE")
        .ok()
        .or(config.metrics_textfile.take());

    Ok(())
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    device: Option<FileDeviceConfig>,
    store: Option<FileStoreConfig>,
    load: Option<FileLoadConfig>,
    run: Option<FileRunConfig>,
}

#[derive(Debug, Deserialize)]
struct FileDeviceConfig {
    address: Option<String>,
    scan_timeout_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    write_timeout_ms: Option<u64>,
    channel_capacity: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct FileStoreConfig {
    backend: Option<StoreBackend>,
    dir: Option<String>,
    sqlite_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileLoadConfig {
    intent_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileRunConfig {
    interval_ms: Option<u64>,
    metrics_textfile: Option<String>,
}

fn load_file_config(config_path: Option<&str>) -> Result<Option<FileConfig>> {
    let path = match config_path {
        Some(path) => path.to_string(),
        None => match env::var("SOLAR_CONFIG") {
            Ok(value) => value,
            Err(_) => return Ok(None),
        },
    };

    let content = fs::read_to_string(&path)
        .with_context(|| format!("read config file {path}"))?;
    let ext = Path::new(&path).extension().and_then(|value| value.to_str());

    let config = match ext {
        Some("json") => serde_json::from_str(&content).context("parse json config")?,
        _ => toml::from_str(&content).context("parse toml config")?,
    };

    Ok(Some(config))
}

fn apply_file_config(config: &mut ControllerConfig, file: FileConfig) {
    if let Some(device) = file.device {
        if let Some(address) = device.address {
            config.address = address;
        }
        if let Some(timeout) = device.scan_timeout_ms {
            config.client.scan_timeout_ms = timeout;
        }
        if let Some(timeout) = device.connect_timeout_ms {
            config.client.connect_timeout_ms = timeout;
        }
        if let Some(timeout) = device.write_timeout_ms {
            config.client.write_timeout_ms = timeout;
        }
        if let Some(capacity) = device.channel_capacity {
            config.client.channel_capacity = capacity;
        }
    }

    if let Some(store) = file.store {
        if let Some(backend) = store.backend {
            config.store.backend = backend;
        }
        if let Some(dir) = store.dir {
            config.store.dir = dir;
        }
        if let Some(path) = store.sqlite_path {
            config.store.sqlite_path = path;
        }
    }

    if let Some(load) = file.load {
        if let Some(path) = load.intent_path {
            config.load_intent_path = path;
        }
    }

    if let Some(run) = file.run {
        if let Some(interval) = run.interval_ms {
            config.run_interval_ms = Some(interval);
        }
        if let Some(path) = run.metrics_textfile {
            config.metrics_textfile = Some(path);
        }
    }
}

fn parse_env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn parse_env_usize(key: &str) -> Option<usize> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

/// Accepts the colon-separated form `AA:BB:CC:DD:EE:FF`.
fn validate_address(value: &str) -> Result<()> {
    let octets: Vec<&str> = value.split(':').collect();
    if octets.len() != 6
        || octets
            .iter()
            .any(|octet| octet.len() != 2 || u8::from_str_radix(octet, 16).is_err())
    {
        anyhow::bail!("device.address must look like AA:BB:CC:DD:EE:FF");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_validation() {
        assert!(validate_address("00:11:22:33:44:55").is_ok());
        assert!(validate_address("aa:BB:cc:DD:ee:FF").is_ok());
        assert!(validate_address("00:11:22:33:44").is_err());
        assert!(validate_address("00-11-22-33-44-55").is_err());
        assert!(validate_address("00:11:22:33:44:5G").is_err());
        assert!(validate_address("000:11:22:33:44:5").is_err());
    }

    #[test]
    fn backend_parse() {
        assert_eq!("Files".parse::<StoreBackend>().unwrap(), StoreBackend::Files);
        assert_eq!("sqlite".parse::<StoreBackend>().unwrap(), StoreBackend::Sqlite);
        assert!("redis".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn defaults_validate() {
        ControllerConfig::default().validate().expect("defaults valid");
    }

    #[test]
    fn toml_sections_apply() {
        let file: FileConfig = toml::from_str(
            r#"
            [device]
            address = "AA:BB:CC:DD:EE:FF"

            [store]
            backend = "sqlite"
            sqlite_path = "/var/lib/solar/state.sqlite"

            [run]
            interval_ms = 60000
            "#,
        )
        .expect("parse");
        let mut config = ControllerConfig::default();
        apply_file_config(&mut config, file);

        assert_eq!(config.address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.store.sqlite_path, "/var/lib/solar/state.sqlite");
        assert_eq!(config.store.dir, DEFAULT_STORE_DIR);
        assert_eq!(config.run_interval_ms, Some(60_000));
        assert_eq!(config.load_intent_path, DEFAULT_LOAD_INTENT_PATH);
    }
}
