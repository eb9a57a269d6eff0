//! Layered configuration for `server_pulse` and `pulse_watch`.
//!
//! Each binary resolves its config as compiled defaults <- JSON file <-
//! environment / CLI (clap reads both). Every field is optional so that any
//! layer can leave a value to the one below it; `settings()` then produces
//! the concrete values the process runs with.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Outcome of reading the optional config file, reported once logging is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileLayer {
    Loaded(PathBuf),
    Missing(PathBuf),
    Invalid(PathBuf, String),
}

impl FileLayer {
    pub fn log(&self) {
        match self {
            FileLayer::Loaded(path) => tracing::info!("Loaded config file {}", path.display()),
            FileLayer::Missing(path) => tracing::info!(
                "Config file not found at {}. Using defaults and environment/CLI variables.",
                path.display()
            ),
            FileLayer::Invalid(path, reason) => tracing::warn!(
                "Failed to read config file {}: {}. Falling back to other sources.",
                path.display(),
                reason
            ),
        }
    }
}

fn read_file_layer<C: DeserializeOwned>(path: &Path) -> (Option<C>, FileLayer) {
    if !path.exists() {
        return (None, FileLayer::Missing(path.to_path_buf()));
    }
    let parsed = fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|text| serde_json::from_str::<C>(&text).map_err(|e| e.to_string()));
    match parsed {
        Ok(config) => (Some(config), FileLayer::Loaded(path.to_path_buf())),
        Err(reason) => (None, FileLayer::Invalid(path.to_path_buf(), reason)),
    }
}

// --- Producer ---

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Operational event stream producer", version)]
#[serde(rename_all = "camelCase")]
pub struct ProducerConfig {
    #[clap(long, env = "PULSE_PORT", help = "Port for the snapshot and push gateway.")]
    pub port: Option<u16>,

    #[clap(long, env = "PULSE_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "PULSE_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "PULSE_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "PULSE_TICK_INTERVAL_MS", help = "Milliseconds between emitter ticks.")]
    pub tick_interval_ms: Option<u64>,

    #[clap(long, env = "PULSE_FAULT_RATE", help = "Probability that a tick emits a simulated fault.")]
    pub fault_rate: Option<f64>,

    #[clap(long, env = "PULSE_ANOMALY_RATE", help = "Probability that a non-fault tick emits an anomaly.")]
    pub anomaly_rate: Option<f64>,

    #[clap(long, env = "PULSE_REQUEST_FAULT_RATE", help = "Probability that a snapshot request answers 500.")]
    pub request_fault_rate: Option<f64>,

    #[clap(long, env = "PULSE_SEED_EVENTS", help = "Number of timeline events to seed.")]
    pub seed_events: Option<usize>,

    #[clap(long, env = "PULSE_SEED_ANOMALIES", help = "Number of anomalies to seed.")]
    pub seed_anomalies: Option<usize>,
}

/// Resolved producer settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerSettings {
    pub port: u16,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub tick_interval: Duration,
    pub fault_rate: f64,
    pub anomaly_rate: f64,
    pub request_fault_rate: f64,
    pub seed_events: usize,
    pub seed_anomalies: usize,
}

impl ProducerConfig {
    /// `other` overrides `self` wherever it has a value.
    pub fn merge(self, other: ProducerConfig) -> ProducerConfig {
        ProducerConfig {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            tick_interval_ms: other.tick_interval_ms.or(self.tick_interval_ms),
            fault_rate: other.fault_rate.or(self.fault_rate),
            anomaly_rate: other.anomaly_rate.or(self.anomaly_rate),
            request_fault_rate: other.request_fault_rate.or(self.request_fault_rate),
            seed_events: other.seed_events.or(self.seed_events),
            seed_anomalies: other.seed_anomalies.or(self.seed_anomalies),
        }
    }

    pub fn defaults() -> ProducerConfig {
        ProducerConfig {
            port: Some(3000),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            tick_interval_ms: Some(15_000),
            fault_rate: Some(0.05),
            anomaly_rate: Some(0.30),
            request_fault_rate: Some(0.05),
            seed_events: Some(20),
            seed_anomalies: Some(2),
            config_path: None,
        }
    }

    pub fn settings(&self) -> ProducerSettings {
        let d = ProducerConfig::defaults();
        ProducerSettings {
            port: self.port.or(d.port).unwrap_or(3000),
            log_dir: self.log_dir.clone().or(d.log_dir).unwrap_or_default(),
            log_level: self.log_level.clone().or(d.log_level).unwrap_or_default(),
            tick_interval: Duration::from_millis(self.tick_interval_ms.or(d.tick_interval_ms).unwrap_or(15_000).max(1)),
            fault_rate: self.fault_rate.or(d.fault_rate).unwrap_or_default(),
            anomaly_rate: self.anomaly_rate.or(d.anomaly_rate).unwrap_or_default(),
            request_fault_rate: self.request_fault_rate.or(d.request_fault_rate).unwrap_or_default(),
            seed_events: self.seed_events.or(d.seed_events).unwrap_or_default(),
            seed_anomalies: self.seed_anomalies.or(d.seed_anomalies).unwrap_or_default(),
        }
    }
}

/// Resolves the producer config from `cli` (already parsed, env included).
pub fn resolve_producer(cli: ProducerConfig) -> (ProducerConfig, FileLayer) {
    let path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("server_pulse.conf"));
    let (file, layer) = read_file_layer::<ProducerConfig>(&path);
    let config = ProducerConfig::defaults()
        .merge(file.unwrap_or_default())
        .merge(cli);
    (config, layer)
}

/// Parses the command line and layers it over the config file and defaults.
pub fn load_producer_config() -> (ProducerConfig, FileLayer) {
    resolve_producer(ProducerConfig::parse())
}

// --- Watcher ---

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Operational event stream watcher", version)]
#[serde(rename_all = "camelCase")]
pub struct WatchConfig {
    #[clap(long, env = "PULSE_WATCH_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "PULSE_WATCH_API_URL", help = "Base URL of the producer's snapshot API.")]
    pub api_url: Option<String>,

    #[clap(long, env = "PULSE_WATCH_PUSH_URL", help = "Websocket URL of the producer's push channel.")]
    pub push_url: Option<String>,

    #[clap(long, env = "PULSE_WATCH_CACHE", help = "Cache location: a directory, a redis:// URL, or memory:.")]
    pub cache: Option<String>,

    #[clap(long, env = "PULSE_WATCH_CACHE_EVENTS_CAP", help = "Newest events kept in the cache.")]
    pub cache_events_cap: Option<usize>,

    #[clap(long, env = "PULSE_WATCH_CACHE_ANOMALIES_CAP", help = "Newest anomalies kept in the cache.")]
    pub cache_anomalies_cap: Option<usize>,

    #[clap(long, env = "PULSE_WATCH_FETCH_RETRIES", help = "Retries per snapshot fetch.")]
    pub fetch_retries: Option<u32>,

    #[clap(long, env = "PULSE_WATCH_FETCH_TIMEOUT_SECONDS", help = "Timeout per snapshot fetch attempt.")]
    pub fetch_timeout_seconds: Option<u64>,

    #[clap(long, env = "PULSE_WATCH_RECONNECT_DELAY_MS", help = "Delay before reconnecting a dropped push channel.")]
    pub reconnect_delay_ms: Option<u64>,

    #[clap(long, env = "PULSE_WATCH_RENDER_INTERVAL_SECONDS", help = "Seconds between dashboard redraws.")]
    pub render_interval_seconds: Option<u64>,

    #[clap(long, env = "PULSE_WATCH_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "PULSE_WATCH_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,
}

/// Resolved watcher settings.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchSettings {
    pub api_url: String,
    pub push_url: String,
    pub cache: String,
    pub cache_events_cap: usize,
    pub cache_anomalies_cap: usize,
    pub fetch_retries: u32,
    pub fetch_timeout: Duration,
    pub reconnect_delay: Duration,
    pub render_interval: Duration,
    pub log_dir: PathBuf,
    pub log_level: String,
}

impl WatchConfig {
    pub fn merge(self, other: WatchConfig) -> WatchConfig {
        WatchConfig {
            config_path: other.config_path.or(self.config_path),
            api_url: other.api_url.or(self.api_url),
            push_url: other.push_url.or(self.push_url),
            cache: other.cache.or(self.cache),
            cache_events_cap: other.cache_events_cap.or(self.cache_events_cap),
            cache_anomalies_cap: other.cache_anomalies_cap.or(self.cache_anomalies_cap),
            fetch_retries: other.fetch_retries.or(self.fetch_retries),
            fetch_timeout_seconds: other.fetch_timeout_seconds.or(self.fetch_timeout_seconds),
            reconnect_delay_ms: other.reconnect_delay_ms.or(self.reconnect_delay_ms),
            render_interval_seconds: other.render_interval_seconds.or(self.render_interval_seconds),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
        }
    }

    pub fn defaults() -> WatchConfig {
        WatchConfig {
            config_path: None,
            api_url: Some("http://127.0.0.1:3000/".to_string()),
            push_url: Some("ws://127.0.0.1:3000/ws".to_string()),
            cache: Some("./cache".to_string()),
            cache_events_cap: Some(100),
            cache_anomalies_cap: Some(50),
            fetch_retries: Some(1),
            fetch_timeout_seconds: Some(10),
            reconnect_delay_ms: Some(5000),
            render_interval_seconds: Some(5),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
        }
    }

    pub fn settings(&self) -> WatchSettings {
        let d = WatchConfig::defaults();
        WatchSettings {
            api_url: self.api_url.clone().or(d.api_url).unwrap_or_default(),
            push_url: self.push_url.clone().or(d.push_url).unwrap_or_default(),
            cache: self.cache.clone().or(d.cache).unwrap_or_default(),
            cache_events_cap: self.cache_events_cap.or(d.cache_events_cap).unwrap_or(100),
            cache_anomalies_cap: self.cache_anomalies_cap.or(d.cache_anomalies_cap).unwrap_or(50),
            fetch_retries: self.fetch_retries.or(d.fetch_retries).unwrap_or(1),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_seconds.or(d.fetch_timeout_seconds).unwrap_or(10)),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms.or(d.reconnect_delay_ms).unwrap_or(5000)),
            render_interval: Duration::from_secs(self.render_interval_seconds.or(d.render_interval_seconds).unwrap_or(5).max(1)),
            log_dir: self.log_dir.clone().or(d.log_dir).unwrap_or_default(),
            log_level: self.log_level.clone().or(d.log_level).unwrap_or_default(),
        }
    }
}

/// Layers `cli` over the file named by `--config` (or "pulse_watch.conf")
/// and the built-in defaults. The returned `FileLayer` says what happened to
/// the file so it can be logged once logging is up.
pub fn resolve_watch(cli: WatchConfig) -> (WatchConfig, FileLayer) {
    let path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("pulse_watch.conf"));
    let (file, layer) = read_file_layer::<WatchConfig>(&path);
    let config = WatchConfig::defaults()
        .merge(file.unwrap_or_default())
        .merge(cli);
    (config, layer)
}

pub fn load_watch_config() -> (WatchConfig, FileLayer) {
    resolve_watch(WatchConfig::parse())
}
