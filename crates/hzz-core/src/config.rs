//! Configuration system for the pipeline.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $HZZ_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/hzz/config.toml
//!   3. ~/.config/hzz/config.toml

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::{Period, SampleCatalog};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub broker: BrokerConfig,
    pub dataset: DatasetConfig,
    pub producer: ProducerConfig,
    pub worker: WorkerConfig,
    pub collector: CollectorConfig,
    pub logging: LoggingConfig,
    pub catalog: SampleCatalog,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Base URL of the broker daemon, used by producer, workers and collector.
    pub url: String,
    /// Address the broker daemon binds.
    pub bind: String,
    /// Port the broker daemon listens on.
    pub port: u16,
    /// Fixed delay between connection attempts.
    pub retry_delay_secs: u64,
    /// SQLite journal for durable queues. Empty = in-memory only.
    pub journal_path: PathBuf,
    /// A consumer channel idle for longer than this is closed and its unacked
    /// deliveries are requeued.
    pub channel_lease_secs: u64,
    /// Upper bound on a single long-poll receive.
    pub receive_wait_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Directory holding `Data/` and `MC/` sample files.
    pub root: PathBuf,
    /// Variant metadata file (cross-sections, sums of weights, dataset ids).
    pub metadata_path: PathBuf,
    /// Data-taking period.
    pub period: Period,
    /// Expected worker count; each dataset is split into this many chunks.
    pub consumers: u32,
    /// Upper bound on records per chunk. 0 = no bound.
    pub max_chunk_records: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// Task publishes per second. 0 = unlimited.
    pub publish_rate: u32,
    /// Publishes allowed back-to-back before the rate applies.
    pub publish_burst: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Unacknowledged deliveries a worker may hold at once.
    pub prefetch: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Directory the histogram artifact is written to.
    pub output_dir: PathBuf,
    /// Ask the broker daemon to exit once the run is exported.
    pub stop_broker: bool,
    /// Log a warning when no message arrives for this long. 0 = never.
    pub stall_warning_secs: u64,
    pub histogram: HistogramSettings,
}

/// Mass histogram binning, in GeV.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistogramSettings {
    pub min_gev: f64,
    pub max_gev: f64,
    pub step_gev: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Verbose logging (info level) when no RUST_LOG is set.
    pub debug: bool,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:9100".to_string(),
            bind: "127.0.0.1".to_string(),
            port: 9100,
            retry_delay_secs: 5,
            journal_path: data_dir().join("broker.sqlite3"),
            channel_lease_secs: 300,
            receive_wait_ms: 1000,
        }
    }
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("samples"),
            metadata_path: config_dir().join("infofile.toml"),
            period: Period::A,
            consumers: 1,
            max_chunk_records: 0,
        }
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            publish_rate: 0,
            publish_burst: 32,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { prefetch: 1 }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("logs"),
            stop_broker: false,
            stall_warning_secs: 60,
            histogram: HistogramSettings::default(),
        }
    }
}

impl Default for HistogramSettings {
    fn default() -> Self {
        Self {
            min_gev: 80.0,
            max_gev: 250.0,
            step_gev: 5.0,
        }
    }
}

// ── Accessors ─────────────────────────────────────────────────────────────────

impl BrokerConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn channel_lease(&self) -> Duration {
        Duration::from_secs(self.channel_lease_secs)
    }

    pub fn receive_wait(&self) -> Duration {
        Duration::from_millis(self.receive_wait_ms)
    }
}

impl DatasetConfig {
    /// Consumer count, never zero.
    pub fn consumers(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.consumers as usize).unwrap_or(NonZeroUsize::MIN)
    }

    /// Per-chunk record bound, if any.
    pub fn max_chunk_records(&self) -> Option<NonZeroUsize> {
        NonZeroUsize::new(self.max_chunk_records as usize)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

pub fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("hzz")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("hzz")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl PipelineConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            PipelineConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("HZZ_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&PipelineConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply overrides from the process environment.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`. Unparseable values are ignored.
    ///
    /// `NUM_CONSUMERS`, `DATASET` and `DEBUG` keep the names the deployment
    /// scripts already export; everything else is `HZZ_<SECTION>__<FIELD>`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("NUM_CONSUMERS") {
            if let Ok(n) = v.trim().parse() {
                self.dataset.consumers = n;
            }
        }
        if let Some(v) = lookup("DATASET") {
            if let Ok(p) = v.parse() {
                self.dataset.period = p;
            }
        }
        if let Some(v) = lookup("DEBUG") {
            self.logging.debug = truthy(&v);
        }
        if let Some(v) = lookup("HZZ_BROKER__URL") {
            self.broker.url = v;
        }
        if let Some(v) = lookup("HZZ_BROKER__PORT") {
            if let Ok(p) = v.parse() {
                self.broker.port = p;
            }
        }
        if let Some(v) = lookup("HZZ_BROKER__JOURNAL_PATH") {
            self.broker.journal_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("HZZ_DATASET__ROOT") {
            self.dataset.root = PathBuf::from(v);
        }
        if let Some(v) = lookup("HZZ_DATASET__METADATA") {
            self.dataset.metadata_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("HZZ_DATASET__MAX_CHUNK_RECORDS") {
            if let Ok(n) = v.parse() {
                self.dataset.max_chunk_records = n;
            }
        }
        if let Some(v) = lookup("HZZ_COLLECTOR__OUTPUT_DIR") {
            self.collector.output_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("HZZ_COLLECTOR__STOP_BROKER") {
            self.collector.stop_broker = truthy(&v);
        }
    }
}

fn truthy(v: &str) -> bool {
    v.eq_ignore_ascii_case("true") || v == "1"
}
