//! Backplane Configuration System
//!
//! TOML-based configuration with environment variable overrides. Every
//! section defaults sensibly so an empty file (or no file) is a valid setup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub staging: StagingConfig,
    pub ingestion: IngestionConfig,
    pub disk: DiskConfig,
    pub recoverability: RecoverabilityConfig,
    pub store: StoreConfig,
    pub metrics: MetricsConfig,

    /// Root directory for local state (staging, bodies, embedded database)
    pub data_dir: DataDir,
}

/// Wrapper so the data directory has its own default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataDir(pub PathBuf);

impl Default for DataDir {
    fn default() -> Self {
        Self(PathBuf::from("./data"))
    }
}

/// Staging cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    /// Subdirectory of `data_dir` holding staged record files
    pub directory: String,
    /// Subdirectory of `data_dir` holding claim-checked message bodies
    pub body_directory: String,
    /// Largest stored body (bytes) inlined into the audit record
    pub max_body_size_to_inline: i32,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            directory: "staging".to_string(),
            body_directory: "bodies".to_string(),
            max_body_size_to_inline: 100 * 1024,
        }
    }
}

/// Batch ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    pub batch_size: usize,
    pub concurrent_batches: usize,
    /// Delay before re-listing when a cycle found no work
    pub idle_delay_ms: u64,
    /// Rolling window of the repeated-failure circuit breaker
    pub circuit_breaker_window_secs: u64,
    /// Failures inside the window that trip the breaker
    pub circuit_breaker_threshold: u32,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            batch_size: 128,
            concurrent_batches: 5,
            idle_delay_ms: 1000,
            circuit_breaker_window_secs: 120,
            circuit_breaker_threshold: 5,
        }
    }
}

impl IngestionConfig {
    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }

    pub fn circuit_breaker_window(&self) -> Duration {
        Duration::from_secs(self.circuit_breaker_window_secs)
    }
}

/// Disk space gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    pub check_interval_secs: u64,
    /// Ingestion pauses when free space drops below this percentage
    pub minimum_free_percentage: f64,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 5,
            minimum_free_percentage: 5.0,
        }
    }
}

impl DiskConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

/// Recoverability store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoverabilityConfig {
    pub max_processing_attempts: usize,
    /// Optimistic-concurrency retries before a merge is reported as failed
    pub max_merge_retries: u32,
}

impl Default for RecoverabilityConfig {
    fn default() -> Self {
        Self {
            max_processing_attempts: 10,
            max_merge_retries: 32,
        }
    }
}

/// Durable store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend: memory, sqlite
    pub backend: String,
    /// Connection URL for the sqlite backend
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            url: "sqlite://./data/backplane.db?mode=rwc".to_string(),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub report_interval_secs: u64,
    /// Port for the Prometheus exporter; disabled when unset
    pub prometheus_port: Option<u16>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            report_interval_secs: 60,
            prometheus_port: None,
        }
    }
}

impl MetricsConfig {
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn staging_path(&self) -> PathBuf {
        self.data_dir.0.join(&self.staging.directory)
    }

    pub fn body_path(&self) -> PathBuf {
        self.data_dir.0.join(&self.staging.body_directory)
    }

    /// Reject settings the runtime cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

        if self.ingestion.batch_size == 0 || self.ingestion.concurrent_batches == 0 {
            return invalid("ingestion.batch_size and concurrent_batches must be greater than zero".into());
        }
        if self.ingestion.circuit_breaker_threshold == 0 || self.recoverability.max_processing_attempts == 0 {
            return invalid("circuit_breaker_threshold and max_processing_attempts must be greater than zero".into());
        }
        if !(0.0..=100.0).contains(&self.disk.minimum_free_percentage) {
            return invalid(format!(
                "disk.minimum_free_percentage must be within 0-100, got {}",
                self.disk.minimum_free_percentage
            ));
        }
        match self.store.backend.as_str() {
            "memory" | "sqlite" => Ok(()),
            other => invalid(format!("unknown store.backend '{}'", other)),
        }
    }
}
