//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError, DataDir};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "backplane.toml",
    "config.toml",
    "./config/backplane.toml",
    "/etc/backplane/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        apply_env_overrides(&mut config, |key| env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("BACKPLANE_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_into<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) {
    if let Some(val) = lookup(key) {
        match val.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(key, value = %val, "Ignoring unparseable environment override"),
        }
    }
}

/// Apply `BACKPLANE_*` overrides. The lookup is injected so tests need not
/// touch the process environment.
pub(crate) fn apply_env_overrides(config: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    // General
    if let Some(val) = lookup("BACKPLANE_DATA_DIR") {
        config.data_dir = DataDir(PathBuf::from(val));
    }

    // Staging
    if let Some(val) = lookup("BACKPLANE_STAGING_DIRECTORY") {
        config.staging.directory = val;
    }
    if let Some(val) = lookup("BACKPLANE_BODY_DIRECTORY") {
        config.staging.body_directory = val;
    }
    parse_into(&lookup, "BACKPLANE_MAX_BODY_SIZE_TO_INLINE", &mut config.staging.max_body_size_to_inline);

    // Ingestion
    parse_into(&lookup, "BACKPLANE_INGESTION_BATCH_SIZE", &mut config.ingestion.batch_size);
    parse_into(&lookup, "BACKPLANE_INGESTION_CONCURRENT_BATCHES", &mut config.ingestion.concurrent_batches);
    parse_into(&lookup, "BACKPLANE_INGESTION_IDLE_DELAY_MS", &mut config.ingestion.idle_delay_ms);
    parse_into(&lookup, "BACKPLANE_CIRCUIT_BREAKER_WINDOW_SECS", &mut config.ingestion.circuit_breaker_window_secs);
    parse_into(&lookup, "BACKPLANE_CIRCUIT_BREAKER_THRESHOLD", &mut config.ingestion.circuit_breaker_threshold);

    // Disk
    parse_into(&lookup, "BACKPLANE_DISK_CHECK_INTERVAL_SECS", &mut config.disk.check_interval_secs);
    parse_into(&lookup, "BACKPLANE_MINIMUM_FREE_PERCENTAGE", &mut config.disk.minimum_free_percentage);

    // Recoverability
    parse_into(&lookup, "BACKPLANE_MAX_PROCESSING_ATTEMPTS", &mut config.recoverability.max_processing_attempts);
    parse_into(&lookup, "BACKPLANE_MAX_MERGE_RETRIES", &mut config.recoverability.max_merge_retries);

    // Store
    if let Some(val) = lookup("BACKPLANE_STORE_BACKEND") {
        config.store.backend = val;
    }
    if let Some(val) = lookup("BACKPLANE_STORE_URL") {
        config.store.url = val;
    }

    // Metrics
    parse_into(&lookup, "BACKPLANE_METRICS_ENABLED", &mut config.metrics.enabled);
    parse_into(&lookup, "BACKPLANE_METRICS_REPORT_INTERVAL_SECS", &mut config.metrics.report_interval_secs);
    if let Some(val) = lookup("BACKPLANE_PROMETHEUS_PORT") {
        match val.parse() {
            Ok(port) => config.metrics.prometheus_port = Some(port),
            Err(_) => warn!(value = %val, "Ignoring unparseable BACKPLANE_PROMETHEUS_PORT"),
        }
    }
}
