//! Configuration management
//!
//! Settings come from a TOML file, then environment overrides, then
//! validation. Every section has defaults, so an empty or missing file is a
//! valid configuration.

use crate::adapter::AdapterOptions;
use crate::coordinator::CoordinatorConfig;
use crate::error::{Error, Result};
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "BLE_CENTRAL_CONFIG";
/// Config file used when [`CONFIG_PATH_ENV`] is unset
pub const DEFAULT_CONFIG_FILE: &str = "ble-central.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub adapter: AdapterConfig,
    pub scan: ScanConfig,
    pub connection: ConnectionConfig,
    pub events: EventsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Which local adapter to use when the host has several
    pub index: usize,
    /// Let the host show its own power-on prompt
    pub show_power_alert: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Scan window used when the caller gives none; zero scans until stopped
    #[serde(with = "humantime_serde")]
    pub default_duration: Duration,
    pub service_filters: Vec<Uuid>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            default_duration: Duration::from_secs(5),
            service_filters: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Trace-log every published scan snapshot
    pub log_snapshots: bool,
}

impl Config {
    /// Load configuration from the file named by `BLE_CENTRAL_CONFIG`, then
    /// apply environment overrides and validate
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Like [`Config::load`], with an explicit path taking precedence over the
    /// environment. A missing default file yields the defaults; a missing
    /// explicit file is an error.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match (path, env::var(CONFIG_PATH_ENV)) {
            (Some(path), _) => (path.to_path_buf(), true),
            (None, Ok(path)) => (PathBuf::from(path), true),
            (None, Err(_)) => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        let mut config = if explicit || path.exists() {
            Self::load_from_file(&path)?
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Self::default()
        };

        config.override_from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    fn override_from_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Apply `BLE_CENTRAL_*` overrides looked up through `lookup`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(val) = lookup("BLE_CENTRAL_LOG") {
            self.logging.level = val;
        }

        if let Some(val) = lookup("BLE_CENTRAL_SCAN_DURATION") {
            self.scan.default_duration = humantime_serde::re::humantime::parse_duration(&val)
                .map_err(|e| Error::Config(format!("Invalid scan duration: {}", e)))?;
        }

        if let Some(val) = lookup("BLE_CENTRAL_ADAPTER_INDEX") {
            self.adapter.index = val
                .parse()
                .map_err(|_| Error::Config("Invalid adapter index".to_string()))?;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.connection.connect_timeout.is_zero() {
            return Err(Error::Config("Connect timeout must be > 0".to_string()));
        }

        if self.logging.level.trim().is_empty() {
            return Err(Error::Config("Log level must not be empty".to_string()));
        }

        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, contents)
            .map_err(|e| Error::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Options handed to the adapter factory
    pub fn adapter_options(&self) -> AdapterOptions {
        AdapterOptions {
            index: self.adapter.index,
            show_power_alert: self.adapter.show_power_alert,
            connect_timeout: self.connection.connect_timeout,
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            adapter: self.adapter_options(),
            log_snapshots: self.events.log_snapshots,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.scan.default_duration, Duration::from_secs(5));
        assert_eq!(config.connection.connect_timeout, Duration::from_secs(10));
        assert!(!config.adapter.show_power_alert);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [scan]
            default_duration = "0s"
            service_filters = ["0000180d-0000-1000-8000-00805f9b34fb"]

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert!(config.scan.default_duration.is_zero());
        assert_eq!(config.scan.service_filters.len(), 1);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.module_levels.get("btleplug").map(String::as_str), Some("warn"));
        assert_eq!(config.connection, ConnectionConfig::default());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.connection.connect_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.level = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("BLE_CENTRAL_LOG", "trace"),
            ("BLE_CENTRAL_SCAN_DURATION", "1m"),
            ("BLE_CENTRAL_ADAPTER_INDEX", "2"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.logging.level, "trace");
        assert_eq!(config.scan.default_duration, Duration::from_secs(60));
        assert_eq!(config.adapter_options().index, 2);

        let err = Config::default()
            .apply_overrides(|key| (key == "BLE_CENTRAL_ADAPTER_INDEX").then(|| "x".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ble-central.toml");

        let mut config = Config::default();
        config.adapter.show_power_alert = true;
        config.events.log_snapshots = true;
        config.scan.service_filters.push(Uuid::new_v4());
        config.save(&path).unwrap();

        let loaded = Config::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(loaded.coordinator_config().adapter.show_power_alert);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let err = Config::load_from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Configuration);
    }
}
