//! Structured logging bootstrap
//!
//! Installs a `tracing-subscriber` formatter with an `EnvFilter`. `RUST_LOG`
//! wins when set; otherwise the filter is built from the configured global
//! level and per-module overrides.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing_subscriber::EnvFilter;

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Global log level (trace, debug, info, warn, error)
    pub level: String,
    /// Include the event target (module path) in each line
    pub show_target: bool,
    /// Include the emitting thread id in each line
    pub thread_ids: bool,
    /// Module-specific log levels
    pub module_levels: BTreeMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let mut module_levels = BTreeMap::new();
        module_levels.insert("btleplug".to_string(), "warn".to_string());

        Self {
            level: "info".to_string(),
            show_target: true,
            thread_ids: false,
            module_levels,
        }
    }
}

impl LoggingConfig {
    /// Same configuration at a different global level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Filter directives in `EnvFilter` syntax, global level first
    pub fn filter_directives(&self) -> String {
        std::iter::once(self.level.clone())
            .chain(
                self.module_levels
                    .iter()
                    .map(|(module, level)| format!("{}={}", module, level)),
            )
            .collect::<Vec<_>>()
            .join(",")
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
            return Ok(EnvFilter::from_default_env());
        }
        EnvFilter::try_new(self.filter_directives())
            .map_err(|e| Error::Config(format!("Invalid log filter: {}", e)))
    }
}

/// Install the global subscriber.
///
/// Returns `Ok(false)` if a subscriber was already installed.
pub fn init(config: &LoggingConfig) -> Result<bool> {
    let filter = config.env_filter()?;
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.show_target)
        .with_thread_ids(config.thread_ids)
        .try_init()
        .is_ok();
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives() {
        let config = LoggingConfig::default();
        assert_eq!(config.filter_directives(), "info,btleplug=warn");
    }

    #[test]
    fn test_module_overrides_are_sorted() {
        let mut config = LoggingConfig::default().with_level("debug");
        config
            .module_levels
            .insert("ble_central::registry".to_string(), "trace".to_string());

        assert_eq!(
            config.filter_directives(),
            "debug,ble_central::registry=trace,btleplug=warn"
        );
        assert!(EnvFilter::try_new(config.filter_directives()).is_ok());
    }

    #[test]
    fn test_init_twice_is_not_an_error() {
        let config = LoggingConfig::default();
        let first = init(&config).unwrap();
        let second = init(&config).unwrap();
        assert!(!(first && second));
    }
}
