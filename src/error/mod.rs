//! Error types for the BLE central stack
//!
//! Gating failures, caller mistakes and host-reported link failures each get
//! their own variant so callers can react without string matching. Benign
//! no-ops (already scanning, already connected) are not errors; the operations
//! report those through their outcome enums instead.

use crate::adapter::state::AdapterState;
use crate::connection::LinkFailure;
use crate::registry::PeripheralId;
use thiserror::Error;

/// Result type alias for BLE central operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The radio is not powered on (or not usable at all)
    Gating,
    /// The caller asked for something that cannot exist, e.g. a stale identity
    Caller,
    /// Connection-level failures reported by the host stack
    Link,
    /// Failures inside the host Bluetooth stack itself
    Host,
    /// Configuration and setup errors
    Configuration,
    /// Internal system errors
    Internal,
}

impl ErrorCategory {
    /// Get the monitoring severity level for this category
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Host | Self::Internal => ErrorSeverity::High,
            Self::Link => ErrorSeverity::Medium,
            Self::Gating | Self::Caller | Self::Configuration => ErrorSeverity::Low,
        }
    }
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// BLE central error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("Bluetooth adapter not ready: {0}")]
    AdapterNotReady(AdapterState),

    #[error("Unknown peripheral: {0}")]
    UnknownPeripheral(PeripheralId),

    #[error("Connect to {id} failed: {reason}")]
    ConnectFailed { id: PeripheralId, reason: LinkFailure },

    #[error("Disconnect from {id} failed: {reason}")]
    DisconnectFailed { id: PeripheralId, reason: LinkFailure },

    #[error("Adapter error: {0}")]
    Adapter(String),

    #[error("No Bluetooth adapter available: {0}")]
    AdapterUnavailable(String),

    #[error("Coordinator is no longer running")]
    CoordinatorClosed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable error code for telemetry
    pub fn code(&self) -> &'static str {
        match self {
            Self::AdapterNotReady(_) => "E101",
            Self::UnknownPeripheral(_) => "E102",
            Self::ConnectFailed { .. } => "E103",
            Self::DisconnectFailed { .. } => "E104",
            Self::Adapter(_) => "E105",
            Self::AdapterUnavailable(_) => "E106",
            Self::CoordinatorClosed => "E107",
            Self::Config(_) => "E108",
            Self::Io(_) => "E109",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::AdapterNotReady(_) => ErrorCategory::Gating,
            Self::UnknownPeripheral(_) => ErrorCategory::Caller,
            Self::ConnectFailed { .. } | Self::DisconnectFailed { .. } => ErrorCategory::Link,
            Self::Adapter(_) | Self::AdapterUnavailable(_) => ErrorCategory::Host,
            Self::Config(_) => ErrorCategory::Configuration,
            Self::CoordinatorClosed | Self::Io(_) => ErrorCategory::Internal,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        self.category().severity()
    }

    /// Whether the caller may reasonably reissue the same request later.
    ///
    /// Nothing in this crate retries on its own; this is a hint for callers.
    pub fn is_retryable(&self) -> bool {
        match self {
            // Retryable once the user fixes the radio; permanent for unsupported hardware
            Self::AdapterNotReady(state) => !matches!(state, AdapterState::Unsupported),
            Self::ConnectFailed { reason, .. } | Self::DisconnectFailed { reason, .. } => {
                reason.is_transient()
            }
            Self::Adapter(_) => true,
            Self::UnknownPeripheral(_)
            | Self::AdapterUnavailable(_)
            | Self::CoordinatorClosed
            | Self::Config(_)
            | Self::Io(_) => false,
        }
    }
}

#[cfg(feature = "bluetooth")]
impl From<btleplug::Error> for Error {
    fn from(err: btleplug::Error) -> Self {
        Error::Adapter(err.to_string())
    }
}
