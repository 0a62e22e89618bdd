//! Radio availability tracking
//!
//! The host reports state changes asynchronously; nothing in this crate can
//! force a transition. The tracker only remembers the last report and whether
//! the radio has become ready for the first time since construction (or the
//! last reset).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Availability of the local Bluetooth radio
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterState {
    #[default]
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl AdapterState {
    /// Only a powered-on radio permits scanning and connecting
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::PoweredOn)
    }

    /// The specific reason the radio cannot be used, if any
    pub fn unavailable_reason(&self) -> Option<UnavailableReason> {
        match self {
            Self::Unknown => Some(UnavailableReason::Unknown),
            Self::Resetting => Some(UnavailableReason::Resetting),
            Self::Unsupported => Some(UnavailableReason::Unsupported),
            Self::Unauthorized => Some(UnavailableReason::Unauthorized),
            Self::PoweredOff => Some(UnavailableReason::PoweredOff),
            Self::PoweredOn => None,
        }
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Resetting => "resetting",
            Self::Unsupported => "unsupported",
            Self::Unauthorized => "unauthorized",
            Self::PoweredOff => "powered off",
            Self::PoweredOn => "powered on",
        };
        f.write_str(name)
    }
}

/// One of the five non-ready radio states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
}

impl UnavailableReason {
    /// User-facing remediation text for this reason
    pub fn message(&self) -> &'static str {
        match self {
            Self::Unknown => "Bluetooth state is unknown, try again shortly",
            Self::Resetting => "Bluetooth is resetting, try again shortly",
            Self::Unsupported => "This device does not support Bluetooth Low Energy",
            Self::Unauthorized => "Bluetooth permission has not been granted",
            Self::PoweredOff => "Bluetooth is turned off, enable it to continue",
        }
    }

    pub fn state(&self) -> AdapterState {
        match self {
            Self::Unknown => AdapterState::Unknown,
            Self::Resetting => AdapterState::Resetting,
            Self::Unsupported => AdapterState::Unsupported,
            Self::Unauthorized => AdapterState::Unauthorized,
            Self::PoweredOff => AdapterState::PoweredOff,
        }
    }
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.state().fmt(f)
    }
}

/// What a reported state means for the rest of the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTransition {
    /// The radio is powered on; `first_time` is set once per tracker lifetime
    Ready { first_time: bool },
    /// The radio cannot be used for the given reason
    Unavailable(UnavailableReason),
}

/// Last reported radio state plus the first-ready flag
#[derive(Debug, Clone)]
pub struct AdapterStateTracker {
    current: AdapterState,
    first_ready_pending: bool,
}

impl AdapterStateTracker {
    pub fn new() -> Self {
        Self {
            current: AdapterState::Unknown,
            first_ready_pending: true,
        }
    }

    pub fn current(&self) -> AdapterState {
        self.current
    }

    pub fn is_ready(&self) -> bool {
        self.current.is_ready()
    }

    /// Record a state reported by the host.
    ///
    /// Every report is processed, including repeats of the current state.
    pub fn apply(&mut self, state: AdapterState) -> StateTransition {
        self.current = state;
        match state.unavailable_reason() {
            None => {
                let first_time = std::mem::replace(&mut self.first_ready_pending, false);
                StateTransition::Ready { first_time }
            }
            Some(reason) => StateTransition::Unavailable(reason),
        }
    }

    /// Forget the last report and re-arm the first-ready flag
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for AdapterStateTracker {
    fn default() -> Self {
        Self::new()
    }
}
