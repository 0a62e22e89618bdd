//! Host adapter boundary
//!
//! The host Bluetooth stack is an external collaborator. It is reached through
//! [`HostAdapter`] for requests and reports back through a stream of
//! [`AdapterEvent`]s. Requests only ask the host to do something; the matching
//! event is the authoritative completion signal.

pub mod simulated;
pub mod state;

#[cfg(feature = "bluetooth")]
pub mod btleplug;

use crate::connection::LinkFailure;
use crate::error::Result;
use crate::registry::{Observation, PeripheralId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

pub use state::{AdapterState, AdapterStateTracker, StateTransition, UnavailableReason};

/// Service-identifier filter for scanning; empty means "everything"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFilter {
    pub services: Vec<Uuid>,
}

impl ScanFilter {
    pub fn new(services: Vec<Uuid>) -> Self {
        Self { services }
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// An advertisement passes if the filter is empty or it lists a filtered service
    pub fn matches(&self, advertised: &[Uuid]) -> bool {
        self.is_empty() || advertised.iter().any(|uuid| self.services.contains(uuid))
    }
}

/// Callback from the host stack, delivered in order
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    StateChanged(AdapterState),
    Advertisement(Observation),
    Connected(PeripheralId),
    ConnectFailed {
        id: PeripheralId,
        reason: LinkFailure,
    },
    Disconnected {
        id: PeripheralId,
        reason: Option<LinkFailure>,
    },
}

/// Requests the host Bluetooth stack must accept
#[async_trait]
pub trait HostAdapter: Send + Sync {
    /// Current radio state as the host sees it
    async fn state(&self) -> Result<AdapterState>;

    async fn start_scan(&self, filter: &ScanFilter) -> Result<()>;

    async fn stop_scan(&self) -> Result<()>;

    async fn is_scanning(&self) -> Result<bool>;

    /// Ask the host to connect; completion arrives as an [`AdapterEvent`]
    async fn connect(&self, id: &PeripheralId) -> Result<()>;

    /// Ask the host to drop a connection or abandon an attempt
    async fn cancel_connection(&self, id: &PeripheralId) -> Result<()>;
}

/// Options applied when acquiring an adapter handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterOptions {
    /// Which local adapter to use when the host has several
    pub index: usize,
    /// Let the host show its own "Bluetooth is off" prompt
    pub show_power_alert: bool,
    /// How long a connect attempt may take before it fails with a timeout
    pub connect_timeout: Duration,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            index: 0,
            show_power_alert: false,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// An acquired adapter plus the stream of its callbacks
pub struct AdapterHandle {
    pub adapter: Box<dyn HostAdapter>,
    pub events: mpsc::UnboundedReceiver<AdapterEvent>,
}

impl std::fmt::Debug for AdapterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterHandle").finish_non_exhaustive()
    }
}

/// Source of adapter handles; the coordinator acquires once and again on reset
#[async_trait]
pub trait AdapterFactory: Send + Sync {
    async fn acquire(&self, options: &AdapterOptions) -> Result<AdapterHandle>;
}
