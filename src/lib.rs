//! BLE Central - a Bluetooth Low Energy central-role stack
//!
//! Feynman Explanation: The radio is a shared walkie-talkie and this crate is
//! the one person allowed to hold it. Everyone else hands that person notes:
//! - adapter: the walkie-talkie itself, and whether it is switched on
//! - registry: the notebook of every device heard during the current scan
//! - scan: "listen for the next five seconds"
//! - connection: which devices we are talking to, or trying to
//! - coordinator: the person holding the radio, reading notes one at a time
//!
//! Callers only ever talk to [`BleCoordinator`] and listen to its event stream.

pub mod adapter;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod registry;
pub mod scan;

// Re-export commonly used types for easy access
pub use adapter::{
    AdapterEvent, AdapterFactory, AdapterOptions, AdapterState, HostAdapter, ScanFilter,
    UnavailableReason,
};
pub use config::Config;
pub use connection::{ConnectOutcome, ConnectionState, DisconnectOutcome, LinkFailure};
pub use coordinator::{
    BleCoordinator, CoordinatorConfig, CoordinatorEvent, EventSubscription, Pending,
};
pub use error::{Error, Result};
pub use registry::{Observation, Peripheral, PeripheralId, Rssi};
pub use scan::{ScanOutcome, ScanRequest, StopOutcome, StopReason};
