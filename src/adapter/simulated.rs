//! In-process host adapter
//!
//! Scripted stand-in for a real Bluetooth stack. It records every request it
//! receives and lets the caller inject state changes, advertisements and
//! connection outcomes. Used by the test suite and by the CLI's `--simulate`
//! mode.

use super::{AdapterEvent, AdapterFactory, AdapterHandle, AdapterOptions, HostAdapter, ScanFilter};
use crate::adapter::state::AdapterState;
use crate::connection::LinkFailure;
use crate::error::{Error, Result};
use crate::registry::{Observation, PeripheralId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Heart Rate service
pub const HEART_RATE_SERVICE: Uuid = Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb);
/// Health Thermometer service
pub const THERMOMETER_SERVICE: Uuid = Uuid::from_u128(0x00001809_0000_1000_8000_00805f9b34fb);

/// A request as seen by the simulated host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterRequest {
    StartScan(ScanFilter),
    StopScan,
    Connect(PeripheralId),
    CancelConnection(PeripheralId),
}

#[derive(Debug, Default)]
struct HostInner {
    state: AdapterState,
    scanning: bool,
    events: Option<mpsc::UnboundedSender<AdapterEvent>>,
    requests: Vec<AdapterRequest>,
    acquisitions: usize,
    options: Option<AdapterOptions>,
    connect_failure: Option<String>,
    cancel_failure: Option<String>,
    stop_failure: Option<String>,
    auto_complete: bool,
    devices: Vec<Observation>,
}

impl HostInner {
    fn emit(&self, event: AdapterEvent) {
        match &self.events {
            Some(events) => {
                if events.send(event).is_err() {
                    tracing::trace!("Simulated adapter event dropped, no listener");
                }
            }
            None => tracing::trace!("Simulated adapter not acquired, event dropped"),
        }
    }
}

/// Controller for the simulated host; clones share the same host
#[derive(Debug, Clone)]
pub struct SimulatedHost {
    inner: Arc<Mutex<HostInner>>,
}

impl SimulatedHost {
    pub fn new(state: AdapterState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HostInner {
                state,
                ..Default::default()
            })),
        }
    }

    /// A powered-on host with a few nearby devices that advertise whenever a
    /// scan starts, and which completes connects and cancellations on its own
    pub fn with_sample_devices() -> Self {
        let host = Self::new(AdapterState::PoweredOn).auto_complete(true);
        host.set_devices(vec![
            Observation::new("sim-hrm-01")
                .with_name("Heart Rate Monitor")
                .with_rssi(-58)
                .with_service(HEART_RATE_SERVICE)
                .with_data("manufacturer:0059", vec![0x01, 0x02]),
            Observation::new("sim-therm-02")
                .with_name("Thermometer")
                .with_rssi(-71)
                .with_service(THERMOMETER_SERVICE),
            Observation::new("sim-beacon-03").with_data("tx_power", vec![0xf4]),
        ]);
        host
    }

    /// Complete connect and cancel requests immediately with success events
    pub fn auto_complete(self, enabled: bool) -> Self {
        self.inner.lock().auto_complete = enabled;
        self
    }

    /// Devices replayed as advertisements each time a scan starts
    pub fn set_devices(&self, devices: Vec<Observation>) {
        self.inner.lock().devices = devices;
    }

    pub fn state(&self) -> AdapterState {
        self.inner.lock().state
    }

    /// Change the radio state and report it
    pub fn set_state(&self, state: AdapterState) {
        let mut inner = self.inner.lock();
        inner.state = state;
        if !state.is_ready() {
            inner.scanning = false;
        }
        inner.emit(AdapterEvent::StateChanged(state));
    }

    pub fn advertise(&self, observation: Observation) {
        self.inner.lock().emit(AdapterEvent::Advertisement(observation));
    }

    pub fn report_connected(&self, id: impl Into<PeripheralId>) {
        self.inner.lock().emit(AdapterEvent::Connected(id.into()));
    }

    pub fn report_connect_failed(&self, id: impl Into<PeripheralId>, reason: LinkFailure) {
        self.inner.lock().emit(AdapterEvent::ConnectFailed {
            id: id.into(),
            reason,
        });
    }

    pub fn report_disconnected(&self, id: impl Into<PeripheralId>, reason: Option<LinkFailure>) {
        self.inner.lock().emit(AdapterEvent::Disconnected {
            id: id.into(),
            reason,
        });
    }

    /// Reject the next connect request with an adapter error
    pub fn fail_next_connect(&self, message: impl Into<String>) {
        self.inner.lock().connect_failure = Some(message.into());
    }

    /// Reject the next cancel request with an adapter error
    pub fn fail_next_cancel(&self, message: impl Into<String>) {
        self.inner.lock().cancel_failure = Some(message.into());
    }

    /// Reject the next stop-scan request with an adapter error
    pub fn fail_next_stop(&self, message: impl Into<String>) {
        self.inner.lock().stop_failure = Some(message.into());
    }

    /// Every request received so far, in order
    pub fn requests(&self) -> Vec<AdapterRequest> {
        self.inner.lock().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.inner.lock().requests.clear();
    }

    pub fn count_requests(&self, request: &AdapterRequest) -> usize {
        self.inner.lock().requests.iter().filter(|r| *r == request).count()
    }

    pub fn acquisitions(&self) -> usize {
        self.inner.lock().acquisitions
    }

    /// Options passed to the most recent acquisition
    pub fn options(&self) -> Option<AdapterOptions> {
        self.inner.lock().options.clone()
    }

    pub fn is_scanning(&self) -> bool {
        self.inner.lock().scanning
    }
}

#[async_trait]
impl AdapterFactory for SimulatedHost {
    async fn acquire(&self, options: &AdapterOptions) -> Result<AdapterHandle> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut inner = self.inner.lock();
            inner.acquisitions += 1;
            inner.options = Some(options.clone());
            inner.scanning = false;
            inner.events = Some(tx);
        }
        tracing::debug!(index = options.index, "Acquired simulated adapter");

        Ok(AdapterHandle {
            adapter: Box::new(SimulatedAdapter {
                inner: self.inner.clone(),
            }),
            events: rx,
        })
    }
}

/// Adapter handle handed to the coordinator
struct SimulatedAdapter {
    inner: Arc<Mutex<HostInner>>,
}

impl SimulatedAdapter {
    fn require_powered(inner: &HostInner) -> Result<()> {
        if inner.state.is_ready() {
            Ok(())
        } else {
            Err(Error::Adapter(format!("radio is {}", inner.state)))
        }
    }
}

#[async_trait]
impl HostAdapter for SimulatedAdapter {
    async fn state(&self) -> Result<AdapterState> {
        Ok(self.inner.lock().state)
    }

    async fn start_scan(&self, filter: &ScanFilter) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.requests.push(AdapterRequest::StartScan(filter.clone()));
        Self::require_powered(&inner)?;
        inner.scanning = true;

        for device in inner.devices.iter().filter(|d| filter.matches(&d.services)) {
            inner.emit(AdapterEvent::Advertisement(device.clone()));
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.requests.push(AdapterRequest::StopScan);
        if let Some(message) = inner.stop_failure.take() {
            return Err(Error::Adapter(message));
        }
        inner.scanning = false;
        Ok(())
    }

    async fn is_scanning(&self) -> Result<bool> {
        Ok(self.inner.lock().scanning)
    }

    async fn connect(&self, id: &PeripheralId) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.requests.push(AdapterRequest::Connect(id.clone()));
        Self::require_powered(&inner)?;
        if let Some(message) = inner.connect_failure.take() {
            return Err(Error::Adapter(message));
        }
        if inner.auto_complete {
            inner.emit(AdapterEvent::Connected(id.clone()));
        }
        Ok(())
    }

    async fn cancel_connection(&self, id: &PeripheralId) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.requests.push(AdapterRequest::CancelConnection(id.clone()));
        if let Some(message) = inner.cancel_failure.take() {
            return Err(Error::Adapter(message));
        }
        if inner.auto_complete {
            inner.emit(AdapterEvent::Disconnected {
                id: id.clone(),
                reason: None,
            });
        }
        Ok(())
    }
}
