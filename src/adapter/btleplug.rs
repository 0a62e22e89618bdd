//! Host adapter backed by btleplug
//!
//! Translates btleplug's central events into [`AdapterEvent`]s and maps the
//! string identities used by the registry back to btleplug peripheral ids.

use super::{AdapterEvent, AdapterFactory, AdapterHandle, AdapterOptions, HostAdapter, ScanFilter};
use crate::adapter::state::AdapterState;
use crate::connection::LinkFailure;
use crate::error::{Error, Result};
use crate::registry::{AdvertisementData, Observation, PeripheralId};
use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, Manager as _, Peripheral as _, PeripheralProperties,
    ScanFilter as BtScanFilter,
};
use btleplug::platform::{Adapter, Manager, PeripheralId as BtPeripheralId};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

type IdMap = Arc<Mutex<HashMap<PeripheralId, BtPeripheralId>>>;

/// Acquires the platform Bluetooth adapter through btleplug
#[derive(Debug, Default, Clone)]
pub struct BtleplugFactory;

#[async_trait]
impl AdapterFactory for BtleplugFactory {
    async fn acquire(&self, options: &AdapterOptions) -> Result<AdapterHandle> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        let count = adapters.len();
        let adapter = adapters.into_iter().nth(options.index).ok_or_else(|| {
            Error::AdapterUnavailable(format!(
                "adapter index {} requested, {} available",
                options.index, count
            ))
        })?;

        if options.show_power_alert {
            tracing::debug!("Power alert option is not supported by btleplug, ignoring");
        }
        match adapter.adapter_info().await {
            Ok(info) => tracing::info!(adapter = %info, "Using Bluetooth adapter"),
            Err(e) => tracing::debug!(error = %e, "Adapter info unavailable"),
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let ids: IdMap = Arc::new(Mutex::new(HashMap::new()));
        let pump = tokio::spawn(pump_events(adapter.clone(), ids.clone(), tx.clone()));

        Ok(AdapterHandle {
            adapter: Box::new(BtleplugAdapter {
                _manager: manager,
                adapter,
                ids,
                events: tx,
                scanning: AtomicBool::new(false),
                connect_timeout: options.connect_timeout,
                attempts: Mutex::new(HashMap::new()),
                pump,
            }),
            events: rx,
        })
    }
}

struct BtleplugAdapter {
    _manager: Manager,
    adapter: Adapter,
    ids: IdMap,
    events: mpsc::UnboundedSender<AdapterEvent>,
    scanning: AtomicBool,
    connect_timeout: Duration,
    attempts: Mutex<HashMap<PeripheralId, JoinHandle<()>>>,
    pump: JoinHandle<()>,
}

impl BtleplugAdapter {
    async fn peripheral(&self, id: &PeripheralId) -> Result<btleplug::platform::Peripheral> {
        let bt_id = self
            .ids
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Adapter(format!("peripheral {} was never discovered", id)))?;
        Ok(self.adapter.peripheral(&bt_id).await?)
    }
}

impl Drop for BtleplugAdapter {
    fn drop(&mut self) {
        self.pump.abort();
        for (_, attempt) in self.attempts.lock().drain() {
            attempt.abort();
        }
    }
}

fn map_state(state: CentralState) -> AdapterState {
    match state {
        CentralState::PoweredOn => AdapterState::PoweredOn,
        CentralState::PoweredOff => AdapterState::PoweredOff,
        CentralState::Unknown => AdapterState::Unknown,
    }
}

fn observation(id: PeripheralId, props: PeripheralProperties) -> Observation {
    let mut advertisement = AdvertisementData::new();
    for (company, data) in props.manufacturer_data {
        advertisement.insert(format!("manufacturer:{:04x}", company), data);
    }
    for (service, data) in props.service_data {
        advertisement.insert(format!("service:{}", service), data);
    }
    if let Some(tx_power) = props.tx_power_level {
        advertisement.insert("tx_power".to_string(), tx_power.to_le_bytes().to_vec());
    }

    Observation {
        id,
        name: props.local_name,
        rssi: props.rssi,
        advertisement,
        services: props.services,
    }
}

async fn pump_events(adapter: Adapter, ids: IdMap, tx: mpsc::UnboundedSender<AdapterEvent>) {
    let mut events = match adapter.events().await {
        Ok(events) => events,
        Err(e) => {
            tracing::error!(error = %e, "Failed to subscribe to adapter events");
            return;
        }
    };

    while let Some(event) = events.next().await {
        let translated = match event {
            CentralEvent::DeviceDiscovered(bt_id)
            | CentralEvent::DeviceUpdated(bt_id)
            | CentralEvent::ManufacturerDataAdvertisement { id: bt_id, .. }
            | CentralEvent::ServiceDataAdvertisement { id: bt_id, .. }
            | CentralEvent::ServicesAdvertisement { id: bt_id, .. } => {
                let id = PeripheralId::new(bt_id.to_string());
                ids.lock().insert(id.clone(), bt_id.clone());

                let properties = match adapter.peripheral(&bt_id).await {
                    Ok(peripheral) => peripheral.properties().await,
                    Err(e) => Err(e),
                };
                match properties {
                    Ok(Some(props)) => Some(AdapterEvent::Advertisement(observation(id, props))),
                    Ok(None) => None,
                    Err(e) => {
                        tracing::trace!(peripheral = %id, error = %e, "Failed to read properties");
                        None
                    }
                }
            }
            CentralEvent::DeviceConnected(bt_id) => {
                Some(AdapterEvent::Connected(PeripheralId::new(bt_id.to_string())))
            }
            CentralEvent::DeviceDisconnected(bt_id) => Some(AdapterEvent::Disconnected {
                id: PeripheralId::new(bt_id.to_string()),
                reason: None,
            }),
            CentralEvent::StateUpdate(state) => Some(AdapterEvent::StateChanged(map_state(state))),
            // Newer btleplug releases add events we have no use for
            #[allow(unreachable_patterns)]
            _ => None,
        };

        if let Some(event) = translated {
            if tx.send(event).is_err() {
                break;
            }
        }
    }
    tracing::debug!("Adapter event stream ended");
}

#[async_trait]
impl HostAdapter for BtleplugAdapter {
    async fn state(&self) -> Result<AdapterState> {
        Ok(map_state(self.adapter.adapter_state().await?))
    }

    async fn start_scan(&self, filter: &ScanFilter) -> Result<()> {
        let scan_filter = BtScanFilter {
            services: filter.services.clone(),
        };
        self.adapter.start_scan(scan_filter).await?;
        self.scanning.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.adapter.stop_scan().await?;
        self.scanning.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_scanning(&self) -> Result<bool> {
        Ok(self.scanning.load(Ordering::SeqCst))
    }

    async fn connect(&self, id: &PeripheralId) -> Result<()> {
        let peripheral = self.peripheral(id).await?;
        let events = self.events.clone();
        let connect_timeout = self.connect_timeout;
        let target = id.clone();

        let attempt = tokio::spawn(async move {
            let event = match timeout(connect_timeout, peripheral.connect()).await {
                Ok(Ok(())) => AdapterEvent::Connected(target),
                Ok(Err(e)) => AdapterEvent::ConnectFailed {
                    id: target,
                    reason: LinkFailure::Other(e.to_string()),
                },
                Err(_) => {
                    // Leave nothing half-open behind the timeout
                    let _ = peripheral.disconnect().await;
                    AdapterEvent::ConnectFailed {
                        id: target,
                        reason: LinkFailure::Timeout,
                    }
                }
            };
            let _ = events.send(event);
        });

        if let Some(previous) = self.attempts.lock().insert(id.clone(), attempt) {
            previous.abort();
        }
        Ok(())
    }

    async fn cancel_connection(&self, id: &PeripheralId) -> Result<()> {
        if let Some(attempt) = self.attempts.lock().remove(id) {
            if !attempt.is_finished() {
                attempt.abort();
                let _ = self.events.send(AdapterEvent::Disconnected {
                    id: id.clone(),
                    reason: Some(LinkFailure::Cancelled),
                });
            }
        }

        let peripheral = self.peripheral(id).await?;
        if peripheral.is_connected().await? {
            peripheral.disconnect().await?;
        }
        Ok(())
    }
}
