//! Command implementations for the ble-central CLI
//!
//! Each command drives the coordinator through its public API and renders
//! the event stream; nothing here touches the registry directly.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

use ble_central::adapter::simulated::SimulatedHost;
use ble_central::adapter::AdapterFactory;
use ble_central::{
    BleCoordinator, ConnectionState, CoordinatorEvent, DisconnectOutcome, Error,
    EventSubscription, Peripheral, PeripheralId, Result, ScanRequest, StopOutcome,
};

/// How long to wait for the radio to report powered-on before giving up
const READY_TIMEOUT: Duration = Duration::from_secs(3);

/// Adapter factory for this run: the host radio when available, else simulated
pub fn adapter_factory(simulate: bool) -> Arc<dyn AdapterFactory> {
    if !simulate {
        if let Some(factory) = host_factory() {
            return factory;
        }
        warn!("Built without the bluetooth feature, using the simulated adapter");
    }
    Arc::new(SimulatedHost::with_sample_devices())
}

#[cfg(feature = "bluetooth")]
fn host_factory() -> Option<Arc<dyn AdapterFactory>> {
    Some(Arc::new(ble_central::adapter::btleplug::BtleplugFactory))
}

#[cfg(not(feature = "bluetooth"))]
fn host_factory() -> Option<Arc<dyn AdapterFactory>> {
    None
}

/// Renders events either as a table or as JSON lines
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub json: bool,
}

impl Output {
    fn json_line(&self, event: &CoordinatorEvent) -> Result<()> {
        let line = serde_json::to_string(event).map_err(std::io::Error::from)?;
        println!("{}", line);
        Ok(())
    }

    /// Print one event; scan snapshots become a table in text mode
    pub fn event(&self, event: &CoordinatorEvent) -> Result<()> {
        if self.json {
            return self.json_line(event);
        }
        match event {
            CoordinatorEvent::AdapterStateChanged { state } => println!("adapter: {}", state),
            CoordinatorEvent::AdapterReady { first_time } => {
                println!("adapter ready{}", if *first_time { "" } else { " again" })
            }
            CoordinatorEvent::AdapterUnavailable { message, .. } => eprintln!("{}", message),
            CoordinatorEvent::ScanStarted => println!("scanning..."),
            CoordinatorEvent::ScanStopped { reason } => println!("scan stopped ({:?})", reason),
            CoordinatorEvent::ScanResultsUpdated { peripherals } => self.table(peripherals),
            CoordinatorEvent::ConnectionStateChanged { id, state } => {
                println!("{}: {}", id, state)
            }
            CoordinatorEvent::DisconnectFailed { id, reason } => {
                eprintln!("{}: disconnect failed: {}", id, reason)
            }
        }
        Ok(())
    }

    pub fn table(&self, peripherals: &[Peripheral]) {
        println!();
        println!("{:<24} {:>9}  {:<14} {}", "NAME", "RSSI", "STATE", "ID");
        for peripheral in peripherals {
            println!(
                "{:<24} {:>9}  {:<14} {}",
                peripheral.display_name(),
                peripheral.rssi().to_string(),
                peripheral.connection().to_string(),
                peripheral.id()
            );
        }
    }
}

/// Wait until the radio is powered on, printing remediation text otherwise
async fn wait_until_ready(
    coordinator: &BleCoordinator,
    events: &mut EventSubscription,
) -> Result<()> {
    if coordinator.adapter_state().await?.is_ready() {
        return Ok(());
    }

    let wait = async {
        while let Some(event) = events.recv().await {
            match event {
                CoordinatorEvent::AdapterReady { .. } => return true,
                CoordinatorEvent::AdapterUnavailable { message, .. } => eprintln!("{}", message),
                _ => {}
            }
        }
        false
    };

    match timeout(READY_TIMEOUT, wait).await {
        Ok(true) => Ok(()),
        _ => Err(Error::AdapterNotReady(coordinator.adapter_state().await?)),
    }
}

/// Scan and print the live peripheral table
pub async fn scan(
    coordinator: &BleCoordinator,
    mut events: EventSubscription,
    request: ScanRequest,
    output: Output,
) -> Result<()> {
    wait_until_ready(coordinator, &mut events).await?;
    coordinator.start_scan(request).await?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event @ CoordinatorEvent::ScanStopped { .. }) => {
                    output.event(&event)?;
                    break;
                }
                Some(event @ (CoordinatorEvent::ScanResultsUpdated { .. }
                    | CoordinatorEvent::AdapterUnavailable { .. })) => output.event(&event)?,
                Some(_) => {}
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping scan");
                if coordinator.stop_scan().await? == StopOutcome::NotScanning {
                    break;
                }
            }
        }
    }

    let found = coordinator.peripherals().await?;
    info!(count = found.len(), "Scan finished");
    Ok(())
}

/// Scan until `id` shows up, connect and follow the link until it ends or Ctrl-C
pub async fn connect(
    coordinator: &BleCoordinator,
    mut events: EventSubscription,
    id: PeripheralId,
    request: ScanRequest,
    output: Output,
) -> Result<()> {
    wait_until_ready(coordinator, &mut events).await?;
    coordinator.start_scan(request).await?;

    let mut requested = false;
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match &event {
                    CoordinatorEvent::ScanResultsUpdated { peripherals } if !requested => {
                        if peripherals.iter().any(|p| p.id() == &id) {
                            requested = true;
                            coordinator.stop_scan().await?;
                            coordinator.connect(id.clone()).await?;
                        }
                    }
                    CoordinatorEvent::ScanStopped { .. } if !requested => {
                        return Err(Error::UnknownPeripheral(id));
                    }
                    CoordinatorEvent::ConnectionStateChanged { id: changed, state }
                        if changed == &id =>
                    {
                        output.event(&event)?;
                        match state {
                            ConnectionState::Failed(reason) => {
                                return Err(Error::ConnectFailed { id, reason: reason.clone() });
                            }
                            ConnectionState::Disconnected => break,
                            _ => {}
                        }
                    }
                    CoordinatorEvent::AdapterUnavailable { .. }
                    | CoordinatorEvent::DisconnectFailed { .. } => output.event(&event)?,
                    _ => {}
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!(peripheral = %id, "Interrupted, disconnecting");
                if !requested {
                    coordinator.stop_scan().await?;
                    break;
                }
                let outcome = coordinator.disconnect(Some(id.clone())).await?;
                if outcome == DisconnectOutcome::NotConnected {
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Print every event until Ctrl-C
pub async fn watch(mut events: EventSubscription, output: Output) -> Result<()> {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => output.event(&event)?,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}
