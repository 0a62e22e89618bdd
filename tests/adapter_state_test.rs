mod common;

use ble_central::adapter::simulated::SimulatedHost;
use ble_central::{
    AdapterOptions, AdapterState, BleCoordinator, Config, CoordinatorConfig, CoordinatorEvent,
    Observation, ScanRequest, StopReason, UnavailableReason,
};
use common::{drain, next_event, settle, start};
use std::sync::Arc;

fn ready_flags(events: &[CoordinatorEvent]) -> Vec<bool> {
    events
        .iter()
        .filter_map(|event| match event {
            CoordinatorEvent::AdapterReady { first_time } => Some(*first_time),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_initial_state_announced_on_acquire() {
    let (_host, coordinator, mut events) = start(AdapterState::PoweredOn).await;

    assert_eq!(
        next_event(&mut events).await,
        CoordinatorEvent::AdapterStateChanged {
            state: AdapterState::PoweredOn
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        CoordinatorEvent::AdapterReady { first_time: true }
    );
    assert_eq!(coordinator.adapter_state().await.unwrap(), AdapterState::PoweredOn);
}

#[tokio::test]
async fn test_first_ready_reported_once() {
    let (host, coordinator, mut events) = start(AdapterState::PoweredOff).await;

    host.set_state(AdapterState::PoweredOn);
    host.set_state(AdapterState::PoweredOff);
    host.set_state(AdapterState::PoweredOn);
    host.set_state(AdapterState::PoweredOn);
    settle(&coordinator).await;

    assert_eq!(ready_flags(&drain(&mut events)), vec![true, false, false]);
}

#[tokio::test]
async fn test_every_unavailable_state_carries_remediation() {
    let (host, coordinator, mut events) = start(AdapterState::PoweredOn).await;
    drain(&mut events);

    let states = [
        AdapterState::Resetting,
        AdapterState::Unsupported,
        AdapterState::Unauthorized,
        AdapterState::PoweredOff,
        AdapterState::Unknown,
    ];
    for state in states {
        host.set_state(state);
    }
    settle(&coordinator).await;

    let reasons: Vec<(UnavailableReason, &'static str)> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            CoordinatorEvent::AdapterUnavailable { reason, message } => Some((reason, message)),
            _ => None,
        })
        .collect();
    assert_eq!(reasons.len(), states.len());
    for ((reason, message), state) in reasons.iter().zip(states) {
        assert_eq!(reason.state(), state);
        assert!(!message.is_empty());
    }
    assert_eq!(coordinator.adapter_state().await.unwrap(), AdapterState::Unknown);
}

#[tokio::test]
async fn test_reset_reacquires_and_rearms_first_ready() {
    let (host, coordinator, mut events) = start(AdapterState::PoweredOn).await;
    coordinator.start_scan(ScanRequest::new()).await.unwrap();
    host.advertise(Observation::new("A"));
    settle(&coordinator).await;
    drain(&mut events);

    tokio_test::assert_ok!(coordinator.reset().await);

    assert_eq!(host.acquisitions(), 2);
    assert!(!coordinator.is_scanning().await.unwrap());
    assert!(coordinator.peripherals().await.unwrap().is_empty());

    let after = drain(&mut events);
    assert!(after.contains(&CoordinatorEvent::ScanStopped {
        reason: StopReason::Reset
    }));
    assert_eq!(ready_flags(&after), vec![true]);
}

#[tokio::test]
async fn test_coordinator_usable_after_reset() {
    let (host, coordinator, _events) = start(AdapterState::PoweredOn).await;
    coordinator.reset().await.unwrap();

    // The host now feeds the new handle; the coordinator still works
    coordinator.start_scan(ScanRequest::new()).await.unwrap();
    host.advertise(Observation::new("A"));
    assert_eq!(coordinator.peripherals().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_adapter_options_follow_config() {
    let mut config = Config::default();
    config.adapter.show_power_alert = true;
    config.adapter.index = 1;

    let host = SimulatedHost::new(AdapterState::PoweredOn);
    let coordinator = BleCoordinator::new(Arc::new(host.clone()), config.coordinator_config())
        .await
        .unwrap();
    settle(&coordinator).await;

    let options: AdapterOptions = host.options().unwrap();
    assert!(options.show_power_alert);
    assert_eq!(options.index, 1);
}

#[tokio::test]
async fn test_shutdown_stops_commands() {
    let host = SimulatedHost::new(AdapterState::PoweredOn);
    let coordinator = BleCoordinator::new(Arc::new(host.clone()), CoordinatorConfig::default())
        .await
        .unwrap();
    coordinator.start_scan(ScanRequest::new()).await.unwrap();

    coordinator.shutdown().await.unwrap();

    assert!(!host.is_scanning());
    assert!(matches!(
        coordinator.adapter_state().await,
        Err(ble_central::Error::CoordinatorClosed)
    ));
}
