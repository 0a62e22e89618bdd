mod common;

use ble_central::adapter::simulated::{AdapterRequest, SimulatedHost};
use ble_central::{
    AdapterState, BleCoordinator, CoordinatorConfig, CoordinatorEvent, Error, Observation, Rssi,
    ScanFilter, ScanOutcome, ScanRequest, StopOutcome, StopReason,
};
use common::{drain, settle, start};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn test_repeat_advertisement_updates_in_place() {
    let (host, coordinator, mut events) = start(AdapterState::PoweredOn).await;

    coordinator.start_scan(ScanRequest::new()).await.unwrap();
    host.advertise(Observation::new("A").with_name("Alpha").with_rssi(-60));
    host.advertise(Observation::new("B").with_rssi(-60));
    host.advertise(Observation::new("A").with_rssi(-55));
    settle(&coordinator).await;

    let snapshots: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            CoordinatorEvent::ScanResultsUpdated { peripherals } => Some(peripherals),
            _ => None,
        })
        .collect();
    // One empty snapshot at scan start, then one per advertisement
    assert_eq!(snapshots.len(), 4);
    assert!(snapshots[0].is_empty());

    let last = snapshots.last().unwrap();
    assert_eq!(last.len(), 2);
    assert_eq!(last[0].id().as_str(), "A");
    assert_eq!(last[0].rssi(), Rssi::new(-55));
    assert_eq!(last[0].display_name(), "Alpha");
    assert_eq!(last[1].id().as_str(), "B");
    assert_eq!(last[1].rssi(), Rssi::new(-60));
    assert_eq!(last[1].display_name(), "Unnamed");
}

#[tokio::test]
async fn test_start_while_scanning_is_idempotent() {
    let (host, coordinator, _events) = start(AdapterState::PoweredOn).await;

    let request = ScanRequest::new().with_duration(Duration::from_secs(30));
    assert_eq!(coordinator.start_scan(request.clone()).await.unwrap(), ScanOutcome::Started);
    host.advertise(Observation::new("A"));

    assert_eq!(
        coordinator.start_scan(request).await.unwrap(),
        ScanOutcome::AlreadyScanning
    );
    assert_eq!(coordinator.peripherals().await.unwrap().len(), 1);
    assert_eq!(
        host.count_requests(&AdapterRequest::StartScan(ScanFilter::default())),
        1
    );
}

#[tokio::test]
async fn test_new_session_clears_previous_results() {
    let (host, coordinator, _events) = start(AdapterState::PoweredOn).await;

    coordinator.start_scan(ScanRequest::new()).await.unwrap();
    host.advertise(Observation::new("A"));
    coordinator.stop_scan().await.unwrap();

    // Results survive the end of a session
    assert_eq!(coordinator.peripherals().await.unwrap().len(), 1);

    coordinator.start_scan(ScanRequest::new()).await.unwrap();
    assert!(coordinator.peripherals().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_scan_gated_on_power() {
    let (host, coordinator, mut events) = start(AdapterState::PoweredOff).await;
    drain(&mut events);

    let err = coordinator.start_scan(ScanRequest::new()).await.unwrap_err();
    assert!(matches!(err, Error::AdapterNotReady(AdapterState::PoweredOff)));
    let err = coordinator.stop_scan().await.unwrap_err();
    assert!(matches!(err, Error::AdapterNotReady(AdapterState::PoweredOff)));
    assert!(host.requests().is_empty());

    // Each refused call re-announces the reason
    let unavailable = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, CoordinatorEvent::AdapterUnavailable { .. }))
        .count();
    assert_eq!(unavailable, 2);
}

#[tokio::test]
async fn test_stop_while_idle_is_noop() {
    let (host, coordinator, _events) = start(AdapterState::PoweredOn).await;

    assert_eq!(coordinator.stop_scan().await.unwrap(), StopOutcome::NotScanning);
    assert!(host.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_auto_stop_after_duration() {
    let (host, coordinator, mut events) = start(AdapterState::PoweredOn).await;

    let request = ScanRequest::new().with_duration(Duration::from_secs(5));
    coordinator.start_scan(request).await.unwrap();

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(coordinator.is_scanning().await.unwrap());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!coordinator.is_scanning().await.unwrap());
    assert_eq!(host.count_requests(&AdapterRequest::StopScan), 1);
    assert!(drain(&mut events).contains(&CoordinatorEvent::ScanStopped {
        reason: StopReason::Timeout
    }));
}

#[tokio::test(start_paused = true)]
async fn test_manual_stop_cancels_auto_stop() {
    let (host, coordinator, _events) = start(AdapterState::PoweredOn).await;

    let request = ScanRequest::new().with_duration(Duration::from_secs(5));
    coordinator.start_scan(request).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    coordinator.stop_scan().await.unwrap();

    // A new unbounded session must not be cut short by the old timer
    coordinator.start_scan(ScanRequest::new()).await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert!(coordinator.is_scanning().await.unwrap());
    assert_eq!(host.count_requests(&AdapterRequest::StopScan), 1);
}

#[tokio::test]
async fn test_service_filter_applied_to_results() {
    let (host, coordinator, _events) = start(AdapterState::PoweredOn).await;
    let wanted = Uuid::new_v4();

    let request = ScanRequest::new().with_services(vec![wanted]);
    coordinator.start_scan(request).await.unwrap();
    host.advertise(Observation::new("match").with_service(wanted));
    host.advertise(Observation::new("other").with_service(Uuid::new_v4()));
    host.advertise(Observation::new("silent"));

    let found = coordinator.peripherals().await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id().as_str(), "match");
    assert_eq!(
        host.requests(),
        vec![AdapterRequest::StartScan(ScanFilter::new(vec![wanted]))]
    );
}

#[tokio::test]
async fn test_power_loss_ends_scan_session() {
    let (host, coordinator, mut events) = start(AdapterState::PoweredOn).await;

    coordinator.start_scan(ScanRequest::new()).await.unwrap();
    host.advertise(Observation::new("A"));
    host.set_state(AdapterState::PoweredOff);
    host.advertise(Observation::new("B"));

    assert!(!coordinator.is_scanning().await.unwrap());
    let found = coordinator.peripherals().await.unwrap();
    assert_eq!(found.len(), 1);
    assert!(drain(&mut events).contains(&CoordinatorEvent::ScanStopped {
        reason: StopReason::AdapterUnavailable
    }));
}

#[tokio::test]
async fn test_sample_devices_show_up() {
    let host = SimulatedHost::with_sample_devices();
    let coordinator = BleCoordinator::new(Arc::new(host.clone()), CoordinatorConfig::default())
        .await
        .unwrap();

    coordinator.start_scan(ScanRequest::new()).await.unwrap();
    let found = coordinator.peripherals().await.unwrap();
    assert_eq!(found.len(), 3);
    assert!(found.iter().any(|p| !p.rssi().is_available()));
}

#[tokio::test(start_paused = true)]
async fn test_rejected_timed_stop_still_ends_session() {
    let (host, coordinator, mut events) = start(AdapterState::PoweredOn).await;

    let request = ScanRequest::new().with_duration(Duration::from_secs(5));
    coordinator.start_scan(request).await.unwrap();
    host.fail_next_stop("busy");

    tokio::time::sleep(Duration::from_secs(600)).await;

    assert!(!coordinator.is_scanning().await.unwrap());
    assert_eq!(host.count_requests(&AdapterRequest::StopScan), 1);
    assert!(drain(&mut events).contains(&CoordinatorEvent::ScanStopped {
        reason: StopReason::Timeout
    }));
    assert_eq!(
        coordinator.start_scan(ScanRequest::new()).await.unwrap(),
        ScanOutcome::Started
    );
}

#[tokio::test(start_paused = true)]
async fn test_rejected_manual_stop_keeps_auto_stop() {
    let (host, coordinator, _events) = start(AdapterState::PoweredOn).await;

    let request = ScanRequest::new().with_duration(Duration::from_secs(5));
    coordinator.start_scan(request).await.unwrap();
    host.fail_next_stop("busy");
    assert!(coordinator.stop_scan().await.is_err());
    assert!(coordinator.is_scanning().await.unwrap());

    tokio::time::sleep(Duration::from_secs(6)).await;

    assert!(!coordinator.is_scanning().await.unwrap());
    assert_eq!(host.count_requests(&AdapterRequest::StopScan), 2);
}
