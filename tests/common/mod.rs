#![allow(dead_code)]

use ble_central::adapter::simulated::SimulatedHost;
use ble_central::{
    AdapterState, BleCoordinator, CoordinatorConfig, CoordinatorEvent, EventSubscription,
};
use std::sync::Arc;
use std::time::Duration;

/// Coordinator over a simulated host, with a subscription that saw acquisition
pub async fn start(state: AdapterState) -> (SimulatedHost, BleCoordinator, EventSubscription) {
    let host = SimulatedHost::new(state);
    let (coordinator, events) =
        BleCoordinator::with_subscription(Arc::new(host.clone()), CoordinatorConfig::default())
            .await
            .expect("coordinator should start");
    (host, coordinator, events)
}

/// Everything published so far.
///
/// Call after awaiting a coordinator query so queued host events are processed.
pub fn drain(events: &mut EventSubscription) -> Vec<CoordinatorEvent> {
    std::iter::from_fn(|| events.try_recv()).collect()
}

/// Make sure the coordinator has processed everything queued before this call
pub async fn settle(coordinator: &BleCoordinator) {
    coordinator.adapter_state().await.expect("coordinator alive");
}

pub async fn next_event(events: &mut EventSubscription) -> CoordinatorEvent {
    tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream closed")
}
