//! BLE coordinator
//!
//! Feynman: Think of the coordinator as a single air-traffic controller with
//! one radio. Pilots (callers) can radio in from anywhere, but requests go
//! into one queue and the controller handles them one at a time, interleaved
//! with whatever the tower equipment (the host adapter) reports. Nobody else
//! touches the flight board, so it never needs a lock.
//!
//! [`BleCoordinator`] is a cheap, cloneable handle. Every call enqueues a
//! command for the actor task and returns a [`Pending`] future: await it for
//! the result, or drop it to fire and forget.

pub mod events;

use crate::adapter::state::{AdapterState, AdapterStateTracker, StateTransition};
use crate::adapter::{AdapterEvent, AdapterFactory, AdapterHandle, AdapterOptions, HostAdapter};
use crate::connection::{ConnectOutcome, ConnectionManager, ConnectionState, DisconnectOutcome};
use crate::error::{Error, Result};
use crate::registry::{Peripheral, PeripheralId, PeripheralRegistry};
use crate::scan::{ScanOutcome, ScanRequest, ScanSession, StopOutcome, StopReason};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

pub use events::{CoordinatorEvent, EventBus, EventSubscription, SubscriberId};

/// Coordinator settings
#[derive(Debug, Clone, Default)]
pub struct CoordinatorConfig {
    pub adapter: AdapterOptions,
    /// Log every published registry snapshot at trace level
    pub log_snapshots: bool,
}

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    StartScan(ScanRequest, Reply<ScanOutcome>),
    StopScan(Reply<StopOutcome>),
    Connect(PeripheralId, Reply<ConnectOutcome>),
    Disconnect(Option<PeripheralId>, Reply<DisconnectOutcome>),
    AdapterState(Reply<AdapterState>),
    Peripherals(Reply<Vec<Peripheral>>),
    Connections(Reply<Vec<(PeripheralId, ConnectionState)>>),
    IsScanning(Reply<bool>),
    Reset(Reply<()>),
    Shutdown(Reply<()>),
}

/// Result of a queued coordinator call.
///
/// Resolves once the actor has processed the command. Dropping it does not
/// cancel the command.
#[must_use = "await the result, or drop it explicitly to fire and forget"]
#[derive(Debug)]
pub struct Pending<T> {
    receiver: Option<oneshot::Receiver<Result<T>>>,
}

impl<T> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.receiver.as_mut() {
            None => Poll::Ready(Err(Error::CoordinatorClosed)),
            Some(receiver) => Pin::new(receiver)
                .poll(cx)
                .map(|reply| reply.unwrap_or(Err(Error::CoordinatorClosed))),
        }
    }
}

/// Handle to the BLE central stack
#[derive(Debug, Clone)]
pub struct BleCoordinator {
    commands: mpsc::UnboundedSender<Command>,
    events: Arc<EventBus>,
}

impl BleCoordinator {
    /// Acquire the adapter and start the coordinator task on the current runtime
    pub async fn new(factory: Arc<dyn AdapterFactory>, config: CoordinatorConfig) -> Result<Self> {
        let (coordinator, _initial) = Self::with_subscription(factory, config).await?;
        Ok(coordinator)
    }

    /// Like [`BleCoordinator::new`], but also returns a subscription that was
    /// registered before the adapter was acquired, so it sees the initial
    /// adapter-state events
    pub async fn with_subscription(
        factory: Arc<dyn AdapterFactory>,
        config: CoordinatorConfig,
    ) -> Result<(Self, EventSubscription)> {
        let events = Arc::new(EventBus::new());
        let subscription = events.subscribe();
        let (commands, receiver) = mpsc::unbounded_channel();

        let mut actor = Actor {
            factory,
            config,
            handle: None,
            tracker: AdapterStateTracker::new(),
            registry: PeripheralRegistry::new(),
            scan: ScanSession::new(),
            connections: ConnectionManager::new(),
            events: events.clone(),
        };
        actor.acquire().await?;
        tokio::spawn(actor.run(receiver));

        Ok((Self { commands, events }, subscription))
    }

    fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Pending<T> {
        let (tx, rx) = oneshot::channel();
        let receiver = self.commands.send(build(tx)).ok().map(|_| rx);
        Pending { receiver }
    }

    pub fn start_scan(&self, request: ScanRequest) -> Pending<ScanOutcome> {
        self.request(|reply| Command::StartScan(request, reply))
    }

    pub fn stop_scan(&self) -> Pending<StopOutcome> {
        self.request(Command::StopScan)
    }

    pub fn connect(&self, id: impl Into<PeripheralId>) -> Pending<ConnectOutcome> {
        let id = id.into();
        self.request(|reply| Command::Connect(id, reply))
    }

    /// Cancel one connection, or all of them when `id` is `None`
    pub fn disconnect(&self, id: Option<PeripheralId>) -> Pending<DisconnectOutcome> {
        self.request(|reply| Command::Disconnect(id, reply))
    }

    pub fn disconnect_all(&self) -> Pending<DisconnectOutcome> {
        self.disconnect(None)
    }

    pub fn adapter_state(&self) -> Pending<AdapterState> {
        self.request(Command::AdapterState)
    }

    /// Registry snapshot in discovery order, with connection states filled in
    pub fn peripherals(&self) -> Pending<Vec<Peripheral>> {
        self.request(Command::Peripherals)
    }

    /// Tracked connections in first-attempt order
    pub fn connections(&self) -> Pending<Vec<(PeripheralId, ConnectionState)>> {
        self.request(Command::Connections)
    }

    pub fn is_scanning(&self) -> Pending<bool> {
        self.request(Command::IsScanning)
    }

    /// Tear down and reacquire the adapter, clearing all in-memory state
    pub fn reset(&self) -> Pending<()> {
        self.request(Command::Reset)
    }

    /// Stop the coordinator task; later calls fail with `CoordinatorClosed`
    pub fn shutdown(&self) -> Pending<()> {
        self.request(Command::Shutdown)
    }

    pub fn subscribe(&self) -> EventSubscription {
        self.events.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.events.unsubscribe(id)
    }
}

/// Single owner of all mutable stack state
struct Actor {
    factory: Arc<dyn AdapterFactory>,
    config: CoordinatorConfig,
    handle: Option<AdapterHandle>,
    tracker: AdapterStateTracker,
    registry: PeripheralRegistry,
    scan: ScanSession,
    connections: ConnectionManager,
    events: Arc<EventBus>,
}

async fn next_adapter_event(handle: &mut Option<AdapterHandle>) -> Option<AdapterEvent> {
    match handle {
        Some(handle) => handle.events.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl Actor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        tracing::debug!("BLE coordinator started");
        loop {
            let deadline = self.scan.deadline();
            // Host callbacks first, so a command sees every event queued before it
            tokio::select! {
                biased;

                event = next_adapter_event(&mut self.handle) => match event {
                    Some(event) => self.handle_adapter_event(event),
                    None => {
                        tracing::warn!("Adapter event stream closed, releasing adapter");
                        self.release_adapter();
                    }
                },
                command = commands.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        self.shutdown().await;
                        let _ = reply.send(Ok(()));
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                _ = sleep_until_deadline(deadline) => {
                    tracing::debug!("Scan duration elapsed");
                    let _ = self.stop_scan(StopReason::Timeout).await;
                }
            }
        }
        tracing::debug!("BLE coordinator stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartScan(request, reply) => {
                let result = self.start_scan(&request).await;
                let _ = reply.send(result);
            }
            Command::StopScan(reply) => {
                let result = self.stop_scan(StopReason::Manual).await;
                let _ = reply.send(result);
            }
            Command::Connect(id, reply) => {
                let result = self.connect(&id).await;
                let _ = reply.send(result);
            }
            Command::Disconnect(id, reply) => {
                let result = self.disconnect(id.as_ref()).await;
                let _ = reply.send(result);
            }
            Command::AdapterState(reply) => {
                let _ = reply.send(Ok(self.tracker.current()));
            }
            Command::Peripherals(reply) => {
                let _ = reply.send(Ok(self.snapshot()));
            }
            Command::Connections(reply) => {
                let _ = reply.send(Ok(self.connections.entries()));
            }
            Command::IsScanning(reply) => {
                let _ = reply.send(Ok(self.scan.is_active()));
            }
            Command::Reset(reply) => {
                let result = self.reset().await;
                let _ = reply.send(result);
            }
            Command::Shutdown(reply) => {
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn adapter(&self) -> Result<&dyn HostAdapter> {
        match &self.handle {
            Some(handle) => Ok(handle.adapter.as_ref()),
            None => Err(Error::AdapterNotReady(self.tracker.current())),
        }
    }

    async fn acquire(&mut self) -> Result<()> {
        let handle = self.factory.acquire(&self.config.adapter).await?;
        let state = handle.adapter.state().await?;
        self.handle = Some(handle);
        tracing::info!(%state, "Bluetooth adapter acquired");
        self.apply_state(state);
        Ok(())
    }

    fn release_adapter(&mut self) {
        self.handle = None;
        self.apply_state(AdapterState::Unknown);
    }

    fn publish(&self, event: CoordinatorEvent) {
        self.events.publish(event);
    }

    fn publish_connection_changes(&mut self) {
        for change in self.connections.take_changes() {
            self.publish(CoordinatorEvent::ConnectionStateChanged {
                id: change.id,
                state: change.state,
            });
        }
    }

    fn publish_snapshot(&self) {
        let peripherals = self.snapshot();
        if self.config.log_snapshots {
            tracing::trace!(count = peripherals.len(), "Publishing scan results");
        }
        self.publish(CoordinatorEvent::ScanResultsUpdated { peripherals });
    }

    fn snapshot(&self) -> Vec<Peripheral> {
        self.registry
            .iter()
            .map(|p| p.clone().with_connection(self.connections.state(p.id())))
            .collect()
    }

    /// Re-announce why a gated call was refused
    fn renotify_if_gated<T>(&self, result: &Result<T>) {
        if let Err(Error::AdapterNotReady(state)) = result {
            if let Some(reason) = state.unavailable_reason() {
                self.publish(CoordinatorEvent::unavailable(reason));
            }
        }
    }

    fn apply_state(&mut self, state: AdapterState) {
        let transition = self.tracker.apply(state);
        self.publish(CoordinatorEvent::AdapterStateChanged { state });

        match transition {
            StateTransition::Ready { first_time } => {
                tracing::info!(first_time, "Bluetooth adapter ready");
                self.publish(CoordinatorEvent::AdapterReady { first_time });
            }
            StateTransition::Unavailable(reason) => {
                tracing::warn!(%reason, "Bluetooth adapter unavailable: {}", reason.message());
                self.publish(CoordinatorEvent::unavailable(reason));

                if self.scan.is_active() {
                    self.scan.mark_inactive();
                    self.publish(CoordinatorEvent::ScanStopped {
                        reason: StopReason::AdapterUnavailable,
                    });
                }
                self.connections.on_adapter_unavailable();
                self.publish_connection_changes();
            }
        }
    }

    fn handle_adapter_event(&mut self, event: AdapterEvent) {
        match event {
            AdapterEvent::StateChanged(state) => self.apply_state(state),
            AdapterEvent::Advertisement(observation) => {
                if !self.scan.accepts(&observation) {
                    tracing::trace!(
                        peripheral = %observation.id,
                        "Ignoring advertisement outside scan session"
                    );
                    return;
                }
                let peripheral = self.registry.upsert(observation);
                tracing::debug!(
                    peripheral = %peripheral.id(),
                    name = peripheral.display_name(),
                    rssi = %peripheral.rssi(),
                    "Advertisement observed"
                );
                self.publish_snapshot();
            }
            AdapterEvent::Connected(id) => {
                self.connections.on_connected(&id);
                self.publish_connection_changes();
            }
            AdapterEvent::ConnectFailed { id, reason } => {
                self.connections.on_connect_failed(&id, reason);
                self.publish_connection_changes();
            }
            AdapterEvent::Disconnected { id, reason } => {
                self.connections.on_disconnected(&id, reason);
                self.publish_connection_changes();
            }
        }
    }

    async fn start_scan(&mut self, request: &ScanRequest) -> Result<ScanOutcome> {
        let state = self.tracker.current();
        let result = match &self.handle {
            Some(handle) => {
                self.scan
                    .start(request, state, &mut self.registry, handle.adapter.as_ref())
                    .await
            }
            None => Err(Error::AdapterNotReady(state)),
        };

        self.renotify_if_gated(&result);
        if let Ok(ScanOutcome::Started) = result {
            let pruned = self.connections.prune_settled();
            if pruned > 0 {
                tracing::debug!(pruned, "Dropped settled connection entries");
            }
            self.publish(CoordinatorEvent::ScanStarted);
            self.publish_snapshot();
        }
        result
    }

    async fn stop_scan(&mut self, reason: StopReason) -> Result<StopOutcome> {
        let state = self.tracker.current();
        let result = match &self.handle {
            Some(handle) => self.scan.stop(state, handle.adapter.as_ref()).await,
            None => Err(Error::AdapterNotReady(state)),
        };

        match &result {
            Ok(StopOutcome::Stopped) => self.publish(CoordinatorEvent::ScanStopped { reason }),
            Err(Error::AdapterNotReady(_)) if reason == StopReason::Manual => {
                self.renotify_if_gated(&result)
            }
            Err(e) if reason == StopReason::Timeout => {
                // The window is over either way; do not keep the session alive
                tracing::warn!(error = %e, "Host rejected timed stop, ending scan session");
                self.scan.mark_inactive();
                self.publish(CoordinatorEvent::ScanStopped { reason });
            }
            Err(e) => tracing::warn!(error = %e, "Failed to stop scan"),
            Ok(StopOutcome::NotScanning) => {}
        }
        result
    }

    async fn connect(&mut self, id: &PeripheralId) -> Result<ConnectOutcome> {
        let state = self.tracker.current();
        let result = match &self.handle {
            Some(handle) => {
                self.connections
                    .connect(id, state, &self.registry, handle.adapter.as_ref())
                    .await
            }
            None => Err(Error::AdapterNotReady(state)),
        };

        self.renotify_if_gated(&result);
        self.publish_connection_changes();
        result
    }

    async fn disconnect(&mut self, id: Option<&PeripheralId>) -> Result<DisconnectOutcome> {
        let state = self.tracker.current();
        let result = match &self.handle {
            Some(handle) => {
                self.connections
                    .disconnect(id, state, handle.adapter.as_ref())
                    .await
            }
            None => Err(Error::AdapterNotReady(state)),
        };

        self.renotify_if_gated(&result);
        self.publish_connection_changes();
        match &result {
            Ok(DisconnectOutcome::All { failed, .. }) => {
                for (id, reason) in failed {
                    self.publish(CoordinatorEvent::DisconnectFailed {
                        id: id.clone(),
                        reason: reason.clone(),
                    });
                }
            }
            Err(Error::DisconnectFailed { id, reason }) => {
                self.publish(CoordinatorEvent::DisconnectFailed {
                    id: id.clone(),
                    reason: reason.clone(),
                });
            }
            _ => {}
        }
        result
    }

    /// Best-effort release of everything the host is doing for us
    async fn quiesce(&mut self) {
        let Ok(adapter) = self.adapter() else {
            return;
        };

        if self.scan.is_active() || adapter.is_scanning().await.unwrap_or(false) {
            if let Err(e) = adapter.stop_scan().await {
                tracing::debug!(error = %e, "Ignoring stop-scan failure during teardown");
            }
        }
        for (id, state) in self.connections.entries() {
            if state.is_in_flight() {
                if let Err(e) = adapter.cancel_connection(&id).await {
                    tracing::debug!(
                        peripheral = %id,
                        error = %e,
                        "Ignoring cancel failure during teardown"
                    );
                }
            }
        }
    }

    async fn reset(&mut self) -> Result<()> {
        tracing::info!("Resetting BLE coordinator");
        self.quiesce().await;

        if self.scan.is_active() {
            self.scan.mark_inactive();
            self.publish(CoordinatorEvent::ScanStopped {
                reason: StopReason::Reset,
            });
        }
        self.handle = None;
        self.registry.clear();
        self.connections.clear();
        self.tracker.reset();
        self.publish_snapshot();

        self.acquire().await.inspect_err(|e| {
            tracing::error!(error = %e, "Failed to reacquire Bluetooth adapter");
        })
    }

    async fn shutdown(&mut self) {
        self.quiesce().await;
        self.scan.mark_inactive();
        self.handle = None;
    }
}
