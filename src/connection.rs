//! Connection tracking
//!
//! One state machine per peripheral identity. Requests move an entry into an
//! active state and ask the host to act; host-reported outcomes move it to a
//! terminal state. There is no automatic retry: a failed entry stays failed
//! until the caller issues another connect.

use crate::adapter::state::AdapterState;
use crate::adapter::HostAdapter;
use crate::error::{Error, Result};
use crate::registry::{PeripheralId, PeripheralRegistry};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Why a link failed or went away
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkFailure {
    Timeout,
    PeerTerminated,
    Cancelled,
    AdapterUnavailable,
    Other(String),
}

impl LinkFailure {
    /// Failures that may go away if the caller simply tries again
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::PeerTerminated | Self::Other(_))
    }
}

impl fmt::Display for LinkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("connection attempt timed out"),
            Self::PeerTerminated => f.write_str("peer terminated the connection"),
            Self::Cancelled => f.write_str("connection cancelled"),
            Self::AdapterUnavailable => f.write_str("adapter became unavailable"),
            Self::Other(reason) => f.write_str(reason),
        }
    }
}

/// Per-peripheral connection state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed(LinkFailure),
    Disconnecting,
}

impl ConnectionState {
    /// Connecting or Connected: the states a disconnect can cancel
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }

    /// Any state still waiting on, or holding, a host link
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Disconnecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Failed(reason) => write!(f, "failed ({})", reason),
            Self::Disconnecting => f.write_str("disconnecting"),
        }
    }
}

/// Result of a connect request that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectOutcome {
    /// A connect request was sent to the host
    Requested,
    AlreadyConnecting,
    AlreadyConnected,
    /// A cancellation is still pending; wait for it before reconnecting
    Disconnecting,
}

/// Result of a disconnect request that did not fail
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectOutcome {
    /// A cancellation was sent to the host
    Requested,
    /// Nothing to cancel for this identity
    NotConnected,
    /// Bulk disconnect: how many cancellations went out and which ones the host rejected
    All {
        requested: usize,
        failed: Vec<(PeripheralId, LinkFailure)>,
    },
}

/// A state change waiting to be published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionChange {
    pub id: PeripheralId,
    pub state: ConnectionState,
}

/// Connection state machines keyed by identity, kept in first-attempt order
#[derive(Debug, Default)]
pub struct ConnectionManager {
    states: HashMap<PeripheralId, ConnectionState>,
    order: Vec<PeripheralId>,
    changes: Vec<ConnectionChange>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, id: &PeripheralId) -> ConnectionState {
        self.states.get(id).cloned().unwrap_or_default()
    }

    /// Every tracked identity with its state, in first-attempt order
    pub fn entries(&self) -> Vec<(PeripheralId, ConnectionState)> {
        self.order
            .iter()
            .map(|id| (id.clone(), self.state(id)))
            .collect()
    }

    /// Forget entries that no longer have a link or an attempt in flight.
    ///
    /// Called when a new scan clears the registry; a settled entry could
    /// only be reused after its peripheral is rediscovered anyway.
    pub fn prune_settled(&mut self) -> usize {
        let before = self.order.len();
        let states = &mut self.states;
        self.order.retain(|id| {
            let keep = states.get(id).is_some_and(ConnectionState::is_in_flight);
            if !keep {
                states.remove(id);
            }
            keep
        });
        before - self.order.len()
    }

    /// Drain the state changes recorded since the last call
    pub fn take_changes(&mut self) -> Vec<ConnectionChange> {
        std::mem::take(&mut self.changes)
    }

    fn set(&mut self, id: &PeripheralId, state: ConnectionState) {
        if !self.states.contains_key(id) {
            self.order.push(id.clone());
        }
        self.states.insert(id.clone(), state.clone());
        self.changes.push(ConnectionChange {
            id: id.clone(),
            state,
        });
    }

    pub async fn connect(
        &mut self,
        id: &PeripheralId,
        adapter_state: AdapterState,
        registry: &PeripheralRegistry,
        adapter: &dyn HostAdapter,
    ) -> Result<ConnectOutcome> {
        if !adapter_state.is_ready() {
            return Err(Error::AdapterNotReady(adapter_state));
        }
        if !registry.contains(id) {
            return Err(Error::UnknownPeripheral(id.clone()));
        }

        match self.state(id) {
            ConnectionState::Connecting => {
                tracing::debug!(peripheral = %id, "Connect ignored, attempt already in progress");
                return Ok(ConnectOutcome::AlreadyConnecting);
            }
            ConnectionState::Connected => {
                tracing::debug!(peripheral = %id, "Connect ignored, already connected");
                return Ok(ConnectOutcome::AlreadyConnected);
            }
            ConnectionState::Disconnecting => {
                tracing::debug!(peripheral = %id, "Connect ignored, disconnect still pending");
                return Ok(ConnectOutcome::Disconnecting);
            }
            ConnectionState::Disconnected | ConnectionState::Failed(_) => {}
        }

        self.set(id, ConnectionState::Connecting);
        tracing::info!(peripheral = %id, "Connecting");

        if let Err(e) = adapter.connect(id).await {
            let reason = LinkFailure::Other(e.to_string());
            tracing::warn!(peripheral = %id, error = %e, "Host rejected connect request");
            self.set(id, ConnectionState::Failed(reason.clone()));
            return Err(Error::ConnectFailed {
                id: id.clone(),
                reason,
            });
        }
        Ok(ConnectOutcome::Requested)
    }

    /// Cancel one connection, or every Connecting/Connected entry when `id` is `None`
    pub async fn disconnect(
        &mut self,
        id: Option<&PeripheralId>,
        adapter_state: AdapterState,
        adapter: &dyn HostAdapter,
    ) -> Result<DisconnectOutcome> {
        if !adapter_state.is_ready() {
            return Err(Error::AdapterNotReady(adapter_state));
        }

        match id {
            Some(id) => {
                if !self.state(id).is_active() {
                    tracing::debug!(peripheral = %id, "Disconnect ignored, not connected");
                    return Ok(DisconnectOutcome::NotConnected);
                }
                self.cancel(id, adapter)
                    .await
                    .map(|_| DisconnectOutcome::Requested)
                    .map_err(|reason| Error::DisconnectFailed {
                        id: id.clone(),
                        reason,
                    })
            }
            None => {
                let targets: Vec<PeripheralId> = self
                    .order
                    .iter()
                    .filter(|id| self.state(id).is_active())
                    .cloned()
                    .collect();

                let mut requested = 0;
                let mut failed = Vec::new();
                for target in targets {
                    match self.cancel(&target, adapter).await {
                        Ok(()) => requested += 1,
                        Err(reason) => failed.push((target, reason)),
                    }
                }
                tracing::info!(requested, failed = failed.len(), "Disconnecting all peripherals");
                Ok(DisconnectOutcome::All { requested, failed })
            }
        }
    }

    async fn cancel(
        &mut self,
        id: &PeripheralId,
        adapter: &dyn HostAdapter,
    ) -> std::result::Result<(), LinkFailure> {
        let previous = self.state(id);
        self.set(id, ConnectionState::Disconnecting);

        match adapter.cancel_connection(id).await {
            Ok(()) => {
                tracing::info!(peripheral = %id, "Disconnecting");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(peripheral = %id, error = %e, "Host rejected disconnect request");
                self.set(id, previous);
                Err(LinkFailure::Other(e.to_string()))
            }
        }
    }

    /// Host reports the link is up
    pub fn on_connected(&mut self, id: &PeripheralId) {
        match self.state(id) {
            ConnectionState::Connecting | ConnectionState::Disconnecting => {
                tracing::info!(peripheral = %id, "Connected");
                self.set(id, ConnectionState::Connected);
            }
            state => {
                tracing::debug!(peripheral = %id, %state, "Ignoring unexpected connected callback");
            }
        }
    }

    /// Host reports the connect attempt failed
    pub fn on_connect_failed(&mut self, id: &PeripheralId, reason: LinkFailure) {
        let state = self.state(id);
        if state.is_in_flight() {
            tracing::warn!(peripheral = %id, %reason, "Connect failed");
            self.set(id, ConnectionState::Failed(reason));
        } else {
            tracing::debug!(
                peripheral = %id,
                %state,
                "Ignoring unexpected connect-failed callback"
            );
        }
    }

    /// Host reports the link is gone
    pub fn on_disconnected(&mut self, id: &PeripheralId, reason: Option<LinkFailure>) {
        let state = self.state(id);
        if state.is_in_flight() {
            match &reason {
                Some(reason) => tracing::info!(peripheral = %id, %reason, "Disconnected"),
                None => tracing::info!(peripheral = %id, "Disconnected"),
            }
            self.set(id, ConnectionState::Disconnected);
        } else {
            tracing::debug!(peripheral = %id, %state, "Ignoring unexpected disconnected callback");
        }
    }

    /// The radio left the powered-on state; no host link survives that
    pub fn on_adapter_unavailable(&mut self) {
        let affected: Vec<(PeripheralId, ConnectionState)> = self
            .entries()
            .into_iter()
            .filter(|(_, state)| state.is_in_flight())
            .collect();

        for (id, state) in affected {
            let next = match state {
                ConnectionState::Connected => ConnectionState::Disconnected,
                _ => ConnectionState::Failed(LinkFailure::AdapterUnavailable),
            };
            self.set(&id, next);
        }
    }

    /// Forget every entry without publishing changes
    pub fn clear(&mut self) {
        self.states.clear();
        self.order.clear();
        self.changes.clear();
    }
}
