//! Outbound event stream
//!
//! Events are pushed into per-subscriber channels, so observers never run on
//! the coordinator's task. A subscriber that drops its receiver is pruned on
//! the next publish; the bus never holds observers alive.

use crate::adapter::state::{AdapterState, UnavailableReason};
use crate::connection::{ConnectionState, LinkFailure};
use crate::registry::{Peripheral, PeripheralId};
use crate::scan::StopReason;
use futures::Stream;
use parking_lot::Mutex;
use serde::Serialize;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Everything the coordinator tells its observers, in order
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    AdapterStateChanged {
        state: AdapterState,
    },
    /// The radio is powered on; `first_time` is set once per lifetime or reset
    AdapterReady {
        first_time: bool,
    },
    AdapterUnavailable {
        reason: UnavailableReason,
        message: &'static str,
    },
    ScanStarted,
    ScanStopped {
        reason: StopReason,
    },
    /// Full registry snapshot in discovery order
    ScanResultsUpdated {
        peripherals: Vec<Peripheral>,
    },
    ConnectionStateChanged {
        id: PeripheralId,
        state: ConnectionState,
    },
    DisconnectFailed {
        id: PeripheralId,
        reason: LinkFailure,
    },
}

impl CoordinatorEvent {
    pub fn unavailable(reason: UnavailableReason) -> Self {
        Self::AdapterUnavailable {
            reason,
            message: reason.message(),
        }
    }
}

pub type SubscriberId = u64;

/// Fan-out of coordinator events to any number of subscribers
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<(SubscriberId, mpsc::UnboundedSender<CoordinatorEvent>)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push((id, tx));
        EventSubscription { id, receiver: rx }
    }

    /// Returns false if the subscriber was already gone
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    pub fn publish(&self, event: CoordinatorEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|(id, tx)| {
            let delivered = tx.send(event.clone()).is_ok();
            if !delivered {
                tracing::debug!(subscriber = id, "Dropping closed event subscriber");
            }
            delivered
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// Receiving end of one subscription
#[derive(Debug)]
pub struct EventSubscription {
    id: SubscriberId,
    receiver: mpsc::UnboundedReceiver<CoordinatorEvent>,
}

impl EventSubscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next event; `None` once the coordinator is gone or this subscription was removed
    pub async fn recv(&mut self) -> Option<CoordinatorEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<CoordinatorEvent> {
        self.receiver.try_recv().ok()
    }

    /// Deliver every event to `observer` on a task spawned on `runtime`.
    ///
    /// Use this to land events on a specific executor, e.g. the one driving a UI.
    pub fn observe_on<F>(mut self, runtime: &Handle, mut observer: F) -> JoinHandle<()>
    where
        F: FnMut(CoordinatorEvent) + Send + 'static,
    {
        runtime.spawn(async move {
            while let Some(event) = self.receiver.recv().await {
                observer(event);
            }
        })
    }
}

impl Stream for EventSubscription {
    type Item = CoordinatorEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
