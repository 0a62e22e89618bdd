//! Scan sessions
//!
//! At most one session is active. Starting a session clears the registry;
//! results then accumulate until the next session starts. A bounded session
//! carries a deadline that the coordinator turns into an automatic stop.

use crate::adapter::state::AdapterState;
use crate::adapter::{HostAdapter, ScanFilter};
use crate::error::{Error, Result};
use crate::registry::{Observation, PeripheralRegistry};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Parameters for one scan session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub filter: ScanFilter,
    /// `None` or zero runs until stopped
    #[serde(with = "humantime_serde", default)]
    pub duration: Option<Duration>,
}

impl ScanRequest {
    /// Unfiltered, unbounded scan
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_services(mut self, services: Vec<Uuid>) -> Self {
        self.filter = ScanFilter::new(services);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    fn bound(&self) -> Option<Duration> {
        self.duration.filter(|d| !d.is_zero())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOutcome {
    Started,
    /// A session was already running; nothing changed
    AlreadyScanning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped,
    NotScanning,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Manual,
    Timeout,
    AdapterUnavailable,
    Reset,
}

#[derive(Debug, Default)]
pub struct ScanSession {
    active: bool,
    filter: ScanFilter,
    deadline: Option<Instant>,
}

impl ScanSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// When the running session should stop on its own
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub async fn start(
        &mut self,
        request: &ScanRequest,
        adapter_state: AdapterState,
        registry: &mut PeripheralRegistry,
        adapter: &dyn HostAdapter,
    ) -> Result<ScanOutcome> {
        if !adapter_state.is_ready() {
            return Err(Error::AdapterNotReady(adapter_state));
        }
        if self.active {
            tracing::info!("Scan already in progress, ignoring start request");
            return Ok(ScanOutcome::AlreadyScanning);
        }

        registry.clear();
        self.active = true;
        self.filter = request.filter.clone();

        if let Err(e) = adapter.start_scan(&self.filter).await {
            self.mark_inactive();
            return Err(e);
        }

        self.deadline = request.bound().map(|bound| Instant::now() + bound);
        tracing::info!(
            services = self.filter.services.len(),
            duration = ?request.bound(),
            "Scan started"
        );
        Ok(ScanOutcome::Started)
    }

    pub async fn stop(
        &mut self,
        adapter_state: AdapterState,
        adapter: &dyn HostAdapter,
    ) -> Result<StopOutcome> {
        if !adapter_state.is_ready() {
            return Err(Error::AdapterNotReady(adapter_state));
        }
        if !self.active {
            tracing::debug!("Stop requested while not scanning");
            return Ok(StopOutcome::NotScanning);
        }

        // A rejected stop leaves the session and its timer as they were
        adapter.stop_scan().await?;
        self.mark_inactive();
        tracing::info!("Scan stopped");
        Ok(StopOutcome::Stopped)
    }

    /// End the session without talking to the host
    pub fn mark_inactive(&mut self) {
        self.active = false;
        self.deadline = None;
    }

    /// Whether an observation belongs to the running session
    pub fn accepts(&self, observation: &Observation) -> bool {
        self.active && self.filter.matches(&observation.services)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::simulated::{AdapterRequest, SimulatedHost};
    use crate::adapter::{AdapterFactory, AdapterOptions};

    #[tokio::test]
    async fn test_start_gated_on_adapter_state() {
        let host = SimulatedHost::new(AdapterState::PoweredOff);
        let handle = host.acquire(&AdapterOptions::default()).await.unwrap();
        let mut registry = PeripheralRegistry::new();
        let mut session = ScanSession::new();

        let err = session
            .start(
                &ScanRequest::new(),
                AdapterState::PoweredOff,
                &mut registry,
                handle.adapter.as_ref(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AdapterNotReady(AdapterState::PoweredOff)));
        assert!(!session.is_active());
        assert!(host.requests().is_empty());

        let err = session
            .stop(AdapterState::Unauthorized, handle.adapter.as_ref())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AdapterNotReady(AdapterState::Unauthorized)));
    }

    #[tokio::test]
    async fn test_start_clears_registry_once() {
        let host = SimulatedHost::new(AdapterState::PoweredOn);
        let handle = host.acquire(&AdapterOptions::default()).await.unwrap();
        let adapter = handle.adapter.as_ref();
        let mut registry = PeripheralRegistry::new();
        registry.upsert(Observation::new("old"));
        let mut session = ScanSession::new();

        let request = ScanRequest::new().with_duration(Duration::from_secs(5));
        let outcome = session
            .start(&request, AdapterState::PoweredOn, &mut registry, adapter)
            .await;
        assert_eq!(outcome.unwrap(), ScanOutcome::Started);
        assert!(registry.is_empty());
        let deadline = session.deadline().unwrap();

        registry.upsert(Observation::new("new"));
        let again = session.start(&request, AdapterState::PoweredOn, &mut registry, adapter).await;
        assert_eq!(again.unwrap(), ScanOutcome::AlreadyScanning);
        assert_eq!(registry.len(), 1);
        assert_eq!(session.deadline(), Some(deadline));
        assert_eq!(host.count_requests(&AdapterRequest::StartScan(ScanFilter::default())), 1);
    }

    #[tokio::test]
    async fn test_unbounded_scan_has_no_deadline() {
        let host = SimulatedHost::new(AdapterState::PoweredOn);
        let handle = host.acquire(&AdapterOptions::default()).await.unwrap();
        let mut registry = PeripheralRegistry::new();
        let mut session = ScanSession::new();

        let request = ScanRequest::new().with_duration(Duration::ZERO);
        session
            .start(&request, AdapterState::PoweredOn, &mut registry, handle.adapter.as_ref())
            .await
            .unwrap();
        assert!(session.is_active());
        assert_eq!(session.deadline(), None);
    }

    #[tokio::test]
    async fn test_stop_is_noop_when_idle() {
        let host = SimulatedHost::new(AdapterState::PoweredOn);
        let handle = host.acquire(&AdapterOptions::default()).await.unwrap();
        let mut session = ScanSession::new();

        let outcome = session.stop(AdapterState::PoweredOn, handle.adapter.as_ref()).await;
        assert_eq!(outcome.unwrap(), StopOutcome::NotScanning);
        assert!(host.requests().is_empty());
    }

    #[tokio::test]
    async fn test_stop_cancels_deadline() {
        let host = SimulatedHost::new(AdapterState::PoweredOn);
        let handle = host.acquire(&AdapterOptions::default()).await.unwrap();
        let adapter = handle.adapter.as_ref();
        let mut registry = PeripheralRegistry::new();
        let mut session = ScanSession::new();

        let request = ScanRequest::new().with_duration(Duration::from_secs(30));
        session.start(&request, AdapterState::PoweredOn, &mut registry, adapter).await.unwrap();
        assert_eq!(
            session.stop(AdapterState::PoweredOn, adapter).await.unwrap(),
            StopOutcome::Stopped
        );
        assert!(!session.is_active());
        assert_eq!(session.deadline(), None);
    }

    #[tokio::test]
    async fn test_rejected_stop_keeps_session_and_timer() {
        let host = SimulatedHost::new(AdapterState::PoweredOn);
        let handle = host.acquire(&AdapterOptions::default()).await.unwrap();
        let adapter = handle.adapter.as_ref();
        let mut registry = PeripheralRegistry::new();
        let mut session = ScanSession::new();

        let request = ScanRequest::new().with_duration(Duration::from_secs(30));
        session.start(&request, AdapterState::PoweredOn, &mut registry, adapter).await.unwrap();
        let deadline = session.deadline();

        host.fail_next_stop("busy");
        assert!(session.stop(AdapterState::PoweredOn, adapter).await.is_err());
        assert!(session.is_active());
        assert_eq!(session.deadline(), deadline);
    }

    #[test]
    fn test_accepts_only_while_active_and_matching() {
        let wanted = Uuid::new_v4();
        let mut session = ScanSession::new();
        let matching = Observation::new("A").with_service(wanted);
        let other = Observation::new("B");

        assert!(!session.accepts(&matching));

        session.active = true;
        session.filter = ScanFilter::new(vec![wanted]);
        assert!(session.accepts(&matching));
        assert!(!session.accepts(&other));
    }
}
