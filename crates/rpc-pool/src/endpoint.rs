use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant as TokioInstant;

use crate::metrics::EndpointMetrics;

/// Usability state of one endpoint.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub enum EndpointState {
    Healthy,
    Degraded,
    Unhealthy,
    /// Taken out of rotation; eligible for re-probing after the recovery
    /// interval.
    Excluded,
}

impl EndpointState {
    /// Whether selection may hand this endpoint out.
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }
}

#[derive(Debug)]
pub(crate) struct EndpointInner {
    pub(crate) state: EndpointState,
    /// Tokio clock so paused-time tests can drive the cool-off.
    pub(crate) excluded_at: Option<TokioInstant>,
    pub(crate) last_used: Option<Instant>,
    pub(crate) metrics: EndpointMetrics,
}

/// One pooled endpoint: URL, its opaque client handle and lock-protected
/// mutable state.
#[derive(Debug)]
pub struct Endpoint<C> {
    url: String,
    client: C,
    pub(crate) inner: Mutex<EndpointInner>,
}

impl<C> Endpoint<C> {
    pub(crate) fn new(url: String, client: C) -> Self {
        Self {
            url,
            client,
            inner: Mutex::new(EndpointInner {
                state: EndpointState::Healthy,
                excluded_at: None,
                last_used: None,
                metrics: EndpointMetrics::new(),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn state(&self) -> EndpointState {
        self.inner.lock().state
    }

    pub fn health_score(&self) -> f64 {
        self.inner.lock().metrics.health_score()
    }

    pub(crate) fn mark_used(&self) {
        self.inner.lock().last_used = Some(Instant::now());
    }

    /// Read-only snapshot for operators and status RPCs.
    pub fn stats(&self) -> EndpointStats {
        let inner = self.inner.lock();
        EndpointStats {
            url: self.url.clone(),
            state: inner.state,
            health_score: inner.metrics.health_score(),
            avg_latency_ms: inner.metrics.avg_latency().as_millis() as u64,
            total_requests: inner.metrics.total_requests(),
            successful_requests: inner.metrics.successful_requests(),
            failed_requests: inner.metrics.failed_requests(),
            consecutive_failures: inner.metrics.consecutive_failures(),
            last_used_ms_ago: inner.last_used.map(|at| at.elapsed().as_millis() as u64),
        }
    }
}

/// Point-in-time view of one endpoint.
#[derive(Clone, Debug, Serialize)]
pub struct EndpointStats {
    pub url: String,
    pub state: EndpointState,
    pub health_score: f64,
    pub avg_latency_ms: u64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub consecutive_failures: u32,
    pub last_used_ms_ago: Option<u64>,
}
