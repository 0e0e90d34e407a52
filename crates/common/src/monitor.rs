use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::{
    retry::{retry_with_backoff, ExponentialBackoff, RetryableError},
    shutdown::Shutdown,
};

/// Error from a connection health probe or reconnect attempt.
#[derive(Debug, Clone, Error)]
#[error("connection check failed: {0}")]
pub struct HealthCheckError(pub String);

impl HealthCheckError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl RetryableError for HealthCheckError {
    fn is_retryable(&self) -> bool {
        true
    }
}

/// Probe-and-reconnect capability for one upstream connection.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Cheap liveness probe of the current connection.
    async fn check(&self) -> Result<(), HealthCheckError>;

    /// Re-establishes the connection after a failed probe.
    async fn reconnect(&self) -> Result<(), HealthCheckError>;
}

/// Connection lifecycle as seen by the monitor.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Watches one upstream connection, probing on an interval and driving
/// reconnection with backoff when a probe fails.
#[derive(Debug)]
pub struct ConnectionMonitor<H> {
    health: Arc<H>,
    interval: Duration,
    max_reconnect_attempts: u32,
    backoff: ExponentialBackoff,
    state_tx: watch::Sender<ConnectionState>,
}

impl<H: HealthCheck + 'static> ConnectionMonitor<H> {
    pub fn new(health: Arc<H>, interval: Duration, max_reconnect_attempts: u32) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        Self {
            health,
            interval,
            max_reconnect_attempts,
            backoff: ExponentialBackoff::default(),
            state_tx,
        }
    }

    /// Read side of the connection state, for status snapshots.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        let _ = self.state_tx.send(state);
    }

    /// Runs the monitor loop until shutdown.
    pub async fn run(self, mut shutdown: Shutdown) {
        let mut ticker = tokio::time::interval(self.interval);
        // the first tick fires immediately and doubles as the initial probe
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("connection monitor stopping");
                    return;
                }
                _ = ticker.tick() => {}
            }

            match self.health.check().await {
                Ok(()) => {
                    if *self.state_tx.borrow() != ConnectionState::Connected {
                        info!("connection healthy");
                    }
                    self.set_state(ConnectionState::Connected);
                }
                Err(err) => {
                    warn!(%err, "connection check failed");
                    self.set_state(ConnectionState::Disconnected);
                    self.handle_reconnection(&shutdown).await;
                }
            }
        }
    }

    async fn handle_reconnection(&self, shutdown: &Shutdown) {
        self.set_state(ConnectionState::Reconnecting);
        let health = self.health.clone();
        let result = retry_with_backoff(
            "reconnect",
            self.max_reconnect_attempts,
            &self.backoff,
            shutdown,
            move || {
                let health = health.clone();
                async move { health.reconnect().await }
            },
        )
        .await;

        match result {
            Ok(()) => {
                info!("reconnected");
                self.set_state(ConnectionState::Connected);
            }
            Err(err) => {
                error!(%err, "reconnection failed");
                self.set_state(ConnectionState::Disconnected);
            }
        }
    }
}
