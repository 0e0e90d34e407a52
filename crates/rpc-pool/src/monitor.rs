use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use unilink_common::Shutdown;

use crate::{
    endpoint::{EndpointState, EndpointStats},
    pool::{HealthChecker, RpcPool},
};

/// Pool-level health rollup.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolHealth {
    /// At least `min_healthy_endpoints` usable.
    Healthy,
    /// Usable endpoints exist but fewer than the configured minimum.
    Degraded,
    /// Nothing usable.
    Unhealthy,
}

/// Snapshot of the pool and all endpoints.
#[derive(Clone, Debug, Serialize)]
pub struct PoolHealthReport {
    pub status: PoolHealth,
    pub endpoints: Vec<EndpointStats>,
}

/// Actively probes pool endpoints and manages exclusion recovery.
#[derive(Debug)]
pub struct HealthMonitor<C, H> {
    pool: Arc<RpcPool<C>>,
    checker: Arc<H>,
}

impl<C, H> HealthMonitor<C, H>
where
    C: Send + Sync + 'static,
    H: HealthChecker<C> + 'static,
{
    pub fn new(pool: Arc<RpcPool<C>>, checker: Arc<H>) -> Self {
        Self { pool, checker }
    }

    /// Current pool health and per-endpoint stats.
    pub fn health_report(&self) -> PoolHealthReport {
        let usable = self.pool.usable_count();
        let status = if usable >= self.pool.config().min_healthy_endpoints {
            PoolHealth::Healthy
        } else if usable > 0 {
            PoolHealth::Degraded
        } else {
            PoolHealth::Unhealthy
        };
        PoolHealthReport {
            status,
            endpoints: self.pool.endpoint_stats(),
        }
    }

    /// Runs the probe loop until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: Shutdown) {
        let mut ticker = tokio::time::interval(self.pool.config().health_check_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("health monitor stopping");
                    return;
                }
                _ = ticker.tick() => {}
            }
            self.probe_all().await;
        }
    }

    async fn probe_all(&self) {
        let recovery_interval = self.pool.config().recovery_interval;

        for endpoint in self.pool.snapshot() {
            let (state, excluded_at) = {
                let inner = endpoint.inner.lock();
                (inner.state, inner.excluded_at)
            };

            if state == EndpointState::Excluded {
                let cooled_off = excluded_at
                    .map(|at| at.elapsed() >= recovery_interval)
                    .unwrap_or(true);
                if !cooled_off {
                    continue;
                }
            }

            match self
                .checker
                .check_health(endpoint.client(), endpoint.url())
                .await
            {
                Ok(latency) => {
                    if state == EndpointState::Excluded {
                        self.pool.restore_endpoint(&endpoint);
                        info!(url = endpoint.url(), "excluded endpoint recovered");
                    } else {
                        self.pool.apply_success(&endpoint, latency);
                    }
                }
                Err(err) => {
                    warn!(url = endpoint.url(), %err, "health probe failed");
                    if state == EndpointState::Excluded {
                        // failed recovery probe restarts the cool-off clock
                        endpoint.inner.lock().excluded_at = Some(tokio::time::Instant::now());
                    } else {
                        self.pool.apply_failure(&endpoint);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use unilink_config::LoadBalancingStrategy;

    use super::*;
    use crate::pool::{MockClientFactory, MockHealthChecker, PoolConfig};

    fn config() -> PoolConfig {
        PoolConfig {
            strategy: LoadBalancingStrategy::RoundRobin,
            unhealthy_threshold: 3,
            min_healthy_endpoints: 1,
            recovery_interval: Duration::from_secs(60),
            health_check_interval: Duration::from_secs(5),
        }
    }

    async fn pool_of(urls: &[&str]) -> Arc<RpcPool<()>> {
        let pool = Arc::new(RpcPool::new(
            urls.iter().map(|u| u.to_string()).collect(),
            config(),
        ));
        let mut factory = MockClientFactory::<()>::new();
        factory.expect_build().returning(|_| Ok(()));
        pool.start(&factory).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn excluded_endpoint_skipped_during_cooloff() {
        let pool = pool_of(&["a"]).await;
        pool.force_exclude_endpoint("a").unwrap();

        let mut checker = MockHealthChecker::<()>::new();
        // probe must not run at all while cooling off
        checker.expect_check_health().times(0);

        let monitor = HealthMonitor::new(pool.clone(), Arc::new(checker));
        monitor.probe_all().await;

        assert_eq!(pool.endpoint_stats()[0].state, EndpointState::Excluded);
    }

    #[tokio::test(start_paused = true)]
    async fn excluded_endpoint_recovers_to_degraded_after_cooloff() {
        let pool = pool_of(&["a"]).await;
        pool.force_exclude_endpoint("a").unwrap();

        // let the cool-off lapse; paused-clock sleeps advance Instant too
        tokio::time::sleep(Duration::from_secs(61)).await;

        let mut checker = MockHealthChecker::<()>::new();
        checker
            .expect_check_health()
            .times(1)
            .returning(|_, _| Ok(Duration::from_millis(10)));

        let monitor = HealthMonitor::new(pool.clone(), Arc::new(checker));
        monitor.probe_all().await;

        let stats = &pool.endpoint_stats()[0];
        assert_eq!(stats.state, EndpointState::Degraded);
        assert_eq!(stats.health_score, 70.0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_recovery_probe_restarts_cooloff() {
        let pool = pool_of(&["a"]).await;
        pool.force_exclude_endpoint("a").unwrap();
        tokio::time::sleep(Duration::from_secs(61)).await;

        let mut checker = MockHealthChecker::<()>::new();
        checker
            .expect_check_health()
            .times(1)
            .returning(|_, _| Err(crate::PoolError::Probe("still down".into())));

        let monitor = HealthMonitor::new(pool.clone(), Arc::new(checker));
        monitor.probe_all().await;
        assert_eq!(pool.endpoint_stats()[0].state, EndpointState::Excluded);

        // immediately after the failed probe the endpoint is cooling off
        // again, so another sweep does not probe it
        let mut idle_checker = MockHealthChecker::<()>::new();
        idle_checker.expect_check_health().times(0);
        let monitor = HealthMonitor::new(pool.clone(), Arc::new(idle_checker));
        monitor.probe_all().await;
    }

    #[tokio::test]
    async fn report_rolls_up_pool_status() {
        let pool = pool_of(&["a", "b"]).await;
        let checker = Arc::new(MockHealthChecker::<()>::new());
        let monitor = HealthMonitor::new(pool.clone(), checker);

        assert_eq!(monitor.health_report().status, PoolHealth::Healthy);

        pool.force_exclude_endpoint("a").unwrap();
        assert_eq!(monitor.health_report().status, PoolHealth::Healthy);

        pool.force_exclude_endpoint("b").unwrap();
        assert_eq!(monitor.health_report().status, PoolHealth::Unhealthy);
    }
}
