use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use tracing::{info, warn};
use unilink_config::{ChainDefaults, LoadBalancingStrategy};

use crate::{
    endpoint::{Endpoint, EndpointState, EndpointStats},
    errors::PoolError,
};

/// Success rate above which a degraded endpoint is promoted back.
const PROMOTE_SUCCESS_RATE: f64 = 0.8;

/// Success rate below which a healthy endpoint is demoted.
const DEMOTE_SUCCESS_RATE: f64 = 0.5;

/// Health score seeded into a freshly recovered endpoint.
const RECOVERED_SCORE: f64 = 70.0;

/// Builds the opaque per-chain client handle for one endpoint URL.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait ClientFactory<C: Send + Sync + 'static>: Send + Sync {
    async fn build(&self, url: &str) -> Result<C, PoolError>;
}

/// Active health probe against one endpoint; returns the probe latency.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait HealthChecker<C: Send + Sync + 'static>: Send + Sync {
    async fn check_health(&self, client: &C, url: &str) -> Result<Duration, PoolError>;
}

/// Pool tuning knobs, resolved from the chain's effective config.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub strategy: LoadBalancingStrategy,
    pub unhealthy_threshold: u32,
    pub min_healthy_endpoints: u32,
    pub recovery_interval: Duration,
    pub health_check_interval: Duration,
}

impl PoolConfig {
    pub fn from_chain_defaults(defaults: &ChainDefaults) -> Self {
        Self {
            strategy: defaults.load_balancing_strategy,
            unhealthy_threshold: defaults.unhealthy_threshold,
            min_healthy_endpoints: defaults.min_healthy_endpoints,
            recovery_interval: defaults.recovery_interval(),
            health_check_interval: defaults.health_check_interval(),
        }
    }
}

/// A set of interchangeable RPC endpoints for one chain.
///
/// Selection, request-outcome reporting and monitor probes all run
/// concurrently; each endpoint carries its own lock and the pool only locks
/// membership.
#[derive(Debug)]
pub struct RpcPool<C> {
    urls: Vec<String>,
    endpoints: RwLock<Vec<Arc<Endpoint<C>>>>,
    cursor: AtomicUsize,
    config: PoolConfig,
}

impl<C: Send + Sync + 'static> RpcPool<C> {
    pub fn new(urls: Vec<String>, config: PoolConfig) -> Self {
        Self {
            urls,
            endpoints: RwLock::new(Vec::new()),
            cursor: AtomicUsize::new(0),
            config,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Builds a client per URL and verifies enough endpoints came up.
    ///
    /// Failing URLs are skipped with a warning; fewer than
    /// `min_healthy_endpoints` usable endpoints is a startup failure.
    pub async fn start<F: ClientFactory<C>>(&self, factory: &F) -> Result<(), PoolError> {
        let mut built = Vec::with_capacity(self.urls.len());
        for url in &self.urls {
            match factory.build(url).await {
                Ok(client) => built.push(Arc::new(Endpoint::new(url.clone(), client))),
                Err(err) => {
                    warn!(url, %err, "skipping endpoint that failed to initialize");
                }
            }
        }

        let healthy = built.len() as u32;
        if healthy < self.config.min_healthy_endpoints {
            return Err(PoolError::InsufficientEndpoints {
                healthy,
                required: self.config.min_healthy_endpoints,
            });
        }

        *self.endpoints.write() = built;
        info!(endpoints = healthy, "rpc pool started");
        Ok(())
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<Endpoint<C>>> {
        self.endpoints.read().clone()
    }

    fn usable(&self) -> Vec<Arc<Endpoint<C>>> {
        self.endpoints
            .read()
            .iter()
            .filter(|ep| ep.state().is_usable())
            .cloned()
            .collect()
    }

    /// Picks an endpoint per the configured strategy.
    ///
    /// Excluded and unhealthy endpoints are never returned.
    pub fn select_endpoint(&self) -> Result<Arc<Endpoint<C>>, PoolError> {
        let usable = self.usable();
        if usable.is_empty() {
            return Err(PoolError::NoHealthyEndpoints);
        }

        let selected = match self.config.strategy {
            LoadBalancingStrategy::RoundRobin => self.pick_round_robin(&usable),
            LoadBalancingStrategy::Weighted => self.pick_weighted(&usable),
        };
        selected.mark_used();
        Ok(selected)
    }

    fn pick_round_robin(&self, usable: &[Arc<Endpoint<C>>]) -> Arc<Endpoint<C>> {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % usable.len();
        usable[idx].clone()
    }

    fn pick_weighted(&self, usable: &[Arc<Endpoint<C>>]) -> Arc<Endpoint<C>> {
        let weights: Vec<f64> = usable.iter().map(|ep| ep.health_score()).collect();
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            // all scores bottomed out; fall back to fair rotation
            return self.pick_round_robin(usable);
        }

        let mut roll = rand::thread_rng().gen_range(0.0..total);
        for (ep, weight) in usable.iter().zip(&weights) {
            if roll < *weight {
                return ep.clone();
            }
            roll -= weight;
        }
        usable[usable.len() - 1].clone()
    }

    fn find(&self, url: &str) -> Result<Arc<Endpoint<C>>, PoolError> {
        self.endpoints
            .read()
            .iter()
            .find(|ep| ep.url() == url)
            .cloned()
            .ok_or_else(|| PoolError::UnknownEndpoint(url.to_owned()))
    }

    /// Feeds a request outcome back into the endpoint's metrics and drives
    /// its state machine.
    pub fn update_endpoint_metrics(
        &self,
        url: &str,
        success: bool,
        latency: Duration,
        err: Option<&str>,
    ) -> Result<(), PoolError> {
        let endpoint = self.find(url)?;
        if success {
            self.apply_success(&endpoint, latency);
        } else {
            if let Some(err) = err {
                warn!(url, err, "endpoint request failed");
            }
            self.apply_failure(&endpoint);
        }
        Ok(())
    }

    pub(crate) fn apply_success(&self, endpoint: &Endpoint<C>, latency: Duration) {
        let mut inner = endpoint.inner.lock();
        inner.metrics.record_success(latency);
        if inner.state == EndpointState::Degraded
            && inner.metrics.success_rate() > PROMOTE_SUCCESS_RATE
        {
            info!(url = endpoint.url(), "endpoint promoted to healthy");
            inner.state = EndpointState::Healthy;
        }
    }

    pub(crate) fn apply_failure(&self, endpoint: &Endpoint<C>) {
        let mut inner = endpoint.inner.lock();
        inner.metrics.record_failure();

        if inner.metrics.consecutive_failures() >= self.config.unhealthy_threshold
            && inner.state != EndpointState::Excluded
        {
            warn!(
                url = endpoint.url(),
                failures = inner.metrics.consecutive_failures(),
                "endpoint excluded"
            );
            inner.state = EndpointState::Excluded;
            inner.excluded_at = Some(tokio::time::Instant::now());
        } else if inner.state == EndpointState::Healthy
            && inner.metrics.success_rate() < DEMOTE_SUCCESS_RATE
        {
            warn!(url = endpoint.url(), "endpoint degraded");
            inner.state = EndpointState::Degraded;
        }
    }

    /// Restores an endpoint into rotation as Degraded with a seeded score.
    /// Promotion back to Healthy is earned through real traffic.
    pub(crate) fn restore_endpoint(&self, endpoint: &Endpoint<C>) {
        let mut inner = endpoint.inner.lock();
        inner.state = EndpointState::Degraded;
        inner.excluded_at = None;
        inner.metrics.clear_failure_streak();
        inner.metrics.seed_score(RECOVERED_SCORE);
    }

    /// Operational override: pull an endpoint out of rotation now.
    pub fn force_exclude_endpoint(&self, url: &str) -> Result<(), PoolError> {
        let endpoint = self.find(url)?;
        let mut inner = endpoint.inner.lock();
        inner.state = EndpointState::Excluded;
        inner.excluded_at = Some(tokio::time::Instant::now());
        warn!(url, "endpoint force-excluded");
        Ok(())
    }

    /// Operational override: put an endpoint back into rotation now.
    pub fn force_recover_endpoint(&self, url: &str) -> Result<(), PoolError> {
        let endpoint = self.find(url)?;
        self.restore_endpoint(&endpoint);
        info!(url, "endpoint force-recovered");
        Ok(())
    }

    pub fn endpoint_stats(&self) -> Vec<EndpointStats> {
        self.endpoints.read().iter().map(|ep| ep.stats()).collect()
    }

    pub(crate) fn usable_count(&self) -> u32 {
        self.endpoints
            .read()
            .iter()
            .filter(|ep| ep.state().is_usable())
            .count() as u32
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn test_config(strategy: LoadBalancingStrategy) -> PoolConfig {
        PoolConfig {
            strategy,
            unhealthy_threshold: 3,
            min_healthy_endpoints: 1,
            recovery_interval: Duration::from_secs(300),
            health_check_interval: Duration::from_secs(30),
        }
    }

    async fn started_pool(urls: &[&str], strategy: LoadBalancingStrategy) -> RpcPool<()> {
        let pool = RpcPool::new(
            urls.iter().map(|u| u.to_string()).collect(),
            test_config(strategy),
        );
        let mut factory = MockClientFactory::<()>::new();
        factory.expect_build().returning(|_| Ok(()));
        pool.start(&factory).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn start_requires_min_endpoints() {
        let mut config = test_config(LoadBalancingStrategy::RoundRobin);
        config.min_healthy_endpoints = 2;
        let pool: RpcPool<()> = RpcPool::new(vec!["a".into(), "b".into()], config);

        let mut factory = MockClientFactory::<()>::new();
        factory.expect_build().withf(|url| url == "a").returning(|_| Ok(()));
        factory.expect_build().withf(|url| url == "b").returning(|url| {
            Err(PoolError::ClientBuild {
                url: url.to_owned(),
                reason: "connection refused".into(),
            })
        });

        let err = pool.start(&factory).await.unwrap_err();
        assert!(matches!(
            err,
            PoolError::InsufficientEndpoints {
                healthy: 1,
                required: 2
            }
        ));
    }

    #[tokio::test]
    async fn round_robin_cycles_fairly() {
        let pool = started_pool(&["a", "b", "c"], LoadBalancingStrategy::RoundRobin).await;

        let mut counts: HashMap<String, u32> = HashMap::new();
        let mut last = String::new();
        for _ in 0..6 {
            let ep = pool.select_endpoint().unwrap();
            assert_ne!(ep.url(), last, "consecutive picks must differ");
            last = ep.url().to_owned();
            *counts.entry(last.clone()).or_default() += 1;
        }

        assert_eq!(counts.len(), 3);
        assert!(counts.values().all(|&n| n == 2));
    }

    #[tokio::test]
    async fn consecutive_failures_exclude_endpoint() {
        let pool = started_pool(&["a", "b"], LoadBalancingStrategy::RoundRobin).await;

        for _ in 0..3 {
            pool.update_endpoint_metrics("b", false, Duration::ZERO, Some("timeout"))
                .unwrap();
        }

        let stats: HashMap<_, _> = pool
            .endpoint_stats()
            .into_iter()
            .map(|s| (s.url.clone(), s))
            .collect();
        assert_eq!(stats["b"].state, EndpointState::Excluded);
        assert_eq!(stats["a"].state, EndpointState::Healthy);

        // selection only ever returns the survivor
        for _ in 0..5 {
            assert_eq!(pool.select_endpoint().unwrap().url(), "a");
        }
    }

    #[tokio::test]
    async fn selection_fails_when_all_excluded() {
        let pool = started_pool(&["a"], LoadBalancingStrategy::RoundRobin).await;
        pool.force_exclude_endpoint("a").unwrap();
        assert!(matches!(
            pool.select_endpoint(),
            Err(PoolError::NoHealthyEndpoints)
        ));
    }

    #[tokio::test]
    async fn weighted_selection_prefers_higher_scores() {
        let pool = started_pool(&["hi", "lo"], LoadBalancingStrategy::Weighted).await;

        // drag "lo" down to roughly half the score of "hi"
        let lo = pool.find("lo").unwrap();
        {
            let mut inner = lo.inner.lock();
            inner.metrics.seed_score(50.0);
        }

        let mut counts: HashMap<String, u32> = HashMap::new();
        for _ in 0..1000 {
            let ep = pool.select_endpoint().unwrap();
            *counts.entry(ep.url().to_owned()).or_default() += 1;
        }

        assert!(
            counts["hi"] > counts["lo"],
            "expected hi ({}) to be picked more than lo ({})",
            counts["hi"],
            counts["lo"]
        );
    }

    #[tokio::test]
    async fn weighted_zero_scores_fall_back_to_round_robin() {
        let pool = started_pool(&["a", "b"], LoadBalancingStrategy::Weighted).await;
        for url in ["a", "b"] {
            let ep = pool.find(url).unwrap();
            ep.inner.lock().metrics.seed_score(0.0);
        }

        let mut counts: HashMap<String, u32> = HashMap::new();
        for _ in 0..4 {
            let ep = pool.select_endpoint().unwrap();
            *counts.entry(ep.url().to_owned()).or_default() += 1;
        }
        assert_eq!(counts["a"], 2);
        assert_eq!(counts["b"], 2);
    }

    #[tokio::test]
    async fn degraded_promotes_after_sustained_success() {
        let pool = started_pool(&["a"], LoadBalancingStrategy::RoundRobin).await;
        let ep = pool.find("a").unwrap();

        // one failure on a healthy endpoint with no history drops the rate
        // to 0, demoting it
        pool.update_endpoint_metrics("a", false, Duration::ZERO, None)
            .unwrap();
        assert_eq!(ep.state(), EndpointState::Degraded);

        // grind the success rate back above the promotion bar
        for _ in 0..10 {
            pool.update_endpoint_metrics("a", true, Duration::from_millis(20), None)
                .unwrap();
        }
        assert_eq!(ep.state(), EndpointState::Healthy);
    }

    #[tokio::test]
    async fn force_recover_restores_degraded_with_seeded_score() {
        let pool = started_pool(&["a"], LoadBalancingStrategy::RoundRobin).await;
        pool.force_exclude_endpoint("a").unwrap();

        pool.force_recover_endpoint("a").unwrap();
        let ep = pool.find("a").unwrap();
        assert_eq!(ep.state(), EndpointState::Degraded);
        assert_eq!(ep.health_score(), 70.0);
    }
}
