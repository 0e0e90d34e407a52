use std::time::Duration;

/// EMA smoothing factor for latency samples.
const LATENCY_EMA_ALPHA: f64 = 0.1;

/// Latency above this baseline starts eating into the health score.
const LATENCY_PENALTY_BASELINE_SECS: f64 = 1.0;

/// Rolling request metrics for one endpoint.
///
/// The derived health score stays within `[0, 100]`; recovery paths may
/// seed it directly.
#[derive(Debug, Clone, Default)]
pub struct EndpointMetrics {
    /// EMA of request latency, seconds.
    avg_latency_secs: f64,
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    consecutive_failures: u32,
    health_score: f64,
}

impl EndpointMetrics {
    pub fn new() -> Self {
        Self {
            health_score: 100.0,
            ..Self::default()
        }
    }

    pub fn record_success(&mut self, latency: Duration) {
        self.total_requests += 1;
        self.successful_requests += 1;
        self.consecutive_failures = 0;

        let sample = latency.as_secs_f64();
        if self.avg_latency_secs == 0.0 {
            self.avg_latency_secs = sample;
        } else {
            self.avg_latency_secs =
                LATENCY_EMA_ALPHA * sample + (1.0 - LATENCY_EMA_ALPHA) * self.avg_latency_secs;
        }

        self.recompute_score();
    }

    pub fn record_failure(&mut self) {
        self.total_requests += 1;
        self.failed_requests += 1;
        self.consecutive_failures += 1;
        self.recompute_score();
    }

    /// Success ratio; endpoints with no traffic count as fully successful.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 1.0;
        }
        self.successful_requests as f64 / self.total_requests as f64
    }

    pub fn avg_latency(&self) -> Duration {
        Duration::from_secs_f64(self.avg_latency_secs)
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests
    }

    pub fn successful_requests(&self) -> u64 {
        self.successful_requests
    }

    pub fn failed_requests(&self) -> u64 {
        self.failed_requests
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn health_score(&self) -> f64 {
        self.health_score
    }

    /// Seeds the score directly, used when restoring a recovered endpoint.
    pub fn seed_score(&mut self, score: f64) {
        self.health_score = score.clamp(0.0, 100.0);
    }

    /// Clears the failure streak without touching historical counters.
    pub fn clear_failure_streak(&mut self) {
        self.consecutive_failures = 0;
    }

    fn recompute_score(&mut self) {
        let base = self.success_rate() * 100.0;
        let latency_penalty =
            (5.0 * (self.avg_latency_secs - LATENCY_PENALTY_BASELINE_SECS).max(0.0)).min(20.0);
        let failure_penalty = (10.0 * self.consecutive_failures as f64).min(50.0);
        self.health_score = (base - latency_penalty - failure_penalty).clamp(0.0, 100.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_endpoint_scores_full() {
        let metrics = EndpointMetrics::new();
        assert_eq!(metrics.health_score(), 100.0);
        assert_eq!(metrics.success_rate(), 1.0);
    }

    #[test]
    fn latency_ema_tracks_samples() {
        let mut metrics = EndpointMetrics::new();
        metrics.record_success(Duration::from_millis(100));
        assert_eq!(metrics.avg_latency(), Duration::from_millis(100));

        metrics.record_success(Duration::from_millis(1100));
        // 0.1 * 1.1s + 0.9 * 0.1s = 0.2s
        let avg = metrics.avg_latency().as_secs_f64();
        assert!((avg - 0.2).abs() < 1e-9, "avg was {avg}");
    }

    #[test]
    fn failures_drag_score_down() {
        let mut metrics = EndpointMetrics::new();
        metrics.record_success(Duration::from_millis(50));
        let healthy_score = metrics.health_score();

        metrics.record_failure();
        metrics.record_failure();
        assert!(metrics.health_score() < healthy_score);
        assert_eq!(metrics.consecutive_failures(), 2);

        metrics.record_success(Duration::from_millis(50));
        assert_eq!(metrics.consecutive_failures(), 0);
    }

    #[test]
    fn score_stays_in_bounds() {
        let mut metrics = EndpointMetrics::new();
        for _ in 0..100 {
            metrics.record_failure();
            assert!((0.0..=100.0).contains(&metrics.health_score()));
        }
        for _ in 0..100 {
            metrics.record_success(Duration::from_secs(30));
            assert!((0.0..=100.0).contains(&metrics.health_score()));
        }
    }

    #[test]
    fn slow_endpoint_penalized_but_capped() {
        let mut metrics = EndpointMetrics::new();
        // drive the EMA well above the baseline
        for _ in 0..200 {
            metrics.record_success(Duration::from_secs(30));
        }
        // success rate is 1.0, so only the latency penalty applies, capped at 20
        assert!(metrics.health_score() >= 80.0 - 1e-9);
        assert!(metrics.health_score() < 81.0);
    }
}
