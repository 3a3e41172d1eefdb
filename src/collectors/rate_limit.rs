//! Per-session request pacing, exponential backoff and request counters.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Pacing state for one fetch session.
///
/// The delay state is per session, never global: concurrent sessions each
/// honour their own minimum delay.
#[derive(Debug)]
pub struct RateLimiter {
    base_delay: Duration,
    max_delay: Duration,
    needs_pacing: AtomicBool,
}

impl RateLimiter {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
            needs_pacing: AtomicBool::new(false),
        }
    }

    /// Sleep a randomized delay in `[base_delay, max_delay]` when a previous
    /// request in this session succeeded.
    pub async fn pace(&self) {
        if !self.needs_pacing.load(Ordering::Acquire) {
            return;
        }
        let delay = self.random_delay();
        if !delay.is_zero() {
            tracing::debug!(delay_ms = delay.as_millis() as u64, "Pacing before next request");
            tokio::time::sleep(delay).await;
        }
    }

    /// Record a successful request; the next one will be paced.
    pub fn mark_success(&self) {
        self.needs_pacing.store(true, Ordering::Release);
    }

    /// Delay before retry number `attempt + 1`: `base_delay * 2^attempt`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor)
    }

    /// Backoff for `attempt`, stretched to at least the source's
    /// `retry_after` hint.
    pub fn retry_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let backoff = self.backoff_delay(attempt);
        retry_after.map_or(backoff, |hint| backoff.max(hint))
    }

    /// Uniform random delay in `[base_delay, max_delay]`.
    pub fn random_delay(&self) -> Duration {
        use rand::RngExt;

        if self.max_delay <= self.base_delay {
            return self.base_delay;
        }
        let secs = rand::rng()
            .random_range(self.base_delay.as_secs_f64()..=self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

/// Running request counters for observability.
#[derive(Debug, Default)]
pub struct RequestCounters {
    total: AtomicU64,
    failed: AtomicU64,
}

impl RequestCounters {
    pub fn record_attempt(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RequestStats {
        RequestStats::new(
            self.total.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
        )
    }
}

/// Point-in-time request statistics of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestStats {
    pub total_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
}

impl RequestStats {
    pub fn new(total_requests: u64, failed_requests: u64) -> Self {
        let succeeded = total_requests.saturating_sub(failed_requests);
        Self {
            total_requests,
            failed_requests,
            success_rate: succeeded as f64 / total_requests.max(1) as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let limiter = RateLimiter::new(Duration::from_secs(1), Duration::from_secs(3));
        assert_eq!(limiter.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(limiter.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(limiter.backoff_delay(2), Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_saturates() {
        let limiter = RateLimiter::new(Duration::from_secs(1), Duration::from_secs(3));
        assert!(limiter.backoff_delay(64) >= Duration::from_secs(1 << 31));
    }

    #[test]
    fn test_retry_delay_honours_retry_after() {
        let limiter = RateLimiter::new(Duration::from_secs(1), Duration::from_secs(3));
        assert_eq!(limiter.retry_delay(0, None), Duration::from_secs(1));
        assert_eq!(
            limiter.retry_delay(0, Some(Duration::from_secs(10))),
            Duration::from_secs(10)
        );
        assert_eq!(
            limiter.retry_delay(3, Some(Duration::from_secs(2))),
            Duration::from_secs(8)
        );
    }

    #[test]
    fn test_random_delay_within_bounds() {
        let limiter = RateLimiter::new(Duration::from_millis(100), Duration::from_millis(300));
        for _ in 0..50 {
            let delay = limiter.random_delay();
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(300));
        }
    }

    #[test]
    fn test_random_delay_degenerate_range() {
        let limiter = RateLimiter::new(Duration::from_secs(2), Duration::from_secs(1));
        assert_eq!(limiter.random_delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_request_stats() {
        let counters = RequestCounters::default();
        for _ in 0..4 {
            counters.record_attempt();
        }
        counters.record_failure();
        let stats = counters.snapshot();
        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.failed_requests, 1);
        assert!((stats.success_rate - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_stats_rate() {
        let stats = RequestStats::new(0, 0);
        assert_eq!(stats.success_rate, 0.0);
    }
}
