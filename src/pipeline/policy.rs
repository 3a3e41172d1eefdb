//! Retry and caching policies attached to stage invocations and whole runs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How one stage invocation is retried and cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub retry_delay: Duration,
    /// Lifetime of a cached result; `None` disables caching.
    pub cache_ttl: Option<Duration>,
}

impl Default for StagePolicy {
    fn default() -> Self {
        Self::once()
    }
}

impl StagePolicy {
    /// A single attempt with no caching.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            retry_delay: Duration::ZERO,
            cache_ttl: None,
        }
    }

    /// Fetch results are cached for an hour. Retries happen inside the
    /// fetch session.
    pub fn fetch() -> Self {
        Self {
            cache_ttl: Some(Duration::from_secs(3600)),
            ..Self::once()
        }
    }

    /// Transform results are cached for six hours.
    pub fn transform() -> Self {
        Self {
            cache_ttl: Some(Duration::from_secs(6 * 3600)),
            ..Self::once()
        }
    }

    /// Each export format gets two attempts, thirty seconds apart.
    pub fn export() -> Self {
        Self {
            max_attempts: 2,
            retry_delay: Duration::from_secs(30),
            cache_ttl: None,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn is_cached(&self) -> bool {
        self.cache_ttl.is_some_and(|ttl| !ttl.is_zero())
    }
}

/// Whole-run retry: the state machine restarts from `Pending` after a
/// cooldown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub cooldown: Duration,
}

impl Default for RunRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            cooldown: Duration::from_secs(300),
        }
    }
}

impl RunRetryPolicy {
    /// No whole-run retry.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            cooldown: Duration::ZERO,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}
