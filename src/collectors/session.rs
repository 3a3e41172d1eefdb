//! Fetch stage: one rate-limited, retrying session against a race source.

use std::sync::Arc;

use chrono::{NaiveDate, SecondsFormat, Utc};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use super::policy::AccessPolicy;
use super::rate_limit::{RateLimiter, RequestCounters, RequestStats};
use super::types::{CollectorError, RaceSource, RawRecord, ScrapingConfig};
use crate::error::FetchError;
use crate::metrics;

/// A fetch session against one source.
///
/// The access policy is resolved before the first request and cached for
/// the session's lifetime; pacing state and request counters are likewise
/// scoped to the session.
pub struct FetchSession {
    source: Arc<dyn RaceSource>,
    config: ScrapingConfig,
    policy: OnceCell<AccessPolicy>,
    limiter: RateLimiter,
    counters: RequestCounters,
}

impl FetchSession {
    pub fn new(source: Arc<dyn RaceSource>, config: ScrapingConfig) -> Self {
        let limiter = RateLimiter::new(config.base_delay, config.max_delay);
        Self {
            source,
            config,
            policy: OnceCell::new(),
            limiter,
            counters: RequestCounters::default(),
        }
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub fn config(&self) -> &ScrapingConfig {
        &self.config
    }

    /// Request statistics for this session so far.
    pub fn request_stats(&self) -> RequestStats {
        self.counters.snapshot()
    }

    /// Fetch all records for `target_date`.
    ///
    /// Returns an empty vector when the source has no data for the date.
    ///
    /// # Errors
    ///
    /// - [`FetchError::PolicyViolation`] when the access policy forbids the
    ///   request, or the source refuses access. Never retried.
    /// - [`FetchError::SourceUnavailable`] when every attempt failed with a
    ///   transient error.
    /// - [`FetchError::InvalidResponse`] when the source answered with a
    ///   payload that retrying will not fix.
    pub async fn fetch(&self, target_date: NaiveDate) -> Result<Vec<RawRecord>, FetchError> {
        let source_name = self.source.name().to_string();
        let url = self.source.request_url(target_date);

        if self.config.respect_robots {
            let policy = self.resolve_policy().await;
            if !policy.allows(&self.config.user_agent, &url) {
                error!(source = %source_name, url = %url, "Access policy disallows request");
                return Err(FetchError::PolicyViolation { source_name, url });
            }
        }

        let attempts = self.config.max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            self.limiter.pace().await;
            self.counters.record_attempt();
            debug!(source = %source_name, %target_date, attempt = attempt + 1, "Requesting records");

            match self.source.fetch_records(target_date).await {
                Ok(records) => {
                    self.limiter.mark_success();
                    metrics::record_fetch_request("success");
                    if records.is_empty() {
                        warn!(source = %source_name, %target_date, "Source returned no records");
                    } else {
                        info!(source = %source_name, %target_date, records = records.len(), "Fetched records");
                    }
                    return Ok(self.stamp_provenance(records));
                }
                Err(CollectorError::AccessDenied { url }) => {
                    self.counters.record_failure();
                    metrics::record_fetch_request("denied");
                    error!(source = %source_name, url = %url, "Source denied access");
                    return Err(FetchError::PolicyViolation { source_name, url });
                }
                Err(e) if !e.is_transient() => {
                    self.counters.record_failure();
                    metrics::record_fetch_request("failure");
                    error!(source = %source_name, error = %e, "Non-retryable source error");
                    return Err(FetchError::InvalidResponse {
                        source_name,
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    self.counters.record_failure();
                    metrics::record_fetch_request("failure");
                    warn!(
                        source = %source_name,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        error = %e,
                        "Request failed"
                    );
                    last_error = e.to_string();

                    if attempt + 1 < attempts {
                        let wait = self.limiter.retry_delay(attempt, e.retry_after());
                        info!(wait_ms = wait.as_millis() as u64, "Retrying after backoff");
                        if !wait.is_zero() {
                            tokio::time::sleep(wait).await;
                        }
                    }
                }
            }
        }

        error!(source = %source_name, %target_date, attempts, "Fetch failed after all attempts");
        Err(FetchError::SourceUnavailable {
            source_name,
            attempts,
            last_error,
        })
    }

    async fn resolve_policy(&self) -> &AccessPolicy {
        self.policy
            .get_or_init(|| async {
                match self.source.access_policy(&self.config.user_agent).await {
                    Ok(policy) => policy,
                    Err(e) => {
                        warn!(source = %self.source.name(), error = %e, "Could not resolve access policy, assuming allowed");
                        AccessPolicy::allow_all()
                    }
                }
            })
            .await
    }

    fn stamp_provenance(&self, records: Vec<RawRecord>) -> Vec<RawRecord> {
        let scraped_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        records
            .into_iter()
            .map(|mut record| {
                record.insert_if_absent("source", self.source.name());
                record.insert_if_absent("scraped_at", scraped_at.clone());
                record
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::CollectorResult;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Source that fails `failures` times before answering.
    struct FlakySource {
        failures: u32,
        retry_after: Option<u64>,
        calls: AtomicU32,
        policy_calls: AtomicU32,
        robots: Option<&'static str>,
    }

    impl FlakySource {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                retry_after: None,
                calls: AtomicU32::new(0),
                policy_calls: AtomicU32::new(0),
                robots: None,
            }
        }
    }

    #[async_trait]
    impl RaceSource for FlakySource {
        fn name(&self) -> &str {
            "flaky"
        }

        fn request_url(&self, date: NaiveDate) -> String {
            format!("https://example.com/racing/{}", date)
        }

        async fn access_policy(&self, _user_agent: &str) -> CollectorResult<AccessPolicy> {
            self.policy_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.robots.map(AccessPolicy::parse).unwrap_or_default())
        }

        async fn fetch_records(&self, date: NaiveDate) -> CollectorResult<Vec<RawRecord>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                if let Some(secs) = self.retry_after {
                    return Err(CollectorError::RateLimited {
                        retry_after: Some(secs),
                    });
                }
                return Err(CollectorError::ServerError { status: 503 });
            }
            Ok(vec![RawRecord::new()
                .with("date", date.to_string())
                .with("race_number", 1)
                .with("venue", "Ellerslie")])
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 15).expect("valid date")
    }

    #[tokio::test]
    async fn test_fetch_succeeds_after_transient_failures() {
        let source = Arc::new(FlakySource::new(2));
        let session = FetchSession::new(source.clone(), ScrapingConfig::without_delays());

        let records = session.fetch(date()).await.expect("third attempt succeeds");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get_str("source"), Some("flaky"));
        assert!(records[0].contains_key("scraped_at"));

        let stats = session.request_stats();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.failed_requests, 2);
    }

    #[tokio::test]
    async fn test_fetch_exhausts_retries() {
        let source = Arc::new(FlakySource::new(u32::MAX));
        let session = FetchSession::new(source, ScrapingConfig::without_delays());

        let err = session.fetch(date()).await.expect_err("all attempts fail");
        assert!(matches!(err, FetchError::SourceUnavailable { attempts: 3, .. }));
        assert!(err.to_string().contains("after 3 attempts"));
        assert_eq!(session.request_stats().failed_requests, 3);
    }

    #[tokio::test]
    async fn test_policy_violation_not_retried() {
        let mut source = FlakySource::new(0);
        source.robots = Some("User-agent: *\nDisallow: /racing\n");
        let source = Arc::new(source);
        let session = FetchSession::new(source.clone(), ScrapingConfig::without_delays());

        let err = session.fetch(date()).await.expect_err("policy forbids");
        assert!(matches!(err, FetchError::PolicyViolation { .. }));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_policy_resolved_once_per_session() {
        let source = Arc::new(FlakySource::new(0));
        let session = FetchSession::new(source.clone(), ScrapingConfig::without_delays());

        session.fetch(date()).await.expect("first fetch");
        session.fetch(date()).await.expect("second fetch");
        assert_eq!(source.policy_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_robots_ignored_when_disabled() {
        let mut source = FlakySource::new(0);
        source.robots = Some("User-agent: *\nDisallow: /\n");
        let source = Arc::new(source);
        let config = ScrapingConfig::without_delays().with_respect_robots(false);
        let session = FetchSession::new(source.clone(), config);

        assert!(session.fetch(date()).await.is_ok());
        assert_eq!(source.policy_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_hint_extends_backoff() {
        let mut source = FlakySource::new(1);
        source.retry_after = Some(1);
        let session = FetchSession::new(Arc::new(source), ScrapingConfig::without_delays());

        let started = tokio::time::Instant::now();
        session.fetch(date()).await.expect("second attempt succeeds");
        assert!(started.elapsed() >= std::time::Duration::from_secs(1));
        assert_eq!(session.request_stats().failed_requests, 1);
    }
}
