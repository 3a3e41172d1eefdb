//! Pipeline orchestrator: sequences the stages of a run.
//!
//! A run is a state machine `Pending -> Fetching -> Validating ->
//! Transforming -> Exporting -> Done(..)`. The orchestrator owns the stage
//! policies (cache TTLs, export retries), the whole-run retry and the
//! backfill parallelism cap.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use super::cache::{ContentHash, PipelineCache};
use super::config::PipelineConfig;
use super::state::{CancellationFlag, RunState, RunStateMachine};
use super::summary::{PipelineRunSummary, RunError, RunErrorKind, RunStatus};
use crate::collectors::{build_source, FetchSession, RaceSource, RawRecord};
use crate::error::{ExportError, FetchError, MonitoringError, PipelineError, TransformError};
use crate::export::{DataExporter, ExportFormat, ExportManifest};
use crate::metrics;
use crate::monitor::{dataset_quality_metrics, QualityMonitor, QualityReport};
use crate::transform::{Dataset, RaceDataTransformer};
use crate::utils::local_today;
use crate::validation::RaceDataValidator;

/// Main orchestrator for daily race-data runs.
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    source: Arc<dyn RaceSource>,
    exporter: Arc<DataExporter>,
    cache: Arc<PipelineCache>,
    cancel: CancellationFlag,
    today: Option<NaiveDate>,
}

impl PipelineOrchestrator {
    /// Creates an orchestrator with the source selected by `config.source`.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError` if the configuration is invalid or the source
    /// cannot be built.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let source = build_source(&config.source, &config.scraping)?;
        Self::with_source(config, source)
    }

    /// Creates an orchestrator around an explicit source.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Config` if the configuration is invalid.
    pub fn with_source(
        config: PipelineConfig,
        source: Arc<dyn RaceSource>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let cache = PipelineCache::new(
            config.fetch_policy.cache_ttl.unwrap_or_default(),
            config.transform_policy.cache_ttl.unwrap_or_default(),
        );
        let exporter = DataExporter::new(config.export_dir.clone());

        info!(
            source = %source.name(),
            export_dir = %config.export_dir.display(),
            formats = ?config.export_formats,
            "Pipeline orchestrator initialized"
        );

        Ok(Self {
            config,
            source,
            exporter: Arc::new(exporter),
            cache: Arc::new(cache),
            cancel: CancellationFlag::new(),
            today: None,
        })
    }

    /// Share `cache` with other orchestrators.
    pub fn with_cache(mut self, cache: Arc<PipelineCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_exporter(mut self, exporter: Arc<DataExporter>) -> Self {
        self.exporter = exporter;
        self
    }

    pub fn with_cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancel = flag;
        self
    }

    /// Pin the date treated as today, instead of the local clock.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    /// The date validation and monitoring count from.
    pub fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(local_today)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<PipelineCache> {
        &self.cache
    }

    pub fn exporter(&self) -> &Arc<DataExporter> {
        &self.exporter
    }

    /// Handle that aborts this orchestrator's runs at the next stage
    /// boundary.
    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    /// Run the pipeline once for `target_date`.
    ///
    /// Never returns an error: every outcome, including failures, is a
    /// terminal [`PipelineRunSummary`].
    pub async fn run(&self, target_date: NaiveDate) -> PipelineRunSummary {
        let mut summary = PipelineRunSummary::new(target_date);
        let mut machine = RunStateMachine::new();
        let session = FetchSession::new(Arc::clone(&self.source), self.config.scraping.clone());

        info!(%target_date, run_id = %summary.run_id, "Starting pipeline run");

        if let Err(e) = self
            .drive(&mut machine, &mut summary, &session, target_date)
            .await
        {
            error!(%target_date, error = %e, "Pipeline run aborted");
            if summary.error.is_none() {
                summary.error = Some(RunError::new(RunErrorKind::Internal, e.to_string()));
            }
            if let Err(transition_err) = machine.transition(RunState::Done(RunStatus::Failed)) {
                warn!(%target_date, error = %transition_err, "Could not mark run as failed");
            }
        }

        summary.status = machine.status().unwrap_or(RunStatus::Failed);
        summary.states = machine.history().to_vec();
        if !summary.fetch_cached {
            summary.fetch_stats = Some(session.request_stats());
        }
        summary.finished_at = Utc::now();

        metrics::record_run(summary.status.as_str(), summary.duration_secs());
        match summary.status {
            RunStatus::Failed => error!(
                %target_date,
                error = ?summary.error.as_ref().map(|e| e.to_string()),
                "Pipeline run failed"
            ),
            status => info!(
                %target_date,
                %status,
                records = ?summary.records_processed,
                duration_secs = summary.duration_secs(),
                "Pipeline run finished"
            ),
        }

        summary
    }

    /// Run with whole-run retry: a retryable failure restarts the state
    /// machine from `Pending` after the configured cooldown.
    pub async fn run_with_retry(&self, target_date: NaiveDate) -> PipelineRunSummary {
        let policy = &self.config.run_retry;
        let started_at = Utc::now();
        let mut attempt = 1;

        loop {
            let mut summary = self.run(target_date).await;
            summary.attempts = attempt;
            summary.started_at = started_at;

            if !summary.is_retryable()
                || attempt >= policy.attempts()
                || self.cancel.is_cancelled()
            {
                return summary;
            }

            warn!(
                %target_date,
                attempt,
                max_attempts = policy.attempts(),
                cooldown_secs = policy.cooldown.as_secs(),
                "Retrying pipeline run after cooldown"
            );
            if !policy.cooldown.is_zero() {
                tokio::time::sleep(policy.cooldown).await;
            }
            attempt += 1;
        }
    }

    /// Run every date in `start..=end`, at most `max_parallel` at a time.
    ///
    /// Each date gets its own fetch session. Summaries are sorted by date.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::InvalidDateRange` if `start` is after `end`.
    pub async fn run_backfill(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PipelineRunSummary>, PipelineError> {
        if start > end {
            return Err(PipelineError::InvalidDateRange { start, end });
        }

        let dates: Vec<NaiveDate> = start.iter_days().take_while(|d| *d <= end).collect();
        info!(
            %start,
            %end,
            days = dates.len(),
            max_parallel = self.config.max_parallel,
            "Starting backfill"
        );

        let limiter = Arc::new(Semaphore::new(self.config.max_parallel));
        let futures: Vec<_> = dates
            .into_iter()
            .map(|date| {
                let limiter = Arc::clone(&limiter);
                async move {
                    match limiter.acquire().await {
                        Ok(_permit) => self.run_with_retry(date).await,
                        Err(e) => {
                            let mut summary = PipelineRunSummary::new(date);
                            summary.error = Some(RunError::new(
                                RunErrorKind::Internal,
                                format!("Failed to acquire permit: {}", e),
                            ));
                            summary
                        }
                    }
                }
            })
            .collect();

        let mut summaries = futures::future::join_all(futures).await;
        summaries.sort_by_key(|s| s.target_date);

        let succeeded = summaries.iter().filter(|s| s.is_success()).count();
        info!(runs = summaries.len(), succeeded, "Backfill finished");

        Ok(summaries)
    }

    /// Run one monitoring pass over the exports of this orchestrator.
    ///
    /// # Errors
    ///
    /// Returns `MonitoringError` if the report cannot be persisted.
    pub async fn run_monitor(
        &self,
        days_back: u32,
    ) -> Result<(QualityReport, PathBuf), MonitoringError> {
        QualityMonitor::with_store(self.config.monitor_config(), self.exporter.store())
            .run_at(days_back, Utc::now(), self.today())
            .await
    }

    async fn drive(
        &self,
        machine: &mut RunStateMachine,
        summary: &mut PipelineRunSummary,
        session: &FetchSession,
        target_date: NaiveDate,
    ) -> Result<(), PipelineError> {
        // Fetch
        if self.enter(machine, summary, RunState::Fetching)? {
            return Ok(());
        }
        let records = match self.fetch(session, target_date).await {
            Ok((records, cached)) => {
                summary.fetch_cached = cached;
                records
            }
            Err(e) => return Self::fail(machine, summary, RunError::from(&e)),
        };
        if records.is_empty() {
            info!(%target_date, "No data for date");
            return machine.transition(RunState::Done(RunStatus::NoData));
        }

        // Validate
        if self.enter(machine, summary, RunState::Validating)? {
            return Ok(());
        }
        let verdict = RaceDataValidator::new()
            .with_reference_date(self.today())
            .validate(&records);
        summary.validation = Some(verdict.stats.clone());
        summary.validation_errors = verdict.errors.clone();
        summary.validation_warnings = verdict.warnings.clone();
        for warning in &verdict.warnings {
            warn!(%target_date, warning = %warning, "Validation warning");
        }
        if !verdict.is_valid {
            error!(
                %target_date,
                errors = %verdict.error_summary(),
                "Validation failed"
            );
            return machine.transition(RunState::Done(RunStatus::ValidationFailed));
        }

        // Transform
        if self.enter(machine, summary, RunState::Transforming)? {
            return Ok(());
        }
        let dataset = match self.transform(&records).await {
            Ok((dataset, cached)) => {
                summary.transform_cached = cached;
                dataset
            }
            Err(e) => {
                return Self::fail(
                    machine,
                    summary,
                    RunError::new(RunErrorKind::Transform, e.to_string()),
                )
            }
        };
        summary.records_processed = Some(dataset.num_rows());
        metrics::record_records_processed(dataset.num_rows());

        // Export
        if self.enter(machine, summary, RunState::Exporting)? {
            return Ok(());
        }
        let manifest = self.export_all(&dataset, target_date).await;
        if !manifest.failures.is_empty() {
            warn!(
                %target_date,
                succeeded = ?manifest.succeeded_formats(),
                failed = ?manifest.failed_formats(),
                "Export finished with failed formats"
            );
        }
        summary.export_manifest = Some(manifest);
        summary.quality_metrics = Some(dataset_quality_metrics(&dataset));

        machine.transition(RunState::Done(RunStatus::Success))
    }

    /// Check cancellation, then move into `stage`. Returns `true` when the
    /// run was cancelled instead.
    fn enter(
        &self,
        machine: &mut RunStateMachine,
        summary: &mut PipelineRunSummary,
        stage: RunState,
    ) -> Result<bool, PipelineError> {
        if self.cancel.is_cancelled() {
            Self::fail(machine, summary, RunError::cancelled(stage))?;
            return Ok(true);
        }
        machine.transition(stage)?;
        Ok(false)
    }

    fn fail(
        machine: &mut RunStateMachine,
        summary: &mut PipelineRunSummary,
        error: RunError,
    ) -> Result<(), PipelineError> {
        error!(
            target_date = %summary.target_date,
            state = %machine.state(),
            kind = %error.kind,
            error = %error.message,
            "Run failed"
        );
        summary.error = Some(error);
        machine.transition(RunState::Done(RunStatus::Failed))
    }

    async fn fetch(
        &self,
        session: &FetchSession,
        target_date: NaiveDate,
    ) -> Result<(Vec<RawRecord>, bool), FetchError> {
        if !self.config.fetch_policy.is_cached() {
            return Ok((session.fetch(target_date).await?, false));
        }
        let key = ContentHash::fetch_key(session.source_name(), target_date);
        self.cache
            .fetch
            .get_or_compute(&key, || session.fetch(target_date))
            .await
    }

    async fn transform(&self, records: &[RawRecord]) -> Result<(Dataset, bool), TransformError> {
        let transformer = RaceDataTransformer::new();
        if !self.config.transform_policy.is_cached() {
            return Ok((transformer.transform(records)?, false));
        }
        let key = ContentHash::transform_key(records)?;
        self.cache
            .transform
            .get_or_compute(&key, || async { transformer.transform(records) })
            .await
    }

    async fn export_all(&self, dataset: &Dataset, target_date: NaiveDate) -> ExportManifest {
        let mut manifest = ExportManifest::default();
        for format in &self.config.export_formats {
            let filename = format.file_stem(&self.config.dataset_kind, target_date);
            match self.export_with_retry(dataset, &filename, *format).await {
                Ok(path) => manifest.record_success(*format, path),
                Err(e) => {
                    error!(%target_date, format = %format, error = %e, "Export format failed");
                    manifest.record_failure(*format, e.to_string());
                }
            }
        }
        manifest.stats = self.exporter.export_summary().await;
        manifest
    }

    async fn export_with_retry(
        &self,
        dataset: &Dataset,
        filename: &str,
        format: ExportFormat,
    ) -> Result<PathBuf, ExportError> {
        let policy = &self.config.export_policy;
        let attempts = policy.attempts();
        let mut attempt = 1;

        loop {
            match self.exporter.export(dataset, filename, format).await {
                Ok(path) => return Ok(path),
                Err(e) if attempt < attempts => {
                    warn!(
                        format = %format,
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "Export attempt failed, retrying"
                    );
                    if !policy.retry_delay.is_zero() {
                        tokio::time::sleep(policy.retry_delay).await;
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::{AccessPolicy, CollectorError, CollectorResult, ScrapingConfig};
    use crate::pipeline::policy::{RunRetryPolicy, StagePolicy};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    struct ScriptedSource {
        records: Vec<RawRecord>,
        failures_before_success: u32,
        calls: AtomicU32,
    }

    impl ScriptedSource {
        fn new(records: Vec<RawRecord>) -> Self {
            Self {
                records,
                failures_before_success: 0,
                calls: AtomicU32::new(0),
            }
        }

        fn failing(mut self, failures: u32) -> Self {
            self.failures_before_success = failures;
            self
        }
    }

    #[async_trait]
    impl RaceSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        fn request_url(&self, date: NaiveDate) -> String {
            format!("memory://{}", date)
        }

        async fn access_policy(&self, _user_agent: &str) -> CollectorResult<AccessPolicy> {
            Ok(AccessPolicy::allow_all())
        }

        async fn fetch_records(&self, date: NaiveDate) -> CollectorResult<Vec<RawRecord>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                return Err(CollectorError::Timeout(Duration::from_secs(1)));
            }
            Ok(self
                .records
                .iter()
                .cloned()
                .map(|r| r.with("date", date.to_string()))
                .collect())
        }
    }

    fn record(venue: &str, race_number: i64) -> RawRecord {
        RawRecord::new()
            .with("race_number", race_number)
            .with("venue", venue)
            .with("race_time", "13:45")
    }

    fn config(dir: &TempDir) -> PipelineConfig {
        PipelineConfig::new()
            .with_scraping(ScrapingConfig::without_delays().with_respect_robots(false))
            .with_export_dir(dir.path().join("exports"))
            .with_reports_dir(dir.path().join("reports"))
            .with_export_formats(vec![ExportFormat::Parquet])
            .with_export_policy(StagePolicy::export().with_retry_delay(Duration::ZERO))
            .with_run_retry(RunRetryPolicy::none())
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 15).expect("date")
    }

    #[tokio::test]
    async fn test_successful_run_visits_every_state() {
        let dir = TempDir::new().expect("temp dir");
        let source = Arc::new(ScriptedSource::new(vec![record("Ellerslie", 1)]));
        let orchestrator =
            PipelineOrchestrator::with_source(config(&dir), source).expect("orchestrator");

        let summary = orchestrator.run(date()).await;
        assert_eq!(summary.status, RunStatus::Success);
        assert_eq!(summary.records_processed, Some(1));
        assert_eq!(summary.states.len(), 6);
        assert!(summary.quality_metrics.is_some());
        assert!(dir
            .path()
            .join("exports/racing_data_2024-01-15.parquet")
            .exists());
    }

    #[tokio::test]
    async fn test_second_run_served_from_cache() {
        let dir = TempDir::new().expect("temp dir");
        let source = Arc::new(ScriptedSource::new(vec![record("Trentham", 2)]));
        let orchestrator = PipelineOrchestrator::with_source(config(&dir), source.clone())
            .expect("orchestrator");

        let first = orchestrator.run(date()).await;
        let second = orchestrator.run(date()).await;

        assert!(!first.fetch_cached);
        assert!(second.fetch_cached);
        assert!(second.transform_cached);
        assert!(second.fetch_stats.is_none());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_validation_failure_is_terminal() {
        let dir = TempDir::new().expect("temp dir");
        let source = Arc::new(ScriptedSource::new(vec![record("  ", 1)]));
        let orchestrator =
            PipelineOrchestrator::with_source(config(&dir), source).expect("orchestrator");

        let summary = orchestrator.run(date()).await;
        assert_eq!(summary.status, RunStatus::ValidationFailed);
        assert!(summary.error.is_none());
        assert!(summary.records_processed.is_none());
        assert!(!summary.validation_errors.is_empty());
    }

    #[tokio::test]
    async fn test_run_retry_recovers_from_outage() {
        let dir = TempDir::new().expect("temp dir");
        // Three failures exhaust the first attempt's fetch session.
        let source = Arc::new(ScriptedSource::new(vec![record("Riccarton", 1)]).failing(3));
        let cfg = config(&dir).with_run_retry(
            RunRetryPolicy::default()
                .with_max_attempts(2)
                .with_cooldown(Duration::ZERO),
        );
        let orchestrator = PipelineOrchestrator::with_source(cfg, source).expect("orchestrator");

        let summary = orchestrator.run_with_retry(date()).await;
        assert_eq!(summary.status, RunStatus::Success);
        assert_eq!(summary.attempts, 2);
    }

    #[tokio::test]
    async fn test_backfill_rejects_inverted_range() {
        let dir = TempDir::new().expect("temp dir");
        let source = Arc::new(ScriptedSource::new(Vec::new()));
        let orchestrator =
            PipelineOrchestrator::with_source(config(&dir), source).expect("orchestrator");

        let err = orchestrator
            .run_backfill(date(), date().pred_opt().expect("date"))
            .await
            .expect_err("inverted range");
        assert!(matches!(err, PipelineError::InvalidDateRange { .. }));
    }

    #[tokio::test]
    async fn test_backfill_sorted_by_date() {
        let dir = TempDir::new().expect("temp dir");
        let source = Arc::new(ScriptedSource::new(vec![record("Ellerslie", 1)]));
        let orchestrator =
            PipelineOrchestrator::with_source(config(&dir).with_max_parallel(2), source)
                .expect("orchestrator");

        let end = NaiveDate::from_ymd_opt(2024, 1, 19).expect("date");
        let summaries = orchestrator
            .run_backfill(date(), end)
            .await
            .expect("backfill");

        assert_eq!(summaries.len(), 5);
        assert!(summaries.windows(2).all(|w| w[0].target_date < w[1].target_date));
        assert!(summaries.iter().all(|s| s.status == RunStatus::Success));
    }
}
