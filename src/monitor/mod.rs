//! Quality monitoring of exported datasets.
//!
//! The monitor reads the most recent daily Parquet exports, checks their
//! freshness and volume, flags anomalies and persists an append-only
//! history of [`QualityReport`]s. Monitoring is advisory: it never blocks
//! or fails a pipeline run.

pub mod checks;
pub mod report;

pub use checks::{
    calculate_data_freshness_metrics, daily_counts, detect_data_anomalies,
    detect_low_volume_days, Anomaly, AnomalyThresholds, FreshnessMetrics, FreshnessStatus,
};
pub use report::{
    dataset_quality_metrics, load_report_history, save_report, DatasetQualityMetrics,
    IssueCategory, OverallStatus, QualityReport, HEALTHY_RECOMMENDATION,
};

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::error::MonitoringError;
use crate::export::{DatasetStore, ExportFormat, LocalStore};
use crate::metrics;
use crate::transform::Dataset;
use crate::utils::local_today;

/// Monitor settings.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Directory holding the daily exports.
    pub export_dir: PathBuf,
    /// Directory receiving monitoring reports.
    pub reports_dir: PathBuf,
    /// Dataset kind in export file names, e.g. `racing_data`.
    pub dataset_kind: String,
    pub thresholds: AnomalyThresholds,
    /// Log an alert when a report is not healthy.
    pub alert_on_issues: bool,
}

impl MonitorConfig {
    pub fn new(export_dir: impl Into<PathBuf>, reports_dir: impl Into<PathBuf>) -> Self {
        Self {
            export_dir: export_dir.into(),
            reports_dir: reports_dir.into(),
            dataset_kind: "racing_data".to_string(),
            thresholds: AnomalyThresholds::default(),
            alert_on_issues: true,
        }
    }

    pub fn with_dataset_kind(mut self, kind: impl Into<String>) -> Self {
        self.dataset_kind = kind.into();
        self
    }

    pub fn with_thresholds(mut self, thresholds: AnomalyThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_alerts(mut self, enabled: bool) -> Self {
        self.alert_on_issues = enabled;
        self
    }
}

/// Reads recent exports and produces quality reports.
#[derive(Clone)]
pub struct QualityMonitor {
    config: MonitorConfig,
    store: Arc<dyn DatasetStore>,
}

impl QualityMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_store(config, Arc::new(LocalStore::new()))
    }

    pub fn with_store(config: MonitorConfig, store: Arc<dyn DatasetStore>) -> Self {
        Self { config, store }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Load the Parquet exports for the `days_back` days ending at `today`.
    ///
    /// Missing and unreadable files are skipped with a warning.
    pub fn load_recent_data(&self, days_back: u32, today: NaiveDate) -> Vec<Dataset> {
        let mut datasets = Vec::new();
        let mut missing = Vec::new();
        for offset in 0..days_back {
            let date = today - Duration::days(i64::from(offset));
            let stem = ExportFormat::Parquet.file_stem(&self.config.dataset_kind, date);
            let path = self
                .config
                .export_dir
                .join(format!("{}.{}", stem, ExportFormat::Parquet.extension()));

            if !path.exists() {
                missing.push(date);
                continue;
            }

            match self.store.read_parquet(&path) {
                Ok(dataset) => {
                    debug!(path = %path.display(), rows = dataset.num_rows(), "Loaded export");
                    datasets.push(dataset);
                }
                Err(e) => {
                    let err = MonitoringError::LoadFailed {
                        path: path.display().to_string(),
                        reason: e.to_string(),
                    };
                    warn!(error = %err, "Skipping unreadable export");
                }
            }
        }

        if !missing.is_empty() {
            let dates: Vec<String> = missing.iter().map(ToString::to_string).collect();
            warn!(
                export_dir = %self.config.export_dir.display(),
                missing = %dates.join(", "),
                "Skipping days without an export"
            );
        }
        datasets
    }

    /// Run the checks over `datasets` and assemble a report.
    pub fn generate_report(
        &self,
        datasets: &[Dataset],
        days_back: u32,
        now: DateTime<Utc>,
    ) -> QualityReport {
        let thresholds = &self.config.thresholds;
        let (freshness, anomalies) = if datasets.is_empty() {
            (None, None)
        } else {
            (
                Some(calculate_data_freshness_metrics(datasets, now, thresholds)),
                Some(detect_data_anomalies(datasets, thresholds)),
            )
        };
        QualityReport::generate(now, days_back, datasets.len(), freshness, anomalies)
    }

    /// Load, check, persist and alert in one pass.
    ///
    /// # Errors
    ///
    /// Returns `MonitoringError` only when the report cannot be persisted.
    pub async fn run(&self, days_back: u32) -> Result<(QualityReport, PathBuf), MonitoringError> {
        self.run_at(days_back, Utc::now(), local_today()).await
    }

    /// [`run`](Self::run) with an explicit clock: `now` for freshness and the
    /// report timestamp, `today` as the last day of the export window.
    pub async fn run_at(
        &self,
        days_back: u32,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> Result<(QualityReport, PathBuf), MonitoringError> {
        let this = self.clone();
        let datasets = tokio::task::spawn_blocking(move || this.load_recent_data(days_back, today))
            .await
            .map_err(|e| MonitoringError::LoadFailed {
                path: self.config.export_dir.display().to_string(),
                reason: e.to_string(),
            })?;

        let report = self.generate_report(&datasets, days_back, now);
        let path = save_report(&report, &self.config.reports_dir).await?;

        metrics::set_monitor_status(report.overall_status.severity());
        info!(
            status = %report.overall_status,
            issues = report.issues.len(),
            datasets = report.datasets_loaded,
            "Monitoring pass complete"
        );

        if self.config.alert_on_issues && !report.is_healthy() {
            warn!(
                status = %report.overall_status,
                issues = ?report.issues,
                recommendations = ?report.recommendations,
                "Data quality alert"
            );
        }

        Ok((report, path))
    }

    /// Persisted reports, oldest first.
    pub fn report_history(&self) -> Vec<QualityReport> {
        load_report_history(&self.config.reports_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::RawRecord;
    use crate::transform::RaceDataTransformer;
    use tempfile::TempDir;

    fn export_day(dir: &std::path::Path, date: NaiveDate, venues: &[&str], scraped_at: &str) {
        let records: Vec<RawRecord> = venues
            .iter()
            .enumerate()
            .map(|(i, venue)| {
                RawRecord::new()
                    .with("date", date.to_string())
                    .with("race_number", i as i64 + 1)
                    .with("venue", *venue)
                    .with("source", "tab_nz")
                    .with("scraped_at", scraped_at)
            })
            .collect();
        let dataset = RaceDataTransformer::new()
            .transform(&records)
            .expect("transform should succeed");
        let path = dir.join(format!("racing_data_{}.parquet", date));
        LocalStore::new()
            .write_parquet(&dataset, &path)
            .expect("write parquet");
    }

    #[test]
    fn test_load_recent_data_skips_corrupt_export() {
        let dir = TempDir::new().expect("temp dir");
        let today = NaiveDate::from_ymd_opt(2024, 1, 15).expect("date");
        export_day(dir.path(), today, &["Ellerslie"], "2024-01-15T06:00:00Z");
        std::fs::write(dir.path().join("racing_data_2024-01-14.parquet"), b"not parquet")
            .expect("write");

        let monitor = QualityMonitor::new(MonitorConfig::new(dir.path(), dir.path()));
        let loaded = monitor.load_recent_data(2, today);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].num_rows(), 1);
    }

    #[test]
    fn test_load_recent_data_skips_missing_days() {
        let dir = TempDir::new().expect("temp dir");
        let today = NaiveDate::from_ymd_opt(2024, 1, 15).expect("date");
        let three_days_ago = NaiveDate::from_ymd_opt(2024, 1, 12).expect("date");
        export_day(dir.path(), today, &["Ellerslie"], "2024-01-15T06:00:00Z");
        export_day(dir.path(), three_days_ago, &["Trentham", "Riccarton"], "2024-01-12T06:00:00Z");

        let monitor = QualityMonitor::new(MonitorConfig::new(dir.path(), dir.path()));
        let loaded = monitor.load_recent_data(7, today);
        let rows: Vec<usize> = loaded.iter().map(Dataset::num_rows).collect();
        assert_eq!(rows, vec![1, 2]);

        // Window ending before any export holds only missing days.
        let earlier = NaiveDate::from_ymd_opt(2024, 1, 11).expect("date");
        assert!(monitor.load_recent_data(5, earlier).is_empty());
    }

    #[test]
    fn test_generate_report_without_data() {
        let dir = TempDir::new().expect("temp dir");
        let monitor = QualityMonitor::new(MonitorConfig::new(dir.path(), dir.path()));
        let report = monitor.generate_report(&[], 7, Utc::now());
        assert_eq!(report.issues, vec![IssueCategory::NoRecentData]);
        assert!(report.freshness.is_none());
    }

    #[tokio::test]
    async fn test_run_persists_healthy_report() {
        let exports = TempDir::new().expect("temp dir");
        let reports = TempDir::new().expect("temp dir");
        let now = Utc::now();
        let today = local_today();
        let scraped = now.to_rfc3339();
        export_day(
            exports.path(),
            today,
            &["Ellerslie", "Trentham", "Riccarton"],
            &scraped,
        );

        let monitor = QualityMonitor::new(MonitorConfig::new(exports.path(), reports.path()));
        let (report, path) = monitor.run(1).await.expect("monitor run");

        assert!(path.exists());
        assert_eq!(report.overall_status, OverallStatus::Healthy);
        assert_eq!(report.recommendations, vec![HEALTHY_RECOMMENDATION]);
        assert_eq!(monitor.report_history().len(), 1);
    }
}
