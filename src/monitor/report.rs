//! Quality report model, generation and append-only persistence.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

use super::checks::{Anomaly, FreshnessMetrics, FreshnessStatus};
use crate::error::MonitoringError;
use crate::transform::Dataset;

/// File name prefix of persisted monitoring reports.
pub const REPORT_PREFIX: &str = "monitoring_report_";

/// Overall health derived from the number of issue categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Warning,
    Critical,
}

impl OverallStatus {
    /// Zero issues: healthy; one: warning; two or more: critical.
    pub fn from_issue_count(count: usize) -> Self {
        match count {
            0 => OverallStatus::Healthy,
            1 => OverallStatus::Warning,
            _ => OverallStatus::Critical,
        }
    }

    /// Gauge value: 0 healthy, 1 warning, 2 critical.
    pub fn severity(&self) -> i64 {
        match self {
            OverallStatus::Healthy => 0,
            OverallStatus::Warning => 1,
            OverallStatus::Critical => 2,
        }
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverallStatus::Healthy => write!(f, "healthy"),
            OverallStatus::Warning => write!(f, "warning"),
            OverallStatus::Critical => write!(f, "critical"),
        }
    }
}

/// Category of a detected issue; each fires at most once per report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    NoRecentData,
    FreshnessCheckFailed,
    StaleData,
    AnomalyDetectionFailed,
    AnomaliesDetected,
}

impl IssueCategory {
    pub fn recommendation(&self) -> &'static str {
        match self {
            IssueCategory::NoRecentData => {
                "No recent data found - check export directory and pipeline schedule"
            }
            IssueCategory::FreshnessCheckFailed => {
                "Freshness check failed - verify scraped_at timestamps in exported data"
            }
            IssueCategory::StaleData => "Data is stale - check scraping pipeline status",
            IssueCategory::AnomalyDetectionFailed => {
                "Anomaly detection failed - verify exported dataset schema"
            }
            IssueCategory::AnomaliesDetected => {
                "Anomalies detected - review data quality and source systems"
            }
        }
    }
}

/// Recommendation emitted when no issue fired.
pub const HEALTHY_RECOMMENDATION: &str = "All systems healthy - no action required";

/// Outcome of one monitoring pass. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub timestamp: DateTime<Utc>,
    pub overall_status: OverallStatus,
    pub issues: Vec<IssueCategory>,
    pub freshness: Option<FreshnessMetrics>,
    pub anomalies: Vec<Anomaly>,
    pub recommendations: Vec<String>,
    /// Check failures, e.g. a missing column, keyed by check name.
    #[serde(default)]
    pub check_errors: BTreeMap<String, String>,
    pub days_back: u32,
    pub datasets_loaded: usize,
}

impl QualityReport {
    /// Assemble a report from check outcomes.
    ///
    /// `freshness` and `anomalies` are `None` when nothing was loaded.
    pub fn generate(
        timestamp: DateTime<Utc>,
        days_back: u32,
        datasets_loaded: usize,
        freshness: Option<Result<FreshnessMetrics, MonitoringError>>,
        anomalies: Option<Result<Vec<Anomaly>, MonitoringError>>,
    ) -> Self {
        let mut issues = Vec::new();
        let mut check_errors = BTreeMap::new();

        if datasets_loaded == 0 {
            issues.push(IssueCategory::NoRecentData);
        }

        let freshness = match freshness {
            Some(Ok(metrics)) => {
                if metrics.data_freshness_status == FreshnessStatus::Stale {
                    issues.push(IssueCategory::StaleData);
                }
                Some(metrics)
            }
            Some(Err(e)) => {
                issues.push(IssueCategory::FreshnessCheckFailed);
                check_errors.insert("freshness".to_string(), e.to_string());
                None
            }
            None => None,
        };

        let anomalies = match anomalies {
            Some(Ok(found)) => {
                if !found.is_empty() {
                    issues.push(IssueCategory::AnomaliesDetected);
                }
                found
            }
            Some(Err(e)) => {
                issues.push(IssueCategory::AnomalyDetectionFailed);
                check_errors.insert("anomalies".to_string(), e.to_string());
                Vec::new()
            }
            None => Vec::new(),
        };

        let recommendations = if issues.is_empty() {
            vec![HEALTHY_RECOMMENDATION.to_string()]
        } else {
            issues.iter().map(|i| i.recommendation().to_string()).collect()
        };

        Self {
            timestamp,
            overall_status: OverallStatus::from_issue_count(issues.len()),
            issues,
            freshness,
            anomalies,
            recommendations,
            check_errors,
            days_back,
            datasets_loaded,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.overall_status == OverallStatus::Healthy
    }

    fn file_stem(&self) -> String {
        format!("{}{}", REPORT_PREFIX, self.timestamp.format("%Y%m%d_%H%M%S"))
    }
}

/// Persist `report` under `dir` without ever overwriting an earlier report.
///
/// The file is `monitoring_report_<YYYYmmdd_HHMMSS>.json`; if that name is
/// taken, `_1`, `_2`, ... is appended.
///
/// # Errors
///
/// Returns `MonitoringError` if the directory or file cannot be written.
pub async fn save_report(report: &QualityReport, dir: &Path) -> Result<PathBuf, MonitoringError> {
    tokio::fs::create_dir_all(dir).await?;
    let body = serde_json::to_vec_pretty(report)?;
    let stem = report.file_stem();

    for suffix in 0u32..1000 {
        let name = if suffix == 0 {
            format!("{}.json", stem)
        } else {
            format!("{}_{}.json", stem, suffix)
        };
        let path = dir.join(name);

        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(mut file) => {
                file.write_all(&body).await?;
                file.flush().await?;
                tracing::info!(path = %path.display(), status = %report.overall_status, "Saved monitoring report");
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Err(MonitoringError::ReportPersist(format!(
        "too many reports named {} in {}",
        stem,
        dir.display()
    )))
}

/// Load persisted reports from `dir`, oldest first.
///
/// Unreadable files are skipped with a warning. A missing directory yields
/// an empty history.
pub fn load_report_history(dir: &Path) -> Vec<QualityReport> {
    if !dir.exists() {
        return Vec::new();
    }

    let mut reports: Vec<QualityReport> = WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy();
            name.starts_with(REPORT_PREFIX) && name.ends_with(".json")
        })
        .filter_map(|entry| {
            let parsed = std::fs::read_to_string(entry.path())
                .map_err(MonitoringError::from)
                .and_then(|content| Ok(serde_json::from_str::<QualityReport>(&content)?));
            match parsed {
                Ok(report) => Some(report),
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "Skipping unreadable report");
                    None
                }
            }
        })
        .collect();

    reports.sort_by_key(|r| r.timestamp);
    reports
}

/// Column-level quality metrics of one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetQualityMetrics {
    pub timestamp: DateTime<Utc>,
    pub total_records: usize,
    pub unique_venues: usize,
    /// Percentage of null values per column, 0-100.
    pub null_percentages: BTreeMap<String, f64>,
    /// Arrow data type per column.
    pub data_types: BTreeMap<String, String>,
}

/// Compute [`DatasetQualityMetrics`] for `dataset`.
pub fn dataset_quality_metrics(dataset: &Dataset) -> DatasetQualityMetrics {
    let rows = dataset.num_rows();
    let null_percentages = dataset
        .null_counts()
        .into_iter()
        .map(|(name, nulls)| {
            let pct = if rows == 0 {
                0.0
            } else {
                nulls as f64 / rows as f64 * 100.0
            };
            (name, pct)
        })
        .collect();

    let data_types = dataset
        .schema()
        .fields()
        .iter()
        .map(|f| (f.name().clone(), f.data_type().to_string()))
        .collect();

    let unique_venues = dataset
        .string_values("venue")
        .map(|v| {
            v.into_iter()
                .flatten()
                .collect::<std::collections::BTreeSet<_>>()
                .len()
        })
        .unwrap_or(0);

    DatasetQualityMetrics {
        timestamp: Utc::now(),
        total_records: rows,
        unique_venues,
        null_percentages,
        data_types,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::RawRecord;
    use crate::transform::RaceDataTransformer;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).single().expect("valid time")
    }

    fn metrics(status: FreshnessStatus) -> FreshnessMetrics {
        FreshnessMetrics {
            latest_scrape: fixed_time(),
            data_age_hours: 1.0,
            data_freshness_status: status,
            min_date: None,
            max_date: None,
            unique_dates: 1,
            total_records: 10,
            avg_daily_records: 10.0,
            min_daily_records: 10,
            max_daily_records: 10,
        }
    }

    #[test]
    fn test_healthy_report() {
        let report = QualityReport::generate(
            fixed_time(),
            7,
            1,
            Some(Ok(metrics(FreshnessStatus::Fresh))),
            Some(Ok(Vec::new())),
        );
        assert_eq!(report.overall_status, OverallStatus::Healthy);
        assert_eq!(report.recommendations, vec![HEALTHY_RECOMMENDATION]);
    }

    #[test]
    fn test_one_issue_is_warning() {
        let report = QualityReport::generate(
            fixed_time(),
            7,
            1,
            Some(Ok(metrics(FreshnessStatus::Stale))),
            Some(Ok(Vec::new())),
        );
        assert_eq!(report.overall_status, OverallStatus::Warning);
        assert_eq!(report.issues, vec![IssueCategory::StaleData]);
        assert_eq!(
            report.recommendations,
            vec!["Data is stale - check scraping pipeline status"]
        );
    }

    #[test]
    fn test_two_issues_are_critical() {
        let report = QualityReport::generate(
            fixed_time(),
            7,
            1,
            Some(Ok(metrics(FreshnessStatus::Stale))),
            Some(Ok(vec![Anomaly::MissingVenue {
                venue: "TRENTHAM".to_string(),
            }])),
        );
        assert_eq!(report.overall_status, OverallStatus::Critical);
        assert_eq!(report.recommendations.len(), 2);
    }

    #[test]
    fn test_check_failure_recorded() {
        let report = QualityReport::generate(
            fixed_time(),
            7,
            1,
            Some(Err(MonitoringError::MissingColumn("scraped_at".to_string()))),
            Some(Ok(Vec::new())),
        );
        assert_eq!(report.issues, vec![IssueCategory::FreshnessCheckFailed]);
        assert!(report.check_errors["freshness"].contains("scraped_at"));
    }

    #[test]
    fn test_no_data_report() {
        let report = QualityReport::generate(fixed_time(), 7, 0, None, None);
        assert_eq!(report.issues, vec![IssueCategory::NoRecentData]);
        assert_eq!(report.overall_status, OverallStatus::Warning);
    }

    #[tokio::test]
    async fn test_reports_are_append_only() {
        let dir = TempDir::new().expect("temp dir");
        let report = QualityReport::generate(fixed_time(), 7, 0, None, None);

        let first = save_report(&report, dir.path()).await.expect("first save");
        let second = save_report(&report, dir.path()).await.expect("second save");

        assert_ne!(first, second);
        assert!(first.ends_with("monitoring_report_20240115_090000.json"));
        assert!(second.ends_with("monitoring_report_20240115_090000_1.json"));

        let history = load_report_history(dir.path());
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], report);
    }

    #[test]
    fn test_history_skips_garbage() {
        let dir = TempDir::new().expect("temp dir");
        std::fs::write(dir.path().join("monitoring_report_bad.json"), "{").expect("write");
        std::fs::write(dir.path().join("notes.txt"), "hi").expect("write");
        assert!(load_report_history(dir.path()).is_empty());
        assert!(load_report_history(&dir.path().join("absent")).is_empty());
    }

    #[test]
    fn test_dataset_quality_metrics() {
        let records = vec![
            RawRecord::new()
                .with("date", "2024-01-15")
                .with("venue", "Ellerslie")
                .with("odds", 2.5),
            RawRecord::new().with("date", "2024-01-15").with("venue", "Trentham"),
        ];
        let dataset = RaceDataTransformer::new()
            .transform(&records)
            .expect("transform should succeed");

        let metrics = dataset_quality_metrics(&dataset);
        assert_eq!(metrics.total_records, 2);
        assert_eq!(metrics.unique_venues, 2);
        assert_eq!(metrics.null_percentages["odds"], 50.0);
        assert_eq!(metrics.null_percentages["venue"], 0.0);
        assert_eq!(metrics.data_types["race_date"], "Date32");
    }
}
