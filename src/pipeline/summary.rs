//! Machine-readable outcome of one pipeline run.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::RunState;
use crate::collectors::RequestStats;
use crate::error::FetchError;
use crate::export::ExportManifest;
use crate::monitor::DatasetQualityMetrics;
use crate::validation::ValidationStats;

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    /// The source had nothing for the date. Not an error.
    NoData,
    ValidationFailed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::NoData => "no_data",
            RunStatus::ValidationFailed => "validation_failed",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a fatal run error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunErrorKind {
    SourceUnavailable,
    PolicyViolation,
    Transform,
    Export,
    Cancelled,
    Internal,
}

impl RunErrorKind {
    /// Whether a whole-run retry may help.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RunErrorKind::SourceUnavailable | RunErrorKind::Internal)
    }
}

impl fmt::Display for RunErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunErrorKind::SourceUnavailable => "source_unavailable",
            RunErrorKind::PolicyViolation => "policy_violation",
            RunErrorKind::Transform => "transform",
            RunErrorKind::Export => "export",
            RunErrorKind::Cancelled => "cancelled",
            RunErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Error recorded in a failed run's summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub kind: RunErrorKind,
    pub message: String,
}

impl RunError {
    pub fn new(kind: RunErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled(stage: RunState) -> Self {
        Self::new(
            RunErrorKind::Cancelled,
            format!("run cancelled before {}", stage),
        )
    }
}

impl From<&FetchError> for RunError {
    fn from(err: &FetchError) -> Self {
        let kind = match err {
            FetchError::SourceUnavailable { .. } => RunErrorKind::SourceUnavailable,
            FetchError::PolicyViolation { .. } => RunErrorKind::PolicyViolation,
            FetchError::InvalidResponse { .. } => RunErrorKind::Internal,
        };
        Self::new(kind, err.to_string())
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// One orchestrator invocation, terminal once `status` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRunSummary {
    pub run_id: Uuid,
    pub target_date: NaiveDate,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Whole-run attempts used, including the first.
    pub attempts: u32,
    /// States visited by the final attempt.
    pub states: Vec<RunState>,
    /// Rows in the transformed dataset; absent unless transform ran.
    pub records_processed: Option<usize>,
    pub validation: Option<ValidationStats>,
    #[serde(default)]
    pub validation_errors: Vec<String>,
    #[serde(default)]
    pub validation_warnings: Vec<String>,
    pub export_manifest: Option<ExportManifest>,
    pub quality_metrics: Option<DatasetQualityMetrics>,
    /// Request counters of the fetch session; absent when served from cache.
    pub fetch_stats: Option<RequestStats>,
    pub fetch_cached: bool,
    pub transform_cached: bool,
    pub error: Option<RunError>,
}

impl PipelineRunSummary {
    pub fn new(target_date: NaiveDate) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            target_date,
            status: RunStatus::Failed,
            started_at: now,
            finished_at: now,
            attempts: 1,
            states: Vec::new(),
            records_processed: None,
            validation: None,
            validation_errors: Vec::new(),
            validation_warnings: Vec::new(),
            export_manifest: None,
            quality_metrics: None,
            fetch_stats: None,
            fetch_cached: false,
            transform_cached: false,
            error: None,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    /// A whole-run retry may help this outcome.
    pub fn is_retryable(&self) -> bool {
        self.status == RunStatus::Failed
            && self.error.as_ref().is_some_and(|e| e.kind.is_retryable())
    }

    /// Formats that were written, empty when export never ran.
    pub fn exported_formats(&self) -> Vec<crate::export::ExportFormat> {
        self.export_manifest
            .as_ref()
            .map(|m| m.succeeded_formats())
            .unwrap_or_default()
    }

    /// One-line human summary.
    pub fn headline(&self) -> String {
        let mut line = format!("{} {}", self.target_date, self.status);
        if let Some(rows) = self.records_processed {
            line.push_str(&format!(" rows={}", rows));
        }
        if let Some(manifest) = &self.export_manifest {
            let formats: Vec<&str> = manifest.paths.keys().map(|f| f.as_str()).collect();
            line.push_str(&format!(" exported=[{}]", formats.join(",")));
            if !manifest.failures.is_empty() {
                let failed: Vec<&str> = manifest.failures.keys().map(|f| f.as_str()).collect();
                line.push_str(&format!(" failed=[{}]", failed.join(",")));
            }
        }
        if let Some(error) = &self.error {
            line.push_str(&format!(" error={}", error));
        }
        line
    }
}
