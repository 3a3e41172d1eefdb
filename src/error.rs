//! Error types for raceforge operations.
//!
//! Defines one error enum per pipeline subsystem:
//! - Fetching raw records from a source
//! - Transforming records into a dataset
//! - Exporting datasets to disk
//! - Monitoring exported data
//! - Orchestrating whole pipeline runs
//!
//! Validation never produces an error value: a failed validation is a
//! [`ValidationVerdict`](crate::validation::ValidationVerdict) with
//! `is_valid == false`.

use thiserror::Error;

/// Errors that can occur while fetching records for a target date.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Every retry attempt failed with a transient error.
    #[error("Source '{source_name}' unavailable after {attempts} attempts: {last_error}")]
    SourceUnavailable {
        source_name: String,
        attempts: u32,
        last_error: String,
    },

    /// The source's access policy forbids the request. Never retried.
    #[error("Access to '{url}' denied by policy of source '{source_name}'")]
    PolicyViolation { source_name: String, url: String },

    /// The source answered but the payload could not be interpreted.
    #[error("Invalid response from source '{source_name}': {reason}")]
    InvalidResponse { source_name: String, reason: String },
}

/// Errors that abort a whole transform batch.
///
/// Per-field problems (a malformed race time, a non-positive odds value) are
/// absorbed with a fallback value and never surface as this type.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("No records to transform")]
    EmptyBatch,

    #[error("Row {row}: invalid race date '{value}'")]
    InvalidDate { row: usize, value: String },

    #[error("Failed to build dataset: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur during export operations.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Invalid export format: {0}")]
    InvalidFormat(String),

    #[error("Dataset has no rows to export")]
    EmptyDataset,

    #[error("Failed to write '{path}': {reason}")]
    WriteFailed { path: String, reason: String },

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by the quality monitor. Advisory only: never blocks a run.
#[derive(Debug, Error)]
pub enum MonitoringError {
    #[error("Failed to load dataset '{path}': {reason}")]
    LoadFailed { path: String, reason: String },

    #[error("Failed to persist monitoring report: {0}")]
    ReportPersist(String),

    #[error("No usable '{0}' column in the loaded data")]
    MissingColumn(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors surfaced by the pipeline orchestrator itself, as opposed to run
/// outcomes, which are always reported through a run summary.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::pipeline::config::ConfigError),

    #[error("Invalid date range: {start} is after {end}")]
    InvalidDateRange {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },

    #[error("Invalid state transition from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },

    #[error("Failed to build source: {0}")]
    Source(#[from] crate::collectors::CollectorError),
}
