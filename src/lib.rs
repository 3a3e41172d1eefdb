//! raceforge: daily race-data collection pipeline.
//!
//! This library fetches race-event records for a date, validates and
//! enriches them, exports them in several formats and monitors the health
//! of the exported data over time.

// Core modules
pub mod cli;
pub mod collectors;
pub mod error;
pub mod export;
pub mod metrics;
pub mod monitor;
pub mod pipeline;
pub mod transform;
pub mod utils;
pub mod validation;

// Re-export commonly used error types
pub use error::{ExportError, FetchError, MonitoringError, PipelineError, TransformError};
