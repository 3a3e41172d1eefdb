//! Metrics module for Prometheus-based monitoring.
//!
//! Counts runs, fetch attempts, processed records and exports, and exposes
//! the latest monitoring status as a gauge.
//!
//! # Example
//!
//! ```ignore
//! use raceforge::metrics::{export_metrics, init_metrics, record_run};
//!
//! init_metrics().expect("Failed to initialize metrics");
//! record_run("success", 4.2);
//! println!("{}", export_metrics());
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{
    record_export, record_fetch_request, record_records_processed, record_run, set_monitor_status,
};
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    EXPORTS_TOTAL, FETCH_REQUESTS_TOTAL, MONITOR_STATUS, RECORDS_PROCESSED_TOTAL, REGISTRY,
    RUNS_TOTAL, RUN_DURATION,
};
