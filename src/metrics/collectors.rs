//! Recording helpers over the global Prometheus metrics.
//!
//! Every helper silently does nothing when metrics were never initialized,
//! so library users and tests pay nothing for instrumentation.

use super::prometheus::{
    EXPORTS_TOTAL, FETCH_REQUESTS_TOTAL, MONITOR_STATUS, RECORDS_PROCESSED_TOTAL, RUNS_TOTAL,
    RUN_DURATION,
};

/// Record one finished pipeline run.
///
/// * `status` - terminal status, e.g. `success` or `no_data`
/// * `duration_secs` - wall-clock duration of the run
pub fn record_run(status: &str, duration_secs: f64) {
    if let Some(runs) = RUNS_TOTAL.get() {
        runs.with_label_values(&[status]).inc();
    }
    if let Some(duration) = RUN_DURATION.get() {
        duration.with_label_values(&[status]).observe(duration_secs);
    }
    tracing::trace!(status, duration_secs, "Recorded run metric");
}

/// Record one fetch attempt with its outcome (`success`, `retry`, `failure`).
pub fn record_fetch_request(outcome: &str) {
    if let Some(requests) = FETCH_REQUESTS_TOTAL.get() {
        requests.with_label_values(&[outcome]).inc();
    }
}

pub fn record_records_processed(count: usize) {
    if let Some(records) = RECORDS_PROCESSED_TOTAL.get() {
        records.inc_by(count as u64);
    }
}

/// Record one export attempt for `format` with its outcome.
pub fn record_export(format: &str, outcome: &str) {
    if let Some(exports) = EXPORTS_TOTAL.get() {
        exports.with_label_values(&[format, outcome]).inc();
    }
}

/// Publish the severity of the latest monitoring report.
pub fn set_monitor_status(severity: i64) {
    if let Some(status) = MONITOR_STATUS.get() {
        status.set(severity as f64);
    }
}
