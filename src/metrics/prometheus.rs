//! Prometheus metrics registration and export.
//!
//! All metrics live in one global registry. Until [`init_metrics`] is called
//! the statics stay empty and every recording helper is a no-op.

use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all raceforge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Completed pipeline runs, labeled by terminal status.
pub static RUNS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Pipeline run duration in seconds, labeled by terminal status.
pub static RUN_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Fetch attempts against sources, labeled by outcome.
pub static FETCH_REQUESTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Records that passed validation and were transformed.
pub static RECORDS_PROCESSED_TOTAL: OnceLock<IntCounter> = OnceLock::new();

/// Export attempts, labeled by format and outcome.
pub static EXPORTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Status of the latest monitoring pass: 0 healthy, 1 warning, 2 critical.
pub static MONITOR_STATUS: OnceLock<Gauge> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Calling this more than once keeps the first registry.
///
/// # Errors
///
/// Returns a `prometheus::Error` if a metric cannot be created or registered.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let runs_total = CounterVec::new(
        Opts::new("raceforge_runs_total", "Completed pipeline runs"),
        &["status"],
    )?;

    let run_duration = HistogramVec::new(
        HistogramOpts::new(
            "raceforge_run_duration_seconds",
            "Pipeline run duration in seconds",
        )
        .buckets(vec![0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 300.0]),
        &["status"],
    )?;

    let fetch_requests_total = CounterVec::new(
        Opts::new("raceforge_fetch_requests_total", "Fetch attempts against sources"),
        &["outcome"],
    )?;

    let records_processed_total = IntCounter::new(
        "raceforge_records_processed_total",
        "Records validated and transformed",
    )?;

    let exports_total = CounterVec::new(
        Opts::new("raceforge_exports_total", "Export attempts"),
        &["format", "outcome"],
    )?;

    let monitor_status = Gauge::new(
        "raceforge_monitor_status",
        "Latest monitoring status (0 healthy, 1 warning, 2 critical)",
    )?;

    registry.register(Box::new(runs_total.clone()))?;
    registry.register(Box::new(run_duration.clone()))?;
    registry.register(Box::new(fetch_requests_total.clone()))?;
    registry.register(Box::new(records_processed_total.clone()))?;
    registry.register(Box::new(exports_total.clone()))?;
    registry.register(Box::new(monitor_status.clone()))?;

    // Already set means a previous call won; keep its metrics.
    let _ = REGISTRY.set(registry);
    let _ = RUNS_TOTAL.set(runs_total);
    let _ = RUN_DURATION.set(run_duration);
    let _ = FETCH_REQUESTS_TOTAL.set(fetch_requests_total);
    let _ = RECORDS_PROCESSED_TOTAL.set(records_processed_total);
    let _ = EXPORTS_TOTAL.set(exports_total);
    let _ = MONITOR_STATUS.set(monitor_status);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns a comment line instead when the registry is not initialized or
/// encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        assert!(init_metrics().is_ok() || REGISTRY.get().is_some());
        let _ = init_metrics();
        assert!(REGISTRY.get().is_some());
    }

    #[test]
    fn test_metrics_after_init() {
        let _ = init_metrics();
        super::super::record_run("success", 1.5);

        let text = export_metrics();
        assert!(!text.starts_with("# Error"));
        assert!(text.contains("raceforge_runs_total"));
    }
}
