//! CLI command definitions for raceforge.
//!
//! `run` processes one date, `backfill` a range of dates, and `monitor`
//! checks the health of recent exports.

use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use crate::export::ExportFormat;
use crate::metrics;
use crate::pipeline::{PipelineConfig, PipelineOrchestrator, PipelineRunSummary, RunStatus};
use crate::utils::local_today;

/// Daily race-data pipeline.
#[derive(Parser, Debug)]
#[command(name = "raceforge")]
#[command(about = "Fetch, validate, transform, export and monitor daily race data")]
#[command(version)]
#[command(
    long_about = "raceforge collects race-event records for a date, validates and enriches them, and exports them as Parquet, CSV, JSONL and a daily summary.\n\nSettings come from RACEFORGE_* environment variables; the flags below override the common ones.\n\nExample usage:\n  raceforge run --date 2024-01-15 --formats parquet,csv\n  raceforge backfill --start 2024-01-01 --end 2024-01-31 --max-parallel 3\n  raceforge monitor --days-back 7"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Print Prometheus metrics after the command finishes.
    #[arg(long, global = true)]
    pub metrics: bool,

    /// Directory for exported datasets (overrides RACEFORGE_EXPORT_DIR).
    #[arg(short = 'o', long, global = true)]
    pub output_dir: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline for one date.
    Run(RunArgs),

    /// Run the pipeline for every date in a range.
    Backfill(BackfillArgs),

    /// Check freshness and anomalies of recent exports.
    Monitor(MonitorArgs),
}

/// Arguments for `raceforge run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Target date (YYYY-MM-DD). Defaults to today.
    #[arg(short, long)]
    pub date: Option<NaiveDate>,

    /// Comma-separated export formats (parquet, csv, jsonl, summary).
    #[arg(short, long)]
    pub formats: Option<String>,

    /// Output the run summary as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `raceforge backfill`.
#[derive(Parser, Debug)]
pub struct BackfillArgs {
    /// First date, inclusive.
    #[arg(long)]
    pub start: NaiveDate,

    /// Last date, inclusive.
    #[arg(long)]
    pub end: NaiveDate,

    /// Maximum dates processed concurrently.
    #[arg(long)]
    pub max_parallel: Option<usize>,

    /// Comma-separated export formats (parquet, csv, jsonl, summary).
    #[arg(short, long)]
    pub formats: Option<String>,

    /// Output the run summaries as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `raceforge monitor`.
#[derive(Parser, Debug)]
pub struct MonitorArgs {
    /// Days of exports to inspect, counting back from today.
    #[arg(long)]
    pub days_back: Option<u32>,

    /// Do not log an alert for unhealthy reports.
    #[arg(long)]
    pub no_alert: bool,

    /// Output the report as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Parse CLI arguments without running.
///
/// Use with `run_with_cli` to initialize logging between parsing and running.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parse CLI args and run the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    if cli.metrics {
        metrics::init_metrics()?;
    }

    let mut config = PipelineConfig::from_env()?;
    if let Some(dir) = &cli.output_dir {
        config.export_dir = dir.clone();
    }

    let result = match cli.command {
        Commands::Run(args) => run_run_command(config, args).await,
        Commands::Backfill(args) => run_backfill_command(config, args).await,
        Commands::Monitor(args) => run_monitor_command(config, args).await,
    };

    if cli.metrics {
        print!("{}", metrics::export_metrics());
    }

    result
}

fn apply_formats(config: &mut PipelineConfig, formats: Option<&str>) -> anyhow::Result<()> {
    if let Some(list) = formats {
        config.export_formats = ExportFormat::parse_list(list)?;
    }
    config.validate()?;
    Ok(())
}

fn print_summary(summary: &PipelineRunSummary) {
    println!("{}", summary.headline());
    if let Some(manifest) = &summary.export_manifest {
        for (format, path) in &manifest.paths {
            println!("  {:<8} {}", format, path.display());
        }
        for (format, message) in &manifest.failures {
            println!("  {:<8} FAILED: {}", format, message);
        }
    }
    for error in &summary.validation_errors {
        println!("  validation error: {}", error);
    }
}

async fn run_run_command(mut config: PipelineConfig, args: RunArgs) -> anyhow::Result<()> {
    apply_formats(&mut config, args.formats.as_deref())?;
    let target_date = args.date.unwrap_or_else(local_today);

    let orchestrator = PipelineOrchestrator::new(config)?;
    let summary = orchestrator.run_with_retry(target_date).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    if summary.status == RunStatus::Failed {
        let reason = summary
            .error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        return Err(anyhow::anyhow!("Run for {} failed: {}", target_date, reason));
    }
    Ok(())
}

async fn run_backfill_command(mut config: PipelineConfig, args: BackfillArgs) -> anyhow::Result<()> {
    if let Some(max) = args.max_parallel {
        config.max_parallel = max;
    }
    apply_formats(&mut config, args.formats.as_deref())?;

    let orchestrator = PipelineOrchestrator::new(config)?;
    let summaries = orchestrator.run_backfill(args.start, args.end).await?;

    let failed = summaries
        .iter()
        .filter(|s| s.status == RunStatus::Failed)
        .count();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else {
        for summary in &summaries {
            print_summary(summary);
        }
        println!(
            "\n{} dates, {} succeeded, {} failed",
            summaries.len(),
            summaries.iter().filter(|s| s.is_success()).count(),
            failed
        );
    }

    if failed > 0 {
        return Err(anyhow::anyhow!("{} of {} backfill runs failed", failed, summaries.len()));
    }
    Ok(())
}

async fn run_monitor_command(mut config: PipelineConfig, args: MonitorArgs) -> anyhow::Result<()> {
    if args.no_alert {
        config.alert_on_issues = false;
    }
    let days_back = args.days_back.unwrap_or(config.monitor_days_back);

    let monitor = crate::monitor::QualityMonitor::new(config.monitor_config());
    let (report, path) = monitor.run(days_back).await?;
    info!(path = %path.display(), "Report written");

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Status:  {}", report.overall_status);
        println!("Loaded:  {} datasets over {} days", report.datasets_loaded, days_back);
        if let Some(freshness) = &report.freshness {
            println!(
                "Fresh:   {:?} ({:.1}h old)",
                freshness.data_freshness_status, freshness.data_age_hours
            );
        }
        for anomaly in &report.anomalies {
            println!("Anomaly: {}", serde_json::to_string(anomaly)?);
        }
        for recommendation in &report.recommendations {
            println!("- {}", recommendation);
        }
        println!("Report:  {}", path.display());
    }
    Ok(())
}
