//! Pipeline orchestration for daily race-data runs.
//!
//! # Architecture
//!
//! - **Orchestrator**: sequences fetch, validation, transform and export for
//!   one target date and aggregates a [`PipelineRunSummary`]
//! - **State machine**: [`RunStateMachine`] enforces the legal stage order
//! - **Policies**: [`StagePolicy`] per stage (cache TTL, attempts) and
//!   [`RunRetryPolicy`] for whole-run retries
//! - **Cache**: [`StageCache`], content-addressed with single-flight writes
//! - **Config**: [`PipelineConfig`], built in code or from `RACEFORGE_*`
//!   environment variables
//!
//! # Run flow
//!
//! 1. **Fetch**: records for the date, through a rate-limited session; an
//!    empty result ends the run as `no_data`
//! 2. **Validate**: a failed verdict ends the run as `validation_failed`
//! 3. **Transform**: typed, feature-bearing [`Dataset`](crate::transform::Dataset)
//! 4. **Export**: every configured format, each retried independently;
//!    failed formats are listed in the manifest and the run still succeeds
//!
//! # Example
//!
//! ```rust,ignore
//! use raceforge::pipeline::{PipelineConfig, PipelineOrchestrator};
//!
//! let orchestrator = PipelineOrchestrator::new(PipelineConfig::from_env()?)?;
//! let summary = orchestrator.run_with_retry(raceforge::utils::local_today()).await;
//! println!("{}", summary.headline());
//!
//! let backfill = orchestrator.run_backfill(start, end).await?;
//! ```

pub mod cache;
pub mod config;
pub mod orchestrator;
pub mod policy;
pub mod state;
pub mod summary;

pub use cache::{CacheStats, ContentHash, PipelineCache, StageCache};
pub use config::{ConfigError, PipelineConfig};
pub use orchestrator::PipelineOrchestrator;
pub use policy::{RunRetryPolicy, StagePolicy};
pub use state::{can_transition, CancellationFlag, RunState, RunStateMachine};
pub use summary::{PipelineRunSummary, RunError, RunErrorKind, RunStatus};
