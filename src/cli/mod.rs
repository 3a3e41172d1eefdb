//! Command-line interface for raceforge.
//!
//! Provides the `run`, `backfill` and `monitor` commands.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
