//! Command-line interface for langbench.
//!
//! Provides commands for running benchmarks, scoring workspaces,
//! reconstructing run ledgers and inspecting transcripts.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
