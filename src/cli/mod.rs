//! Command-line interface for insight-queue.
//!
//! Provides commands for credential verification and batch prompt runs.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
