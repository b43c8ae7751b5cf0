//! Command-line interface for webjudge.
//!
//! Provides commands for batch evaluation, trajectory status checks and
//! listing evaluation modes.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli, Commands, EvalArgs, StatusArgs};
