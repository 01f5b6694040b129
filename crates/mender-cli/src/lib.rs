//! Mender CLI Library
//!
//! Command-line interface for the Mender locator healing engine.

#![warn(missing_docs)]
#![allow(clippy::format_push_string)] // String building is clear and correct

mod commands;
mod config;
mod error;
pub mod handlers;
pub mod logging;
mod output;

pub use commands::{
    CandidatesArgs, ClassifyArgs, Cli, Commands, ConfigArgs, HealArgs, OutputFormat, RestoreArgs,
};
pub use config::{load_healing_config, Verbosity};
pub use error::{CliError, CliResult};
pub use output::{render_candidates, render_progress, render_result};
