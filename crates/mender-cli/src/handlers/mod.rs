//! Command handlers

pub mod candidates;
pub mod classify;
pub mod config;
pub mod heal;
pub mod restore;

use crate::error::{CliError, CliResult};

/// Multi-threaded runtime for the async engine calls
pub(crate) fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new()
        .map_err(|e| CliError::runtime(format!("Failed to create runtime: {e}")))
}

/// Read and parse a JSON input file
pub(crate) fn read_json<T: serde::de::DeserializeOwned>(path: &std::path::Path) -> CliResult<T> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}
