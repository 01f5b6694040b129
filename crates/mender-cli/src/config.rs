//! CLI configuration

use std::time::Duration;

use mender::HealingConfig;

use crate::commands::Cli;
use crate::error::CliResult;

/// CLI verbosity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Quiet - errors only
    Quiet,
    /// Normal - default output
    #[default]
    Normal,
    /// Verbose - engine progress
    Verbose,
    /// Debug - maximum output
    Debug,
}

impl Verbosity {
    /// Derive from `-q` and the `-v` count
    #[must_use]
    pub const fn from_flags(quiet: bool, verbose: u8) -> Self {
        if quiet {
            return Self::Quiet;
        }
        match verbose {
            0 => Self::Normal,
            1 => Self::Verbose,
            _ => Self::Debug,
        }
    }

    /// Check if quiet mode
    #[must_use]
    pub const fn is_quiet(self) -> bool {
        matches!(self, Self::Quiet)
    }

    /// Default log filter when `RUST_LOG` is unset
    #[must_use]
    pub const fn log_filter(self) -> &'static str {
        match self {
            Self::Quiet => "error",
            Self::Normal => "warn",
            Self::Verbose => "mender=info,warn",
            Self::Debug => "mender=debug,mender_cli=debug,info",
        }
    }
}

/// Load the engine configuration: file (if any), then command-line overrides
pub fn load_healing_config(cli: &Cli) -> CliResult<HealingConfig> {
    let mut config = match cli.config {
        Some(ref path) => HealingConfig::from_file(path)?,
        None => HealingConfig::default(),
    };
    if let Some(sessions) = cli.max_sessions {
        config = config.with_max_sessions(sessions);
    }
    if let Some(ms) = cli.timeout_ms {
        config = config.with_healing_timeout(Duration::from_millis(ms));
    }
    config.validate()?;
    Ok(config)
}
