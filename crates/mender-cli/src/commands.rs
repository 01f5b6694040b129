//! CLI command definitions using clap

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Mender: heal broken locators in generated browser test scripts
#[derive(Parser, Debug)]
#[command(name = "mender")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Engine configuration file (YAML or JSON)
    #[arg(long, env = "MENDER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Override the browser session pool size
    #[arg(long, env = "MENDER_MAX_SESSIONS", global = true)]
    pub max_sessions: Option<usize>,

    /// Override the per-phase healing timeout in milliseconds
    #[arg(long, env = "MENDER_TIMEOUT_MS", global = true)]
    pub timeout_ms: Option<u64>,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify test-runner output as a locator failure
    Classify(ClassifyArgs),

    /// List candidate locators for an element without a browser
    Candidates(CandidatesArgs),

    /// Heal one failing locator and rewrite its script
    Heal(HealArgs),

    /// Restore a script from a backup
    Restore(RestoreArgs),

    /// Show the effective engine configuration
    Config(ConfigArgs),
}

/// Output format for results
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON
    Json,
}

/// Arguments for the classify command
#[derive(Parser, Debug)]
pub struct ClassifyArgs {
    /// File holding the runner's failure output
    pub output: PathBuf,

    /// Output format
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the candidates command
#[derive(Parser, Debug)]
pub struct CandidatesArgs {
    /// Element description (JSON)
    #[arg(short, long)]
    pub element: PathBuf,

    /// Locator to leave out of the list
    #[arg(long)]
    pub exclude: Option<String>,

    /// Maximum number of candidates
    #[arg(short = 'n', long, default_value = "10")]
    pub max: usize,

    /// Output format
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the heal command
#[derive(Parser, Debug)]
#[allow(clippy::struct_excessive_bools)]
pub struct HealArgs {
    /// Failure record (JSON)
    #[arg(long)]
    pub failure: PathBuf,

    /// Element the step targeted before it broke (JSON)
    #[arg(short, long)]
    pub element: Option<PathBuf>,

    /// Natural-language description of the element
    #[arg(long)]
    pub hint: Option<String>,

    /// Script to rewrite once a locator is healed
    #[arg(short, long)]
    pub script: Option<PathBuf>,

    /// Replay a recorded DOM (JSON) instead of launching a browser
    #[arg(long)]
    pub dom: Option<PathBuf>,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    /// Disable the Chromium sandbox (containers/CI)
    #[arg(long)]
    pub no_sandbox: bool,

    /// Print progress events while healing
    #[arg(long)]
    pub progress: bool,

    /// Output format
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the restore command
#[derive(Parser, Debug)]
pub struct RestoreArgs {
    /// Backup written by a previous heal
    pub backup: PathBuf,

    /// Script to overwrite
    pub script: PathBuf,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Print the built-in defaults instead of the effective configuration
    #[arg(long)]
    pub defaults: bool,

    /// Print as JSON instead of YAML
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_heal() {
        let cli = Cli::try_parse_from([
            "mender",
            "--max-sessions",
            "2",
            "heal",
            "--failure",
            "f.json",
            "--dom",
            "page.json",
            "-s",
            "login.spec.ts",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.max_sessions, Some(2));
        match cli.command {
            Commands::Heal(args) => {
                assert_eq!(args.failure, PathBuf::from("f.json"));
                assert_eq!(args.script, Some(PathBuf::from("login.spec.ts")));
                assert_eq!(args.format, OutputFormat::Json);
                assert!(args.element.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_verbose_counts() {
        let cli = Cli::try_parse_from(["mender", "-vv", "config"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_restore_requires_both_paths() {
        assert!(Cli::try_parse_from(["mender", "restore", "a.bak"]).is_err());
    }
}
