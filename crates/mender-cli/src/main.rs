//! Mender CLI: heal broken locators in generated browser test scripts
//!
//! ## Usage
//!
//! ```bash
//! mender classify failure.log                      # Is this a locator failure?
//! mender candidates --element button.json          # Offline candidate list
//! mender heal --failure f.json --element e.json \
//!     --dom page.json --script tests/login.spec.ts  # Heal and rewrite
//! mender restore login.spec.ts.1700000000.bak tests/login.spec.ts
//! mender config                                    # Effective configuration
//! ```

use clap::Parser;
use mender_cli::handlers::{candidates, classify, config, heal, restore};
use mender_cli::logging::init_logging;
use mender_cli::{load_healing_config, Cli, CliResult, Commands, Verbosity};
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> CliResult<()> {
    let cli = Cli::parse();
    let verbosity = Verbosity::from_flags(cli.quiet, cli.verbose);
    init_logging(verbosity, cli.log_json);

    match cli.command {
        Commands::Classify(ref args) => classify::execute_classify(args),
        Commands::Candidates(ref args) => candidates::execute_candidates(args),
        Commands::Heal(ref args) => {
            let healing = load_healing_config(&cli)?;
            heal::execute_heal(healing, args, verbosity.is_quiet())
        }
        Commands::Restore(ref args) => restore::execute_restore(args),
        Commands::Config(ref args) => {
            let healing = load_healing_config(&cli)?;
            config::execute_config(&healing, args)
        }
    }
}
