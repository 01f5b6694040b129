//! Restore command handler

use mender::ScriptUpdater;

use crate::commands::RestoreArgs;
use crate::error::{CliError, CliResult};
use crate::handlers::runtime;

/// Execute the restore command
pub fn execute_restore(args: &RestoreArgs) -> CliResult<()> {
    if !args.backup.is_file() {
        return Err(CliError::invalid_argument(format!(
            "backup not found: {}",
            args.backup.display()
        )));
    }
    runtime()?.block_on(ScriptUpdater::new().restore(&args.backup, &args.script))?;
    println!(
        "{} restored from {}",
        args.script.display(),
        args.backup.display()
    );
    Ok(())
}
