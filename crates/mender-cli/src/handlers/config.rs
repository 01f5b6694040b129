//! Config command handler

use mender::HealingConfig;

use crate::commands::ConfigArgs;
use crate::error::CliResult;

/// Render the configuration the engine would run with
pub fn render_config(effective: &HealingConfig, args: &ConfigArgs) -> CliResult<String> {
    let defaults = HealingConfig::default();
    let config = if args.defaults { &defaults } else { effective };
    if args.json {
        Ok(serde_json::to_string_pretty(config)?)
    } else {
        Ok(serde_yaml_ng::to_string(config)?)
    }
}

/// Execute the config command
pub fn execute_config(effective: &HealingConfig, args: &ConfigArgs) -> CliResult<()> {
    println!("{}", render_config(effective, args)?.trim_end());
    Ok(())
}
