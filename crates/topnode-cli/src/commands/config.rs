//! Configuration management commands

use crate::config::CliConfig;
use crate::output::{OutputFormat, OutputFormatter};
use crate::ConfigCommands;
use anyhow::Result;

/// Handle config commands
pub fn handle_config_command(
    config: &CliConfig,
    action: ConfigCommands,
    output_format: OutputFormat,
) -> Result<()> {
    let formatter = OutputFormatter::new(output_format);

    match action {
        ConfigCommands::Show => {
            formatter.print_structured(config)?;
        }
        ConfigCommands::Validate => {
            config.engine.validate()?;
            let source = config
                .source()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "defaults and environment".to_string());
            formatter.print_note(&format!("Configuration from {} is valid", source));
        }
    }

    Ok(())
}
