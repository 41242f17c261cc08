//! topnode - GPU node classification and accounting for a cluster snapshot

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use topnode_core::StaticClusterState;
use topnode_engine::{Engine, NodeVariant};
use tracing::{debug, info};

mod commands;
mod config;
mod output;

use commands::nodes::ListView;
use config::CliConfig;
use output::OutputFormat;

/// GPU node classification and accounting for a cluster snapshot
#[derive(Debug, Parser)]
#[command(name = "topnode")]
#[command(about = "GPU node classification and accounting for a cluster snapshot")]
#[command(version)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Cluster snapshot file (JSON or YAML)
    #[arg(short, long, value_name = "FILE", env = "TOPNODE_SNAPSHOT")]
    snapshot: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    output: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable JSON output (overrides --output)
    #[arg(long)]
    json: bool,

    /// Ignore GPU telemetry even when the snapshot carries it
    #[arg(long)]
    no_telemetry: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List nodes and their GPU allocation
    #[command(name = "list-nodes")]
    ListNodes {
        /// Only these nodes
        names: Vec<String>,

        /// Only nodes of this type (none, exclusive, share, topology, qgpu)
        #[arg(short = 't', long = "type", value_parser = parse_variant)]
        variant: Option<NodeVariant>,

        /// Show each node's detail block
        #[arg(short, long, conflicts_with = "by_type")]
        details: bool,

        /// Show one summary per node type
        #[arg(long)]
        by_type: bool,
    },

    /// Show node details
    #[command(name = "describe-node")]
    DescribeNode {
        /// Node name
        name: String,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Check the configuration without running a listing
    Validate,
}

fn parse_variant(s: &str) -> std::result::Result<NodeVariant, String> {
    s.parse::<NodeVariant>().map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "topnode={},topnode_engine={},topnode_core={}",
            log_level, log_level, log_level
        ))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    debug!("Starting topnode with config: {:?}", cli);

    // Load configuration
    let mut config = CliConfig::load(cli.config.as_deref())?;
    info!("Loaded configuration from {:?}", config.source());
    if cli.no_telemetry {
        config.engine = config.engine.with_telemetry(false);
    }

    // Determine output format
    let output_format = if cli.json {
        OutputFormat::Json
    } else {
        cli.output
    };

    if let Commands::Config { action } = cli.command {
        return commands::config::handle_config_command(&config, action, output_format);
    }

    let snapshot = config.snapshot_path(cli.snapshot.as_deref())?;
    let provider = StaticClusterState::from_file(&snapshot)
        .await
        .with_context(|| format!("Failed to load cluster snapshot {}", snapshot.display()))?;
    info!("Loaded cluster snapshot from {}", snapshot.display());

    let engine = Engine::new(config.engine).context("Invalid engine configuration")?;

    // Execute command
    match cli.command {
        Commands::ListNodes {
            names,
            variant,
            details,
            by_type,
        } => {
            let view = if details {
                ListView::Details
            } else if by_type {
                ListView::ByType
            } else {
                ListView::Summary
            };
            commands::nodes::list_nodes(&engine, &provider, names, variant, view, output_format)
                .await?;
        }

        Commands::DescribeNode { name } => {
            commands::nodes::describe_node(&engine, &provider, name, output_format).await?;
        }

        Commands::Config { .. } => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert()
    }

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["topnode", "list-nodes"]).unwrap();
        assert!(matches!(cli.command, Commands::ListNodes { .. }));

        let cli = Cli::try_parse_from(["topnode", "list-nodes", "gpu-1", "gpu-2", "-t", "share"])
            .unwrap();
        match cli.command {
            Commands::ListNodes { names, variant, .. } => {
                assert_eq!(names, vec!["gpu-1", "gpu-2"]);
                assert_eq!(variant, Some(NodeVariant::SharedMemory));
            }
            other => panic!("unexpected command {:?}", other),
        }

        let cli = Cli::try_parse_from(["topnode", "describe-node", "gpu-1"]).unwrap();
        assert!(matches!(cli.command, Commands::DescribeNode { .. }));
    }

    #[test]
    fn test_invalid_type_rejected() {
        assert!(Cli::try_parse_from(["topnode", "list-nodes", "--type", "tpu"]).is_err());
        assert!(
            Cli::try_parse_from(["topnode", "list-nodes", "--details", "--by-type"]).is_err()
        );
    }

    #[test]
    fn test_output_format() {
        let cli = Cli::try_parse_from(["topnode", "--json", "list-nodes"]).unwrap();
        assert!(cli.json);

        let cli = Cli::try_parse_from(["topnode", "--output", "yaml", "list-nodes"]).unwrap();
        assert_eq!(cli.output, OutputFormat::Yaml);
    }
}
