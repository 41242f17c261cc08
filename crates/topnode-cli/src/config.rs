//! Configuration management for the topnode CLI

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use topnode_core::EngineConfig;

/// CLI configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Default cluster snapshot file
    pub snapshot: Option<PathBuf>,

    /// Engine settings
    pub engine: EngineConfig,

    /// Configuration source path
    #[serde(skip)]
    source: Option<PathBuf>,
}

impl CliConfig {
    /// Load from an explicit file, or from the engine's layered sources
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load_from_file(path),
            None => {
                let engine = EngineConfig::load().context("Failed to load engine configuration")?;
                Ok(Self {
                    engine,
                    ..Self::default()
                })
            }
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Self = if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        } else {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        };

        config
            .engine
            .validate()
            .with_context(|| format!("Invalid engine configuration in {}", path.display()))?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// Get the configuration source path
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Snapshot path from the command line, falling back to the config file
    pub fn snapshot_path(&self, cli_snapshot: Option<&Path>) -> Result<PathBuf> {
        cli_snapshot
            .map(Path::to_path_buf)
            .or_else(|| self.snapshot.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("No cluster snapshot given; pass --snapshot or set `snapshot` in the config file")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = CliConfig::default();
        assert!(config.snapshot.is_none());
        assert_eq!(config.engine, EngineConfig::default());
        assert!(config.source().is_none());
    }

    #[test]
    fn test_load_yaml_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("topnode.yaml");
        std::fs::write(
            &path,
            "snapshot: /tmp/cluster.json\nengine:\n  resources:\n    gpu: amd.com/gpu\n",
        )
        .unwrap();

        let config = CliConfig::load(Some(&path)).unwrap();
        assert_eq!(config.snapshot, Some(PathBuf::from("/tmp/cluster.json")));
        assert_eq!(config.engine.resources.gpu, "amd.com/gpu");
        assert_eq!(config.engine.resources.topology_gpu, "aliyun.com/gpu");
        assert_eq!(config.source(), Some(path.as_path()));
    }

    #[test]
    fn test_load_json_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("topnode.json");
        std::fs::write(&path, r#"{"engine": {"telemetry": {"enabled": false}}}"#).unwrap();

        let config = CliConfig::load_from_file(&path).unwrap();
        assert!(!config.engine.telemetry.enabled);
    }

    #[test]
    fn test_invalid_engine_config_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("topnode.yaml");
        std::fs::write(&path, "engine:\n  resources:\n    gpu: \"\"\n").unwrap();
        assert!(CliConfig::load_from_file(&path).is_err());
    }

    #[test]
    fn test_snapshot_path_precedence() {
        let config = CliConfig {
            snapshot: Some(PathBuf::from("from-config.yaml")),
            ..CliConfig::default()
        };
        assert_eq!(
            config.snapshot_path(Some(Path::new("from-cli.yaml"))).unwrap(),
            PathBuf::from("from-cli.yaml")
        );
        assert_eq!(
            config.snapshot_path(None).unwrap(),
            PathBuf::from("from-config.yaml")
        );
        assert!(CliConfig::default().snapshot_path(None).is_err());
    }
}
