//! Configuration management for topnode
//!
//! Resource names, annotation keys and node capability labels differ between
//! device plugin vendors and versions, so every string the engine matches on
//! lives here. Configuration is layered from defaults, an optional YAML/JSON
//! file and `TOPNODE_*` environment variables, with `__` between nested keys.

use crate::error::ErrorContext;
use crate::labels::LabelSelector;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV: &str = "TOPNODE_CONFIG";

/// Prefix for environment overrides, e.g. `TOPNODE_TELEMETRY__ENABLED=false`
pub const ENV_PREFIX: &str = "TOPNODE";

/// Main configuration structure for the accounting engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Extended resource names advertised by device plugins
    pub resources: ResourceNames,

    /// Annotation keys written by GPU schedulers onto workload instances
    pub annotations: AnnotationKeys,

    /// Node capability markers and topology descriptor lookup
    pub classification: ClassificationConfig,

    /// Live telemetry settings
    pub telemetry: TelemetryConfig,

    /// Accounting policies
    pub accounting: AccountingConfig,
}

impl EngineConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest)
    /// 2. Configuration file
    /// 3. Defaults (lowest)
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&Self::default())?);

        if let Ok(config_path) = std::env::var(CONFIG_ENV) {
            builder = builder.add_source(config::File::with_name(&config_path).required(false));
        } else {
            for path in &["./topnode.yaml", "/etc/topnode/config.yaml"] {
                builder = builder.add_source(config::File::with_name(path).required(false));
            }
        }

        builder = builder.add_source(environment());

        let config = builder
            .build()
            .with_context("failed to merge configuration sources")?;
        let parsed: Self = config.try_deserialize()?;
        parsed.validate()?;

        Ok(parsed)
    }

    /// Load configuration from a specific file on top of the defaults
    pub fn load_from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::File::from(path));

        let config = builder.build()?;
        let parsed: Self = config.try_deserialize()?;
        parsed.validate()?;

        Ok(parsed)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.resources.validate()?;
        self.annotations.validate()?;
        self.classification.validate()?;
        Ok(())
    }

    pub fn with_telemetry(mut self, enabled: bool) -> Self {
        self.telemetry.enabled = enabled;
        self
    }
}

/// `TOPNODE_` prefix, `__` between nested keys so field names keep their underscores
fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

/// Extended resource names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceNames {
    /// Whole-GPU count used by exclusive nodes
    pub gpu: String,

    /// Alternate whole-GPU count used by topology-aware nodes
    pub topology_gpu: String,

    /// Shared GPU memory, GiB units
    pub share_memory: String,

    /// Device count advertised next to shared memory
    pub share_count: String,

    /// Shared GPU core percentage
    pub share_core: String,

    /// GPU core quota, 100 units per device
    pub quota_core: String,

    /// GPU memory quota, GiB units
    pub quota_memory: String,
}

impl Default for ResourceNames {
    fn default() -> Self {
        Self {
            gpu: "nvidia.com/gpu".to_string(),
            topology_gpu: "aliyun.com/gpu".to_string(),
            share_memory: "aliyun.com/gpu-mem".to_string(),
            share_count: "aliyun.com/gpu-count".to_string(),
            share_core: "aliyun.com/gpu-core.percentage".to_string(),
            quota_core: "tke.cloud.tencent.com/qgpu-core".to_string(),
            quota_memory: "tke.cloud.tencent.com/qgpu-memory".to_string(),
        }
    }
}

impl ResourceNames {
    fn validate(&self) -> Result<()> {
        let names = [
            ("gpu", &self.gpu),
            ("topology_gpu", &self.topology_gpu),
            ("share_memory", &self.share_memory),
            ("share_count", &self.share_count),
            ("share_core", &self.share_core),
            ("quota_core", &self.quota_core),
            ("quota_memory", &self.quota_memory),
        ];
        for (field, value) in names {
            if value.trim().is_empty() {
                return Err(Error::config(format!("resources.{} must not be empty", field)));
            }
        }
        if self.share_memory == self.share_count {
            return Err(Error::config(
                "resources.share_memory and resources.share_count must differ",
            ));
        }
        Ok(())
    }
}

/// Annotation keys on workload instances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationKeys {
    /// Per-device shared memory allocation, JSON
    pub share_allocation: String,

    /// Per-device shared core allocation, JSON
    pub share_core_allocation: String,

    /// Single device index used by older GPU share schedulers
    pub share_device_index: String,

    /// Devices physically bound to a topology-aware instance
    pub topology_bound_devices: String,

    /// Devices exposed to a topology-aware instance's containers
    pub topology_visible_devices: String,

    /// Marks an instance as placed by the GPU quota scheduler
    pub quota_allocation: String,

    /// Prefix of `<prefix>-<container>` device index annotations
    pub quota_device_index_prefix: String,
}

impl Default for AnnotationKeys {
    fn default() -> Self {
        Self {
            share_allocation: "scheduler.framework.gpushare.allocation".to_string(),
            share_core_allocation: "scheduler.framework.gpushare.core.allocation".to_string(),
            share_device_index: "ALIYUN_COM_GPU_MEM_IDX".to_string(),
            topology_bound_devices: "topology.kubernetes.io/gpu-group".to_string(),
            topology_visible_devices: "topology.kubernetes.io/gpu-visible".to_string(),
            quota_allocation: "tke.cloud.tencent.com/gpu-alloc".to_string(),
            quota_device_index_prefix: "tke.cloud.tencent.com/gpu-index".to_string(),
        }
    }
}

impl AnnotationKeys {
    fn validate(&self) -> Result<()> {
        if self.quota_device_index_prefix.trim().is_empty() {
            return Err(Error::config(
                "annotations.quota_device_index_prefix must not be empty",
            ));
        }
        if self.topology_bound_devices == self.topology_visible_devices {
            return Err(Error::config(
                "topology bound and visible device annotations must differ",
            ));
        }
        Ok(())
    }
}

/// Node capability markers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    /// Any of these labels marks a topology-aware node
    pub topology_node_labels: LabelSelector,

    /// Any of these labels marks a GPU quota node
    pub quota_node_labels: LabelSelector,

    /// Namespace holding topology descriptors
    pub descriptor_namespace: String,

    /// Selector used to list topology descriptors
    pub descriptor_selector: LabelSelector,

    /// Descriptor label carrying the node name
    pub descriptor_node_label: String,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        let topology = LabelSelector::everything().with_requirement("ack.node.gpu.schedule", "topology");
        Self {
            topology_node_labels: topology.clone(),
            quota_node_labels: LabelSelector::everything()
                .with_requirement("qgpu-device-enable", "enable"),
            descriptor_namespace: "kube-system".to_string(),
            descriptor_selector: topology,
            descriptor_node_label: "nodename".to_string(),
        }
    }
}

impl ClassificationConfig {
    fn validate(&self) -> Result<()> {
        if self.descriptor_node_label.trim().is_empty() {
            return Err(Error::config(
                "classification.descriptor_node_label must not be empty",
            ));
        }
        if self.descriptor_namespace.trim().is_empty() {
            return Err(Error::config(
                "classification.descriptor_namespace must not be empty",
            ));
        }
        Ok(())
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Query per-node GPU telemetry; static accounting is used when disabled
    pub enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Accounting policies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountingConfig {
    /// Report every device as unhealthy when a node advertises devices but zero memory capacity
    pub assume_unhealthy_on_zero_capacity: bool,
}

impl Default for AccountingConfig {
    fn default() -> Self {
        Self {
            assume_unhealthy_on_zero_capacity: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.resources.gpu, "nvidia.com/gpu");
        assert_eq!(config.classification.descriptor_namespace, "kube-system");
        assert!(config.telemetry.enabled);
        assert!(config.accounting.assume_unhealthy_on_zero_capacity);
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();
        config.resources.share_count = config.resources.share_memory.clone();
        assert!(matches!(config.validate(), Err(Error::InvalidConfiguration(_))));

        let mut config = EngineConfig::default();
        config.resources.gpu = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.classification.descriptor_node_label.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = EngineConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("ack.node.gpu.schedule=topology"));
        let parsed: EngineConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("topnode.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "resources:\n  gpu: amd.com/gpu\ntelemetry:\n  enabled: false\nclassification:\n  quota_node_labels: \"qgpu=on,vgpu=on\""
        )
        .unwrap();

        let config = EngineConfig::load_from_file(&path).unwrap();
        assert_eq!(config.resources.gpu, "amd.com/gpu");
        assert_eq!(config.resources.share_memory, "aliyun.com/gpu-mem");
        assert!(!config.telemetry.enabled);
        assert_eq!(config.classification.quota_node_labels.requirements().len(), 2);
    }

    #[test]
    fn test_environment_overrides_defaults() {
        std::env::set_var("TOPNODE_TELEMETRY__ENABLED", "false");
        std::env::set_var("TOPNODE_ACCOUNTING__ASSUME_UNHEALTHY_ON_ZERO_CAPACITY", "false");
        let loaded = EngineConfig::load();
        std::env::remove_var("TOPNODE_TELEMETRY__ENABLED");
        std::env::remove_var("TOPNODE_ACCOUNTING__ASSUME_UNHEALTHY_ON_ZERO_CAPACITY");

        let config = loaded.unwrap();
        assert!(!config.telemetry.enabled);
        assert!(!config.accounting.assume_unhealthy_on_zero_capacity);
        assert_eq!(config.resources.gpu, "nvidia.com/gpu");
    }
}
