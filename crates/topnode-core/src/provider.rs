//! Cluster state provider interface
//!
//! The engine never talks to a cluster directly; it reads nodes, workload
//! instances, topology descriptors and GPU telemetry through
//! [`ClusterStateProvider`]. [`StaticClusterState`] serves a fixed snapshot,
//! either built in code or loaded from a JSON/YAML file.

use crate::error::ErrorContext;
use crate::labels::LabelSelector;
use crate::types::{
    ClusterNode, NodeGpuMetrics, TopologyDescriptor, WorkloadFilter, WorkloadInstance,
};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::debug;

/// Read-only access to cluster state
#[async_trait]
pub trait ClusterStateProvider: Send + Sync {
    /// List every node in the cluster
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>>;

    /// List workload instances matching the filter
    async fn list_workloads(&self, filter: &WorkloadFilter) -> Result<Vec<WorkloadInstance>>;

    /// List topology descriptors in a namespace matching the selector
    async fn list_topology_descriptors(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<TopologyDescriptor>>;

    /// Get a single node by name
    async fn get_node(&self, name: &str) -> Result<ClusterNode>;

    /// Live GPU telemetry for a node; `None` when no exporter reports it
    async fn gpu_metrics(&self, node_name: &str) -> Result<Option<NodeGpuMetrics>>;
}

/// In-memory cluster snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticClusterState {
    #[serde(default)]
    pub nodes: Vec<ClusterNode>,
    #[serde(default)]
    pub workloads: Vec<WorkloadInstance>,
    #[serde(default)]
    pub topology_descriptors: Vec<TopologyDescriptor>,
    /// Telemetry keyed by node name
    #[serde(default)]
    pub gpu_metrics: BTreeMap<String, NodeGpuMetrics>,
    /// Nodes whose telemetry queries fail, for exercising degraded paths
    #[serde(skip)]
    failing_metrics: BTreeSet<String>,
}

impl StaticClusterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(mut self, node: ClusterNode) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_workload(mut self, workload: WorkloadInstance) -> Self {
        self.workloads.push(workload);
        self
    }

    pub fn with_topology_descriptor(mut self, descriptor: TopologyDescriptor) -> Self {
        self.topology_descriptors.push(descriptor);
        self
    }

    pub fn with_gpu_metrics(mut self, node: impl Into<String>, metrics: NodeGpuMetrics) -> Self {
        self.gpu_metrics.insert(node.into(), metrics);
        self
    }

    /// Make telemetry queries for `node` fail
    pub fn with_failing_metrics(mut self, node: impl Into<String>) -> Self {
        self.failing_metrics.insert(node.into());
        self
    }

    /// Load a snapshot from a `.json`, `.yaml` or `.yml` file
    pub async fn from_file(path: &Path) -> Result<Self> {
        let format = path.extension().and_then(|s| s.to_str());
        if !matches!(format, Some("json") | Some("yaml") | Some("yml")) {
            return Err(Error::invalid_request(format!(
                "unsupported snapshot format {:?}, expected json or yaml",
                format.unwrap_or("")
            )));
        }

        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::provider(format!("failed to read cluster snapshot {}: {}", path.display(), e))
        })?;

        let state = if format == Some("json") {
            Self::from_json(&content)
        } else {
            Self::from_yaml(&content)
        }
        .with_context_fn(|| format!("failed to parse cluster snapshot {}", path.display()))?;

        debug!(
            "Loaded snapshot {} with {} nodes and {} workloads",
            path.display(),
            state.nodes.len(),
            state.workloads.len()
        );
        Ok(state)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}

#[async_trait]
impl ClusterStateProvider for StaticClusterState {
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>> {
        Ok(self.nodes.clone())
    }

    async fn list_workloads(&self, filter: &WorkloadFilter) -> Result<Vec<WorkloadInstance>> {
        Ok(self
            .workloads
            .iter()
            .filter(|w| filter.matches(w))
            .cloned()
            .collect())
    }

    async fn list_topology_descriptors(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<TopologyDescriptor>> {
        Ok(self
            .topology_descriptors
            .iter()
            .filter(|d| d.namespace == namespace && selector.matches_all(&d.labels))
            .cloned()
            .collect())
    }

    async fn get_node(&self, name: &str) -> Result<ClusterNode> {
        self.nodes
            .iter()
            .find(|n| n.name == name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("node {}", name)))
    }

    async fn gpu_metrics(&self, node_name: &str) -> Result<Option<NodeGpuMetrics>> {
        if self.failing_metrics.contains(node_name) {
            return Err(Error::gpu_telemetry(format!(
                "no telemetry endpoint reachable for node {}",
                node_name
            )));
        }
        Ok(self
            .gpu_metrics
            .get(node_name)
            .filter(|m| !m.is_empty())
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GpuMetricSample;

    fn sample_state() -> StaticClusterState {
        StaticClusterState::new()
            .with_node(ClusterNode::new("gpu-1"))
            .with_node(ClusterNode::new("cpu-1"))
            .with_workload(WorkloadInstance::new("default", "a").on_node("gpu-1"))
            .with_workload(WorkloadInstance::new("default", "b").on_node("cpu-1"))
            .with_topology_descriptor(
                TopologyDescriptor::new("topo-gpu-1", "kube-system")
                    .with_label("ack.node.gpu.schedule", "topology")
                    .with_label("nodename", "gpu-1"),
            )
            .with_gpu_metrics(
                "gpu-1",
                NodeGpuMetrics::new(vec![GpuMetricSample::new("0", 16.0)]),
            )
    }

    #[tokio::test]
    async fn test_list_and_get_nodes() {
        let state = sample_state();
        assert_eq!(state.list_nodes().await.unwrap().len(), 2);
        assert_eq!(state.get_node("cpu-1").await.unwrap().name, "cpu-1");
        assert!(matches!(
            state.get_node("missing").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_workloads_by_node() {
        let state = sample_state();
        let on_gpu = state
            .list_workloads(&WorkloadFilter::on_node("gpu-1"))
            .await
            .unwrap();
        assert_eq!(on_gpu.len(), 1);
        assert_eq!(on_gpu[0].name, "a");
        assert_eq!(state.list_workloads(&WorkloadFilter::all()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_descriptor_selection() {
        let state = sample_state();
        let selector: LabelSelector = "ack.node.gpu.schedule=topology".parse().unwrap();
        assert_eq!(
            state
                .list_topology_descriptors("kube-system", &selector)
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(state
            .list_topology_descriptors("default", &selector)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_gpu_metrics() {
        let state = sample_state().with_failing_metrics("cpu-1");
        assert!(state.gpu_metrics("gpu-1").await.unwrap().is_some());
        assert!(state.gpu_metrics("other").await.unwrap().is_none());
        assert!(matches!(
            state.gpu_metrics("cpu-1").await,
            Err(Error::GpuTelemetry(_))
        ));
    }

    #[test]
    fn test_snapshot_from_json() {
        let json = r#"{
            "nodes": [{"name": "n1", "capacity": {"nvidia.com/gpu": "2"}}],
            "workloads": [{"name": "p", "nodeName": "n1", "phase": "Running"}],
            "gpuMetrics": {"n1": {"0": {"id": "0", "totalGPUMemory": 16.0}}}
        }"#;
        let state = StaticClusterState::from_json(json).unwrap();
        assert_eq!(state.nodes[0].capacity_of("nvidia.com/gpu"), Some(2));
        assert_eq!(state.workloads[0].namespace, "default");
        assert_eq!(state.gpu_metrics["n1"].device_count(), 1);
    }

    #[tokio::test]
    async fn test_from_file_rejects_unknown_extension() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("snapshot.txt");
        tokio::fs::write(&path, "{}").await.unwrap();
        let result = StaticClusterState::from_file(&path).await;
        assert!(matches!(result, Err(Error::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_from_file_missing_is_provider_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = StaticClusterState::from_file(&dir.path().join("absent.yaml")).await;
        let err = result.unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
        assert_eq!(err.category(), "provider");
        assert!(err.to_string().contains("absent.yaml"));
    }

    #[tokio::test]
    async fn test_from_file_reports_parse_failures() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cluster.json");
        tokio::fs::write(&path, "{not json").await.unwrap();
        let err = StaticClusterState::from_file(&path).await.unwrap_err();
        assert!(err.to_string().contains("failed to parse cluster snapshot"));

        let path = dir.path().join("cluster.yaml");
        tokio::fs::write(&path, "nodes:\n  - name: n1\n").await.unwrap();
        let state = StaticClusterState::from_file(&path).await.unwrap();
        assert_eq!(state.nodes.len(), 1);
    }
}
