//! Per-request cluster snapshot
//!
//! Everything a listing needs is fetched once, up front, and then classified
//! synchronously. Telemetry is optional: a failed query for one node only
//! switches that node to static accounting.

use crate::nodes::NodeContext;
use std::collections::{BTreeSet, HashMap};
use topnode_core::{
    ClusterNode, ClusterStateProvider, EngineConfig, NodeGpuMetrics, Result, TopologyDescriptor,
    WorkloadFilter, WorkloadInstance,
};
use tracing::{debug, info, warn};

/// Immutable view of the cluster for a single request
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    pub nodes: Vec<ClusterNode>,
    pub workloads: Vec<WorkloadInstance>,
    pub descriptors: Vec<TopologyDescriptor>,
    pub metrics: HashMap<String, NodeGpuMetrics>,
}

impl ClusterSnapshot {
    /// Fetch nodes, workloads, descriptors and telemetry from the provider.
    ///
    /// A non-empty `names` restricts the snapshot to those nodes before any
    /// telemetry is queried.
    pub async fn collect<P>(
        provider: &P,
        config: &EngineConfig,
        names: &BTreeSet<String>,
    ) -> Result<Self>
    where
        P: ClusterStateProvider + ?Sized,
    {
        let mut nodes = provider.list_nodes().await?;
        if !names.is_empty() {
            nodes.retain(|n| names.contains(&n.name));
        }
        let workloads = provider.list_workloads(&WorkloadFilter::all()).await?;
        Self::collect_for(provider, config, nodes, workloads).await
    }

    /// Fetch the snapshot for one already-resolved node
    pub async fn collect_node<P>(provider: &P, config: &EngineConfig, node: ClusterNode) -> Result<Self>
    where
        P: ClusterStateProvider + ?Sized,
    {
        let workloads = provider
            .list_workloads(&WorkloadFilter::on_node(node.name.clone()))
            .await?;
        Self::collect_for(provider, config, vec![node], workloads).await
    }

    async fn collect_for<P>(
        provider: &P,
        config: &EngineConfig,
        nodes: Vec<ClusterNode>,
        workloads: Vec<WorkloadInstance>,
    ) -> Result<Self>
    where
        P: ClusterStateProvider + ?Sized,
    {
        let classification = &config.classification;
        let descriptors = match provider
            .list_topology_descriptors(
                &classification.descriptor_namespace,
                &classification.descriptor_selector,
            )
            .await
        {
            Ok(descriptors) => descriptors,
            Err(e) => {
                debug!("Topology descriptors unavailable, continuing without them: {}", e);
                Vec::new()
            }
        };

        let mut metrics = HashMap::new();
        if config.telemetry.enabled {
            for node in &nodes {
                match provider.gpu_metrics(&node.name).await {
                    Ok(Some(m)) if !m.is_empty() => {
                        metrics.insert(node.name.clone(), m);
                    }
                    Ok(_) => {}
                    Err(e) if e.is_degradable() => {
                        debug!(
                            "GPU telemetry for node {} unavailable ({}), using static accounting",
                            node.name,
                            e.category()
                        );
                    }
                    Err(e) => {
                        warn!(
                            "GPU telemetry query for node {} failed, using static accounting: {}",
                            node.name, e
                        );
                    }
                }
            }
        }

        info!(
            "Collected snapshot: {} nodes, {} workloads, {} topology descriptors, telemetry for {} nodes",
            nodes.len(),
            workloads.len(),
            descriptors.len(),
            metrics.len()
        );

        Ok(Self {
            nodes,
            workloads,
            descriptors,
            metrics,
        })
    }

    /// Build the classification context for the node at `index`
    pub fn context<'a>(&'a self, index: usize, config: &'a EngineConfig) -> Option<NodeContext<'a>> {
        let node = self.nodes.get(index)?;
        Some(NodeContext {
            index,
            node,
            workloads: self
                .workloads
                .iter()
                .filter(|w| w.is_bound_to(&node.name))
                .collect(),
            metrics: self.metrics.get(&node.name),
            descriptors: &self.descriptors,
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use topnode_core::{GpuMetricSample, StaticClusterState, WorkloadInstance};

    fn cluster() -> StaticClusterState {
        StaticClusterState::new()
            .with_node(ClusterNode::new("gpu-1"))
            .with_node(ClusterNode::new("gpu-2"))
            .with_workload(WorkloadInstance::new("default", "a").on_node("gpu-1"))
            .with_gpu_metrics(
                "gpu-1",
                NodeGpuMetrics::new(vec![GpuMetricSample::new("0", 16.0)]),
            )
            .with_failing_metrics("gpu-2")
    }

    #[tokio::test]
    async fn test_collect_everything() {
        let config = EngineConfig::default();
        let snapshot = ClusterSnapshot::collect(&cluster(), &config, &BTreeSet::new())
            .await
            .unwrap();
        assert_eq!(snapshot.nodes.len(), 2);
        assert_eq!(snapshot.workloads.len(), 1);
        assert!(snapshot.metrics.contains_key("gpu-1"));
        assert!(!snapshot.metrics.contains_key("gpu-2"));
    }

    #[tokio::test]
    async fn test_collect_named_nodes_only() {
        let config = EngineConfig::default();
        let names: BTreeSet<String> = ["gpu-2".to_string()].into_iter().collect();
        let snapshot = ClusterSnapshot::collect(&cluster(), &config, &names)
            .await
            .unwrap();
        assert_eq!(snapshot.nodes.len(), 1);
        assert_eq!(snapshot.nodes[0].name, "gpu-2");
        assert!(snapshot.metrics.is_empty());

        let ctx = snapshot.context(0, &config).unwrap();
        assert!(ctx.workloads.is_empty());
        assert!(snapshot.context(1, &config).is_none());
    }

    #[tokio::test]
    async fn test_collect_without_telemetry() {
        let config = EngineConfig::default().with_telemetry(false);
        let snapshot = ClusterSnapshot::collect(&cluster(), &config, &BTreeSet::new())
            .await
            .unwrap();
        assert!(snapshot.metrics.is_empty());
    }
}
