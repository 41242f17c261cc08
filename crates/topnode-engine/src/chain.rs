//! First-match classification chain

use crate::nodes::{
    ClassifiedNode, ExclusiveStrategy, NodeContext, NodeStrategy, NodeVariant, NormalNode,
    NormalStrategy, QuotaGpuStrategy, SharedMemoryStrategy, TopologyStrategy,
};
use tracing::{debug, warn};

/// Ordered list of strategies; the first that matches and builds wins
pub struct StrategyChain {
    strategies: Vec<Box<dyn NodeStrategy>>,
}

impl StrategyChain {
    /// The standard priority order, most specific capability first
    pub fn new() -> Self {
        Self {
            strategies: vec![
                Box::new(SharedMemoryStrategy),
                Box::new(TopologyStrategy),
                Box::new(QuotaGpuStrategy),
                Box::new(ExclusiveStrategy),
                Box::new(NormalStrategy),
            ],
        }
    }

    /// Variants in the order they are tried
    pub fn order(&self) -> Vec<NodeVariant> {
        self.strategies.iter().map(|s| s.variant()).collect()
    }

    /// Assign exactly one variant to the node in `ctx`.
    ///
    /// A strategy whose predicate matches but whose build fails hands the
    /// node on to the next strategy.
    pub fn classify(&self, ctx: &NodeContext<'_>) -> ClassifiedNode {
        for strategy in &self.strategies {
            let variant = strategy.variant();
            if !strategy.matches(ctx.node, ctx.config) {
                debug!("Strategy {} skips node {}", variant, ctx.node.name);
                continue;
            }
            match strategy.build(ctx) {
                Ok(node) => {
                    debug!("Strategy {} classified node {}", variant, ctx.node.name);
                    return node;
                }
                Err(e) if e.is_degradable() => {
                    debug!(
                        "Strategy {} matched node {} but could not build it: {}",
                        variant, ctx.node.name, e
                    );
                }
                Err(e) => {
                    warn!(
                        "Strategy {} failed on node {} ({}): {}",
                        variant,
                        ctx.node.name,
                        e.category(),
                        e
                    );
                }
            }
        }
        // unreachable with NormalStrategy registered last
        ClassifiedNode::Normal(NormalNode::from_context(ctx))
    }
}

impl Default for StrategyChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::fixtures::Fixture;
    use topnode_core::{ClusterNode, TopologyDescriptor};

    #[test]
    fn test_priority_order() {
        assert_eq!(
            StrategyChain::new().order(),
            vec![
                NodeVariant::SharedMemory,
                NodeVariant::Topology,
                NodeVariant::QuotaGpu,
                NodeVariant::Exclusive,
                NodeVariant::Normal,
            ]
        );
    }

    #[test]
    fn test_shared_memory_wins_over_exclusive() {
        let fixture = Fixture::new(
            ClusterNode::new("mixed")
                .with_resource("aliyun.com/gpu-mem", 80)
                .with_resource("aliyun.com/gpu-count", 4)
                .with_resource("nvidia.com/gpu", 4),
        );
        let node = StrategyChain::new().classify(&fixture.context());
        assert_eq!(node.variant(), NodeVariant::SharedMemory);
    }

    #[test]
    fn test_topology_without_descriptor_falls_to_next_strategy() {
        let fixture = Fixture::new(
            ClusterNode::new("topo-1")
                .with_label("ack.node.gpu.schedule", "topology")
                .with_resource("nvidia.com/gpu", 4),
        );
        let node = StrategyChain::new().classify(&fixture.context());
        assert_eq!(node.variant(), NodeVariant::Exclusive);
        assert_eq!(node.name(), "topo-1");
    }

    #[test]
    fn test_topology_with_descriptor() {
        let fixture = Fixture::new(
            ClusterNode::new("topo-1")
                .with_label("ack.node.gpu.schedule", "topology")
                .with_resource("aliyun.com/gpu", 2),
        )
        .with_descriptor(
            TopologyDescriptor::new("topo-1-config", "kube-system")
                .with_label("nodename", "topo-1")
                .with_data("devices", r#"{"0":"Healthy","1":"Healthy"}"#),
        );
        let node = StrategyChain::new().classify(&fixture.context());
        assert_eq!(node.variant(), NodeVariant::Topology);
    }

    #[test]
    fn test_plain_node_is_normal() {
        let fixture = Fixture::new(ClusterNode::new("cpu-1"));
        let node = StrategyChain::new().classify(&fixture.context());
        assert_eq!(node.variant(), NodeVariant::Normal);
    }
}
