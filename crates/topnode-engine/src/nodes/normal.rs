use super::{BaseNode, ClassifiedNode, GpuAccounting, NodeContext, NodeStrategy, NodeVariant};
use crate::render::DetailBuilder;
use serde::Serialize;
use topnode_core::{ClusterNode, EngineConfig, Result};

/// Node without any GPU capability
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalNode {
    #[serde(flatten)]
    pub base: BaseNode,
}

impl NormalNode {
    pub fn from_context(ctx: &NodeContext<'_>) -> Self {
        Self {
            base: BaseNode::new(ctx, NodeVariant::Normal, ""),
        }
    }
}

impl GpuAccounting for NormalNode {
    fn base(&self) -> &BaseNode {
        &self.base
    }

    fn total_gpus(&self) -> f64 {
        0.0
    }

    fn allocated_gpus(&self) -> f64 {
        0.0
    }

    fn unhealthy_gpus(&self) -> f64 {
        0.0
    }

    fn render_details(&self) -> String {
        DetailBuilder::new(&self.base).build()
    }
}

/// Fallback strategy; matches every node and must be tried last
pub struct NormalStrategy;

impl NodeStrategy for NormalStrategy {
    fn variant(&self) -> NodeVariant {
        NodeVariant::Normal
    }

    fn matches(&self, _node: &ClusterNode, _config: &EngineConfig) -> bool {
        true
    }

    fn build(&self, ctx: &NodeContext<'_>) -> Result<ClassifiedNode> {
        Ok(ClassifiedNode::Normal(NormalNode::from_context(ctx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::fixtures::Fixture;

    #[test]
    fn test_normal_node_has_no_gpus() {
        let fixture = Fixture::new(
            ClusterNode::new("cpu-1")
                .with_address("10.0.0.2")
                .with_label("node-role.kubernetes.io/master", ""),
        );
        let node = NormalNode::from_context(&fixture.context());
        assert_eq!(node.total_gpus(), 0.0);
        assert_eq!(node.allocated_gpus(), 0.0);
        assert!(node.is_healthy());
        assert_eq!(node.base.role(), "master");

        let details = node.render_details();
        assert!(details.contains("Name:    cpu-1"));
        assert!(details.contains("Type:    Normal"));
        assert!(!details.contains("Description:"));
    }

    #[test]
    fn test_normal_strategy_always_matches() {
        let config = EngineConfig::default();
        assert!(NormalStrategy.matches(&ClusterNode::new("any"), &config));
    }
}
