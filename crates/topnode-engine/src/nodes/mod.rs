//! Node variant models
//!
//! Every node is modelled as exactly one variant. Each variant owns its
//! applicability predicate and its accounting; the shared identity fields
//! live in [`BaseNode`].

mod exclusive;
mod normal;
mod quota;
mod shared;
mod topology;

pub use exclusive::{ExclusiveDevice, ExclusiveInstance, ExclusiveNode, ExclusiveStrategy};
pub use normal::{NormalNode, NormalStrategy};
pub use quota::{QuotaDevice, QuotaGpuNode, QuotaGpuStrategy, QuotaInstance};
pub use shared::{SharedDevice, SharedInstance, SharedMemoryNode, SharedMemoryStrategy};
pub use topology::{DeviceStatus, TopologyDevice, TopologyInstance, TopologyNode, TopologyStrategy};

use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use topnode_core::{
    format_roles, ClusterNode, EngineConfig, Error, NodeGpuMetrics, Result, TopologyDescriptor,
    WorkloadInstance,
};

/// GPU capability model assigned to a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum NodeVariant {
    Normal,
    #[serde(rename = "GPUExclusive")]
    Exclusive,
    #[serde(rename = "GPUShare")]
    SharedMemory,
    #[serde(rename = "GPUTopology")]
    Topology,
    #[serde(rename = "QGPU")]
    QuotaGpu,
}

impl NodeVariant {
    /// Reverse classification priority; used wherever variants are listed
    pub const DISPLAY_ORDER: [NodeVariant; 5] = [
        NodeVariant::Normal,
        NodeVariant::Exclusive,
        NodeVariant::QuotaGpu,
        NodeVariant::Topology,
        NodeVariant::SharedMemory,
    ];

    /// Key of this variant's collection in structured output
    pub fn key(&self) -> &'static str {
        match self {
            NodeVariant::Normal => "normalNodes",
            NodeVariant::Exclusive => "gpuExclusiveNodes",
            NodeVariant::SharedMemory => "gpuShareNodes",
            NodeVariant::Topology => "gpuTopologyNodes",
            NodeVariant::QuotaGpu => "qGPUNodes",
        }
    }

    /// Short name shown in the GPU(Mode) column
    pub fn alias(&self) -> &'static str {
        match self {
            NodeVariant::Normal => "none",
            NodeVariant::Exclusive => "exclusive",
            NodeVariant::SharedMemory => "share",
            NodeVariant::Topology => "topology",
            NodeVariant::QuotaGpu => "qgpu",
        }
    }

    pub fn is_gpu(&self) -> bool {
        !matches!(self, NodeVariant::Normal)
    }
}

impl fmt::Display for NodeVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeVariant::Normal => "Normal",
            NodeVariant::Exclusive => "GPUExclusive",
            NodeVariant::SharedMemory => "GPUShare",
            NodeVariant::Topology => "GPUTopology",
            NodeVariant::QuotaGpu => "QGPU",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for NodeVariant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        [
            NodeVariant::Normal,
            NodeVariant::Exclusive,
            NodeVariant::SharedMemory,
            NodeVariant::Topology,
            NodeVariant::QuotaGpu,
        ]
        .into_iter()
        .find(|v| {
            v.alias() == wanted
                || v.to_string().to_ascii_lowercase() == wanted
                || v.key().to_ascii_lowercase() == wanted
        })
        .ok_or_else(|| Error::invalid_request(format!("unknown node type '{}'", s)))
    }
}

/// Identity fields shared by every variant
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseNode {
    #[serde(skip)]
    pub index: usize,
    pub name: String,
    pub ip: String,
    pub status: String,
    pub roles: Vec<String>,
    #[serde(rename = "type")]
    pub variant: NodeVariant,
    pub description: String,
}

impl BaseNode {
    pub fn new(ctx: &NodeContext<'_>, variant: NodeVariant, description: impl Into<String>) -> Self {
        Self {
            index: ctx.index,
            name: ctx.node.name.clone(),
            ip: ctx.node.ip(),
            status: ctx.node.status(),
            roles: ctx.node.roles().into_iter().collect(),
            variant,
            description: description.into(),
        }
    }

    pub fn role(&self) -> String {
        format_roles(&self.roles)
    }
}

/// Inputs available while classifying and building one node
#[derive(Debug, Clone)]
pub struct NodeContext<'a> {
    pub index: usize,
    pub node: &'a ClusterNode,
    /// Every instance bound to the node, terminal ones included
    pub workloads: Vec<&'a WorkloadInstance>,
    pub metrics: Option<&'a NodeGpuMetrics>,
    pub descriptors: &'a [TopologyDescriptor],
    pub config: &'a EngineConfig,
}

impl<'a> NodeContext<'a> {
    /// Instances that still hold devices
    pub fn live_workloads(&self) -> impl Iterator<Item = &'a WorkloadInstance> + '_ {
        self.workloads.iter().copied().filter(|w| !w.is_terminal())
    }

    /// Telemetry, only when at least one device reports
    pub fn metrics(&self) -> Option<&'a NodeGpuMetrics> {
        self.metrics.filter(|m| !m.is_empty())
    }
}

/// One entry of the classification chain
pub trait NodeStrategy: Send + Sync {
    fn variant(&self) -> NodeVariant;

    /// Whether the node advertises this variant's capability
    fn matches(&self, node: &ClusterNode, config: &EngineConfig) -> bool;

    /// Build the variant model; an error hands the node to the next strategy
    fn build(&self, ctx: &NodeContext<'_>) -> Result<ClassifiedNode>;
}

/// Accounting view common to every variant
pub trait GpuAccounting {
    fn base(&self) -> &BaseNode;

    fn total_gpus(&self) -> f64;

    fn allocated_gpus(&self) -> f64;

    fn unhealthy_gpus(&self) -> f64;

    fn is_healthy(&self) -> bool {
        self.unhealthy_gpus() == 0.0
    }

    /// Multi-section description of the node
    fn render_details(&self) -> String;
}

/// A node together with its assigned variant model
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ClassifiedNode {
    Normal(NormalNode),
    Exclusive(ExclusiveNode),
    SharedMemory(SharedMemoryNode),
    Topology(TopologyNode),
    QuotaGpu(QuotaGpuNode),
}

impl ClassifiedNode {
    pub fn variant(&self) -> NodeVariant {
        match self {
            ClassifiedNode::Normal(_) => NodeVariant::Normal,
            ClassifiedNode::Exclusive(_) => NodeVariant::Exclusive,
            ClassifiedNode::SharedMemory(_) => NodeVariant::SharedMemory,
            ClassifiedNode::Topology(_) => NodeVariant::Topology,
            ClassifiedNode::QuotaGpu(_) => NodeVariant::QuotaGpu,
        }
    }

    pub fn accounting(&self) -> &dyn GpuAccounting {
        match self {
            ClassifiedNode::Normal(n) => n,
            ClassifiedNode::Exclusive(n) => n,
            ClassifiedNode::SharedMemory(n) => n,
            ClassifiedNode::Topology(n) => n,
            ClassifiedNode::QuotaGpu(n) => n,
        }
    }

    pub fn name(&self) -> &str {
        &self.accounting().base().name
    }
}

/// Order device ids numerically, falling back to string order
pub fn compare_device_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Device ids `0..count` plus any extra ids, ordered by index
pub(crate) fn device_ids<'a>(count: usize, extra: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut ids: Vec<String> = (0..count).map(|i| i.to_string()).collect();
    for id in extra {
        if !ids.iter().any(|known| known == id) {
            ids.push(id.to_string());
        }
    }
    ids.sort_by(|a, b| compare_device_ids(a, b));
    ids
}

/// Round to one decimal place
pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Devices lost to a gap between capacity and allocatable memory.
///
/// Returns 0 when either quantity is missing or no devices are known. With a
/// zero capacity and a positive device count, every device is considered
/// unhealthy when `assume_unhealthy` is set.
pub(crate) fn unhealthy_from_memory_gap(
    total_gpus: f64,
    capacity: Option<i64>,
    allocatable: Option<i64>,
    assume_unhealthy: bool,
) -> f64 {
    let (Some(capacity), Some(allocatable)) = (capacity, allocatable) else {
        return 0.0;
    };
    if total_gpus <= 0.0 {
        return 0.0;
    }
    if capacity <= 0 {
        return if assume_unhealthy { total_gpus } else { 0.0 };
    }
    let gap = (capacity - allocatable).max(0) as f64;
    (total_gpus * gap / capacity as f64).trunc()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Owns everything a [`NodeContext`] borrows
    pub struct Fixture {
        pub node: ClusterNode,
        pub workloads: Vec<WorkloadInstance>,
        pub metrics: Option<NodeGpuMetrics>,
        pub descriptors: Vec<TopologyDescriptor>,
        pub config: EngineConfig,
    }

    impl Fixture {
        pub fn new(node: ClusterNode) -> Self {
            Self {
                node,
                workloads: Vec::new(),
                metrics: None,
                descriptors: Vec::new(),
                config: EngineConfig::default(),
            }
        }

        pub fn with_workload(mut self, workload: WorkloadInstance) -> Self {
            let name = self.node.name.clone();
            self.workloads.push(workload.on_node(name));
            self
        }

        pub fn with_metrics(mut self, metrics: NodeGpuMetrics) -> Self {
            self.metrics = Some(metrics);
            self
        }

        pub fn with_descriptor(mut self, descriptor: TopologyDescriptor) -> Self {
            self.descriptors.push(descriptor);
            self
        }

        pub fn context(&self) -> NodeContext<'_> {
            NodeContext {
                index: 0,
                node: &self.node,
                workloads: self.workloads.iter().collect(),
                metrics: self.metrics.as_ref(),
                descriptors: &self.descriptors,
                config: &self.config,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_names() {
        assert_eq!(NodeVariant::SharedMemory.key(), "gpuShareNodes");
        assert_eq!(NodeVariant::QuotaGpu.alias(), "qgpu");
        assert_eq!(NodeVariant::Topology.to_string(), "GPUTopology");
        assert!(!NodeVariant::Normal.is_gpu());
    }

    #[test]
    fn test_variant_from_str() {
        assert_eq!("share".parse::<NodeVariant>().unwrap(), NodeVariant::SharedMemory);
        assert_eq!("GPUExclusive".parse::<NodeVariant>().unwrap(), NodeVariant::Exclusive);
        assert_eq!("qGPUNodes".parse::<NodeVariant>().unwrap(), NodeVariant::QuotaGpu);
        assert_eq!("none".parse::<NodeVariant>().unwrap(), NodeVariant::Normal);
        assert!("mig".parse::<NodeVariant>().is_err());
    }

    #[test]
    fn test_device_ids() {
        assert_eq!(device_ids(3, vec!["1", "10", "x"]), vec!["0", "1", "2", "10", "x"]);
        assert!(device_ids(0, Vec::<&str>::new()).is_empty());
    }

    #[test]
    fn test_round1() {
        assert_eq!(round1(0.25), 0.3);
        assert_eq!(round1(1.04), 1.0);
        assert_eq!(round1(0.0), 0.0);
    }

    #[test]
    fn test_unhealthy_from_memory_gap() {
        assert_eq!(unhealthy_from_memory_gap(4.0, Some(80), Some(60), true), 1.0);
        assert_eq!(unhealthy_from_memory_gap(4.0, Some(80), Some(80), true), 0.0);
        assert_eq!(unhealthy_from_memory_gap(4.0, None, Some(80), true), 0.0);
        assert_eq!(unhealthy_from_memory_gap(0.0, Some(80), Some(0), true), 0.0);
        assert_eq!(unhealthy_from_memory_gap(3.0, Some(0), Some(0), true), 3.0);
        assert_eq!(unhealthy_from_memory_gap(3.0, Some(0), Some(0), false), 0.0);
    }
}
