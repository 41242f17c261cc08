//! Aggregation of classified nodes into reports
//!
//! A [`NodeReport`] holds the classified nodes of one listing and projects
//! them three ways: per-variant collections for structured output, the
//! per-node detail blocks, and the cluster summary table with its totals.

use crate::nodes::{
    ClassifiedNode, ExclusiveNode, GpuAccounting, NodeVariant, NormalNode, QuotaGpuNode,
    SharedMemoryNode, TopologyNode,
};
use crate::render::{number, percent, plain_table, ratio};
use serde::Serialize;
use std::collections::BTreeSet;
use topnode_core::ResourceNames;

const SEPARATOR: &str =
    "---------------------------------------------------------------------------------------------------";

/// Per-variant collections, keyed the way structured output expects
#[derive(Debug, Clone, Default, Serialize)]
pub struct NodeSets {
    #[serde(rename = "gpuShareNodes")]
    pub shared_memory: Vec<SharedMemoryNode>,
    #[serde(rename = "gpuTopologyNodes")]
    pub topology: Vec<TopologyNode>,
    #[serde(rename = "qGPUNodes")]
    pub quota_gpu: Vec<QuotaGpuNode>,
    #[serde(rename = "gpuExclusiveNodes")]
    pub exclusive: Vec<ExclusiveNode>,
    #[serde(rename = "normalNodes")]
    pub normal: Vec<NormalNode>,
}

/// Cluster-wide GPU totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTotals {
    #[serde(rename = "totalGPUs")]
    pub total_gpus: f64,
    #[serde(rename = "allocatedGPUs")]
    pub allocated_gpus: f64,
    #[serde(rename = "unhealthyGPUs")]
    pub unhealthy_gpus: f64,
}

impl ClusterTotals {
    fn add(&mut self, node: &dyn GpuAccounting) {
        self.total_gpus += node.total_gpus();
        self.allocated_gpus += node.allocated_gpus();
        self.unhealthy_gpus += node.unhealthy_gpus();
    }

    pub fn allocated_percent(&self) -> f64 {
        percent(self.allocated_gpus, self.total_gpus)
    }

    pub fn unhealthy_percent(&self) -> f64 {
        percent(self.unhealthy_gpus, self.total_gpus)
    }
}

/// Header and rows of a summary table, before rendering
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SummaryTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SummaryTable {
    pub fn render(&self) -> String {
        let headers: Vec<&str> = self.headers.iter().map(String::as_str).collect();
        plain_table(&headers, &self.rows)
    }
}

/// Classified nodes of one listing
#[derive(Debug, Clone)]
pub struct NodeReport {
    nodes: Vec<ClassifiedNode>,
    resources: ResourceNames,
}

impl NodeReport {
    pub fn new(nodes: Vec<ClassifiedNode>, resources: ResourceNames) -> Self {
        Self { nodes, resources }
    }

    pub fn nodes(&self) -> &[ClassifiedNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ClassifiedNode> {
        self.nodes.iter().find(|n| n.name() == name)
    }

    /// Nodes of one variant, in listing order
    pub fn by_variant(&self, variant: NodeVariant) -> impl Iterator<Item = &ClassifiedNode> {
        self.nodes.iter().filter(move |n| n.variant() == variant)
    }

    /// Nodes grouped by variant, normal nodes first
    fn in_display_order(&self) -> impl Iterator<Item = &ClassifiedNode> {
        NodeVariant::DISPLAY_ORDER
            .into_iter()
            .flat_map(move |variant| self.by_variant(variant))
    }

    pub fn node_sets(&self) -> NodeSets {
        let mut sets = NodeSets::default();
        for node in &self.nodes {
            match node {
                ClassifiedNode::Normal(n) => sets.normal.push(n.clone()),
                ClassifiedNode::Exclusive(n) => sets.exclusive.push(n.clone()),
                ClassifiedNode::SharedMemory(n) => sets.shared_memory.push(n.clone()),
                ClassifiedNode::Topology(n) => sets.topology.push(n.clone()),
                ClassifiedNode::QuotaGpu(n) => sets.quota_gpu.push(n.clone()),
            }
        }
        sets
    }

    pub fn totals(&self) -> ClusterTotals {
        let mut totals = ClusterTotals::default();
        for node in &self.nodes {
            totals.add(node.accounting());
        }
        totals
    }

    /// More than one GPU variant present anywhere in the listing
    pub fn shows_mode(&self) -> bool {
        let variants: BTreeSet<NodeVariant> = self
            .nodes
            .iter()
            .map(|n| n.variant())
            .filter(|v| v.is_gpu())
            .collect();
        variants.len() > 1
    }

    /// Any node in the listing is unhealthy
    pub fn shows_unhealthy(&self) -> bool {
        self.nodes.iter().any(|n| !n.accounting().is_healthy())
    }

    pub fn summary_table(&self) -> SummaryTable {
        let show_mode = self.shows_mode();
        let show_unhealthy = self.shows_unhealthy();

        let mut headers = identity_headers();
        headers.extend(["GPU(Total)".to_string(), "GPU(Allocated)".to_string()]);
        if show_mode {
            headers.push("GPU(Mode)".to_string());
        }
        if show_unhealthy {
            headers.push("UNHEALTHY".to_string());
        }

        let rows = self
            .in_display_order()
            .map(|node| {
                let accounting = node.accounting();
                let mut row = identity_row(accounting);
                row.push(number(accounting.total_gpus()));
                row.push(number(accounting.allocated_gpus()));
                if show_mode {
                    row.push(node.variant().alias().to_string());
                }
                if show_unhealthy {
                    row.push(number(accounting.unhealthy_gpus()));
                }
                row
            })
            .collect();

        SummaryTable { headers, rows }
    }

    /// Summary table followed by the cluster totals block
    pub fn render_summary(&self) -> String {
        let totals = self.totals();
        let mut lines = vec![
            self.summary_table().render(),
            SEPARATOR.to_string(),
            "Allocated/Total GPUs In Cluster:".to_string(),
            ratio(totals.allocated_gpus, totals.total_gpus),
        ];
        if totals.unhealthy_gpus > 0.0 {
            lines.push("Unhealthy/Total GPUs In Cluster:".to_string());
            lines.push(ratio(totals.unhealthy_gpus, totals.total_gpus));
        }
        lines.join("\n") + "\n"
    }

    /// Every node's detail block, normal nodes first
    pub fn render_details(&self) -> String {
        let separator = format!("{}\n", SEPARATOR);
        self.in_display_order()
            .map(|node| node.accounting().render_details())
            .collect::<Vec<_>>()
            .join(separator.as_str())
    }

    /// Variant-specific summary; `None` when the listing has no such nodes
    pub fn render_custom_summary(&self, variant: NodeVariant) -> Option<String> {
        let nodes: Vec<&ClassifiedNode> = self.by_variant(variant).collect();
        if nodes.is_empty() {
            return None;
        }
        let out = match variant {
            NodeVariant::Normal => normal_summary(&nodes),
            NodeVariant::Exclusive => whole_gpu_summary(&nodes, &self.resources.gpu),
            NodeVariant::Topology => whole_gpu_summary(&nodes, &self.resources.topology_gpu),
            NodeVariant::SharedMemory => {
                let shared: Vec<&SharedMemoryNode> = nodes
                    .iter()
                    .filter_map(|n| match n {
                        ClassifiedNode::SharedMemory(s) => Some(s),
                        _ => None,
                    })
                    .collect();
                shared_summary(&shared, &self.resources.share_memory)
            }
            NodeVariant::QuotaGpu => {
                let quota: Vec<&QuotaGpuNode> = nodes
                    .iter()
                    .filter_map(|n| match n {
                        ClassifiedNode::QuotaGpu(q) => Some(q),
                        _ => None,
                    })
                    .collect();
                quota_summary(&quota, &self.resources.quota_memory)
            }
        };
        Some(out)
    }

    /// Custom summaries of every variant present, normal nodes first
    pub fn render_custom_summaries(&self) -> String {
        NodeVariant::DISPLAY_ORDER
            .into_iter()
            .filter_map(|v| self.render_custom_summary(v))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Serialize for NodeReport {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.node_sets().serialize(serializer)
    }
}

fn identity_headers() -> Vec<String> {
    ["NAME", "IPADDRESS", "ROLE", "STATUS"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn identity_row(node: &dyn GpuAccounting) -> Vec<String> {
    let base = node.base();
    vec![base.name.clone(), base.ip.clone(), base.role(), base.status.clone()]
}

fn any_unhealthy<'a>(mut nodes: impl Iterator<Item = &'a dyn GpuAccounting>) -> bool {
    nodes.any(|n| !n.is_healthy())
}

fn normal_summary(nodes: &[&ClassifiedNode]) -> String {
    let mut headers = identity_headers();
    headers.extend(["GPU(Total)".to_string(), "GPU(Allocated)".to_string()]);
    let rows = nodes
        .iter()
        .map(|n| {
            let mut row = identity_row(n.accounting());
            row.extend(["0".to_string(), "0".to_string()]);
            row
        })
        .collect();
    SummaryTable { headers, rows }.render() + "\n"
}

fn whole_gpu_summary(nodes: &[&ClassifiedNode], resource: &str) -> String {
    let show_unhealthy = any_unhealthy(nodes.iter().map(|n| n.accounting()));
    let mut headers = identity_headers();
    headers.extend(["GPU(Total)".to_string(), "GPU(Allocated)".to_string()]);
    if show_unhealthy {
        headers.push("UNHEALTHY".to_string());
    }

    let mut totals = ClusterTotals::default();
    let rows = nodes
        .iter()
        .map(|n| {
            let node = n.accounting();
            totals.add(node);
            let mut row = identity_row(node);
            row.push(number(node.total_gpus()));
            row.push(number(node.allocated_gpus()));
            if show_unhealthy {
                row.push(number(node.unhealthy_gpus()));
            }
            row
        })
        .collect();

    let mut lines = vec![
        SummaryTable { headers, rows }.render(),
        SEPARATOR.to_string(),
        format!("Allocated/Total GPUs of nodes which own resource {} In Cluster:", resource),
        ratio(totals.allocated_gpus, totals.total_gpus),
    ];
    push_unhealthy(&mut lines, &totals, resource);
    lines.join("\n") + "\n"
}

fn shared_summary(nodes: &[&SharedMemoryNode], resource: &str) -> String {
    let show_unhealthy = any_unhealthy(nodes.iter().map(|n| *n as &dyn GpuAccounting));
    let mut headers = identity_headers();
    headers.extend([
        "GPUs(Allocated/Total)".to_string(),
        "GPU_MEMORY(Allocated/Total)".to_string(),
        "GPU_CORE(Allocated/Total)".to_string(),
    ]);
    if show_unhealthy {
        headers.push("UNHEALTHY".to_string());
    }

    let mut totals = ClusterTotals::default();
    let (mut total_memory, mut allocated_memory) = (0.0, 0.0);
    let (mut total_core, mut allocated_core) = (0.0, 0.0);
    let rows = nodes
        .iter()
        .map(|n| {
            totals.add(*n);
            total_memory += n.total_memory;
            allocated_memory += n.allocated_memory;
            total_core += n.total_core;
            allocated_core += n.allocated_core;

            let mut row = identity_row(*n);
            row.push(format!("{}/{}", number(n.allocated_gpus), number(n.total_gpus)));
            row.push(format!("{:.1}/{:.1} GiB", n.allocated_memory, n.total_memory));
            row.push(if n.supports_core_sharing() {
                format!("{}/{}", number(n.allocated_core), number(n.total_core))
            } else {
                "__".to_string()
            });
            if show_unhealthy {
                row.push(number(n.unhealthy_gpus));
            }
            row
        })
        .collect();

    let mut lines = vec![
        SummaryTable { headers, rows }.render(),
        SEPARATOR.to_string(),
        format!("Allocated/Total GPUs of nodes which own resource {} In Cluster:", resource),
        ratio(totals.allocated_gpus, totals.total_gpus),
        format!("Allocated/Total GPU Memory of nodes which own resource {} In Cluster:", resource),
        memory_ratio(allocated_memory, total_memory),
    ];
    if total_core > 0.0 {
        lines.push(format!(
            "Allocated/Total GPU Core of nodes which own resource {} In Cluster:",
            resource
        ));
        lines.push(ratio(allocated_core, total_core));
    }
    push_unhealthy(&mut lines, &totals, resource);
    lines.join("\n") + "\n"
}

fn quota_summary(nodes: &[&QuotaGpuNode], resource: &str) -> String {
    let show_unhealthy = any_unhealthy(nodes.iter().map(|n| *n as &dyn GpuAccounting));
    let mut headers = identity_headers();
    headers.extend([
        "GPUs(Allocated/Total)".to_string(),
        "GPU_MEMORY(Allocated/Total)".to_string(),
    ]);
    if show_unhealthy {
        headers.push("UNHEALTHY".to_string());
    }

    let mut totals = ClusterTotals::default();
    let (mut total_memory, mut allocated_memory) = (0.0, 0.0);
    let rows = nodes
        .iter()
        .map(|n| {
            totals.add(*n);
            total_memory += n.total_memory;
            allocated_memory += n.allocated_memory;

            let mut row = identity_row(*n);
            row.push(format!("{}/{}", number(n.allocated_gpus), number(n.total_gpus)));
            row.push(format!("{:.1}/{:.1} GiB", n.allocated_memory, n.total_memory));
            if show_unhealthy {
                row.push(number(n.unhealthy_gpus));
            }
            row
        })
        .collect();

    let mut lines = vec![
        SummaryTable { headers, rows }.render(),
        SEPARATOR.to_string(),
        format!("Allocated/Total GPUs of nodes which own resource {} In Cluster:", resource),
        ratio(totals.allocated_gpus, totals.total_gpus),
        format!("Allocated/Total GPU Memory of nodes which own resource {} In Cluster:", resource),
        memory_ratio(allocated_memory, total_memory),
    ];
    push_unhealthy(&mut lines, &totals, resource);
    lines.join("\n") + "\n"
}

fn memory_ratio(allocated: f64, total: f64) -> String {
    format!(
        "{:.1}/{:.1} GiB ({:.1}%)",
        allocated,
        total,
        percent(allocated, total)
    )
}

fn push_unhealthy(lines: &mut Vec<String>, totals: &ClusterTotals, resource: &str) {
    if totals.unhealthy_gpus > 0.0 {
        lines.push(format!(
            "Unhealthy/Total GPUs of nodes which own resource {} In Cluster:",
            resource
        ));
        lines.push(ratio(totals.unhealthy_gpus, totals.total_gpus));
    }
}
