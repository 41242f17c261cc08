use super::{BaseNode, ClassifiedNode, GpuAccounting, NodeContext, NodeStrategy, NodeVariant};
use crate::render::{number, DetailBuilder};
use serde::Serialize;
use std::collections::HashSet;
use topnode_core::{ClusterNode, EngineConfig, GpuMetricSample, Result};

/// Live instance holding whole GPUs
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExclusiveInstance {
    pub name: String,
    pub namespace: String,
    pub status: String,
    pub requested_gpus: i64,
}

/// Per-device view, available only with telemetry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExclusiveDevice {
    pub id: String,
    pub total_memory: f64,
    pub allocated_memory: f64,
    pub used_memory: f64,
    pub duty_cycle: f64,
}

/// Node handing out whole GPUs
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExclusiveNode {
    #[serde(flatten)]
    pub base: BaseNode,
    pub capacity: i64,
    pub allocatable: i64,
    #[serde(rename = "totalGPUs")]
    pub total_gpus: f64,
    /// Sum of per-container requests over live instances
    #[serde(rename = "allocatedGPUs")]
    pub allocated_gpus: f64,
    #[serde(rename = "unhealthyGPUs")]
    pub unhealthy_gpus: f64,
    pub instances: Vec<ExclusiveInstance>,
    pub devices: Vec<ExclusiveDevice>,
    #[serde(rename = "gpuMetrics")]
    pub gpu_metrics: Vec<GpuMetricSample>,
}

impl ExclusiveNode {
    pub fn from_context(ctx: &NodeContext<'_>) -> Self {
        let resource = &ctx.config.resources.gpu;
        let capacity = ctx.node.capacity_of(resource).unwrap_or(0);
        let allocatable = ctx.node.allocatable_of(resource);
        let metrics = ctx.metrics();

        let total_gpus = match metrics {
            Some(m) => m.device_count() as f64,
            None => capacity as f64,
        };

        let instances: Vec<ExclusiveInstance> = ctx
            .live_workloads()
            .filter_map(|w| {
                let requested = w.resource_request(resource);
                (requested > 0).then(|| ExclusiveInstance {
                    name: w.name.clone(),
                    namespace: w.namespace.clone(),
                    status: w.display_status(),
                    requested_gpus: requested,
                })
            })
            .collect();
        let allocated_gpus = instances.iter().map(|i| i.requested_gpus).sum::<i64>() as f64;

        let unhealthy_gpus = match allocatable {
            Some(allocatable) if total_gpus > 0.0 => (total_gpus - allocatable as f64).max(0.0),
            _ => 0.0,
        };

        let mut devices = Vec::new();
        let mut gpu_metrics = Vec::new();
        if let Some(metrics) = metrics {
            let holders: HashSet<String> = instances
                .iter()
                .map(|i| format!("{}/{}", i.namespace, i.name))
                .collect();
            for sample in metrics.samples() {
                let allocated = sample.pod_names.iter().any(|p| holders.contains(p));
                devices.push(ExclusiveDevice {
                    id: sample.id.clone(),
                    total_memory: sample.memory_total,
                    allocated_memory: if allocated { sample.memory_total } else { 0.0 },
                    used_memory: sample.memory_used,
                    duty_cycle: sample.duty_cycle,
                });
                gpu_metrics.push(sample.clone());
            }
            devices.sort_by(|a, b| super::compare_device_ids(&a.id, &b.id));
        }

        let description = format!(
            "GPUs on this node are allocated exclusively, whole devices only.\nWorkloads request resource '{}' to use them.",
            resource
        );

        Self {
            base: BaseNode::new(ctx, NodeVariant::Exclusive, description),
            capacity,
            allocatable: allocatable.unwrap_or(0),
            total_gpus,
            allocated_gpus,
            unhealthy_gpus,
            instances,
            devices,
            gpu_metrics,
        }
    }

    pub fn total_memory(&self) -> f64 {
        self.devices.iter().map(|d| d.total_memory).sum()
    }

    pub fn allocated_memory(&self) -> f64 {
        self.devices.iter().map(|d| d.allocated_memory).sum()
    }

    pub fn used_memory(&self) -> f64 {
        self.devices.iter().map(|d| d.used_memory).sum()
    }
}

impl GpuAccounting for ExclusiveNode {
    fn base(&self) -> &BaseNode {
        &self.base
    }

    fn total_gpus(&self) -> f64 {
        self.total_gpus
    }

    fn allocated_gpus(&self) -> f64 {
        self.allocated_gpus
    }

    fn unhealthy_gpus(&self) -> f64 {
        self.unhealthy_gpus
    }

    fn is_healthy(&self) -> bool {
        self.unhealthy_gpus == 0.0 && self.allocatable == self.capacity
    }

    fn render_details(&self) -> String {
        let instance_rows: Vec<Vec<String>> = self
            .instances
            .iter()
            .map(|i| {
                vec![
                    i.namespace.clone(),
                    i.name.clone(),
                    i.status.clone(),
                    i.requested_gpus.to_string(),
                ]
            })
            .collect();
        let device_rows: Vec<Vec<String>> = self
            .devices
            .iter()
            .map(|d| {
                vec![
                    d.id.clone(),
                    format!("{:.1} GiB", d.total_memory),
                    format!("{:.1} GiB", d.allocated_memory),
                    format!("{:.1} GiB", d.used_memory),
                    format!("{:.1}%", d.duty_cycle),
                ]
            })
            .collect();

        let mut summary = vec![
            ("Total GPUs", number(self.total_gpus)),
            ("Allocated GPUs", number(self.allocated_gpus)),
            ("Unhealthy GPUs", number(self.unhealthy_gpus)),
        ];
        if !self.devices.is_empty() {
            summary.push(("Total GPU Memory", format!("{:.1} GiB", self.total_memory())));
            summary.push(("Allocated GPU Memory", format!("{:.1} GiB", self.allocated_memory())));
            summary.push(("Used GPU Memory", format!("{:.1} GiB", self.used_memory())));
        }

        DetailBuilder::new(&self.base)
            .table(
                "Instances",
                &["NAMESPACE", "NAME", "STATUS", "GPU(Requested)"],
                &instance_rows,
            )
            .table(
                "GPUs",
                &["INDEX", "MEMORY(Total)", "MEMORY(Allocated)", "MEMORY(Used)", "DUTY_CYCLE"],
                &device_rows,
            )
            .summary("GPU Summary", &summary)
            .build()
    }
}

/// Matches nodes advertising allocatable whole GPUs
pub struct ExclusiveStrategy;

impl NodeStrategy for ExclusiveStrategy {
    fn variant(&self) -> NodeVariant {
        NodeVariant::Exclusive
    }

    fn matches(&self, node: &ClusterNode, config: &EngineConfig) -> bool {
        node.allocatable_of(&config.resources.gpu).unwrap_or(0) > 0
    }

    fn build(&self, ctx: &NodeContext<'_>) -> Result<ClassifiedNode> {
        Ok(ClassifiedNode::Exclusive(ExclusiveNode::from_context(ctx)))
    }
}
