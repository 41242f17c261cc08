//! Interconnect-aware multi-GPU nodes
//!
//! The device set and the link matrices come from a topology descriptor
//! published per node; node resource quantities only provide the totals.

use super::{BaseNode, ClassifiedNode, GpuAccounting, NodeContext, NodeStrategy, NodeVariant};
use crate::allocation::parse_device_list;
use crate::matrix::{load_device_health, TopologyMatrix};
use crate::render::{number, DetailBuilder};
use serde::Serialize;
use std::fmt;
use topnode_core::{ClusterNode, EngineConfig, Error, GpuMetricSample, Result, TopologyDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Idle,
    Using,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Idle => write!(f, "idle"),
            DeviceStatus::Using => write!(f, "using"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyDevice {
    pub id: String,
    pub healthy: bool,
    pub status: DeviceStatus,
}

/// Per-device memory view, available only with telemetry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyMetricDevice {
    pub id: String,
    pub total_memory: f64,
    /// Whole device memory while the device is bound, else 0
    pub allocated_memory: f64,
    pub used_memory: f64,
    pub duty_cycle: f64,
}

impl TopologyMetricDevice {
    fn is_allocated(&self) -> bool {
        self.allocated_memory > 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyInstance {
    pub name: String,
    pub namespace: String,
    pub status: String,
    pub requested_gpus: i64,
    /// Devices physically bound to the instance
    #[serde(rename = "allocation")]
    pub bound_devices: Vec<String>,
    /// Devices exposed to the instance's containers
    #[serde(rename = "visibleGPUs")]
    pub visible_devices: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyNode {
    #[serde(flatten)]
    pub base: BaseNode,
    #[serde(rename = "totalGPUs")]
    pub total_gpus: f64,
    #[serde(rename = "allocatedGPUs")]
    pub allocated_gpus: f64,
    #[serde(rename = "unhealthyGPUs")]
    pub unhealthy_gpus: f64,
    pub instances: Vec<TopologyInstance>,
    pub devices: Vec<TopologyDevice>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub metric_devices: Vec<TopologyMetricDevice>,
    #[serde(rename = "gpuTopology")]
    pub topology: TopologyMatrix,
    #[serde(rename = "gpuMetrics")]
    pub gpu_metrics: Vec<GpuMetricSample>,
}

impl TopologyNode {
    /// Build from the node's descriptor; fails when no descriptor names the node
    pub fn from_context(ctx: &NodeContext<'_>) -> Result<Self> {
        let descriptor = find_descriptor(ctx)?;
        let config = ctx.config;
        let resource = &config.resources.topology_gpu;
        let metrics = ctx.metrics();

        let mut devices: Vec<TopologyDevice> = load_device_health(descriptor)
            .into_iter()
            .map(|(id, healthy)| TopologyDevice {
                id,
                healthy,
                status: DeviceStatus::Idle,
            })
            .collect();

        let mut instances = Vec::new();
        for workload in ctx.live_workloads() {
            let requested = workload.resource_request(resource);
            if requested == 0 {
                continue;
            }
            let bound_devices =
                parse_device_list(workload.annotation(&config.annotations.topology_bound_devices));
            let visible_devices = parse_device_list(
                workload.annotation(&config.annotations.topology_visible_devices),
            );
            for device in devices.iter_mut() {
                if bound_devices.contains(&device.id) {
                    device.status = DeviceStatus::Using;
                }
            }
            instances.push(TopologyInstance {
                name: workload.name.clone(),
                namespace: workload.namespace.clone(),
                status: workload.display_status(),
                requested_gpus: requested,
                bound_devices,
                visible_devices,
            });
        }

        let topology = TopologyMatrix::load(descriptor, devices.len());

        let total_gpus = match metrics {
            Some(m) => m.device_count() as f64,
            None => ctx.node.capacity_of(resource).unwrap_or(0) as f64,
        };
        let allocated_gpus = instances.iter().map(|i| i.requested_gpus).sum::<i64>() as f64;
        let unhealthy_gpus = match ctx.node.allocatable_of(resource) {
            Some(allocatable) if total_gpus > 0.0 => (total_gpus - allocatable as f64).max(0.0),
            _ => 0.0,
        };

        let mut metric_devices: Vec<TopologyMetricDevice> = metrics
            .map(|m| {
                m.samples()
                    .map(|sample| {
                        let bound = devices
                            .iter()
                            .any(|d| d.id == sample.id && d.status == DeviceStatus::Using);
                        let (allocated, used, duty) = if bound && sample.memory_total > 0.0 {
                            (sample.memory_total, sample.memory_used, sample.duty_cycle)
                        } else {
                            (0.0, 0.0, 0.0)
                        };
                        TopologyMetricDevice {
                            id: sample.id.clone(),
                            total_memory: sample.memory_total,
                            allocated_memory: allocated,
                            used_memory: used,
                            duty_cycle: duty,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        metric_devices.sort_by(|a, b| super::compare_device_ids(&a.id, &b.id));

        let description = format!(
            "GPUs on this node are allocated with awareness of their interconnect topology.\nWorkloads request resource '{}' to use them.",
            resource
        );

        Ok(Self {
            base: BaseNode::new(ctx, NodeVariant::Topology, description),
            total_gpus,
            allocated_gpus,
            unhealthy_gpus,
            instances,
            devices,
            metric_devices,
            topology,
            gpu_metrics: metrics.map(|m| m.samples().cloned().collect()).unwrap_or_default(),
        })
    }

    pub fn device(&self, id: &str) -> Option<&TopologyDevice> {
        self.devices.iter().find(|d| d.id == id)
    }

    pub fn total_memory(&self) -> f64 {
        self.metric_devices.iter().map(|d| d.total_memory).sum()
    }

    pub fn allocated_memory(&self) -> f64 {
        self.metric_devices.iter().map(|d| d.allocated_memory).sum()
    }

    /// Used memory of bound devices only
    pub fn used_memory(&self) -> f64 {
        self.metric_devices
            .iter()
            .filter(|d| d.is_allocated())
            .map(|d| d.used_memory)
            .sum()
    }

    fn matrix_rows<T: ToString>(&self, matrix: &[Vec<T>]) -> Vec<Vec<String>> {
        matrix
            .iter()
            .enumerate()
            .map(|(row, values)| {
                let label = self
                    .devices
                    .get(row)
                    .map(|d| format!("GPU{}", d.id))
                    .unwrap_or_else(|| format!("GPU{}", row));
                std::iter::once(label)
                    .chain(values.iter().map(ToString::to_string))
                    .collect()
            })
            .collect()
    }
}

fn find_descriptor<'a>(ctx: &NodeContext<'a>) -> Result<&'a TopologyDescriptor> {
    let label = &ctx.config.classification.descriptor_node_label;
    ctx.descriptors
        .iter()
        .find(|d| d.labels.get(label).map(String::as_str) == Some(ctx.node.name.as_str()))
        .ok_or_else(|| {
            Error::not_found(format!("topology descriptor for node {}", ctx.node.name))
        })
}

impl GpuAccounting for TopologyNode {
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
                    i.bound_devices.join(","),
                    i.visible_devices.join(","),
                ]
            })
            .collect();
        let device_headers: &[&str] = if self.metric_devices.is_empty() {
            &["INDEX", "STATUS", "HEALTHY"]
        } else {
            &["INDEX", "MEMORY(Total)", "MEMORY(Allocated)", "MEMORY(Used)", "DUTY_CYCLE"]
        };
        let device_rows: Vec<Vec<String>> = if self.metric_devices.is_empty() {
            self.devices
                .iter()
                .map(|d| vec![format!("GPU{}", d.id), d.status.to_string(), d.healthy.to_string()])
                .collect()
        } else {
            self.metric_devices
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
                .collect()
        };

        let mut summary = vec![
            ("Total GPUs", number(self.total_gpus)),
            ("Allocated GPUs", number(self.allocated_gpus)),
            ("Unhealthy GPUs", number(self.unhealthy_gpus)),
        ];
        if !self.metric_devices.is_empty() {
            summary.push(("Total GPU Memory", format!("{:.1} GiB", self.total_memory())));
            summary.push(("Allocated GPU Memory", format!("{:.1} GiB", self.allocated_memory())));
            summary.push(("Used GPU Memory", format!("{:.1} GiB", self.used_memory())));
        }

        let matrix_header: Vec<String> = std::iter::once(String::new())
            .chain(self.devices.iter().map(|d| format!("GPU{}", d.id)))
            .collect();
        let matrix_header: Vec<&str> = matrix_header.iter().map(String::as_str).collect();

        DetailBuilder::new(&self.base)
            .table(
                "Instances",
                &["NAMESPACE", "NAME", "STATUS", "GPU(Requested)", "GPU(Allocated)", "GPU(Visible)"],
                &instance_rows,
            )
            .table("GPUs", device_headers, &device_rows)
            .table(
                "LinkTypeMatrix",
                &matrix_header,
                &self.matrix_rows(&self.topology.link_types),
            )
            .table(
                "BandwidthMatrix",
                &matrix_header,
                &self.matrix_rows(&self.topology.bandwidths),
            )
            .summary("GPU Summary", &summary)
            .build()
    }
}

/// Matches nodes labelled for topology-aware scheduling
pub struct TopologyStrategy;

impl NodeStrategy for TopologyStrategy {
    fn variant(&self) -> NodeVariant {
        NodeVariant::Topology
    }

    fn matches(&self, node: &ClusterNode, config: &EngineConfig) -> bool {
        config
            .classification
            .topology_node_labels
            .matches_any(&node.labels)
    }

    fn build(&self, ctx: &NodeContext<'_>) -> Result<ClassifiedNode> {
        TopologyNode::from_context(ctx).map(ClassifiedNode::Topology)
    }
}
