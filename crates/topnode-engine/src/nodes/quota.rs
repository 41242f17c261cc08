//! Quota-based GPU virtualization
//!
//! Each container asks for a core quota (percent of one device) and a memory
//! quota. The scheduler writes the chosen devices per container into
//! `<index-prefix>-<container>` annotations. With live telemetry the device
//! set comes from the samples, otherwise it is derived from node capacity.

use super::{
    device_ids, round1, unhealthy_from_memory_gap, BaseNode, ClassifiedNode, GpuAccounting,
    NodeContext, NodeStrategy, NodeVariant,
};
use crate::allocation::{parse_device_list, DeviceAllocation};
use crate::render::{number, percent, DetailBuilder};
use serde::Serialize;
use std::collections::BTreeMap;
use topnode_core::{
    ClusterNode, EngineConfig, GpuMetricSample, NodeGpuMetrics, Result, WorkloadInstance,
};

/// A container's core quota at or above this value owns whole devices
const FULL_DEVICE_CORE: i64 = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaInstance {
    pub name: String,
    pub namespace: String,
    pub status: String,
    pub requested_memory: f64,
    pub allocation: DeviceAllocation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaDevice {
    pub id: String,
    pub total_memory: f64,
    pub allocated_memory: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_memory: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duty_cycle: Option<f64>,
}

/// Node with quota-virtualized GPUs. Memory values are GiB.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaGpuNode {
    #[serde(flatten)]
    pub base: BaseNode,
    #[serde(rename = "totalGPUMemory")]
    pub total_memory: f64,
    #[serde(rename = "allocatedGPUMemory")]
    pub allocated_memory: f64,
    #[serde(rename = "usedGPUMemory")]
    pub used_memory: f64,
    pub duty_cycle: f64,
    #[serde(rename = "totalGPUs")]
    pub total_gpus: f64,
    #[serde(rename = "allocatedGPUs")]
    pub allocated_gpus: f64,
    #[serde(rename = "unhealthyGPUs")]
    pub unhealthy_gpus: f64,
    pub instances: Vec<QuotaInstance>,
    pub devices: Vec<QuotaDevice>,
    #[serde(rename = "gpuMetrics")]
    pub gpu_metrics: Vec<GpuMetricSample>,
}

/// Per-device memory sizes, from telemetry or by even apportionment
struct DeviceMemory<'a> {
    metrics: Option<&'a NodeGpuMetrics>,
    even_share: f64,
}

impl DeviceMemory<'_> {
    fn of(&self, id: &str) -> f64 {
        self.metrics
            .and_then(|m| m.device(id))
            .map(|s| s.memory_total)
            .unwrap_or(self.even_share)
    }
}

impl QuotaGpuNode {
    pub fn from_context(ctx: &NodeContext<'_>) -> Self {
        let config = ctx.config;
        let resources = &config.resources;
        let metrics = ctx.metrics();

        let total_gpus = match metrics {
            Some(m) => m.device_count() as f64,
            None => ctx.node.capacity_of(&resources.quota_core).unwrap_or(0) as f64 / 100.0,
        };
        let memory_capacity = ctx.node.capacity_of(&resources.quota_memory);
        let memory_allocatable = ctx.node.allocatable_of(&resources.quota_memory);
        let total_memory = metrics
            .map(|m| m.total_memory())
            .filter(|t| *t > 0.0)
            .unwrap_or(memory_capacity.unwrap_or(0) as f64);

        let device_memory = DeviceMemory {
            metrics,
            even_share: if total_gpus > 0.0 {
                total_memory / total_gpus
            } else {
                0.0
            },
        };

        let instances: Vec<QuotaInstance> = ctx
            .live_workloads()
            .filter(|w| w.annotation(&config.annotations.quota_allocation).is_some())
            .map(|w| QuotaInstance {
                name: w.name.clone(),
                namespace: w.namespace.clone(),
                status: w.display_status(),
                requested_memory: requested_memory(w, config, &device_memory),
                allocation: instance_allocation(w, config, &device_memory),
            })
            .collect();

        let ids = device_ids(
            total_gpus as usize,
            instances.iter().flat_map(|i| i.allocation.devices()),
        );
        let mut devices: Vec<QuotaDevice> = ids
            .into_iter()
            .map(|id| {
                let sample = metrics.and_then(|m| m.device(&id));
                QuotaDevice {
                    total_memory: device_memory.of(&id),
                    allocated_memory: 0.0,
                    used_memory: sample.map(|s| s.memory_used),
                    duty_cycle: sample.map(|s| s.duty_cycle),
                    id,
                }
            })
            .collect();

        let mut fractional = 0.0;
        for instance in &instances {
            for (id, amount) in instance.allocation.iter() {
                let Some(device) = devices.iter_mut().find(|d| d.id == id) else {
                    continue;
                };
                device.allocated_memory += amount;
                if device.total_memory > 0.0 {
                    fractional += amount / device.total_memory;
                }
            }
        }

        let allocated_memory = instances.iter().map(|i| i.allocation.total()).sum();
        let unhealthy_gpus = unhealthy_from_memory_gap(
            total_gpus,
            memory_capacity,
            memory_allocatable,
            config.accounting.assume_unhealthy_on_zero_capacity,
        );

        let description = format!(
            "This node virtualizes GPUs by core and memory quota.\nWorkloads request resources '{}' / '{}' to use it.",
            resources.quota_core, resources.quota_memory
        );

        Self {
            base: BaseNode::new(ctx, NodeVariant::QuotaGpu, description),
            total_memory,
            allocated_memory,
            used_memory: metrics.map(|m| m.used_memory()).unwrap_or(0.0),
            duty_cycle: metrics.map(|m| m.mean_duty_cycle()).unwrap_or(0.0),
            total_gpus,
            allocated_gpus: round1(fractional),
            unhealthy_gpus,
            instances,
            devices,
            gpu_metrics: metrics.map(|m| m.samples().cloned().collect()).unwrap_or_default(),
        }
    }

    pub fn telemetry_enabled(&self) -> bool {
        !self.gpu_metrics.is_empty()
    }

    pub fn device(&self, id: &str) -> Option<&QuotaDevice> {
        self.devices.iter().find(|d| d.id == id)
    }
}

/// Devices listed for each container, keyed by container name
fn container_devices(instance: &WorkloadInstance, prefix: &str) -> BTreeMap<String, Vec<String>> {
    let prefix = format!("{}-", prefix);
    instance
        .annotations
        .iter()
        .filter_map(|(key, value)| {
            let container = key.strip_prefix(&prefix)?;
            Some((container.to_string(), parse_device_list(Some(value))))
        })
        .collect()
}

/// Memory held per device: the container's memory quota for partial core
/// quotas, the device's whole memory for full-device quotas
fn instance_allocation(
    instance: &WorkloadInstance,
    config: &EngineConfig,
    device_memory: &DeviceMemory<'_>,
) -> DeviceAllocation {
    let memory = instance.container_requests(&config.resources.quota_memory);
    let core = instance.container_requests(&config.resources.quota_core);

    let mut allocation = DeviceAllocation::new();
    for (container, devices) in container_devices(instance, &config.annotations.quota_device_index_prefix)
    {
        let full_device = core.get(&container).copied().unwrap_or(0) >= FULL_DEVICE_CORE;
        for id in devices {
            let amount = if full_device {
                device_memory.of(&id)
            } else {
                memory.get(&container).copied().unwrap_or(0) as f64
            };
            allocation.add(id, amount);
        }
    }
    allocation
}

fn requested_memory(
    instance: &WorkloadInstance,
    config: &EngineConfig,
    device_memory: &DeviceMemory<'_>,
) -> f64 {
    let memory = instance.container_requests(&config.resources.quota_memory);
    let devices = container_devices(instance, &config.annotations.quota_device_index_prefix);

    instance
        .container_requests(&config.resources.quota_core)
        .into_iter()
        .map(|(container, core)| {
            if core < FULL_DEVICE_CORE {
                memory.get(&container).copied().unwrap_or(0) as f64
            } else {
                devices
                    .get(&container)
                    .map(|ids| ids.iter().map(|id| device_memory.of(id)).sum())
                    .unwrap_or(0.0)
            }
        })
        .sum()
}

impl GpuAccounting for QuotaGpuNode {
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
                let items = i
                    .allocation
                    .iter()
                    .map(|(id, amount)| format!("gpu{}({:.1}GiB)", id, amount))
                    .collect::<Vec<_>>()
                    .join(",");
                vec![
                    i.namespace.clone(),
                    i.name.clone(),
                    i.status.clone(),
                    format!("{:.1} GiB", i.requested_memory),
                    items,
                ]
            })
            .collect();

        let telemetry = self.telemetry_enabled();
        let device_headers: Vec<&str> = if telemetry {
            vec!["INDEX", "MEMORY(Total)", "MEMORY(Allocated)", "MEMORY(Used)", "DUTY_CYCLE"]
        } else {
            vec!["INDEX", "MEMORY(Total)", "MEMORY(Allocated)", "PERCENT"]
        };
        let device_rows: Vec<Vec<String>> = self
            .devices
            .iter()
            .map(|d| {
                let mut row = vec![
                    d.id.clone(),
                    format!("{:.1} GiB", d.total_memory),
                    format!("{:.1} GiB", d.allocated_memory),
                ];
                if telemetry {
                    // idle devices report no usage
                    let busy = d.allocated_memory > 0.0;
                    row.push(format!(
                        "{:.1} GiB",
                        if busy { d.used_memory.unwrap_or(0.0) } else { 0.0 }
                    ));
                    row.push(format!(
                        "{:.1}%",
                        if busy { d.duty_cycle.unwrap_or(0.0) } else { 0.0 }
                    ));
                } else {
                    row.push(format!("{:.1}%", percent(d.allocated_memory, d.total_memory)));
                }
                row
            })
            .collect();

        let mut summary = vec![
            ("Total GPUs", number(self.total_gpus)),
            ("Allocated GPUs", number(self.allocated_gpus)),
            ("Unhealthy GPUs", number(self.unhealthy_gpus)),
            ("Total GPU Memory", format!("{:.1} GiB", self.total_memory)),
            ("Allocated GPU Memory", format!("{:.1} GiB", self.allocated_memory)),
        ];
        if telemetry {
            summary.push(("Used GPU Memory", format!("{:.1} GiB", self.used_memory)));
            summary.push(("GPU Duty Cycle", format!("{:.1}%", self.duty_cycle)));
        }

        DetailBuilder::new(&self.base)
            .table(
                "Instances",
                &["NAMESPACE", "NAME", "STATUS", "GPU_MEM(Requested)", "GPU_MEM(Allocated)"],
                &instance_rows,
            )
            .table("GPUs", &device_headers, &device_rows)
            .summary("GPU Summary", &summary)
            .build()
    }
}

/// Matches nodes labelled for quota virtualization or advertising core quota
pub struct QuotaGpuStrategy;

impl NodeStrategy for QuotaGpuStrategy {
    fn variant(&self) -> NodeVariant {
        NodeVariant::QuotaGpu
    }

    fn matches(&self, node: &ClusterNode, config: &EngineConfig) -> bool {
        config
            .classification
            .quota_node_labels
            .matches_any(&node.labels)
            || node.allocatable_of(&config.resources.quota_core).unwrap_or(0) > 0
    }

    fn build(&self, ctx: &NodeContext<'_>) -> Result<ClassifiedNode> {
        Ok(ClassifiedNode::QuotaGpu(QuotaGpuNode::from_context(ctx)))
    }
}
