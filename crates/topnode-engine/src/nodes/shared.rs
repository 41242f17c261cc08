//! Fractional GPU memory sharing
//!
//! Devices are carved up by memory. The node advertises its whole shared
//! memory pool and a separate device count; the scheduler records each
//! instance's per-device share in an annotation.

use super::{
    device_ids, round1, unhealthy_from_memory_gap, BaseNode, ClassifiedNode, GpuAccounting,
    NodeContext, NodeStrategy, NodeVariant,
};
use crate::allocation::DeviceAllocation;
use crate::render::{number, percent, DetailBuilder};
use serde::Serialize;
use topnode_core::{ClusterNode, EngineConfig, GpuMetricSample, Result, WorkloadInstance};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedInstance {
    pub name: String,
    pub namespace: String,
    pub status: String,
    pub requested_memory: f64,
    pub requested_core: f64,
    pub memory_allocation: DeviceAllocation,
    pub core_allocation: DeviceAllocation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedDevice {
    pub id: String,
    pub total_memory: f64,
    pub allocated_memory: f64,
    pub total_core: f64,
    pub allocated_core: f64,
    /// Observed usage, only with telemetry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_memory: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duty_cycle: Option<f64>,
}

/// Node sharing GPU memory between instances. Memory values are GiB.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedMemoryNode {
    #[serde(flatten)]
    pub base: BaseNode,
    #[serde(rename = "totalGPUMemory")]
    pub total_memory: f64,
    #[serde(rename = "allocatableGPUMemory")]
    pub allocatable_memory: f64,
    /// Sum of live instances' memory requests
    #[serde(rename = "allocatedGPUMemory")]
    pub allocated_memory: f64,
    #[serde(rename = "unhealthyGPUMemory")]
    pub unhealthy_memory: f64,
    pub device_count: usize,
    pub single_device_capacity: f64,
    #[serde(rename = "totalGPUCore")]
    pub total_core: f64,
    #[serde(rename = "allocatedGPUCore")]
    pub allocated_core: f64,
    #[serde(rename = "totalGPUs")]
    pub total_gpus: f64,
    #[serde(rename = "allocatedGPUs")]
    pub allocated_gpus: f64,
    #[serde(rename = "unhealthyGPUs")]
    pub unhealthy_gpus: f64,
    pub instances: Vec<SharedInstance>,
    pub devices: Vec<SharedDevice>,
    #[serde(rename = "gpuMetrics")]
    pub gpu_metrics: Vec<GpuMetricSample>,
}

impl SharedMemoryNode {
    pub fn from_context(ctx: &NodeContext<'_>) -> Self {
        let config = ctx.config;
        let resources = &config.resources;
        let metrics = ctx.metrics();

        let memory_capacity = ctx.node.capacity_of(&resources.share_memory);
        let memory_allocatable = ctx.node.allocatable_of(&resources.share_memory);
        let capacity = memory_capacity.unwrap_or(0) as f64;

        let device_count = match metrics {
            Some(m) => m.device_count(),
            None => ctx.node.capacity_of(&resources.share_count).unwrap_or(0).max(0) as usize,
        };
        let total_memory = metrics
            .map(|m| m.total_memory())
            .filter(|t| *t > 0.0)
            .unwrap_or(capacity);
        let single_device_capacity = if device_count == 0 {
            0.0
        } else {
            total_memory / device_count as f64
        };
        let total_core = ctx.node.capacity_of(&resources.share_core).unwrap_or(0) as f64;
        let core_per_device = if device_count == 0 {
            0.0
        } else {
            (total_core / device_count as f64).floor()
        };

        let device_memory = |id: &str| {
            metrics
                .and_then(|m| m.device(id))
                .map(|s| s.memory_total)
                .unwrap_or(single_device_capacity)
        };

        let instances: Vec<SharedInstance> = ctx
            .live_workloads()
            .filter_map(|w| shared_instance(w, config))
            .collect();

        let ids = device_ids(
            device_count,
            instances.iter().flat_map(|i| {
                i.memory_allocation.devices().chain(i.core_allocation.devices())
            }),
        );
        let mut devices: Vec<SharedDevice> = ids
            .into_iter()
            .map(|id| {
                let sample = metrics.and_then(|m| m.device(&id));
                SharedDevice {
                    total_memory: device_memory(&id),
                    allocated_memory: 0.0,
                    total_core: core_per_device,
                    allocated_core: 0.0,
                    used_memory: sample.map(|s| s.memory_used),
                    duty_cycle: sample.map(|s| s.duty_cycle),
                    id,
                }
            })
            .collect();

        let mut fractional = 0.0;
        for instance in &instances {
            for device in devices.iter_mut() {
                if let Some(amount) = instance.memory_allocation.get(&device.id) {
                    device.allocated_memory += amount;
                    if device.total_memory > 0.0 {
                        fractional += amount / device.total_memory;
                    }
                }
                if let Some(core) = instance.core_allocation.get(&device.id) {
                    device.allocated_core += core;
                }
            }
        }

        let allocated_memory = instances.iter().map(|i| i.requested_memory).sum();
        let allocated_core = devices.iter().map(|d| d.allocated_core).sum();
        let total_gpus = device_count as f64;
        let unhealthy_gpus = unhealthy_from_memory_gap(
            total_gpus,
            memory_capacity,
            memory_allocatable,
            config.accounting.assume_unhealthy_on_zero_capacity,
        );
        let unhealthy_memory = match (memory_capacity, memory_allocatable) {
            (Some(c), Some(a)) => (c - a).max(0) as f64,
            _ => 0.0,
        };

        let mut description = format!(
            "GPU memory on this node is shared between workloads.\nWorkloads request resource '{}' (GiB) to use it.",
            resources.share_memory
        );
        if total_core > 0.0 {
            description.push_str(&format!(
                "\nWorkloads request resource '{}' to share GPU cores.",
                resources.share_core
            ));
        }

        Self {
            base: BaseNode::new(ctx, NodeVariant::SharedMemory, description),
            total_memory,
            allocatable_memory: memory_allocatable.unwrap_or(0) as f64,
            allocated_memory,
            unhealthy_memory,
            device_count,
            single_device_capacity,
            total_core,
            allocated_core,
            total_gpus,
            allocated_gpus: round1(fractional),
            unhealthy_gpus,
            instances,
            devices,
            gpu_metrics: metrics.map(|m| m.samples().cloned().collect()).unwrap_or_default(),
        }
    }

    pub fn supports_core_sharing(&self) -> bool {
        self.total_core > 0.0
    }

    pub fn telemetry_enabled(&self) -> bool {
        !self.gpu_metrics.is_empty()
    }

    pub fn used_memory(&self) -> f64 {
        self.devices
            .iter()
            .filter(|d| d.allocated_memory > 0.0)
            .filter_map(|d| d.used_memory)
            .sum()
    }
}

fn shared_instance(instance: &WorkloadInstance, config: &EngineConfig) -> Option<SharedInstance> {
    let resources = &config.resources;
    let annotations = &config.annotations;
    let requested_memory = instance.resource_request(&resources.share_memory) as f64;
    let requested_core = instance.resource_request(&resources.share_core) as f64;

    let memory_allocation = match instance.annotation(&annotations.share_allocation) {
        Some(raw) => DeviceAllocation::decode_or_default(Some(raw)),
        None => match instance.annotation(&annotations.share_device_index) {
            Some(index) if !index.trim().is_empty() && requested_memory > 0.0 => {
                DeviceAllocation::single(index.trim(), requested_memory)
            }
            _ => DeviceAllocation::new(),
        },
    };
    let core_allocation = DeviceAllocation::decode_or_default(
        instance.annotation(&annotations.share_core_allocation),
    );

    if requested_memory <= 0.0 && memory_allocation.is_empty() && core_allocation.is_empty() {
        return None;
    }

    Some(SharedInstance {
        name: instance.name.clone(),
        namespace: instance.namespace.clone(),
        status: instance.display_status(),
        requested_memory,
        requested_core,
        memory_allocation,
        core_allocation,
    })
}

fn allocation_items(allocation: &DeviceAllocation, suffix: &str) -> String {
    allocation
        .iter()
        .map(|(id, amount)| format!("gpu{}({}{})", id, number(amount), suffix))
        .collect::<Vec<_>>()
        .join(",")
}

impl GpuAccounting for SharedMemoryNode {
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
        self.unhealthy_memory == 0.0 && self.unhealthy_gpus == 0.0
    }

    fn render_details(&self) -> String {
        let core = self.supports_core_sharing();
        let mut instance_headers = vec!["NAMESPACE", "NAME", "STATUS", "GPU_MEM(Requested)", "GPU_MEM(Allocated)"];
        if core {
            instance_headers.extend(["GPU_CORE(Requested)", "GPU_CORE(Allocated)"]);
        }
        let instance_rows: Vec<Vec<String>> = self
            .instances
            .iter()
            .map(|i| {
                let mut row = vec![
                    i.namespace.clone(),
                    i.name.clone(),
                    i.status.clone(),
                    format!("{:.1} GiB", i.requested_memory),
                    allocation_items(&i.memory_allocation, "GiB"),
                ];
                if core {
                    row.push(number(i.requested_core));
                    row.push(allocation_items(&i.core_allocation, ""));
                }
                row
            })
            .collect();

        let telemetry = self.telemetry_enabled();
        let device_headers: Vec<&str> = if telemetry {
            vec!["INDEX", "MEMORY(Total)", "MEMORY(Allocated)", "MEMORY(Used)", "DUTY_CYCLE"]
        } else if core {
            vec!["INDEX", "MEMORY(Total)", "MEMORY(Allocated)", "CORE(Total)", "CORE(Allocated)"]
        } else {
            vec!["INDEX", "MEMORY(Total)", "MEMORY(Allocated)"]
        };
        let device_rows: Vec<Vec<String>> = self
            .devices
            .iter()
            .map(|d| {
                let mut row = vec![d.id.clone(), format!("{:.1} GiB", d.total_memory)];
                if telemetry {
                    // usage is only attributed to devices that hold allocations
                    let busy = d.allocated_memory > 0.0;
                    row.push(format!("{:.1} GiB", d.allocated_memory));
                    row.push(format!(
                        "{:.1} GiB",
                        if busy { d.used_memory.unwrap_or(0.0) } else { 0.0 }
                    ));
                    row.push(format!(
                        "{:.1}%",
                        if busy { d.duty_cycle.unwrap_or(0.0) } else { 0.0 }
                    ));
                } else {
                    row.push(format!(
                        "{:.1} GiB({:.1}%)",
                        d.allocated_memory,
                        percent(d.allocated_memory, d.total_memory)
                    ));
                    if core {
                        row.push(number(d.total_core));
                        row.push(format!(
                            "{}({:.1}%)",
                            number(d.allocated_core),
                            percent(d.allocated_core, d.total_core)
                        ));
                    }
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
            summary.push(("Used GPU Memory", format!("{:.1} GiB", self.used_memory())));
        }
        if core {
            summary.push(("Total GPU Core", number(self.total_core)));
            summary.push(("Allocated GPU Core", number(self.allocated_core)));
        }

        DetailBuilder::new(&self.base)
            .table("Instances", &instance_headers, &instance_rows)
            .table("GPUs", &device_headers, &device_rows)
            .summary("GPU Summary", &summary)
            .build()
    }
}

/// Matches nodes advertising allocatable shared GPU memory
pub struct SharedMemoryStrategy;

impl NodeStrategy for SharedMemoryStrategy {
    fn variant(&self) -> NodeVariant {
        NodeVariant::SharedMemory
    }

    fn matches(&self, node: &ClusterNode, config: &EngineConfig) -> bool {
        node.allocatable_of(&config.resources.share_memory).unwrap_or(0) > 0
    }

    fn build(&self, ctx: &NodeContext<'_>) -> Result<ClassifiedNode> {
        Ok(ClassifiedNode::SharedMemory(SharedMemoryNode::from_context(ctx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::fixtures::Fixture;
    use topnode_core::{Container, NodeGpuMetrics, WorkloadPhase};

    const MEM: &str = "aliyun.com/gpu-mem";
    const COUNT: &str = "aliyun.com/gpu-count";
    const CORE: &str = "aliyun.com/gpu-core.percentage";
    const ALLOCATION: &str = "scheduler.framework.gpushare.allocation";

    fn share_pod(name: &str, memory: i64, allocation: &str) -> WorkloadInstance {
        WorkloadInstance::new("default", name)
            .with_container(Container::new("main").with_limit(MEM, memory))
            .with_annotation(ALLOCATION, allocation)
    }

    fn share_node() -> ClusterNode {
        ClusterNode::new("share-1")
            .with_resource(MEM, 80)
            .with_resource(COUNT, 4)
    }

    #[test]
    fn test_memory_split_across_devices() {
        let fixture = Fixture::new(share_node())
            .with_workload(share_pod("a", 10, r#"{"0":10}"#))
            .with_workload(share_pod("b", 20, r#"{"1":20}"#));
        let node = SharedMemoryNode::from_context(&fixture.context());

        assert_eq!(node.allocated_memory, 30.0);
        assert_eq!(node.single_device_capacity, 20.0);
        assert_eq!(node.device_count, 4);
        assert_eq!(node.devices.len(), 4);
        assert_eq!(node.devices[0].allocated_memory, 10.0);
        assert_eq!(node.devices[0].total_memory, 20.0);
        assert_eq!(node.devices[1].allocated_memory, 20.0);
        assert_eq!(node.devices[1].total_memory, 20.0);
        assert_eq!(node.devices[2].allocated_memory, 0.0);
        assert_eq!(node.allocated_gpus, 1.5);
        assert!(node.is_healthy());
    }

    #[test]
    fn test_single_device_capacity_times_count_is_capacity() {
        for count in [1, 2, 3, 8] {
            let fixture = Fixture::new(
                ClusterNode::new("share-1")
                    .with_resource(MEM, 96)
                    .with_resource(COUNT, count),
            );
            let node = SharedMemoryNode::from_context(&fixture.context());
            assert_eq!(node.single_device_capacity * count as f64, 96.0);
        }
    }

    #[test]
    fn test_zero_device_count() {
        let fixture = Fixture::new(ClusterNode::new("share-1").with_resource(MEM, 80))
            .with_workload(share_pod("a", 10, r#"{"0":10}"#));
        let node = SharedMemoryNode::from_context(&fixture.context());

        assert_eq!(node.device_count, 0);
        assert_eq!(node.single_device_capacity, 0.0);
        assert_eq!(node.allocated_gpus, 0.0);
        // the allocated device is still listed
        assert_eq!(node.devices.len(), 1);
        assert_eq!(node.devices[0].total_memory, 0.0);
    }

    #[test]
    fn test_terminal_instances_do_not_count() {
        let fixture = Fixture::new(share_node())
            .with_workload(share_pod("a", 10, r#"{"0":10}"#).with_phase(WorkloadPhase::Failed))
            .with_workload(share_pod("b", 20, r#"{"1":20}"#).with_deleting(true));
        let node = SharedMemoryNode::from_context(&fixture.context());
        assert_eq!(node.allocated_memory, 0.0);
        assert!(node.instances.is_empty());
        assert!(node.devices.iter().all(|d| d.allocated_memory == 0.0));
    }

    #[test]
    fn test_device_index_fallback_and_malformed_annotation() {
        let fixture = Fixture::new(share_node())
            .with_workload(
                WorkloadInstance::new("default", "legacy")
                    .with_container(Container::new("main").with_limit(MEM, 6))
                    .with_annotation("ALIYUN_COM_GPU_MEM_IDX", "2"),
            )
            .with_workload(share_pod("broken", 4, "{oops"));
        let node = SharedMemoryNode::from_context(&fixture.context());

        assert_eq!(node.devices[2].allocated_memory, 6.0);
        assert_eq!(node.allocated_memory, 10.0);
        let broken = node.instances.iter().find(|i| i.name == "broken").unwrap();
        assert!(broken.memory_allocation.is_empty());
    }

    #[test]
    fn test_unhealthy_memory_gap() {
        let fixture = Fixture::new(
            ClusterNode::new("share-1")
                .with_capacity(MEM, 80)
                .with_allocatable(MEM, 60)
                .with_resource(COUNT, 4),
        );
        let node = SharedMemoryNode::from_context(&fixture.context());
        assert_eq!(node.unhealthy_memory, 20.0);
        assert_eq!(node.unhealthy_gpus, 1.0);
        assert!(!node.is_healthy());
    }

    #[test]
    fn test_core_sharing() {
        let fixture = Fixture::new(share_node().with_resource(CORE, 400)).with_workload(
            share_pod("a", 10, r#"{"0":10}"#)
                .with_annotation("scheduler.framework.gpushare.core.allocation", r#"{"0":30}"#),
        );
        let node = SharedMemoryNode::from_context(&fixture.context());
        assert!(node.supports_core_sharing());
        assert_eq!(node.devices[0].total_core, 100.0);
        assert_eq!(node.devices[0].allocated_core, 30.0);
        assert_eq!(node.allocated_core, 30.0);

        let details = node.render_details();
        assert!(details.contains("GPU_CORE(Requested)"));
        assert!(details.contains("Total GPU Core:"));
    }

    #[test]
    fn test_telemetry_overrides_device_totals() {
        let metrics = NodeGpuMetrics::new(vec![
            GpuMetricSample::new("0", 15.0).with_usage(7.0, 40.0),
            GpuMetricSample::new("1", 15.0).with_usage(3.0, 20.0),
        ]);
        let fixture = Fixture::new(share_node())
            .with_workload(share_pod("a", 6, r#"{"0":6}"#))
            .with_metrics(metrics);
        let node = SharedMemoryNode::from_context(&fixture.context());

        assert_eq!(node.device_count, 2);
        assert_eq!(node.total_memory, 30.0);
        assert_eq!(node.devices[0].total_memory, 15.0);
        assert_eq!(node.allocated_gpus, 0.4);
        assert_eq!(node.used_memory(), 7.0);
        assert!(node.render_details().contains("DUTY_CYCLE"));
    }

    #[test]
    fn test_render_lists_allocations() {
        let fixture = Fixture::new(share_node())
            .with_workload(share_pod("multi", 8, r#"{"0":{"0":2,"1":2},"1":{"2":4}}"#));
        let details = SharedMemoryNode::from_context(&fixture.context()).render_details();
        assert!(details.contains("Type:    GPUShare"));
        assert!(details.contains("gpu0(2GiB),gpu1(2GiB),gpu2(4GiB)"));
        assert!(details.contains("GPU Summary:"));
    }
}
