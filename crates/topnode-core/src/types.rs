//! Cluster data model
//!
//! These are the raw objects read from the cluster state provider at the
//! start of every request: nodes, the workload instances bound to them,
//! per-node topology descriptors and optional GPU telemetry. Everything the
//! engine derives from them is rebuilt per request.

use crate::labels::{node_roles, LabelMap};
use crate::Quantity;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Resource name to quantity map, as found in node status and container limits
pub type ResourceList = BTreeMap<String, Quantity>;

/// Node address entry; the first one is treated as the node IP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeAddress {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub address: String,
}

/// Node condition as reported by the kubelet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeCondition {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
}

/// A cluster node with its advertised resources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNode {
    pub name: String,
    #[serde(default)]
    pub labels: LabelMap,
    #[serde(default)]
    pub addresses: Vec<NodeAddress>,
    #[serde(default)]
    pub conditions: Vec<NodeCondition>,
    #[serde(default)]
    pub unschedulable: bool,
    #[serde(default)]
    pub capacity: ResourceList,
    #[serde(default)]
    pub allocatable: ResourceList,
}

impl ClusterNode {
    /// Create a ready node with no resources
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: LabelMap::new(),
            addresses: Vec::new(),
            conditions: vec![NodeCondition {
                kind: "Ready".to_string(),
                status: "True".to_string(),
            }],
            unschedulable: false,
            capacity: ResourceList::new(),
            allocatable: ResourceList::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.addresses.push(NodeAddress {
            kind: "InternalIP".to_string(),
            address: address.into(),
        });
        self
    }

    /// Set both capacity and allocatable for a resource
    pub fn with_resource(mut self, name: impl Into<String>, value: impl Into<Quantity>) -> Self {
        let name = name.into();
        let value = value.into();
        self.capacity.insert(name.clone(), value);
        self.allocatable.insert(name, value);
        self
    }

    pub fn with_capacity(mut self, name: impl Into<String>, value: impl Into<Quantity>) -> Self {
        self.capacity.insert(name.into(), value.into());
        self
    }

    pub fn with_allocatable(mut self, name: impl Into<String>, value: impl Into<Quantity>) -> Self {
        self.allocatable.insert(name.into(), value.into());
        self
    }

    pub fn with_ready(mut self, ready: bool) -> Self {
        self.conditions.retain(|c| c.kind != "Ready");
        self.conditions.push(NodeCondition {
            kind: "Ready".to_string(),
            status: if ready { "True" } else { "False" }.to_string(),
        });
        self
    }

    pub fn with_unschedulable(mut self, unschedulable: bool) -> Self {
        self.unschedulable = unschedulable;
        self
    }

    /// Integer capacity of a resource, `None` when not advertised
    pub fn capacity_of(&self, resource: &str) -> Option<i64> {
        self.capacity.get(resource).map(Quantity::value)
    }

    /// Integer allocatable amount of a resource, `None` when not advertised
    pub fn allocatable_of(&self, resource: &str) -> Option<i64> {
        self.allocatable.get(resource).map(Quantity::value)
    }

    /// First address of the node, `N/A` when none is known
    pub fn ip(&self) -> String {
        self.addresses
            .first()
            .map(|a| a.address.clone())
            .unwrap_or_else(|| "N/A".to_string())
    }

    pub fn roles(&self) -> BTreeSet<String> {
        node_roles(&self.labels)
    }

    /// Status string: Ready, NotReady or Unknown, with `,SchedulingDisabled` when cordoned
    pub fn status(&self) -> String {
        let mut status = match self.conditions.iter().find(|c| c.kind == "Ready") {
            Some(c) if c.status == "True" => "Ready".to_string(),
            Some(_) => "NotReady".to_string(),
            None => "Unknown".to_string(),
        };
        if self.unschedulable {
            status.push_str(",SchedulingDisabled");
        }
        status
    }
}

/// Workload instance phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl fmt::Display for WorkloadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkloadPhase::Pending => "Pending",
            WorkloadPhase::Running => "Running",
            WorkloadPhase::Succeeded => "Succeeded",
            WorkloadPhase::Failed => "Failed",
            WorkloadPhase::Unknown => "Unknown",
        };
        write!(f, "{}", s)
    }
}

/// A container and its resource limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    #[serde(default)]
    pub limits: ResourceList,
}

impl Container {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            limits: ResourceList::new(),
        }
    }

    pub fn with_limit(mut self, resource: impl Into<String>, value: impl Into<Quantity>) -> Self {
        self.limits.insert(resource.into(), value.into());
        self
    }

    pub fn limit_of(&self, resource: &str) -> Option<&Quantity> {
        self.limits.get(resource)
    }
}

/// A pod bound (or about to be bound) to a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadInstance {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub node_name: Option<String>,
    #[serde(default)]
    pub phase: WorkloadPhase,
    /// Deletion has been requested
    #[serde(default)]
    pub deleting: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default)]
    pub annotations: LabelMap,
    #[serde(default)]
    pub labels: LabelMap,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl WorkloadInstance {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            node_name: None,
            phase: WorkloadPhase::Running,
            deleting: false,
            reason: None,
            containers: Vec::new(),
            annotations: LabelMap::new(),
            labels: LabelMap::new(),
        }
    }

    pub fn on_node(mut self, node: impl Into<String>) -> Self {
        self.node_name = Some(node.into());
        self
    }

    pub fn with_phase(mut self, phase: WorkloadPhase) -> Self {
        self.phase = phase;
        self
    }

    pub fn with_deleting(mut self, deleting: bool) -> Self {
        self.deleting = deleting;
        self
    }

    pub fn with_container(mut self, container: Container) -> Self {
        self.containers.push(container);
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// `namespace/name`, the form GPU exporters use for pod names
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    pub fn is_bound_to(&self, node: &str) -> bool {
        self.node_name.as_deref() == Some(node)
    }

    /// Completed, failed or being deleted; such instances hold no devices
    pub fn is_terminal(&self) -> bool {
        self.deleting || matches!(self.phase, WorkloadPhase::Succeeded | WorkloadPhase::Failed)
    }

    pub fn display_status(&self) -> String {
        if self.deleting {
            if self.reason.as_deref() == Some("NodeLost") {
                return "Unknown".to_string();
            }
            return "Terminating".to_string();
        }
        match &self.reason {
            Some(reason) if !reason.is_empty() => reason.clone(),
            _ => self.phase.to_string(),
        }
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    /// Non-zero limits of a resource, per container name
    pub fn container_requests(&self, resource: &str) -> BTreeMap<String, i64> {
        self.containers
            .iter()
            .filter_map(|c| {
                let value = c.limit_of(resource)?.value();
                (value != 0).then(|| (c.name.clone(), value))
            })
            .collect()
    }

    /// Sum of a resource over every container that declares it
    pub fn resource_request(&self, resource: &str) -> i64 {
        self.container_requests(resource).values().sum()
    }
}

/// Externally maintained description of a node's GPU interconnect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyDescriptor {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub labels: LabelMap,
    /// Raw string fields; values are JSON documents
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl TopologyDescriptor {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            labels: LabelMap::new(),
            data: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }
}

/// Live telemetry for one GPU device. Memory values are in GiB.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuMetricSample {
    pub id: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(rename = "gpuDutyCycle", default)]
    pub duty_cycle: f64,
    #[serde(rename = "usedGPUMemory", default)]
    pub memory_used: f64,
    #[serde(rename = "totalGPUMemory", default)]
    pub memory_total: f64,
    #[serde(default)]
    pub pod_names: Vec<String>,
}

impl GpuMetricSample {
    pub fn new(id: impl Into<String>, memory_total: f64) -> Self {
        Self {
            id: id.into(),
            uuid: String::new(),
            duty_cycle: 0.0,
            memory_used: 0.0,
            memory_total,
            pod_names: Vec::new(),
        }
    }

    pub fn with_usage(mut self, memory_used: f64, duty_cycle: f64) -> Self {
        self.memory_used = memory_used;
        self.duty_cycle = duty_cycle;
        self
    }

    pub fn with_pod(mut self, pod: impl Into<String>) -> Self {
        self.pod_names.push(pod.into());
        self
    }
}

/// Telemetry for every device of a node, keyed by device id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeGpuMetrics {
    devices: BTreeMap<String, GpuMetricSample>,
}

impl NodeGpuMetrics {
    pub fn new(samples: impl IntoIterator<Item = GpuMetricSample>) -> Self {
        Self {
            devices: samples.into_iter().map(|s| (s.id.clone(), s)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn device(&self, id: &str) -> Option<&GpuMetricSample> {
        self.devices.get(id)
    }

    pub fn samples(&self) -> impl Iterator<Item = &GpuMetricSample> {
        self.devices.values()
    }

    pub fn total_memory(&self) -> f64 {
        self.devices.values().map(|d| d.memory_total).sum()
    }

    pub fn used_memory(&self) -> f64 {
        self.devices.values().map(|d| d.memory_used).sum()
    }

    pub fn mean_duty_cycle(&self) -> f64 {
        if self.devices.is_empty() {
            return 0.0;
        }
        self.devices.values().map(|d| d.duty_cycle).sum::<f64>() / self.devices.len() as f64
    }
}

/// Filter for listing workload instances
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkloadFilter {
    pub node_name: Option<String>,
}

impl WorkloadFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn on_node(node: impl Into<String>) -> Self {
        Self {
            node_name: Some(node.into()),
        }
    }

    pub fn matches(&self, instance: &WorkloadInstance) -> bool {
        self.node_name
            .as_deref()
            .map_or(true, |node| instance.is_bound_to(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_status() {
        assert_eq!(ClusterNode::new("a").status(), "Ready");
        assert_eq!(ClusterNode::new("a").with_ready(false).status(), "NotReady");
        assert_eq!(
            ClusterNode::new("a").with_unschedulable(true).status(),
            "Ready,SchedulingDisabled"
        );

        let mut unknown = ClusterNode::new("a");
        unknown.conditions.clear();
        assert_eq!(unknown.status(), "Unknown");
    }

    #[test]
    fn test_node_ip() {
        assert_eq!(ClusterNode::new("a").ip(), "N/A");
        let node = ClusterNode::new("a")
            .with_address("10.0.0.7")
            .with_address("node-a.local");
        assert_eq!(node.ip(), "10.0.0.7");
    }

    #[test]
    fn test_terminal_instances() {
        let running = WorkloadInstance::new("default", "p");
        assert!(!running.is_terminal());
        assert!(running.clone().with_phase(WorkloadPhase::Succeeded).is_terminal());
        assert!(running.clone().with_phase(WorkloadPhase::Failed).is_terminal());
        assert!(running.clone().with_deleting(true).is_terminal());
        assert!(!running.with_phase(WorkloadPhase::Pending).is_terminal());
    }

    #[test]
    fn test_display_status() {
        let pod = WorkloadInstance::new("default", "p");
        assert_eq!(pod.display_status(), "Running");
        assert_eq!(pod.clone().with_deleting(true).display_status(), "Terminating");

        let mut lost = pod.with_deleting(true);
        lost.reason = Some("NodeLost".to_string());
        assert_eq!(lost.display_status(), "Unknown");
    }

    #[test]
    fn test_resource_request_sums_containers() {
        let pod = WorkloadInstance::new("default", "p")
            .with_container(Container::new("a").with_limit("nvidia.com/gpu", 1))
            .with_container(Container::new("b").with_limit("nvidia.com/gpu", 1))
            .with_container(Container::new("c").with_limit("nvidia.com/gpu", 0))
            .with_container(Container::new("d"));
        assert_eq!(pod.resource_request("nvidia.com/gpu"), 2);
        assert_eq!(pod.container_requests("nvidia.com/gpu").len(), 2);
        assert_eq!(pod.resource_request("aliyun.com/gpu-mem"), 0);
    }

    #[test]
    fn test_workload_filter() {
        let pod = WorkloadInstance::new("default", "p")
            .on_node("n1")
            .with_label("app", "train");
        assert!(WorkloadFilter::all().matches(&pod));
        assert!(WorkloadFilter::on_node("n1").matches(&pod));
        assert!(!WorkloadFilter::on_node("n2").matches(&pod));
    }

    #[test]
    fn test_metrics_aggregates() {
        let metrics = NodeGpuMetrics::new(vec![
            GpuMetricSample::new("0", 16.0).with_usage(4.0, 50.0),
            GpuMetricSample::new("1", 16.0).with_usage(2.0, 10.0),
        ]);
        assert_eq!(metrics.device_count(), 2);
        assert_eq!(metrics.total_memory(), 32.0);
        assert_eq!(metrics.used_memory(), 6.0);
        assert_eq!(metrics.mean_duty_cycle(), 30.0);
        assert_eq!(NodeGpuMetrics::default().mean_duty_cycle(), 0.0);
    }

    #[test]
    fn test_node_deserialize_from_yaml() {
        let yaml = r#"
name: gpu-1
labels:
  node-role.kubernetes.io/worker: ""
addresses:
  - type: InternalIP
    address: 192.168.0.4
capacity:
  aliyun.com/gpu-mem: 80
  aliyun.com/gpu-count: "4"
"#;
        let node: ClusterNode = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(node.capacity_of("aliyun.com/gpu-mem"), Some(80));
        assert_eq!(node.capacity_of("aliyun.com/gpu-count"), Some(4));
        assert_eq!(node.allocatable_of("aliyun.com/gpu-mem"), None);
        assert_eq!(node.ip(), "192.168.0.4");
        assert_eq!(node.status(), "Unknown");
    }
}
