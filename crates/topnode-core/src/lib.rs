//! # topnode-core
//!
//! Core types, traits, and utilities for topnode, a GPU node accounting
//! engine for Kubernetes-style clusters.
//!
//! This crate provides the foundational data structures and interfaces that
//! are shared by the engine and the command-line front end:
//!
//! - Cluster objects: nodes, workload instances, topology descriptors, telemetry
//! - Resource quantities and label selectors
//! - Configuration schema and layered loading
//! - The cluster state provider trait and an in-memory implementation
//! - Error handling types

pub mod config;
pub mod error;
pub mod labels;
pub mod provider;
pub mod quantity;
pub mod types;

pub use config::{AccountingConfig, AnnotationKeys, ClassificationConfig, EngineConfig, ResourceNames, TelemetryConfig};
pub use error::{Error, ErrorContext, Result};
pub use labels::{format_roles, node_roles, LabelMap, LabelSelector};
pub use provider::{ClusterStateProvider, StaticClusterState};
pub use quantity::Quantity;
pub use types::{
    ClusterNode, Container, GpuMetricSample, NodeGpuMetrics, ResourceList, TopologyDescriptor,
    WorkloadFilter, WorkloadInstance, WorkloadPhase,
};
