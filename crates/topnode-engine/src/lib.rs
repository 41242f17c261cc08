//! # topnode-engine
//!
//! Node classification and GPU resource accounting.
//!
//! Every node of a cluster snapshot is assigned exactly one GPU capability
//! model by a first-match strategy chain:
//!
//! - **SharedMemory**: GPUs carved up by memory (and optionally core share)
//! - **Topology**: whole GPUs placed with awareness of their interconnect
//! - **QuotaGpu**: GPUs virtualized by core and memory quota
//! - **Exclusive**: whole GPUs handed out one workload at a time
//! - **Normal**: everything else
//!
//! Each model derives its own capacity, allocation and health figures, and
//! [`NodeReport`] projects the result into structured and tabular views.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use topnode_core::{EngineConfig, StaticClusterState};
//! use topnode_engine::{Engine, NodeQuery};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = StaticClusterState::from_file(Path::new("cluster.yaml")).await?;
//!     let engine = Engine::new(EngineConfig::load()?)?;
//!
//!     let report = engine.list_nodes(&provider, &NodeQuery::all()).await?;
//!     print!("{}", report.render_summary());
//!     Ok(())
//! }
//! ```

pub mod allocation;
pub mod chain;
pub mod engine;
pub mod matrix;
pub mod nodes;
pub mod render;
pub mod snapshot;
pub mod summary;

pub use allocation::{parse_device_list, DeviceAllocation};
pub use chain::StrategyChain;
pub use engine::{Engine, NodeQuery};
pub use matrix::TopologyMatrix;
pub use nodes::{ClassifiedNode, GpuAccounting, NodeStrategy, NodeVariant};
pub use snapshot::ClusterSnapshot;
pub use summary::{ClusterTotals, NodeReport, NodeSets, SummaryTable};
