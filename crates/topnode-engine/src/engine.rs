//! Engine entry point
//!
//! [`Engine`] is built once from a validated [`EngineConfig`] and shared by
//! reference. Each call collects a fresh snapshot from the provider and
//! re-derives every quantity; nothing is cached between calls.

use crate::chain::StrategyChain;
use crate::nodes::{ClassifiedNode, NodeVariant};
use crate::snapshot::ClusterSnapshot;
use crate::summary::NodeReport;
use std::collections::BTreeSet;
use topnode_core::{ClusterStateProvider, EngineConfig, Error, Result};
use tracing::{debug, info};

/// Which nodes a listing returns
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeQuery {
    /// Restrict to these node names; empty means every node
    pub names: BTreeSet<String>,
    /// Restrict to one variant; `None` means every variant
    pub variant: Option<NodeVariant>,
}

impl NodeQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_variant(mut self, variant: NodeVariant) -> Self {
        self.variant = Some(variant);
        self
    }

    fn wants_name(&self, name: &str) -> bool {
        self.names.is_empty() || self.names.contains(name)
    }

    fn wants_variant(&self, variant: NodeVariant) -> bool {
        self.variant.map_or(true, |v| v == variant)
    }
}

/// Classification and accounting engine
pub struct Engine {
    config: EngineConfig,
    chain: StrategyChain,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            chain: StrategyChain::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Classify the nodes of a fresh snapshot
    pub async fn list_nodes<P>(&self, provider: &P, query: &NodeQuery) -> Result<NodeReport>
    where
        P: ClusterStateProvider + ?Sized,
    {
        let snapshot = ClusterSnapshot::collect(provider, &self.config, &query.names).await?;
        let report = self.classify(&snapshot, query);

        if report.is_empty() && !query.names.is_empty() {
            let names: Vec<&str> = query.names.iter().map(String::as_str).collect();
            return Err(Error::not_found(format!("nodes {}", names.join(","))));
        }
        info!("Listed {} nodes", report.len());
        Ok(report)
    }

    /// Classify every node of a snapshot.
    ///
    /// Every node named by the query goes through the full chain; the
    /// variant filter applies to the result.
    pub fn classify(&self, snapshot: &ClusterSnapshot, query: &NodeQuery) -> NodeReport {
        let mut nodes: Vec<ClassifiedNode> = Vec::new();
        for (index, node) in snapshot.nodes.iter().enumerate() {
            if !query.wants_name(&node.name) {
                continue;
            }
            let Some(ctx) = snapshot.context(index, &self.config) else {
                continue;
            };
            let classified = self.chain.classify(&ctx);
            if query.wants_variant(classified.variant()) {
                nodes.push(classified);
            } else {
                debug!(
                    "Excluding node {} of type {} from listing",
                    node.name,
                    classified.variant()
                );
            }
        }
        NodeReport::new(nodes, self.config.resources.clone())
    }

    /// Classify a single node by name
    pub async fn describe_node<P>(&self, provider: &P, name: &str) -> Result<ClassifiedNode>
    where
        P: ClusterStateProvider + ?Sized,
    {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::invalid_request("node name must not be empty"));
        }

        let node = provider.get_node(name).await?;
        let snapshot = ClusterSnapshot::collect_node(provider, &self.config, node).await?;
        let ctx = snapshot
            .context(0, &self.config)
            .ok_or_else(|| Error::not_found(format!("node {}", name)))?;
        Ok(self.chain.classify(&ctx))
    }
}
