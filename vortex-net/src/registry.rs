//! Cluster node registry.
//!
//! Maps node names to the internal address their switch is managed on.

use std::collections::HashMap;
use std::net::IpAddr;

use async_trait::async_trait;

use crate::error::{FabricError, Result};
use crate::link::NodeAddress;

/// Resolves node names to control addresses.
#[async_trait]
pub trait NodeRegistry: Send + Sync {
    /// Resolve a node; unknown nodes are `UnreachableNode`.
    async fn resolve(&self, node: &str) -> Result<NodeAddress>;
}

/// Registry backed by a fixed name to address table.
#[derive(Debug, Clone, Default)]
pub struct StaticNodeRegistry {
    nodes: HashMap<String, IpAddr>,
}

impl StaticNodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(mut self, name: impl Into<String>, ip: IpAddr) -> Self {
        self.insert(name, ip);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, ip: IpAddr) {
        self.nodes.insert(name.into(), ip);
    }
}

impl FromIterator<(String, IpAddr)> for StaticNodeRegistry {
    fn from_iter<I: IntoIterator<Item = (String, IpAddr)>>(iter: I) -> Self {
        Self {
            nodes: iter.into_iter().collect(),
        }
    }
}

#[async_trait]
impl NodeRegistry for StaticNodeRegistry {
    async fn resolve(&self, node: &str) -> Result<NodeAddress> {
        self.nodes
            .get(node)
            .map(|ip| NodeAddress::new(node, *ip))
            .ok_or_else(|| FabricError::unreachable(node, "node is not registered in the cluster"))
    }
}
