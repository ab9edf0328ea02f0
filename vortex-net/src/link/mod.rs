//! Node agent links.
//!
//! A [`NodeLink`] issues bridge-management commands against one cluster node.
//! Links are obtained from a [`LinkConnector`] given the address the node
//! registry resolved for that node.

pub mod ovs;

use std::fmt;
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{FabricError, Result};

pub use ovs::{OvsConnector, OvsLink};

/// Bridge datapath implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatapathType {
    /// Kernel module datapath.
    System,
    /// Userspace datapath, used for DPDK ports.
    Netdev,
}

impl DatapathType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatapathType::System => "system",
            DatapathType::Netdev => "netdev",
        }
    }

    /// Parse the `datapath_type` column. OVS treats an empty value as `system`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().trim_matches('"') {
            "" | "system" => Some(DatapathType::System),
            "netdev" => Some(DatapathType::Netdev),
            _ => None,
        }
    }
}

impl fmt::Display for DatapathType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a physical interface is bound into the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortKind {
    /// Kernel network device, attached by name.
    System,
    /// DPDK-bound device.
    Dpdk { devargs: String },
}

/// Current state of a bridge as read back from a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeInfo {
    pub name: String,
    /// Raw `datapath_type` value, `None` if it is not one OVS knows.
    pub datapath_type: Option<DatapathType>,
    /// Trunks on the bridge's own port, ascending.
    pub trunks: Vec<i32>,
    /// Ports other than the bridge's own port.
    pub ports: Vec<String>,
}

/// Resolved control address of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAddress {
    pub node: String,
    pub ip: IpAddr,
}

impl NodeAddress {
    pub fn new(node: impl Into<String>, ip: IpAddr) -> Self {
        Self {
            node: node.into(),
            ip,
        }
    }
}

/// Bridge-management primitives on one node.
///
/// `delete_bridge` must succeed when the bridge is absent.
#[async_trait]
pub trait NodeLink: Send + Sync {
    /// Name of the node this link talks to.
    fn node(&self) -> &str;

    /// Read back a bridge, `None` if it does not exist.
    async fn bridge_info(&self, bridge: &str) -> Result<Option<BridgeInfo>>;

    /// Create a new bridge; `BridgeConflict` if one with that name exists.
    async fn create_bridge(&self, bridge: &str, datapath: DatapathType) -> Result<()>;

    async fn attach_interface(&self, bridge: &str, iface: &str, kind: &PortKind) -> Result<()>;

    /// Set the trunk list of the bridge's uplink port; empty clears it.
    async fn set_vlan_trunk(&self, bridge: &str, tags: &[i32]) -> Result<()>;

    async fn delete_bridge(&self, bridge: &str) -> Result<()>;
}

/// Builds links for resolved node addresses.
#[async_trait]
pub trait LinkConnector: Send + Sync {
    async fn connect(&self, address: &NodeAddress) -> Result<Arc<dyn NodeLink>>;
}

/// Run one node call under a deadline; expiry counts as a node failure.
pub async fn timed<T, F>(limit: Duration, node: &str, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(FabricError::Timeout {
            node: node.to_string(),
            operation: operation.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datapath_parse() {
        assert_eq!(DatapathType::parse("\"\""), Some(DatapathType::System));
        assert_eq!(DatapathType::parse("system\n"), Some(DatapathType::System));
        assert_eq!(DatapathType::parse("netdev"), Some(DatapathType::Netdev));
        assert_eq!(DatapathType::parse("dummy"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_reports_timeout() {
        let res: Result<()> = timed(Duration::from_secs(1), "node-1", "create-bridge", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(
            res,
            Err(FabricError::Timeout { node, operation }) if node == "node-1" && operation == "create-bridge"
        ));
    }
}
