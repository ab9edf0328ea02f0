//! Bridge operations composed from node link primitives.
//!
//! The flavor decides the datapath a bridge is created with and how physical
//! interfaces are bound into it.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{FabricError, Result};
use crate::link::{BridgeInfo, DatapathType, NodeLink, PortKind, timed};
use crate::network::{Network, Node, PhysicalInterface};

/// Backend flavor of a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeFlavor {
    /// Kernel datapath, NICs attached as system ports.
    Kernelspace,
    /// Userspace datapath, NICs attached as DPDK ports.
    Dpdk,
}

impl BridgeFlavor {
    pub fn datapath(&self) -> DatapathType {
        match self {
            BridgeFlavor::Kernelspace => DatapathType::System,
            BridgeFlavor::Dpdk => DatapathType::Netdev,
        }
    }

    pub fn port_kind(&self, iface: &PhysicalInterface) -> PortKind {
        match self {
            BridgeFlavor::Kernelspace => PortKind::System,
            BridgeFlavor::Dpdk => PortKind::Dpdk {
                devargs: iface.dpdk_devargs().to_string(),
            },
        }
    }
}

/// Desired bridge on one node.
#[derive(Debug, Clone)]
pub struct BridgeSpec {
    pub name: String,
    pub flavor: BridgeFlavor,
    pub interfaces: Vec<PhysicalInterface>,
    /// Sorted and deduplicated.
    pub vlan_tags: Vec<i32>,
}

impl BridgeSpec {
    pub fn for_node(network: &Network, node: &Node, flavor: BridgeFlavor) -> Self {
        let mut vlan_tags = network.vlan_tags.clone();
        vlan_tags.sort_unstable();
        vlan_tags.dedup();
        Self {
            name: network.bridge_name.clone(),
            flavor,
            interfaces: node.physical_interfaces.clone(),
            vlan_tags,
        }
    }

    /// Why an existing bridge cannot be reused, if it cannot.
    pub fn conflict_with(&self, existing: &BridgeInfo) -> Option<String> {
        let want = self.flavor.datapath();
        match existing.datapath_type {
            Some(dp) if dp == want => {}
            Some(dp) => {
                return Some(format!("datapath_type is {}, want {}", dp, want));
            }
            None => return Some(format!("unknown datapath_type, want {}", want)),
        }
        if existing.trunks != self.vlan_tags {
            return Some(format!(
                "trunks are {:?}, want {:?}",
                existing.trunks, self.vlan_tags
            ));
        }
        None
    }
}

/// What `ensure_bridge` did on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeOutcome {
    /// The bridge was created by this call.
    Created,
    /// An identical bridge already existed.
    AlreadyPresent,
}

/// Realize `spec` on the node behind `link`.
///
/// Reuses an identical existing bridge and rejects a conflicting one. If
/// creation times out or a later step fails, the bridge is removed again.
pub async fn ensure_bridge(
    link: &dyn NodeLink,
    spec: &BridgeSpec,
    limit: Duration,
) -> Result<BridgeOutcome> {
    let node = link.node().to_string();

    let existing = timed(limit, &node, "bridge-info", link.bridge_info(&spec.name)).await?;
    if let Some(info) = existing {
        if let Some(reason) = spec.conflict_with(&info) {
            return Err(FabricError::BridgeConflict {
                node,
                bridge: spec.name.clone(),
                reason,
            });
        }
        debug!(node = %node, bridge = %spec.name, "Bridge already present");
        attach_interfaces(link, spec, limit).await?;
        return Ok(BridgeOutcome::AlreadyPresent);
    }

    let created = timed(
        limit,
        &node,
        "create-bridge",
        link.create_bridge(&spec.name, spec.flavor.datapath()),
    )
    .await;

    match created {
        Ok(()) => {}
        // A timed-out create may still have been committed on the node.
        Err(e @ FabricError::Timeout { .. }) => {
            warn!(node = %node, bridge = %spec.name, "Bridge creation timed out, removing it");
            if let Err(cleanup) = remove_bridge(link, &spec.name, limit).await {
                warn!(node = %node, bridge = %spec.name, error = %cleanup, "Failed to remove timed-out bridge");
            }
            return Err(e);
        }
        Err(e) => return Err(e),
    }

    let configured = async {
        attach_interfaces(link, spec, limit).await?;
        timed(
            limit,
            &node,
            "set-vlan-trunk",
            link.set_vlan_trunk(&spec.name, &spec.vlan_tags),
        )
        .await
    };

    if let Err(e) = configured.await {
        warn!(node = %node, bridge = %spec.name, error = %e, "Bridge setup failed, removing it");
        if let Err(cleanup) = remove_bridge(link, &spec.name, limit).await {
            warn!(node = %node, bridge = %spec.name, error = %cleanup, "Failed to remove half-configured bridge");
        }
        return Err(e);
    }

    info!(node = %node, bridge = %spec.name, datapath = %spec.flavor.datapath(), "Bridge ready");
    Ok(BridgeOutcome::Created)
}

async fn attach_interfaces(link: &dyn NodeLink, spec: &BridgeSpec, limit: Duration) -> Result<()> {
    for iface in &spec.interfaces {
        timed(
            limit,
            link.node(),
            "attach-interface",
            link.attach_interface(&spec.name, &iface.name, &spec.flavor.port_kind(iface)),
        )
        .await?;
    }
    Ok(())
}

/// Delete a bridge; an absent bridge is success.
pub async fn remove_bridge(link: &dyn NodeLink, bridge: &str, limit: Duration) -> Result<()> {
    timed(limit, link.node(), "delete-bridge", link.delete_bridge(bridge)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkType;

    fn spec(flavor: BridgeFlavor, tags: Vec<i32>) -> BridgeSpec {
        let network = Network::new("n", NetworkType::Kernelspace, "br0").with_vlan_tags(tags);
        BridgeSpec::for_node(&network, &Node::new("node-1"), flavor)
    }

    fn info(dp: Option<DatapathType>, trunks: Vec<i32>) -> BridgeInfo {
        BridgeInfo {
            name: "br0".to_string(),
            datapath_type: dp,
            trunks,
            ports: vec![],
        }
    }

    #[test]
    fn test_spec_normalizes_tags() {
        let s = spec(BridgeFlavor::Kernelspace, vec![4095, 0, 2048, 0]);
        assert_eq!(s.vlan_tags, vec![0, 2048, 4095]);
    }

    #[test]
    fn test_conflict_detection() {
        let s = spec(BridgeFlavor::Kernelspace, vec![10]);
        assert_eq!(s.conflict_with(&info(Some(DatapathType::System), vec![10])), None);
        assert!(s.conflict_with(&info(Some(DatapathType::Netdev), vec![10])).is_some());
        assert!(s.conflict_with(&info(Some(DatapathType::System), vec![])).is_some());
        assert!(s.conflict_with(&info(None, vec![10])).is_some());
    }

    #[test]
    fn test_port_kind_per_flavor() {
        let mut iface = PhysicalInterface::new("eth1");
        assert_eq!(BridgeFlavor::Kernelspace.port_kind(&iface), PortKind::System);
        assert_eq!(
            BridgeFlavor::Dpdk.port_kind(&iface),
            PortKind::Dpdk {
                devargs: "eth1".to_string()
            }
        );

        iface.pci_id = Some("0000:00:08.0".to_string());
        assert_eq!(
            BridgeFlavor::Dpdk.port_kind(&iface),
            PortKind::Dpdk {
                devargs: "0000:00:08.0".to_string()
            }
        );
    }
}
