//! In-memory fabric for tests.
//!
//! [`MemoryFabric`] acts as node registry and link connector at once. Every
//! node keeps its own bridge table; faults and delays can be injected per
//! node and operation, and every link call is recorded.

use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::cluster::Cluster;
use crate::error::{FabricError, Result};
use crate::guard::StaticWorkloadIndex;
use crate::link::{BridgeInfo, DatapathType, LinkConnector, NodeAddress, NodeLink, PortKind};
use crate::network::WorkloadRef;
use crate::registry::NodeRegistry;

/// Link primitive, as recorded in the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkOp {
    BridgeInfo,
    CreateBridge,
    AttachInterface,
    SetVlanTrunk,
    DeleteBridge,
}

/// One recorded link call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkCall {
    pub node: String,
    pub op: LinkOp,
    pub bridge: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    Fail,
    Hang,
    /// Apply the change, then never return.
    HangAfterApply,
}

#[derive(Debug, Default)]
struct NodeState {
    bridges: BTreeMap<String, BridgeInfo>,
    /// DPDK devargs per attached port.
    dpdk_ports: HashMap<String, String>,
    faults: HashMap<LinkOp, Fault>,
    unreachable: bool,
    delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct FabricState {
    addresses: HashMap<String, IpAddr>,
    nodes: HashMap<String, NodeState>,
    calls: Vec<LinkCall>,
}

/// Shared in-memory stand-in for a cluster of Open vSwitch nodes.
#[derive(Clone, Default)]
pub struct MemoryFabric {
    state: Arc<Mutex<FabricState>>,
}

impl MemoryFabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fabric with the given nodes registered.
    pub fn with_nodes(names: &[&str]) -> Self {
        let fabric = Self::new();
        for name in names {
            fabric.add_node(name);
        }
        fabric
    }

    fn lock(&self) -> MutexGuard<'_, FabricState> {
        self.state.lock().expect("fabric state poisoned")
    }

    /// Register a node with the next free 10.0.0.x address.
    pub fn add_node(&self, name: &str) {
        let mut state = self.lock();
        let host = u8::try_from(state.addresses.len() + 1).expect("too many test nodes");
        state
            .addresses
            .insert(name.to_string(), IpAddr::V4(Ipv4Addr::new(10, 0, 0, host)));
        state.nodes.entry(name.to_string()).or_default();
    }

    /// Make `op` fail on `node`.
    pub fn fail(&self, node: &str, op: LinkOp) {
        self.node_mut(node, |n| {
            n.faults.insert(op, Fault::Fail);
        });
    }

    /// Make `op` never return on `node`.
    pub fn hang(&self, node: &str, op: LinkOp) {
        self.node_mut(node, |n| {
            n.faults.insert(op, Fault::Hang);
        });
    }

    /// Let `op` take effect on `node`, then never return.
    pub fn hang_after_apply(&self, node: &str, op: LinkOp) {
        self.node_mut(node, |n| {
            n.faults.insert(op, Fault::HangAfterApply);
        });
    }

    pub fn clear_faults(&self, node: &str) {
        self.node_mut(node, |n| n.faults.clear());
    }

    /// Registered, but its agent refuses connections.
    pub fn set_unreachable(&self, node: &str, unreachable: bool) {
        self.node_mut(node, |n| n.unreachable = unreachable);
    }

    /// Delay every call to `node`.
    pub fn set_delay(&self, node: &str, delay: Duration) {
        self.node_mut(node, |n| n.delay = Some(delay));
    }

    /// Place a bridge on a node directly, bypassing the call log.
    pub fn insert_bridge(&self, node: &str, info: BridgeInfo) {
        self.node_mut(node, |n| {
            n.bridges.insert(info.name.clone(), info);
        });
    }

    pub fn bridge(&self, node: &str, bridge: &str) -> Option<BridgeInfo> {
        self.lock()
            .nodes
            .get(node)
            .and_then(|n| n.bridges.get(bridge).cloned())
    }

    pub fn has_bridge(&self, node: &str, bridge: &str) -> bool {
        self.bridge(node, bridge).is_some()
    }

    /// DPDK device argument a port was attached with.
    pub fn dpdk_devargs(&self, node: &str, port: &str) -> Option<String> {
        self.lock()
            .nodes
            .get(node)
            .and_then(|n| n.dpdk_ports.get(port).cloned())
    }

    /// Nodes carrying `bridge`, sorted.
    pub fn nodes_with_bridge(&self, bridge: &str) -> Vec<String> {
        let state = self.lock();
        let mut nodes: Vec<String> = state
            .nodes
            .iter()
            .filter(|(_, n)| n.bridges.contains_key(bridge))
            .map(|(name, _)| name.clone())
            .collect();
        nodes.sort();
        nodes
    }

    pub fn calls(&self) -> Vec<LinkCall> {
        self.lock().calls.clone()
    }

    /// Nodes `op` was issued against, in call order.
    pub fn calls_to(&self, op: LinkOp) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.op == op)
            .map(|c| c.node.clone())
            .collect()
    }

    /// Nodes `op` was issued against for `bridge`, in call order.
    pub fn calls_for_bridge(&self, op: LinkOp, bridge: &str) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.op == op && c.bridge == bridge)
            .map(|c| c.node.clone())
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Cluster over this fabric with the given workloads.
    pub fn cluster(&self, workloads: Vec<WorkloadRef>) -> Cluster {
        Cluster::new(
            Arc::new(self.clone()),
            Arc::new(self.clone()),
            Arc::new(StaticWorkloadIndex::new(workloads)),
        )
    }

    fn node_mut(&self, node: &str, f: impl FnOnce(&mut NodeState)) {
        let mut state = self.lock();
        f(state.nodes.entry(node.to_string()).or_default());
    }

    /// Record a call and apply injected faults and delays.
    async fn enter(&self, node: &str, op: LinkOp, bridge: &str) -> Result<()> {
        let (fault, delay) = {
            let mut state = self.lock();
            state.calls.push(LinkCall {
                node: node.to_string(),
                op,
                bridge: bridge.to_string(),
            });
            let n = state.nodes.entry(node.to_string()).or_default();
            (n.faults.get(&op).copied(), n.delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match fault {
            Some(Fault::Fail) => Err(FabricError::Command {
                node: node.to_string(),
                command: format!("{:?} {}", op, bridge),
                stderr: "injected failure".to_string(),
            }),
            Some(Fault::Hang) => std::future::pending().await,
            Some(Fault::HangAfterApply) | None => Ok(()),
        }
    }

    /// Hang here if `op` was set to hang after taking effect.
    async fn leave(&self, node: &str, op: LinkOp) {
        let fault = self
            .lock()
            .nodes
            .get(node)
            .and_then(|n| n.faults.get(&op).copied());
        if fault == Some(Fault::HangAfterApply) {
            std::future::pending::<()>().await;
        }
    }

    fn with_bridge<T>(
        &self,
        node: &str,
        bridge: &str,
        f: impl FnOnce(&mut BridgeInfo, &mut HashMap<String, String>) -> T,
    ) -> Result<T> {
        let mut state = self.lock();
        let n = state.nodes.entry(node.to_string()).or_default();
        match n.bridges.get_mut(bridge) {
            Some(info) => Ok(f(info, &mut n.dpdk_ports)),
            None => Err(FabricError::Command {
                node: node.to_string(),
                command: format!("ovs-vsctl ... {}", bridge),
                stderr: format!("no bridge named {}", bridge),
            }),
        }
    }
}

#[async_trait]
impl NodeRegistry for MemoryFabric {
    async fn resolve(&self, node: &str) -> Result<NodeAddress> {
        self.lock()
            .addresses
            .get(node)
            .map(|ip| NodeAddress::new(node, *ip))
            .ok_or_else(|| FabricError::unreachable(node, "node is not registered in the cluster"))
    }
}

#[async_trait]
impl LinkConnector for MemoryFabric {
    async fn connect(&self, address: &NodeAddress) -> Result<Arc<dyn NodeLink>> {
        let unreachable = self
            .lock()
            .nodes
            .get(&address.node)
            .is_some_and(|n| n.unreachable);
        if unreachable {
            return Err(FabricError::unreachable(
                &address.node,
                format!("database connection failed ({}: Connection refused)", address.ip),
            ));
        }
        Ok(Arc::new(MemoryLink {
            node: address.node.clone(),
            fabric: self.clone(),
        }))
    }
}

/// Link into one node of a [`MemoryFabric`].
pub struct MemoryLink {
    node: String,
    fabric: MemoryFabric,
}

#[async_trait]
impl NodeLink for MemoryLink {
    fn node(&self) -> &str {
        &self.node
    }

    async fn bridge_info(&self, bridge: &str) -> Result<Option<BridgeInfo>> {
        self.fabric.enter(&self.node, LinkOp::BridgeInfo, bridge).await?;
        let info = self.fabric.bridge(&self.node, bridge);
        self.fabric.leave(&self.node, LinkOp::BridgeInfo).await;
        Ok(info)
    }

    async fn create_bridge(&self, bridge: &str, datapath: DatapathType) -> Result<()> {
        self.fabric
            .enter(&self.node, LinkOp::CreateBridge, bridge)
            .await?;
        {
            let mut state = self.fabric.lock();
            let n = state.nodes.entry(self.node.clone()).or_default();
            if n.bridges.contains_key(bridge) {
                return Err(FabricError::BridgeConflict {
                    node: self.node.clone(),
                    bridge: bridge.to_string(),
                    reason: "a bridge with this name already exists".to_string(),
                });
            }
            n.bridges.insert(
                bridge.to_string(),
                BridgeInfo {
                    name: bridge.to_string(),
                    datapath_type: Some(datapath),
                    trunks: Vec::new(),
                    ports: Vec::new(),
                },
            );
        }
        self.fabric.leave(&self.node, LinkOp::CreateBridge).await;
        Ok(())
    }

    async fn attach_interface(&self, bridge: &str, iface: &str, kind: &PortKind) -> Result<()> {
        self.fabric
            .enter(&self.node, LinkOp::AttachInterface, bridge)
            .await?;
        self.fabric.with_bridge(&self.node, bridge, |info, dpdk_ports| {
            if !info.ports.iter().any(|p| p == iface) {
                info.ports.push(iface.to_string());
            }
            if let PortKind::Dpdk { devargs } = kind {
                dpdk_ports.insert(iface.to_string(), devargs.clone());
            }
        })?;
        self.fabric.leave(&self.node, LinkOp::AttachInterface).await;
        Ok(())
    }

    async fn set_vlan_trunk(&self, bridge: &str, tags: &[i32]) -> Result<()> {
        self.fabric
            .enter(&self.node, LinkOp::SetVlanTrunk, bridge)
            .await?;
        self.fabric.with_bridge(&self.node, bridge, |info, _| {
            let mut trunks = tags.to_vec();
            trunks.sort_unstable();
            info.trunks = trunks;
        })?;
        self.fabric.leave(&self.node, LinkOp::SetVlanTrunk).await;
        Ok(())
    }

    async fn delete_bridge(&self, bridge: &str) -> Result<()> {
        self.fabric
            .enter(&self.node, LinkOp::DeleteBridge, bridge)
            .await?;
        {
            let mut state = self.fabric.lock();
            if let Some(n) = state.nodes.get_mut(&self.node) {
                if let Some(info) = n.bridges.remove(bridge) {
                    for port in &info.ports {
                        n.dpdk_ports.remove(port);
                    }
                }
            }
        }
        self.fabric.leave(&self.node, LinkOp::DeleteBridge).await;
        Ok(())
    }
}
