//! Network descriptors handed to the fabric by the API layer.
//!
//! JSON field names follow the documents the API layer already stores, so a
//! persisted Network record can be deserialized directly.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Backend type of a network.
///
/// Unknown strings are kept instead of rejected at parse time so validation
/// and provider selection can report them as typed errors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NetworkType {
    /// Open vSwitch with the kernel datapath.
    Kernelspace,
    /// Open vSwitch with the userspace (DPDK) datapath.
    Dpdk,
    /// Side-effect free provider used by tests.
    Fake,
    Unknown(String),
}

impl NetworkType {
    pub fn as_str(&self) -> &str {
        match self {
            NetworkType::Kernelspace => "system",
            NetworkType::Dpdk => "netdev",
            NetworkType::Fake => "fake",
            NetworkType::Unknown(s) => s,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, NetworkType::Unknown(_))
    }
}

impl From<String> for NetworkType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "system" | "kernelspace" => NetworkType::Kernelspace,
            "netdev" | "dpdk" => NetworkType::Dpdk,
            "fake" => NetworkType::Fake,
            _ => NetworkType::Unknown(s),
        }
    }
}

impl From<&str> for NetworkType {
    fn from(s: &str) -> Self {
        NetworkType::from(s.to_string())
    }
}

impl From<NetworkType> for String {
    fn from(t: NetworkType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A host NIC bound into a bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhysicalInterface {
    pub name: String,
    /// PCI address used as the DPDK device argument.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pci_id: Option<String>,
}

impl PhysicalInterface {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pci_id: None,
        }
    }

    /// Device argument for a DPDK port: the PCI address when known, else the name.
    pub fn dpdk_devargs(&self) -> &str {
        self.pci_id.as_deref().unwrap_or(&self.name)
    }
}

/// A cluster node participating in a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub name: String,
    #[serde(default)]
    pub physical_interfaces: Vec<PhysicalInterface>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            physical_interfaces: Vec::new(),
        }
    }

    pub fn with_interface(mut self, iface: PhysicalInterface) -> Self {
        self.physical_interfaces.push(iface);
        self
    }
}

/// Logical fabric spanning one bridge per listed node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    pub name: String,
    #[serde(rename = "type")]
    pub network_type: NetworkType,
    pub bridge_name: String,
    #[serde(default)]
    pub vlan_tags: Vec<i32>,
    /// Required for DPDK networks; the fake provider's success toggle.
    #[serde(rename = "isDPDKPort", default)]
    pub is_dpdk_port: bool,
    pub nodes: Vec<Node>,
}

impl Network {
    pub fn new(
        name: impl Into<String>,
        network_type: NetworkType,
        bridge_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            network_type,
            bridge_name: bridge_name.into(),
            vlan_tags: Vec::new(),
            is_dpdk_port: false,
            nodes: Vec::new(),
        }
    }

    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_vlan_tags(mut self, tags: impl Into<Vec<i32>>) -> Self {
        self.vlan_tags = tags.into();
        self
    }

    pub fn with_dpdk_port(mut self, is_dpdk_port: bool) -> Self {
        self.is_dpdk_port = is_dpdk_port;
        self
    }
}

/// Lifecycle phase of a workload as reported by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    #[serde(other)]
    Unknown,
}

/// A workload that declares a reference to a network by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadRef {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub phase: WorkloadPhase,
    /// Names of networks the workload is attached to.
    #[serde(default)]
    pub networks: Vec<String>,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl WorkloadRef {
    pub fn is_running(&self) -> bool {
        self.phase == WorkloadPhase::Running
    }

    pub fn references(&self, network_name: &str) -> bool {
        self.networks.iter().any(|n| n == network_name)
    }

    /// `namespace/name`, the form used in error messages.
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_type_wire_names() {
        assert_eq!(NetworkType::from("system"), NetworkType::Kernelspace);
        assert_eq!(NetworkType::from("kernelspace"), NetworkType::Kernelspace);
        assert_eq!(NetworkType::from("netdev"), NetworkType::Dpdk);
        assert_eq!(NetworkType::from("dpdk"), NetworkType::Dpdk);
        assert_eq!(NetworkType::from("fake"), NetworkType::Fake);
        assert_eq!(
            NetworkType::from("none-exist"),
            NetworkType::Unknown("none-exist".to_string())
        );
    }

    #[test]
    fn test_network_from_api_document() {
        let doc = r#"{
            "name": "tenant-a",
            "type": "system",
            "bridgeName": "br-test",
            "vlanTags": [0, 2048, 4095],
            "isDPDKPort": false,
            "nodes": [
                {"name": "node-1", "physicalInterfaces": [{"name": "eth1"}]},
                {"name": "node-2"}
            ]
        }"#;

        let network: Network = serde_json::from_str(doc).unwrap();
        assert_eq!(network.network_type, NetworkType::Kernelspace);
        assert_eq!(network.bridge_name, "br-test");
        assert_eq!(network.vlan_tags, vec![0, 2048, 4095]);
        assert_eq!(network.nodes.len(), 2);
        assert_eq!(network.nodes[0].physical_interfaces[0].name, "eth1");
        assert!(network.nodes[1].physical_interfaces.is_empty());
    }

    #[test]
    fn test_unknown_type_survives_parsing() {
        let doc = r#"{"name": "n", "type": "vxlan", "bridgeName": "br0", "nodes": []}"#;
        let network: Network = serde_json::from_str(doc).unwrap();
        assert!(!network.network_type.is_known());

        let back = serde_json::to_value(&network).unwrap();
        assert_eq!(back["type"], "vxlan");
    }

    #[test]
    fn test_workload_phase_unknown_fallback() {
        let doc = r#"{"name": "pod-1", "phase": "Terminating", "networks": ["n1"]}"#;
        let workload: WorkloadRef = serde_json::from_str(doc).unwrap();
        assert_eq!(workload.phase, WorkloadPhase::Unknown);
        assert_eq!(workload.namespace, "default");
        assert!(workload.references("n1"));
        assert!(!workload.is_running());
    }
}
