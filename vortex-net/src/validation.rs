//! Structural checks on a network descriptor.
//!
//! Validation is pure: it never touches the registry or a node, so it can run
//! before anything in the cluster is contacted.

use std::collections::HashSet;

use thiserror::Error;

use crate::network::{Network, NetworkType};

/// Highest valid 802.1Q VLAN id.
pub const MAX_VLAN_TAG: i32 = 4095;

/// Linux limits interface names to IFNAMSIZ - 1 bytes.
pub const MAX_BRIDGE_NAME_LEN: usize = 15;

/// Validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Network name is required")]
    NetworkNameRequired,

    #[error("Unsupported network type: {0}")]
    UnknownNetworkType(String),

    #[error("Bridge name is required")]
    BridgeNameRequired,

    #[error("Invalid bridge name '{0}': {1}")]
    InvalidBridgeName(String, &'static str),

    #[error("At least one node is required")]
    NodesRequired,

    #[error("Node name is required (node #{0})")]
    NodeNameRequired(usize),

    #[error("Node '{0}' is listed more than once")]
    DuplicateNode(String),

    #[error("VLAN tag {0} is out of range [0, {MAX_VLAN_TAG}]")]
    VlanTagOutOfRange(i32),

    #[error("DPDK network requires isDPDKPort to be set")]
    DpdkPortRequired,
}

pub type Result<T> = std::result::Result<T, ValidationError>;

/// Validate a network descriptor.
pub fn validate(network: &Network) -> Result<()> {
    if network.name.trim().is_empty() {
        return Err(ValidationError::NetworkNameRequired);
    }

    if let NetworkType::Unknown(t) = &network.network_type {
        return Err(ValidationError::UnknownNetworkType(t.clone()));
    }

    validate_bridge_name(&network.bridge_name)?;

    if network.nodes.is_empty() {
        return Err(ValidationError::NodesRequired);
    }

    let mut seen = HashSet::new();
    for (i, node) in network.nodes.iter().enumerate() {
        if node.name.trim().is_empty() {
            return Err(ValidationError::NodeNameRequired(i));
        }
        if !seen.insert(node.name.as_str()) {
            return Err(ValidationError::DuplicateNode(node.name.clone()));
        }
    }

    validate_vlan_tags(&network.vlan_tags)?;

    if network.network_type == NetworkType::Dpdk && !network.is_dpdk_port {
        return Err(ValidationError::DpdkPortRequired);
    }

    Ok(())
}

/// Check that every tag is a valid VLAN id.
pub fn validate_vlan_tags(tags: &[i32]) -> Result<()> {
    match tags.iter().find(|t| !(0..=MAX_VLAN_TAG).contains(*t)) {
        Some(t) => Err(ValidationError::VlanTagOutOfRange(*t)),
        None => Ok(()),
    }
}

fn validate_bridge_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ValidationError::BridgeNameRequired);
    }
    if name.len() > MAX_BRIDGE_NAME_LEN {
        return Err(ValidationError::InvalidBridgeName(
            name.to_string(),
            "longer than 15 bytes",
        ));
    }
    if name.chars().any(|c| c.is_whitespace() || c == '/' || c == ':') {
        return Err(ValidationError::InvalidBridgeName(
            name.to_string(),
            "contains whitespace, '/' or ':'",
        ));
    }
    Ok(())
}
