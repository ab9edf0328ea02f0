//! Fabric configuration and the cluster description file.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::link::ovs::{DEFAULT_OVS_VSCTL, DEFAULT_OVSDB_PORT};
use crate::network::WorkloadRef;

/// Default deadline for a single node call.
pub const DEFAULT_NODE_TIMEOUT: Duration = Duration::from_secs(30);

/// How per-node steps of one operation are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Nodes in list order; the forward pass stops at the first failure.
    #[default]
    Sequential,
    /// One task per node; every task runs to completion.
    Concurrent,
}

/// Tunables shared by every operation on a cluster.
#[derive(Debug, Clone)]
pub struct FabricConfig {
    pub node_timeout: Duration,
    pub execution: ExecutionMode,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            node_timeout: DEFAULT_NODE_TIMEOUT,
            execution: ExecutionMode::Sequential,
        }
    }
}

impl FabricConfig {
    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = timeout;
        self
    }

    pub fn with_execution(mut self, execution: ExecutionMode) -> Self {
        self.execution = execution;
        self
    }
}

/// Cluster description loaded from JSON.
///
/// ```json
/// {
///   "nodes": {"node-1": "10.0.0.1", "node-2": "10.0.0.2"},
///   "localAddresses": ["10.0.0.1"],
///   "ovsdbPort": 6640,
///   "workloads": [{"name": "pod-1", "phase": "Running", "networks": ["tenant-a"]}]
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterFile {
    pub nodes: HashMap<String, IpAddr>,
    #[serde(default)]
    pub local_addresses: Vec<IpAddr>,
    #[serde(default = "default_ovsdb_port")]
    pub ovsdb_port: u16,
    #[serde(default = "default_ovs_vsctl")]
    pub ovs_vsctl: String,
    #[serde(default)]
    pub workloads: Vec<WorkloadRef>,
}

fn default_ovsdb_port() -> u16 {
    DEFAULT_OVSDB_PORT
}

fn default_ovs_vsctl() -> String {
    DEFAULT_OVS_VSCTL.to_string()
}

/// Errors loading a cluster file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

impl ClusterFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_cluster_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "nodes": {{"node-1": "10.0.0.1", "node-2": "fd00::2"}},
                "localAddresses": ["10.0.0.1"],
                "workloads": [{{"name": "pod-1", "phase": "Running", "networks": ["tenant-a"]}}]
            }}"#
        )
        .unwrap();

        let cluster = ClusterFile::load(file.path()).unwrap();
        assert_eq!(cluster.nodes.len(), 2);
        assert_eq!(cluster.ovsdb_port, DEFAULT_OVSDB_PORT);
        assert_eq!(cluster.ovs_vsctl, "ovs-vsctl");
        assert_eq!(cluster.local_addresses.len(), 1);
        assert_eq!(cluster.workloads[0].name, "pod-1");
    }

    #[test]
    fn test_load_reports_path() {
        let err = ClusterFile::load("/nonexistent/cluster.json").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/cluster.json"));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        assert!(matches!(
            ClusterFile::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_default_config() {
        let config = FabricConfig::default();
        assert_eq!(config.node_timeout, DEFAULT_NODE_TIMEOUT);
        assert_eq!(config.execution, ExecutionMode::Sequential);
    }
}
