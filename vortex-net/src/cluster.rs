//! Cluster connection context.
//!
//! A [`Cluster`] bundles everything an operation needs to reach nodes: the
//! node registry, the link connector, the workload index and the tunables.
//! It is built once per cluster connection and shared by reference.

use std::sync::Arc;

use crate::audit::FabricAuditLogger;
use crate::config::{ClusterFile, FabricConfig};
use crate::error::Result;
use crate::guard::{StaticWorkloadIndex, WorkloadIndex};
use crate::link::{LinkConnector, NodeLink, OvsConnector, timed};
use crate::registry::{NodeRegistry, StaticNodeRegistry};

pub struct Cluster {
    registry: Arc<dyn NodeRegistry>,
    connector: Arc<dyn LinkConnector>,
    workloads: Arc<dyn WorkloadIndex>,
    config: FabricConfig,
    audit: Arc<FabricAuditLogger>,
}

impl Cluster {
    pub fn new(
        registry: Arc<dyn NodeRegistry>,
        connector: Arc<dyn LinkConnector>,
        workloads: Arc<dyn WorkloadIndex>,
    ) -> Self {
        Self {
            registry,
            connector,
            workloads,
            config: FabricConfig::default(),
            audit: Arc::new(FabricAuditLogger::new_noop()),
        }
    }

    /// Build an OVS-backed cluster from a cluster file.
    pub fn from_file(file: &ClusterFile, config: FabricConfig) -> Self {
        let registry: StaticNodeRegistry = file
            .nodes
            .iter()
            .map(|(name, ip)| (name.clone(), *ip))
            .collect();
        let connector = OvsConnector::new()
            .with_binary(&file.ovs_vsctl)
            .with_ovsdb_port(file.ovsdb_port)
            .with_local_addresses(file.local_addresses.iter().copied())
            .with_timeout(config.node_timeout);
        let workloads = StaticWorkloadIndex::new(file.workloads.clone());

        Self::new(Arc::new(registry), Arc::new(connector), Arc::new(workloads)).with_config(config)
    }

    pub fn with_config(mut self, config: FabricConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_audit(mut self, audit: Arc<FabricAuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    pub fn config(&self) -> &FabricConfig {
        &self.config
    }

    pub fn audit(&self) -> &FabricAuditLogger {
        &self.audit
    }

    pub fn workloads(&self) -> &dyn WorkloadIndex {
        self.workloads.as_ref()
    }

    /// Resolve `node` and open a link to it.
    pub async fn link_for(&self, node: &str) -> Result<Arc<dyn NodeLink>> {
        let limit = self.config.node_timeout;
        let address = timed(limit, node, "resolve", self.registry.resolve(node)).await?;
        timed(limit, node, "connect", self.connector.connect(&address)).await
    }
}
