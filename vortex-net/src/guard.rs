//! Usage guard run before a network is deleted.

use async_trait::async_trait;
use tracing::debug;

use crate::cluster::Cluster;
use crate::error::{FabricError, Result};
use crate::network::{Network, WorkloadRef};

/// Index of workloads and the networks they reference.
#[async_trait]
pub trait WorkloadIndex: Send + Sync {
    async fn list_referencing_workloads(&self, network: &str) -> Result<Vec<WorkloadRef>>;
}

/// Index over a fixed workload list.
#[derive(Debug, Clone, Default)]
pub struct StaticWorkloadIndex {
    workloads: Vec<WorkloadRef>,
}

impl StaticWorkloadIndex {
    pub fn new(workloads: Vec<WorkloadRef>) -> Self {
        Self { workloads }
    }
}

#[async_trait]
impl WorkloadIndex for StaticWorkloadIndex {
    async fn list_referencing_workloads(&self, network: &str) -> Result<Vec<WorkloadRef>> {
        Ok(self
            .workloads
            .iter()
            .filter(|w| w.references(network))
            .cloned()
            .collect())
    }
}

/// Names of running workloads that reference `network`.
pub async fn referencing_workloads(network: &Network, cluster: &Cluster) -> Result<Vec<String>> {
    let workloads = cluster
        .workloads()
        .list_referencing_workloads(&network.name)
        .await?;
    Ok(workloads
        .iter()
        .filter(|w| w.is_running())
        .map(WorkloadRef::qualified_name)
        .collect())
}

/// Fail with `InUse` if a running workload references `network`.
///
/// Never contacts a node.
pub async fn check_in_use(network: &Network, cluster: &Cluster) -> Result<()> {
    let running = referencing_workloads(network, cluster).await?;
    if running.is_empty() {
        debug!(network = %network.name, "Network not in use");
        return Ok(());
    }
    cluster.audit().delete_vetoed(&network.name, &running);
    Err(FabricError::InUse {
        network: network.name.clone(),
        workloads: running,
    })
}
