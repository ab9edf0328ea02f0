//! Network controller
//!
//! Entry point for the API layer. Orders the steps of each operation:
//! validation before provider selection, the usage guard before any delete.

use futures::future::join_all;
use tracing::{info, warn};

use crate::cluster::Cluster;
use crate::error::Result;
use crate::guard;
use crate::link::{BridgeInfo, timed};
use crate::network::Network;
use crate::provider::select_provider;
use crate::validation::validate;

/// Bridge state read back from one node.
#[derive(Debug, Clone)]
pub struct NodeBridgeReport {
    pub node: String,
    /// `Ok(None)` if the bridge is absent, `Err` if the node could not be queried.
    pub bridge: std::result::Result<Option<BridgeInfo>, String>,
}

impl NodeBridgeReport {
    pub fn is_present(&self) -> bool {
        matches!(self.bridge, Ok(Some(_)))
    }
}

pub struct NetworkController {
    cluster: Cluster,
}

impl NetworkController {
    pub fn new(cluster: Cluster) -> Self {
        Self { cluster }
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    /// Validate, select the provider and create the network on every node.
    pub async fn create(&self, network: &Network) -> Result<()> {
        validate(network)?;
        let provider = select_provider(network)?;
        provider.create_network(&self.cluster).await?;
        info!(network = %network.name, network_type = %network.network_type, "Network ready");
        Ok(())
    }

    /// Validate, check usage and delete the network from every node.
    pub async fn delete(&self, network: &Network) -> Result<()> {
        validate(network)?;
        guard::check_in_use(network, &self.cluster).await?;
        let provider = select_provider(network)?;
        provider.delete_network(&self.cluster).await?;
        info!(network = %network.name, "Network deleted");
        Ok(())
    }

    /// Names of running workloads attached to the network.
    pub async fn status(&self, network: &Network) -> Result<Vec<String>> {
        guard::referencing_workloads(network, &self.cluster).await
    }

    /// Read the bridge back from every node of the network.
    pub async fn inspect(&self, network: &Network) -> Result<Vec<NodeBridgeReport>> {
        validate(network)?;
        let limit = self.cluster.config().node_timeout;

        let reports = join_all(network.nodes.iter().map(|node| async move {
            let res: Result<Option<BridgeInfo>> = async {
                let link = self.cluster.link_for(&node.name).await?;
                timed(
                    limit,
                    &node.name,
                    "bridge-info",
                    link.bridge_info(&network.bridge_name),
                )
                .await
            }
            .await;

            if let Err(e) = &res {
                warn!(node = %node.name, error = %e, "Failed to inspect bridge");
            }
            NodeBridgeReport {
                node: node.name.clone(),
                bridge: res.map_err(|e| e.to_string()),
            }
        }))
        .await;

        Ok(reports)
    }
}
