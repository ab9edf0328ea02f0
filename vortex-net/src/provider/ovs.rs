//! Open vSwitch providers (kernelspace and DPDK).
//!
//! Both flavors share the per-node algorithm: resolve the node, open a link,
//! realize the bridge. They differ only in the bridge flavor.

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use super::NetworkProvider;
use crate::bridge::{self, BridgeFlavor, BridgeOutcome, BridgeSpec};
use crate::cluster::Cluster;
use crate::error::{FabricError, Result};
use crate::network::{Network, NetworkType, Node};
use crate::saga::{NodeStep, Saga, StepOutcome, broadcast};
use crate::validation::ValidationError;

pub struct OvsProvider {
    network: Network,
    flavor: BridgeFlavor,
}

impl OvsProvider {
    fn new(network: Network, flavor: BridgeFlavor) -> Self {
        Self { network, flavor }
    }

    pub fn kernelspace(network: Network) -> Self {
        Self::new(network, BridgeFlavor::Kernelspace)
    }

    pub fn dpdk(network: Network) -> Self {
        Self::new(network, BridgeFlavor::Dpdk)
    }

    fn check_preconditions(&self) -> Result<()> {
        if self.flavor == BridgeFlavor::Dpdk && !self.network.is_dpdk_port {
            return Err(ValidationError::DpdkPortRequired.into());
        }
        Ok(())
    }
}

/// Forward step: realize the bridge on one node.
struct CreateBridge<'a> {
    cluster: &'a Cluster,
    network: &'a Network,
    flavor: BridgeFlavor,
}

#[async_trait]
impl<'a> NodeStep for CreateBridge<'a> {
    fn name(&self) -> &'static str {
        "create-bridge"
    }

    async fn run(&self, node: &Node) -> Result<StepOutcome> {
        let link = self.cluster.link_for(&node.name).await?;
        let spec = BridgeSpec::for_node(self.network, node, self.flavor);
        let outcome =
            bridge::ensure_bridge(link.as_ref(), &spec, self.cluster.config().node_timeout).await?;
        Ok(match outcome {
            BridgeOutcome::Created => StepOutcome::Changed,
            BridgeOutcome::AlreadyPresent => StepOutcome::Unchanged,
        })
    }
}

/// Compensating and delete step: remove the bridge from one node.
struct DeleteBridge<'a> {
    cluster: &'a Cluster,
    bridge: &'a str,
}

#[async_trait]
impl<'a> NodeStep for DeleteBridge<'a> {
    fn name(&self) -> &'static str {
        "delete-bridge"
    }

    async fn run(&self, node: &Node) -> Result<StepOutcome> {
        let link = self.cluster.link_for(&node.name).await?;
        bridge::remove_bridge(link.as_ref(), self.bridge, self.cluster.config().node_timeout)
            .await?;
        Ok(StepOutcome::Changed)
    }
}

#[async_trait]
impl NetworkProvider for OvsProvider {
    fn network(&self) -> &Network {
        &self.network
    }

    fn network_type(&self) -> NetworkType {
        match self.flavor {
            BridgeFlavor::Kernelspace => NetworkType::Kernelspace,
            BridgeFlavor::Dpdk => NetworkType::Dpdk,
        }
    }

    async fn create_network(&self, cluster: &Cluster) -> Result<()> {
        self.check_preconditions()?;

        let op_id = Uuid::new_v4().to_string();
        info!(
            op = %op_id,
            network = %self.network.name,
            bridge = %self.network.bridge_name,
            nodes = self.network.nodes.len(),
            "Creating network"
        );

        let create = CreateBridge {
            cluster,
            network: &self.network,
            flavor: self.flavor,
        };
        let delete = DeleteBridge {
            cluster,
            bridge: &self.network.bridge_name,
        };
        let saga = Saga::new(&create, &delete, cluster.config().execution);

        match saga.run(&self.network.nodes).await {
            Ok(report) => {
                cluster.audit().network_created(
                    &op_id,
                    &self.network.name,
                    &self.network.bridge_name,
                    &report.nodes(),
                );
                Ok(())
            }
            Err(e) => {
                if let FabricError::PartialFailure { compensated, .. } = &e {
                    if !compensated.is_empty() {
                        cluster
                            .audit()
                            .network_compensated(&op_id, &self.network.name, compensated);
                    }
                }
                cluster
                    .audit()
                    .network_failed(&op_id, &self.network.name, "create", &e.to_string());
                Err(e)
            }
        }
    }

    async fn delete_network(&self, cluster: &Cluster) -> Result<()> {
        let op_id = Uuid::new_v4().to_string();
        info!(
            op = %op_id,
            network = %self.network.name,
            bridge = %self.network.bridge_name,
            "Deleting network"
        );

        let delete = DeleteBridge {
            cluster,
            bridge: &self.network.bridge_name,
        };
        match broadcast(&delete, &self.network.nodes, cluster.config().execution).await {
            Ok(()) => {
                cluster
                    .audit()
                    .network_deleted(&op_id, &self.network.name, &self.network.bridge_name);
                Ok(())
            }
            Err(e) => {
                cluster
                    .audit()
                    .network_failed(&op_id, &self.network.name, "delete", &e.to_string());
                Err(e)
            }
        }
    }
}
