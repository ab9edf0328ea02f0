//! Side-effect free provider for tests.
//!
//! Succeeds iff the network's `isDPDKPort` flag is set.

use async_trait::async_trait;
use tracing::debug;

use super::NetworkProvider;
use crate::cluster::Cluster;
use crate::error::{FabricError, Result};
use crate::network::{Network, NetworkType};

pub struct FakeProvider {
    network: Network,
}

impl FakeProvider {
    pub fn new(network: Network) -> Self {
        Self { network }
    }
}

#[async_trait]
impl NetworkProvider for FakeProvider {
    fn network(&self) -> &Network {
        &self.network
    }

    fn network_type(&self) -> NetworkType {
        NetworkType::Fake
    }

    async fn create_network(&self, _cluster: &Cluster) -> Result<()> {
        debug!(network = %self.network.name, "Fake create");
        if !self.network.is_dpdk_port {
            return Err(FabricError::FakeProvider(format!(
                "fake provider refused to create network '{}' (isDPDKPort is false)",
                self.network.name
            )));
        }
        Ok(())
    }

    async fn delete_network(&self, _cluster: &Cluster) -> Result<()> {
        debug!(network = %self.network.name, "Fake delete");
        if !self.network.is_dpdk_port {
            return Err(FabricError::FakeProvider(format!(
                "fake provider refused to delete network '{}' (isDPDKPort is false)",
                self.network.name
            )));
        }
        Ok(())
    }
}
