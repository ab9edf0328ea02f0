//! Network providers and the dispatcher that selects one per network type.
//!
//! Every provider satisfies the whole [`NetworkProvider`] contract, so callers
//! never need to know which concrete backend they were given.

pub mod fake;
pub mod ovs;

use async_trait::async_trait;

use crate::cluster::Cluster;
use crate::error::{FabricError, Result};
use crate::network::{Network, NetworkType};

pub use fake::FakeProvider;
pub use ovs::OvsProvider;

/// Create/delete contract shared by all backends.
#[async_trait]
pub trait NetworkProvider: Send + Sync {
    /// The network this provider acts on.
    fn network(&self) -> &Network;

    /// Backend implemented by this provider.
    fn network_type(&self) -> NetworkType;

    /// Realize the bridge on every node of the network.
    ///
    /// Safe to retry against nodes that already carry an identical bridge.
    async fn create_network(&self, cluster: &Cluster) -> Result<()>;

    /// Remove the bridge from every node; absent bridges count as removed.
    async fn delete_network(&self, cluster: &Cluster) -> Result<()>;
}

/// Select the provider for `network`'s declared type.
pub fn select_provider(network: &Network) -> Result<Box<dyn NetworkProvider>> {
    match &network.network_type {
        NetworkType::Kernelspace => Ok(Box::new(OvsProvider::kernelspace(network.clone()))),
        NetworkType::Dpdk => Ok(Box::new(OvsProvider::dpdk(network.clone()))),
        NetworkType::Fake => Ok(Box::new(FakeProvider::new(network.clone()))),
        NetworkType::Unknown(t) => Err(FabricError::UnsupportedNetworkType(t.clone())),
    }
}
