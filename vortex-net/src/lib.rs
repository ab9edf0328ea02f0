pub mod audit;
pub mod bridge;
pub mod cluster;
pub mod config;
pub mod controller;
pub mod error;
pub mod guard;
pub mod link;
pub mod network;
pub mod provider;
pub mod registry;
pub mod saga;
pub mod test_util;
pub mod validation;

pub use cluster::Cluster;
pub use config::{ClusterFile, ExecutionMode, FabricConfig};
pub use controller::{NetworkController, NodeBridgeReport};
pub use error::{FabricError, Result};
pub use guard::check_in_use;
pub use network::{Network, NetworkType, Node, PhysicalInterface, WorkloadPhase, WorkloadRef};
pub use provider::{NetworkProvider, select_provider};
pub use validation::{ValidationError, validate};
