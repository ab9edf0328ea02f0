//! Fabric error types.

use thiserror::Error;

use crate::validation::ValidationError;

/// Errors returned by providers, the usage guard and the controller.
#[derive(Debug, Error)]
pub enum FabricError {
    /// Descriptor rejected before any node was contacted.
    #[error("validation: {0}")]
    Validation(#[from] ValidationError),

    /// No provider exists for the network type.
    #[error("unsupported network type: {0}")]
    UnsupportedNetworkType(String),

    /// The node could not be resolved or its agent could not be reached.
    #[error("node {node} unreachable: {reason}")]
    UnreachableNode { node: String, reason: String },

    /// A bridge with the same name exists with a different configuration.
    #[error("bridge {bridge} on node {node} conflicts: {reason}")]
    BridgeConflict {
        node: String,
        bridge: String,
        reason: String,
    },

    /// Running workloads still reference the network.
    #[error("network {network} is in use by {}", .workloads.join(", "))]
    InUse {
        network: String,
        workloads: Vec<String>,
    },

    /// A switch command was rejected by the node.
    #[error("node {node}: `{command}` failed: {stderr}")]
    Command {
        node: String,
        command: String,
        stderr: String,
    },

    /// A per-node call exceeded its deadline.
    #[error("node {node}: {operation} timed out")]
    Timeout { node: String, operation: String },

    /// Some nodes failed after others succeeded; succeeded nodes were compensated.
    #[error(
        "network operation failed on node {node} ({} other node(s) failed, {} compensated): {source}",
        .other_failures.len(),
        .compensated.len()
    )]
    PartialFailure {
        /// First failed node in list order.
        node: String,
        /// Its error; determines the reported kind.
        source: Box<FabricError>,
        /// Failures on the remaining nodes, in list order.
        other_failures: Vec<NodeFailure>,
        /// Nodes whose bridge was removed again.
        compensated: Vec<String>,
        /// Compensation errors, kept as diagnostics only.
        compensation_errors: Vec<NodeFailure>,
    },

    /// The fake provider was asked to fail.
    #[error("{0}")]
    FakeProvider(String),

    /// The workload index could not be queried.
    #[error("workload index: {0}")]
    WorkloadIndex(String),
}

/// A failure attributed to one node.
#[derive(Debug)]
pub struct NodeFailure {
    pub node: String,
    pub error: FabricError,
}

impl std::fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.node, self.error)
    }
}

impl FabricError {
    /// The error that determines the failure kind, unwrapping partial failures.
    pub fn root_cause(&self) -> &FabricError {
        match self {
            FabricError::PartialFailure { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root_cause(),
            FabricError::UnreachableNode { .. } | FabricError::Timeout { .. }
        )
    }

    /// Whether the error was raised before any infrastructure was touched.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            FabricError::Validation(_) | FabricError::UnsupportedNetworkType(_)
        )
    }

    /// Nodes the forward pass failed on.
    pub fn failed_nodes(&self) -> Vec<&str> {
        match self {
            FabricError::PartialFailure {
                node,
                other_failures,
                ..
            } => std::iter::once(node.as_str())
                .chain(other_failures.iter().map(|f| f.node.as_str()))
                .collect(),
            FabricError::UnreachableNode { node, .. }
            | FabricError::BridgeConflict { node, .. }
            | FabricError::Command { node, .. }
            | FabricError::Timeout { node, .. } => vec![node.as_str()],
            _ => vec![],
        }
    }

    pub fn is_in_use(&self) -> bool {
        matches!(self, FabricError::InUse { .. })
    }

    pub(crate) fn unreachable(node: &str, reason: impl Into<String>) -> Self {
        FabricError::UnreachableNode {
            node: node.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for fabric operations.
pub type Result<T> = std::result::Result<T, FabricError>;
