//! Fabric audit logging
//!
//! Audit records are `tracing` events on the `audit` target, carrying the
//! component and related object ids, so any subscriber can route them apart
//! from diagnostics.

use std::sync::Arc;

/// Severity of an audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Audit,
    Warn,
    Error,
}

/// Audit logger for network lifecycle events.
pub struct FabricAuditLogger {
    component: String,
    enabled: bool,
}

impl FabricAuditLogger {
    pub fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
            enabled: true,
        }
    }

    /// Create a noop audit logger (for testing)
    pub fn new_noop() -> Self {
        Self {
            component: String::new(),
            enabled: false,
        }
    }

    fn log(&self, level: LogLevel, message: String, object_ids: Vec<String>) {
        if !self.enabled {
            return;
        }
        match level {
            LogLevel::Audit => {
                tracing::info!(target: "audit", component = %self.component, objects = ?object_ids, "{}", message)
            }
            LogLevel::Warn => {
                tracing::warn!(target: "audit", component = %self.component, objects = ?object_ids, "{}", message)
            }
            LogLevel::Error => {
                tracing::error!(target: "audit", component = %self.component, objects = ?object_ids, "{}", message)
            }
        }
    }

    pub fn network_created(&self, op_id: &str, network: &str, bridge: &str, nodes: &[String]) {
        self.log(
            LogLevel::Audit,
            format!(
                "Network '{}' created: bridge {} on {} node(s)",
                network,
                bridge,
                nodes.len()
            ),
            vec![op_id.to_string(), network.to_string()],
        );
    }

    pub fn network_deleted(&self, op_id: &str, network: &str, bridge: &str) {
        self.log(
            LogLevel::Audit,
            format!("Network '{}' deleted: bridge {} removed", network, bridge),
            vec![op_id.to_string(), network.to_string()],
        );
    }

    pub fn network_failed(&self, op_id: &str, network: &str, operation: &str, error: &str) {
        self.log(
            LogLevel::Error,
            format!("Network '{}' {} failed: {}", network, operation, error),
            vec![op_id.to_string(), network.to_string()],
        );
    }

    pub fn network_compensated(&self, op_id: &str, network: &str, nodes: &[String]) {
        self.log(
            LogLevel::Warn,
            format!(
                "Network '{}' rolled back on {}",
                network,
                nodes.join(", ")
            ),
            vec![op_id.to_string(), network.to_string()],
        );
    }

    pub fn delete_vetoed(&self, network: &str, workloads: &[String]) {
        self.log(
            LogLevel::Warn,
            format!(
                "Delete of network '{}' refused, in use by {}",
                network,
                workloads.join(", ")
            ),
            vec![network.to_string()],
        );
    }
}

/// Create a shared fabric audit logger
pub fn create_audit_logger(component: &str) -> Arc<FabricAuditLogger> {
    Arc::new(FabricAuditLogger::new(component))
}
