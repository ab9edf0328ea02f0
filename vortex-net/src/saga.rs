//! Multi-node fan-out with compensation.
//!
//! A [`Saga`] runs a forward step on every node of a network. When any node
//! fails, the compensating step runs on every node whose forward step changed
//! state, in reverse order of completion. Compensation errors never replace
//! the forward failure.

use async_trait::async_trait;
use futures::StreamExt;
use futures::future::join_all;
use futures::stream::FuturesUnordered;
use tracing::{debug, warn};

use crate::config::ExecutionMode;
use crate::error::{FabricError, NodeFailure, Result};
use crate::network::Node;

/// Whether a forward step left something to undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Changed,
    Unchanged,
}

/// One action applied to a single node.
#[async_trait]
pub trait NodeStep: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    async fn run(&self, node: &Node) -> Result<StepOutcome>;
}

/// Per-node result of a successful saga.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SagaReport {
    /// Nodes changed by this run, in completion order.
    pub changed: Vec<String>,
    /// Nodes already in the desired state.
    pub unchanged: Vec<String>,
}

impl SagaReport {
    pub fn nodes(&self) -> Vec<String> {
        self.changed
            .iter()
            .chain(self.unchanged.iter())
            .cloned()
            .collect()
    }
}

pub struct Saga<'a> {
    forward: &'a dyn NodeStep,
    compensate: &'a dyn NodeStep,
    mode: ExecutionMode,
}

/// Forward results: completed nodes in completion order, failures by node index.
struct ForwardPass {
    completed: Vec<(usize, StepOutcome)>,
    failures: Vec<(usize, FabricError)>,
}

impl<'a> Saga<'a> {
    pub fn new(forward: &'a dyn NodeStep, compensate: &'a dyn NodeStep, mode: ExecutionMode) -> Self {
        Self {
            forward,
            compensate,
            mode,
        }
    }

    pub async fn run(&self, nodes: &[Node]) -> Result<SagaReport> {
        let mut pass = match self.mode {
            ExecutionMode::Sequential => self.forward_sequential(nodes).await,
            ExecutionMode::Concurrent => self.forward_concurrent(nodes).await,
        };

        pass.failures.sort_by_key(|(i, _)| *i);
        let mut failures = pass.failures.into_iter().map(|(i, error)| NodeFailure {
            node: nodes[i].name.clone(),
            error,
        });
        let Some(first) = failures.next() else {
            let mut report = SagaReport::default();
            for (i, outcome) in pass.completed {
                let name = nodes[i].name.clone();
                match outcome {
                    StepOutcome::Changed => report.changed.push(name),
                    StepOutcome::Unchanged => report.unchanged.push(name),
                }
            }
            return Ok(report);
        };
        let other_failures: Vec<NodeFailure> = failures.collect();

        let (compensated, compensation_errors) = self.compensate(nodes, &pass.completed).await;

        if pass.completed.is_empty() && other_failures.is_empty() {
            return Err(first.error);
        }

        Err(FabricError::PartialFailure {
            node: first.node,
            source: Box::new(first.error),
            other_failures,
            compensated,
            compensation_errors,
        })
    }

    async fn forward_sequential(&self, nodes: &[Node]) -> ForwardPass {
        let mut pass = ForwardPass {
            completed: Vec::new(),
            failures: Vec::new(),
        };
        for (i, node) in nodes.iter().enumerate() {
            match self.forward.run(node).await {
                Ok(outcome) => pass.completed.push((i, outcome)),
                Err(e) => {
                    warn!(node = %node.name, step = self.forward.name(), error = %e, "Node step failed");
                    pass.failures.push((i, e));
                    break;
                }
            }
        }
        pass
    }

    async fn forward_concurrent(&self, nodes: &[Node]) -> ForwardPass {
        let mut pass = ForwardPass {
            completed: Vec::new(),
            failures: Vec::new(),
        };
        let mut pending: FuturesUnordered<_> = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| async move { (i, self.forward.run(node).await) })
            .collect();

        // Siblings of a failed node still run to completion.
        while let Some((i, res)) = pending.next().await {
            match res {
                Ok(outcome) => pass.completed.push((i, outcome)),
                Err(e) => {
                    warn!(node = %nodes[i].name, step = self.forward.name(), error = %e, "Node step failed");
                    pass.failures.push((i, e));
                }
            }
        }
        pass
    }

    /// Undo changed nodes, most recently completed first.
    async fn compensate(
        &self,
        nodes: &[Node],
        completed: &[(usize, StepOutcome)],
    ) -> (Vec<String>, Vec<NodeFailure>) {
        let mut compensated = Vec::new();
        let mut errors = Vec::new();

        for (i, _) in completed
            .iter()
            .rev()
            .filter(|(_, outcome)| *outcome == StepOutcome::Changed)
        {
            let node = &nodes[*i];
            debug!(node = %node.name, step = self.compensate.name(), "Compensating");
            match self.compensate.run(node).await {
                Ok(_) => compensated.push(node.name.clone()),
                Err(e) => {
                    warn!(node = %node.name, error = %e, "Compensation failed");
                    errors.push(NodeFailure {
                        node: node.name.clone(),
                        error: e,
                    });
                }
            }
        }

        (compensated, errors)
    }
}

/// Run `step` on every node without compensation.
///
/// Every node is attempted; the first error in list order is returned.
pub async fn broadcast(step: &dyn NodeStep, nodes: &[Node], mode: ExecutionMode) -> Result<()> {
    let results: Vec<Result<StepOutcome>> = match mode {
        ExecutionMode::Sequential => {
            let mut results = Vec::with_capacity(nodes.len());
            for node in nodes {
                results.push(step.run(node).await);
            }
            results
        }
        ExecutionMode::Concurrent => join_all(nodes.iter().map(|node| step.run(node))).await,
    };

    let mut first = None;
    for (node, res) in nodes.iter().zip(results) {
        if let Err(e) = res {
            warn!(node = %node.name, step = step.name(), error = %e, "Node step failed");
            if first.is_none() {
                first = Some(e);
            }
        }
    }

    match first {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
