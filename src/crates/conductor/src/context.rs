//! Per-run execution state
//!
//! One [`ExecutionContext`] exists per workflow *run* (not per definition;
//! the same graph can back many concurrent runs). It owns the node state
//! machine, collected outputs, errors, timings, the cost ledger, and at most
//! one pending checkpoint. The scheduler owns the context exclusively for
//! the duration of an `execute`/`resume` call; between calls it is safe to
//! inspect but must not be mutated externally.

use crate::error::{ConductorError, Result};
use crate::graph::{AgentNode, JsonMap, NodeId, WorkflowGraph};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Execution state of a single node
///
/// Allowed transitions: `Pending -> Running -> {Completed, Failed}`,
/// `Pending -> Skipped` (condition false), `Pending -> Failed` (killed
/// before dispatch), `Running -> Paused` (checkpoint hit) and, on resume,
/// `Paused -> {Completed, Failed}`. `Blocked` is a diagnostic marker for a
/// scheduling defect; a blocked node never reschedules itself. Terminal
/// states never change for the life of the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Pending,
    Blocked,
    Running,
    Completed,
    Failed,
    Skipped,
    Paused,
}

impl NodeState {
    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// Pass states satisfy downstream dependencies
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }
}

/// Classification of a contained per-node failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeErrorKind {
    /// The agent call itself failed, or retries were exhausted
    Execution,
    /// The per-node deadline fired
    Timeout,
    /// The cancellation token was active before dispatch
    Killed,
    /// A human-in-the-loop resume rejected the checkpoint
    CheckpointRejected,
}

/// Structured error recorded against a failed node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeError {
    pub kind: NodeErrorKind,
    pub message: String,
    /// Attempts made before giving up (zero when the work never started)
    pub attempts: usize,
}

impl NodeError {
    pub fn execution(message: impl Into<String>, attempts: usize) -> Self {
        Self {
            kind: NodeErrorKind::Execution,
            message: message.into(),
            attempts,
        }
    }

    pub fn timeout(message: impl Into<String>, attempts: usize) -> Self {
        Self {
            kind: NodeErrorKind::Timeout,
            message: message.into(),
            attempts,
        }
    }

    pub fn killed() -> Self {
        Self {
            kind: NodeErrorKind::Killed,
            message: "killed before dispatch".to_string(),
            attempts: 0,
        }
    }

    pub fn checkpoint_rejected(feedback: Option<String>) -> Self {
        Self {
            kind: NodeErrorKind::CheckpointRejected,
            message: feedback.unwrap_or_else(|| "checkpoint rejected".to_string()),
            attempts: 0,
        }
    }
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Cumulative cost accounting for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostLedger {
    /// Preflight estimate summed over all nodes
    pub estimated_total: f64,

    /// Actual spend recorded as nodes complete
    pub actual_total: f64,

    pub estimated_by_node: HashMap<NodeId, f64>,
    pub actual_by_node: HashMap<NodeId, f64>,
}

/// Dispatch-time classification of a node's dependencies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyStatus {
    /// Every dependency is in a pass state; the node may run
    Satisfied,
    /// A dependency terminally failed; the node can never run
    FailedUpstream,
    /// A dependency has not settled; indicates a scheduling defect
    Unresolved,
}

/// A checkpointed node's output, held until the resume decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCheckpoint {
    pub node_id: NodeId,
    pub output: Value,
}

/// Whole-run status derived from node states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Paused,
    Completed,
    Failed,
}

/// Node counts for the status query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

/// Pure projection of a run's current state
///
/// Tells the caller exactly which nodes failed and why, which node (if any)
/// awaits a decision, and the cost burn versus the original estimate -
/// without catching any exceptions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub workflow_id: String,
    pub status: RunStatus,
    pub progress: Progress,
    pub costs: CostLedger,
    pub outputs: HashMap<NodeId, Value>,
    pub errors: HashMap<NodeId, NodeError>,
    pub timings_ms: HashMap<NodeId, u64>,
    pub pending_checkpoint: Option<NodeId>,
}

/// Mutable state container for one workflow run
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionContext {
    run_id: String,
    workflow_id: String,
    states: HashMap<NodeId, NodeState>,
    outputs: HashMap<NodeId, Value>,
    errors: HashMap<NodeId, NodeError>,
    timings_ms: HashMap<NodeId, u64>,
    costs: CostLedger,
    pending_checkpoint: Option<PendingCheckpoint>,
    started_at: DateTime<Utc>,
}

impl ExecutionContext {
    /// Create a fresh context for a run of the given graph
    pub(crate) fn new(graph: &WorkflowGraph, estimated_by_node: HashMap<NodeId, f64>) -> Self {
        let states = graph
            .nodes
            .keys()
            .map(|id| (id.clone(), NodeState::Pending))
            .collect();

        let estimated_total = estimated_by_node.values().sum();

        Self {
            run_id: Uuid::new_v4().to_string(),
            workflow_id: graph.id.clone(),
            states,
            outputs: HashMap::new(),
            errors: HashMap::new(),
            timings_ms: HashMap::new(),
            costs: CostLedger {
                estimated_total,
                actual_total: 0.0,
                estimated_by_node,
                actual_by_node: HashMap::new(),
            },
            pending_checkpoint: None,
            started_at: Utc::now(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Current state of a node
    pub fn state(&self, node_id: &str) -> Option<NodeState> {
        self.states.get(node_id).copied()
    }

    /// Output recorded for a completed node
    pub fn output(&self, node_id: &str) -> Option<&Value> {
        self.outputs.get(node_id)
    }

    /// Error recorded for a failed node
    pub fn error(&self, node_id: &str) -> Option<&NodeError> {
        self.errors.get(node_id)
    }

    /// Elapsed milliseconds recorded for a settled node
    pub fn timing_ms(&self, node_id: &str) -> Option<u64> {
        self.timings_ms.get(node_id).copied()
    }

    /// The cost ledger for this run
    pub fn costs(&self) -> &CostLedger {
        &self.costs
    }

    /// The checkpoint awaiting a resume decision, if any
    pub fn pending_checkpoint(&self) -> Option<&PendingCheckpoint> {
        self.pending_checkpoint.as_ref()
    }

    /// Whether every dependency of `node` is in a pass state
    pub fn can_run(&self, node: &AgentNode) -> bool {
        matches!(self.dependency_status(node), DependencyStatus::Satisfied)
    }

    /// Classify the dependencies of `node` at dispatch time
    ///
    /// `FailedUpstream` means at least one dependency terminally failed and
    /// the node can never run; the scheduler skips such dependents.
    /// `Unresolved` means a dependency has not settled yet, which layer
    /// ordering is supposed to make impossible - observing it indicates a
    /// scheduling defect.
    pub fn dependency_status(&self, node: &AgentNode) -> DependencyStatus {
        let mut failed_upstream = false;

        for dep in &node.depends_on {
            match self.states.get(dep) {
                Some(state) if state.is_pass() => {}
                Some(NodeState::Failed) | Some(NodeState::Blocked) => failed_upstream = true,
                _ => return DependencyStatus::Unresolved,
            }
        }

        if failed_upstream {
            DependencyStatus::FailedUpstream
        } else {
            DependencyStatus::Satisfied
        }
    }

    /// Resolve a node's effective inputs
    ///
    /// Static inputs merged with values drawn from dependency outputs via
    /// the node's input bindings. An absent source output or sub-field binds
    /// JSON null; optionality is a valid design, not a failure.
    pub fn resolve_inputs(&self, node: &AgentNode) -> JsonMap {
        let mut inputs = node.static_inputs.clone();

        for (key, binding) in &node.input_bindings {
            let value = match self.outputs.get(&binding.source) {
                Some(output) => match &binding.output_key {
                    Some(output_key) => output.get(output_key).cloned().unwrap_or(Value::Null),
                    None => output.clone(),
                },
                None => Value::Null,
            };
            inputs.insert(key.clone(), value);
        }

        inputs
    }

    fn transition(&mut self, node_id: &str, to: NodeState) -> Result<()> {
        let from = self.states.get(node_id).copied().ok_or_else(|| {
            ConductorError::Internal(format!("unknown node '{}' in state map", node_id))
        })?;

        let allowed = matches!(
            (from, to),
            (NodeState::Pending, NodeState::Running)
                | (NodeState::Pending, NodeState::Skipped)
                | (NodeState::Pending, NodeState::Failed)
                | (NodeState::Pending, NodeState::Blocked)
                | (NodeState::Running, NodeState::Completed)
                | (NodeState::Running, NodeState::Failed)
                | (NodeState::Running, NodeState::Paused)
                | (NodeState::Paused, NodeState::Completed)
                | (NodeState::Paused, NodeState::Failed)
        );

        if !allowed {
            return Err(ConductorError::Internal(format!(
                "invalid state transition for node '{}': {:?} -> {:?}",
                node_id, from, to
            )));
        }

        self.states.insert(node_id.to_string(), to);
        Ok(())
    }

    /// Transition a node to running
    pub(crate) fn mark_running(&mut self, node_id: &str) -> Result<()> {
        self.transition(node_id, NodeState::Running)
    }

    /// Mark a node skipped because its condition evaluated false
    pub(crate) fn mark_skipped(&mut self, node_id: &str) -> Result<()> {
        self.transition(node_id, NodeState::Skipped)
    }

    /// Mark a node blocked: dependencies unmet after layer-ordered dispatch
    ///
    /// This is a diagnostic state for a scheduling defect, left visible in
    /// the abandoned context.
    pub(crate) fn mark_blocked(&mut self, node_id: &str) -> Result<()> {
        self.transition(node_id, NodeState::Blocked)
    }

    /// Record a successful completion: output, timing and actual cost
    pub(crate) fn record_completion(
        &mut self,
        node_id: &str,
        output: Value,
        elapsed_ms: u64,
        cost: f64,
    ) -> Result<()> {
        self.transition(node_id, NodeState::Completed)?;
        self.outputs.insert(node_id.to_string(), output);
        self.timings_ms.insert(node_id.to_string(), elapsed_ms);
        self.costs.actual_by_node.insert(node_id.to_string(), cost);
        self.costs.actual_total += cost;
        Ok(())
    }

    /// Record a contained failure; timing is still kept
    pub(crate) fn record_failure(
        &mut self,
        node_id: &str,
        error: NodeError,
        elapsed_ms: u64,
    ) -> Result<()> {
        self.transition(node_id, NodeState::Failed)?;
        self.errors.insert(node_id.to_string(), error);
        self.timings_ms.insert(node_id.to_string(), elapsed_ms);
        Ok(())
    }

    /// Pause the run after a checkpoint node ran to completion
    ///
    /// The about-to-be-recorded output is captured on the checkpoint so it
    /// is not lost; it becomes visible as the node's output only when the
    /// resume decision approves. Timing and cost are recorded here, which is
    /// what keeps the ledger from double-counting on resume.
    pub(crate) fn enter_checkpoint(
        &mut self,
        node_id: &str,
        output: Value,
        elapsed_ms: u64,
        cost: f64,
    ) -> Result<()> {
        if let Some(pending) = &self.pending_checkpoint {
            return Err(ConductorError::Internal(format!(
                "checkpoint for node '{}' while '{}' is already pending",
                node_id, pending.node_id
            )));
        }

        self.transition(node_id, NodeState::Paused)?;
        self.timings_ms.insert(node_id.to_string(), elapsed_ms);
        self.costs.actual_by_node.insert(node_id.to_string(), cost);
        self.costs.actual_total += cost;
        self.pending_checkpoint = Some(PendingCheckpoint {
            node_id: node_id.to_string(),
            output,
        });
        Ok(())
    }

    /// Resolve the pending checkpoint with a human decision
    ///
    /// Approval completes the node with its captured output; rejection fails
    /// it with a terminal rejection error. Returns the checkpointed node ID.
    pub(crate) fn resolve_checkpoint(
        &mut self,
        approved: bool,
        feedback: Option<String>,
    ) -> Result<NodeId> {
        let pending = self.pending_checkpoint.take().ok_or_else(|| {
            ConductorError::NoPendingCheckpoint(self.run_id.clone())
        })?;

        if approved {
            self.transition(&pending.node_id, NodeState::Completed)?;
            self.outputs.insert(pending.node_id.clone(), pending.output);
        } else {
            self.transition(&pending.node_id, NodeState::Failed)?;
            self.errors.insert(
                pending.node_id.clone(),
                NodeError::checkpoint_rejected(feedback),
            );
        }

        Ok(pending.node_id)
    }

    /// Derive the whole-run summary
    ///
    /// Recomputed on every call, never cached: it is read between
    /// asynchronous steps and must always reflect the current state.
    pub fn summary(&self) -> RunSummary {
        let total = self.states.len();
        let mut completed = 0;
        let mut failed = 0;
        let mut terminal = 0;

        for state in self.states.values() {
            match state {
                NodeState::Completed => {
                    completed += 1;
                    terminal += 1;
                }
                NodeState::Failed | NodeState::Blocked => {
                    failed += 1;
                    terminal += 1;
                }
                NodeState::Skipped => terminal += 1,
                _ => {}
            }
        }

        let status = if self.pending_checkpoint.is_some() {
            RunStatus::Paused
        } else if failed > 0 {
            RunStatus::Failed
        } else if terminal == total {
            RunStatus::Completed
        } else {
            RunStatus::Running
        };

        RunSummary {
            run_id: self.run_id.clone(),
            workflow_id: self.workflow_id.clone(),
            status,
            progress: Progress {
                completed,
                failed,
                total,
            },
            costs: self.costs.clone(),
            outputs: self.outputs.clone(),
            errors: self.errors.clone(),
            timings_ms: self.timings_ms.clone(),
            pending_checkpoint: self
                .pending_checkpoint
                .as_ref()
                .map(|c| c.node_id.clone()),
        }
    }
}
