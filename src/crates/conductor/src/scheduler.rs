//! Workflow scheduler
//!
//! Walks the execution layers of a validated graph, dispatching every node
//! in a layer concurrently through the agent registry, applying per-node
//! retry and timeout, honoring checkpoints, and enforcing the budget gate
//! before starting and before resuming.
//!
//! Per-node failures are contained: they change node state in the execution
//! context and the aggregate failed count, never propagate as errors from
//! `execute`. Only validation failures, budget denials and engine defects
//! are fatal to the call.

use crate::budget::BudgetGate;
use crate::cancel::CancelToken;
use crate::context::{DependencyStatus, ExecutionContext, NodeError, NodeState};
use crate::error::{ConductorError, Result, ValidationIssue};
use crate::events::{ExecutionEvent, ProgressSink};
use crate::graph::{AgentNode, JsonMap, NodeId, WorkflowGraph};
use crate::layers::topological_layers;
use crate::registry::{AgentCallOptions, AgentRegistration, AgentRegistry};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tooling::{is_retryable_error, with_timeout, TimeoutError};
use tracing::{debug, error, info, warn};

/// Caller-supplied predicate deciding whether a failure is worth retrying
pub type RetryPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Per-call options for `execute` and `resume`
pub struct ExecuteOptions {
    /// Keep starting later layers after a node failure (default off)
    pub continue_on_error: bool,

    /// Record synthetic outputs without invoking agent executables
    pub dry_run: bool,

    /// Budget collaborator consulted at execute and resume start
    pub budget: Option<Arc<dyn BudgetGate>>,

    /// Cancellation token checked before each node dispatch
    pub cancel: CancelToken,

    /// Destination for typed progress events
    pub progress: ProgressSink,

    /// Retryable-failure predicate applied between attempts
    pub retryable: RetryPredicate,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            continue_on_error: false,
            dry_run: false,
            budget: None,
            cancel: CancelToken::new(),
            progress: ProgressSink::logging_only(),
            retryable: Arc::new(|message| is_retryable_error(message)),
        }
    }
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_budget(mut self, budget: Arc<dyn BudgetGate>) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_retryable<F>(mut self, retryable: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(retryable);
        self
    }
}

impl std::fmt::Debug for ExecuteOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecuteOptions")
            .field("continue_on_error", &self.continue_on_error)
            .field("dry_run", &self.dry_run)
            .field("budget", &self.budget.as_ref().map(|_| "<gate>"))
            .field("cancel", &self.cancel)
            .field("retryable", &"<function>")
            .finish()
    }
}

/// Settled result of one node dispatch
enum NodeOutcome {
    Completed {
        output: serde_json::Value,
        elapsed_ms: u64,
        cost: f64,
        checkpoint: bool,
    },
    Failed {
        error: NodeError,
        elapsed_ms: u64,
    },
}

/// Engine that executes workflow graphs against an agent registry
pub struct Scheduler {
    registry: Arc<AgentRegistry>,
}

impl Scheduler {
    /// Create a scheduler over a populated registry
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self { registry }
    }

    /// The registry this scheduler dispatches through
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Validate a graph against its structure and this registry
    ///
    /// Collects missing references, unknown agent types and the cycle check
    /// into a single validation failure; on success returns the execution
    /// layers.
    pub fn validate(&self, graph: &WorkflowGraph) -> Result<Vec<Vec<NodeId>>> {
        let mut issues = graph.structural_issues();

        let mut ids: Vec<&NodeId> = graph.nodes.keys().collect();
        ids.sort();
        for id in ids {
            let node = &graph.nodes[id];
            if !self.registry.contains(&node.agent_type) {
                issues.push(ValidationIssue::UnknownAgentType {
                    node: node.id.clone(),
                    agent_type: node.agent_type.clone(),
                });
            }
        }

        match topological_layers(graph) {
            Ok(layers) if issues.is_empty() => Ok(layers),
            Ok(_) => Err(ConductorError::validation(issues)),
            Err(cycle) => {
                issues.push(cycle);
                Err(ConductorError::validation(issues))
            }
        }
    }

    /// Execute a run of the given graph
    ///
    /// Validation and the budget preflight happen before any execution
    /// context exists, so admission denial is side-effect-free. Per-node
    /// failures do not surface here; inspect the returned context's
    /// summary.
    pub async fn execute(
        &self,
        graph: &WorkflowGraph,
        options: &ExecuteOptions,
    ) -> Result<ExecutionContext> {
        let layers = self.validate(graph)?;

        let estimates = self.estimate_costs(graph)?;
        let estimated_total: f64 = estimates.values().sum();
        self.admit(options, estimated_total).await?;

        let mut ctx = ExecutionContext::new(graph, estimates);
        info!(
            run_id = %ctx.run_id(),
            workflow_id = %graph.id,
            nodes = graph.nodes.len(),
            layers = layers.len(),
            estimated_cost = estimated_total,
            "Starting workflow run"
        );
        options.progress.emit(ExecutionEvent::run_started(
            ctx.run_id(),
            graph.id.clone(),
            graph.nodes.len(),
        ));

        self.run_layers(graph, &layers, &mut ctx, options).await?;
        Ok(ctx)
    }

    /// Apply a human decision to the pending checkpoint and continue
    ///
    /// The budget preflight runs again against the estimated cost of the
    /// nodes still pending, since the budget may have been consumed or its
    /// limit changed since the pause. A denial leaves the checkpoint
    /// untouched. Rejection fails the checkpointed node and ends the run;
    /// approval completes it and continues from the first layer with
    /// pending nodes - terminal nodes are never re-dispatched.
    pub async fn resume(
        &self,
        graph: &WorkflowGraph,
        ctx: &mut ExecutionContext,
        approved: bool,
        feedback: Option<String>,
        options: &ExecuteOptions,
    ) -> Result<()> {
        if ctx.pending_checkpoint().is_none() {
            return Err(ConductorError::NoPendingCheckpoint(ctx.run_id().to_string()));
        }

        let remaining: f64 = graph
            .nodes
            .keys()
            .filter(|id| ctx.state(id.as_str()) == Some(NodeState::Pending))
            .filter_map(|id| ctx.costs().estimated_by_node.get(id.as_str()))
            .sum();
        self.admit(options, remaining).await?;

        let node_id = ctx.resolve_checkpoint(approved, feedback)?;
        info!(
            run_id = %ctx.run_id(),
            node_id = %node_id,
            approved,
            "Checkpoint resolved"
        );
        options.progress.emit(ExecutionEvent::run_resumed(
            ctx.run_id(),
            node_id,
            approved,
        ));

        if !approved {
            return Ok(());
        }

        let layers = self.validate(graph)?;
        self.run_layers(graph, &layers, ctx, options).await
    }

    /// Sum registry cost estimates over every node's static inputs
    fn estimate_costs(
        &self,
        graph: &WorkflowGraph,
    ) -> Result<std::collections::HashMap<NodeId, f64>> {
        let mut estimates = std::collections::HashMap::new();
        for node in graph.nodes.values() {
            let registration = self.registry.get(&node.agent_type)?;
            let estimate = (registration.estimate_cost)(&node.static_inputs, None);
            estimates.insert(node.id.clone(), estimate);
        }
        Ok(estimates)
    }

    /// Admission control: kill-switch and budget gate, side-effect-free
    ///
    /// Runs before an execution context is created (or, on resume, before
    /// the checkpoint is touched), so denial observably changes nothing.
    async fn admit(&self, options: &ExecuteOptions, estimated_cost: f64) -> Result<()> {
        if options.cancel.is_cancelled() {
            return Err(ConductorError::Cancelled(
                "cancellation requested before admission".to_string(),
            ));
        }

        let Some(budget) = &options.budget else {
            return Ok(());
        };

        let decision = budget.preflight_check(estimated_cost).await;
        for warning in &decision.warnings {
            warn!(%warning, "Budget preflight warning");
        }

        if !decision.allowed {
            let reason = decision
                .reason
                .unwrap_or_else(|| "budget exceeded".to_string());
            warn!(estimated_cost, %reason, "Budget preflight denied");
            return Err(ConductorError::BudgetDenied(reason));
        }

        Ok(())
    }

    /// Walk layers in order, dispatching pending nodes concurrently
    async fn run_layers(
        &self,
        graph: &WorkflowGraph,
        layers: &[Vec<NodeId>],
        ctx: &mut ExecutionContext,
        options: &ExecuteOptions,
    ) -> Result<()> {
        let run_start = Instant::now();

        for layer in layers {
            let mut dispatches = Vec::new();
            let mut layer_failed = false;

            for node_id in layer {
                if ctx.state(node_id) != Some(NodeState::Pending) {
                    continue;
                }

                let node = graph.nodes.get(node_id).ok_or_else(|| {
                    ConductorError::Internal(format!(
                        "layer references unknown node '{}'",
                        node_id
                    ))
                })?;

                if options.cancel.is_cancelled() {
                    warn!(
                        run_id = %ctx.run_id(),
                        node_id = %node.id,
                        "Cancellation active; node will not start"
                    );
                    options.progress.emit(ExecutionEvent::node_failed(
                        ctx.run_id(),
                        node.id.clone(),
                        "killed before dispatch",
                        0,
                    ));
                    ctx.record_failure(&node.id, NodeError::killed(), 0)?;
                    layer_failed = true;
                    continue;
                }

                if let Some(condition) = &node.condition {
                    if !condition(ctx) {
                        debug!(run_id = %ctx.run_id(), node_id = %node.id, "Condition false; skipping");
                        options
                            .progress
                            .emit(ExecutionEvent::node_skipped(ctx.run_id(), node.id.clone()));
                        ctx.mark_skipped(&node.id)?;
                        continue;
                    }
                }

                match ctx.dependency_status(node) {
                    DependencyStatus::Satisfied => {}
                    DependencyStatus::FailedUpstream => {
                        debug!(
                            run_id = %ctx.run_id(),
                            node_id = %node.id,
                            "Upstream failure; skipping dependent"
                        );
                        options
                            .progress
                            .emit(ExecutionEvent::node_skipped(ctx.run_id(), node.id.clone()));
                        ctx.mark_skipped(&node.id)?;
                        continue;
                    }
                    DependencyStatus::Unresolved => {
                        ctx.mark_blocked(&node.id)?;
                        error!(
                            run_id = %ctx.run_id(),
                            node_id = %node.id,
                            "Dependencies unsettled after layer-ordered dispatch; aborting run"
                        );
                        return Err(ConductorError::Internal(format!(
                            "node '{}' blocked: dependencies unsettled at dispatch",
                            node.id
                        )));
                    }
                }

                let registration = self.registry.get(&node.agent_type)?.clone();
                let inputs = ctx.resolve_inputs(node);
                ctx.mark_running(&node.id)?;
                options.progress.emit(ExecutionEvent::node_started(
                    ctx.run_id(),
                    node.id.clone(),
                    node.agent_type.clone(),
                ));

                dispatches.push(self.dispatch_node(
                    graph,
                    node,
                    registration,
                    inputs,
                    ctx.run_id().to_string(),
                    options,
                ));
            }

            // A single node's failure must not cancel its siblings; the
            // layer settles as a whole.
            let outcomes = futures::future::join_all(dispatches).await;

            for (node_id, outcome) in outcomes {
                match outcome {
                    NodeOutcome::Completed {
                        output,
                        elapsed_ms,
                        cost,
                        checkpoint,
                    } => {
                        if checkpoint && ctx.pending_checkpoint().is_none() {
                            ctx.enter_checkpoint(&node_id, output, elapsed_ms, cost)?;
                        } else {
                            if checkpoint {
                                debug!(
                                    node_id = %node_id,
                                    "Checkpoint already pending in this layer; recording completion"
                                );
                            }
                            options.progress.emit(ExecutionEvent::node_completed(
                                ctx.run_id(),
                                node_id.clone(),
                                elapsed_ms,
                                cost,
                            ));
                            ctx.record_completion(&node_id, output, elapsed_ms, cost)?;
                        }
                    }
                    NodeOutcome::Failed { error, elapsed_ms } => {
                        options.progress.emit(ExecutionEvent::node_failed(
                            ctx.run_id(),
                            node_id.clone(),
                            error.message.clone(),
                            elapsed_ms,
                        ));
                        ctx.record_failure(&node_id, error, elapsed_ms)?;
                        layer_failed = true;
                    }
                }
            }

            if let Some(pending) = ctx.pending_checkpoint() {
                info!(
                    run_id = %ctx.run_id(),
                    node_id = %pending.node_id,
                    "Run paused at checkpoint"
                );
                options.progress.emit(ExecutionEvent::run_paused(
                    ctx.run_id(),
                    pending.node_id.clone(),
                ));
                return Ok(());
            }

            if layer_failed && !options.continue_on_error {
                warn!(
                    run_id = %ctx.run_id(),
                    "Layer had failures and continue_on_error is off; later layers will not start"
                );
                break;
            }
        }

        let summary = ctx.summary();
        info!(
            run_id = %ctx.run_id(),
            completed = summary.progress.completed,
            failed = summary.progress.failed,
            actual_cost = summary.costs.actual_total,
            "Workflow run finished"
        );
        options.progress.emit(ExecutionEvent::run_completed(
            ctx.run_id(),
            summary.progress.completed,
            summary.progress.failed,
            run_start.elapsed().as_millis() as u64,
        ));
        Ok(())
    }

    /// Invoke one node's agent with retry and timeout applied
    async fn dispatch_node(
        &self,
        graph: &WorkflowGraph,
        node: &AgentNode,
        registration: AgentRegistration,
        inputs: JsonMap,
        run_id: String,
        options: &ExecuteOptions,
    ) -> (NodeId, NodeOutcome) {
        let start = Instant::now();

        if options.dry_run {
            debug!(node_id = %node.id, "Dry run; recording synthetic output");
            let output = serde_json::json!({
                "synthetic": true,
                "agent_type": node.agent_type,
            });
            return (
                node.id.clone(),
                NodeOutcome::Completed {
                    output,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                    cost: 0.0,
                    checkpoint: node.checkpoint,
                },
            );
        }

        let timeout_ms = node.timeout_ms.unwrap_or(graph.default_timeout_ms);
        let retry = node
            .retry
            .clone()
            .unwrap_or_else(|| graph.default_retry.clone());

        let mut attempts = 0;
        loop {
            attempts += 1;
            let call_options = AgentCallOptions {
                run_id: run_id.clone(),
                timeout_ms: Some(timeout_ms),
            };
            let call = (registration.handler)(inputs.clone(), call_options);

            let failure = match with_timeout(Duration::from_millis(timeout_ms), call).await {
                Ok(output) => {
                    let cost = (registration.estimate_cost)(&inputs, Some(&output));
                    debug!(node_id = %node.id, attempts, cost, "Agent call succeeded");
                    return (
                        node.id.clone(),
                        NodeOutcome::Completed {
                            output,
                            elapsed_ms: start.elapsed().as_millis() as u64,
                            cost,
                            checkpoint: node.checkpoint,
                        },
                    );
                }
                Err(TimeoutError::Timeout(duration)) => NodeError::timeout(
                    format!("agent call timed out after {:?}", duration),
                    attempts,
                ),
                Err(TimeoutError::OperationFailed(error)) => {
                    NodeError::execution(error.to_string(), attempts)
                }
            };

            if retry.should_retry(attempts) && (options.retryable)(&failure.message) {
                let delay = retry.calculate_delay(attempts - 1);
                warn!(
                    node_id = %node.id,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %failure.message,
                    "Transient failure; will retry"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            debug!(node_id = %node.id, attempts, error = %failure.message, "Node failed");
            return (
                node.id.clone(),
                NodeOutcome::Failed {
                    error: failure,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::AgentNode;
    use crate::registry::AgentRegistration;
    use serde_json::json;

    fn registry_with_noop() -> Arc<AgentRegistry> {
        let mut registry = AgentRegistry::new();
        registry
            .register(AgentRegistration::new("noop", "Noop", "", |_, _| async {
                Ok(json!({}))
            }))
            .unwrap();
        Arc::new(registry)
    }

    #[test]
    fn test_execute_options_defaults() {
        let options = ExecuteOptions::default();
        assert!(!options.continue_on_error);
        assert!(!options.dry_run);
        assert!(options.budget.is_none());
        assert!((options.retryable)("connection timeout"));
        assert!(!(options.retryable)("404 Not Found"));
    }

    #[test]
    fn test_execute_options_builder() {
        let options = ExecuteOptions::new()
            .with_continue_on_error(true)
            .with_dry_run(true)
            .with_retryable(|_| false);

        assert!(options.continue_on_error);
        assert!(options.dry_run);
        assert!(!(options.retryable)("timeout"));
    }

    #[test]
    fn test_validate_merges_registry_and_structural_issues() {
        let scheduler = Scheduler::new(registry_with_noop());

        let mut graph = WorkflowGraph::new("wf", "bad");
        graph
            .add_agent(AgentNode::new("a", "ghost_type").depends_on(["missing"]))
            .add_agent(AgentNode::new("b", "noop"));

        let err = scheduler.validate(&graph).unwrap_err();
        let issues = err.validation_issues().unwrap();

        assert_eq!(issues.len(), 2);
        assert!(issues
            .iter()
            .any(|i| matches!(i, ValidationIssue::MissingDependency { .. })));
        assert!(issues
            .iter()
            .any(|i| matches!(i, ValidationIssue::UnknownAgentType { agent_type, .. } if agent_type == "ghost_type")));
    }

    #[test]
    fn test_validate_returns_layers() {
        let scheduler = Scheduler::new(registry_with_noop());

        let mut graph = WorkflowGraph::new("wf", "ok");
        graph
            .add_agent(AgentNode::new("a", "noop"))
            .add_agent(AgentNode::new("b", "noop").depends_on(["a"]));

        let layers = scheduler.validate(&graph).unwrap();
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0], vec!["a".to_string()]);
    }
}
