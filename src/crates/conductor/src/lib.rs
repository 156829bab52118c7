//! # Conductor - Multi-Agent Workflow Orchestration Engine
//!
//! A DAG-based scheduler that composes independent, opaque units of
//! asynchronous work ("agents") into workflows with declared dependencies,
//! executes them with bounded parallelism, supports human-in-the-loop
//! pause/resume checkpoints, enforces a cost budget before and during
//! execution, and recovers from per-node failure without aborting the whole
//! run.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use conductor::{
//!     AgentNode, AgentRegistration, AgentRegistry, ExecuteOptions, Scheduler, WorkflowGraph,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> conductor::Result<()> {
//! let mut registry = AgentRegistry::new();
//! registry.register(AgentRegistration::new(
//!     "lead_scorer",
//!     "Lead Scorer",
//!     "Scores inbound leads",
//!     |_inputs, _options| async move { Ok(json!({"score": 87})) },
//! ))?;
//!
//! let mut graph = WorkflowGraph::new("daily-pipeline", "Daily pipeline");
//! graph.add_agent(AgentNode::new("score", "lead_scorer"));
//!
//! let scheduler = Scheduler::new(Arc::new(registry));
//! let ctx = scheduler.execute(&graph, &ExecuteOptions::default()).await?;
//! println!("run {} finished: {:?}", ctx.run_id(), ctx.summary().status);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! A validated [`WorkflowGraph`] is layered with a topological sweep; the
//! [`Scheduler`] walks the layers, dispatching every node in a layer
//! concurrently through the [`AgentRegistry`]. Results flow into the
//! per-run [`ExecutionContext`]; a checkpoint node suspends the run and
//! hands control back to the caller until [`Scheduler::resume`] applies the
//! human decision.

// Core modules
pub mod budget;
pub mod cancel;
pub mod context;
pub mod events;
pub mod graph;
pub mod layers;
pub mod registry;
pub mod runs;
pub mod scheduler;

// Error types and utilities
mod error;

// Re-export key types for convenience
pub use budget::{BudgetGate, FixedLimitBudget, PreflightDecision};
pub use cancel::CancelToken;
pub use context::{
    CostLedger, DependencyStatus, ExecutionContext, NodeError, NodeErrorKind, NodeState,
    PendingCheckpoint, Progress, RunStatus, RunSummary,
};
pub use events::{ExecutionEvent, ProgressSink};
pub use graph::{
    AgentNode, AgentSpec, AgentSpecOptions, InputBinding, JsonMap, NodeCondition, NodeId,
    WorkflowGraph, WorkflowSpec, DEFAULT_TIMEOUT_MS,
};
pub use layers::topological_layers;
pub use registry::{
    AgentCallOptions, AgentDescriptor, AgentHandler, AgentOutput, AgentRegistration,
    AgentRegistry, CostEstimator,
};
pub use runs::RunRegistry;
pub use scheduler::{ExecuteOptions, RetryPredicate, Scheduler};

// Error types
pub use error::{ConductorError, Result, ValidationFailure, ValidationIssue};

// Re-export the retry policy agents and graphs are configured with
pub use tooling::RetryPolicy;
