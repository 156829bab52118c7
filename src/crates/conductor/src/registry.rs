//! Agent registry
//!
//! Maps an agent *type* name to its executable unit plus metadata (cost
//! estimator, descriptor). The registry has process-wide lifetime: it is
//! populated once at startup and read-only from the scheduler's perspective
//! afterwards. Lookups of unknown types fail loudly instead of returning
//! nothing, so a bad workflow definition surfaces before dispatch.

use crate::error::{ConductorError, Result};
use crate::graph::JsonMap;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Per-call options handed to an agent executable
#[derive(Debug, Clone)]
pub struct AgentCallOptions {
    /// Run this call belongs to
    pub run_id: String,

    /// Effective timeout the scheduler enforces around the call
    pub timeout_ms: Option<u64>,
}

/// Result of one agent invocation
///
/// Agents are opaque to the engine; they return any JSON value and any error
/// type. The scheduler never inspects output shape beyond what input
/// bindings require.
pub type AgentOutput =
    std::result::Result<serde_json::Value, Box<dyn std::error::Error + Send + Sync>>;

/// Asynchronous agent executable: input map in, output value out
pub type AgentHandler = Arc<
    dyn Fn(JsonMap, AgentCallOptions) -> Pin<Box<dyn Future<Output = AgentOutput> + Send>>
        + Send
        + Sync,
>;

/// Pure cost estimator: resolved inputs (and output, once known) to a cost
///
/// Called with `None` for the output before a run or resume to produce the
/// preflight estimate, and with `Some(output)` after a call completes to
/// record actual spend.
pub type CostEstimator = Arc<dyn Fn(&JsonMap, Option<&serde_json::Value>) -> f64 + Send + Sync>;

/// One registered agent type
#[derive(Clone)]
pub struct AgentRegistration {
    /// Registry key
    pub agent_type: String,

    /// Human-readable name
    pub name: String,

    /// Human-readable description for discovery surfaces
    pub description: String,

    /// The executable unit; required by construction
    pub handler: AgentHandler,

    /// Cost estimator consulted for preflight and actual accounting
    pub estimate_cost: CostEstimator,
}

impl AgentRegistration {
    /// Create a registration from an async closure
    ///
    /// The default cost estimator reports zero; override it with
    /// [`with_cost_estimator`](Self::with_cost_estimator) for billable
    /// agents.
    pub fn new<F, Fut>(
        agent_type: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        handler: F,
    ) -> Self
    where
        F: Fn(JsonMap, AgentCallOptions) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AgentOutput> + Send + 'static,
    {
        Self {
            agent_type: agent_type.into(),
            name: name.into(),
            description: description.into(),
            handler: Arc::new(move |inputs, options| Box::pin(handler(inputs, options))),
            estimate_cost: Arc::new(|_, _| 0.0),
        }
    }

    /// Attach a cost estimator
    pub fn with_cost_estimator<F>(mut self, estimator: F) -> Self
    where
        F: Fn(&JsonMap, Option<&serde_json::Value>) -> f64 + Send + Sync + 'static,
    {
        self.estimate_cost = Arc::new(estimator);
        self
    }
}

impl std::fmt::Debug for AgentRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistration")
            .field("agent_type", &self.agent_type)
            .field("name", &self.name)
            .field("description", &self.description)
            .field("handler", &"<function>")
            .field("estimate_cost", &"<function>")
            .finish()
    }
}

/// Read-only descriptor of a registered agent type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentDescriptor {
    pub agent_type: String,
    pub name: String,
    pub description: String,
}

/// Lookup table of all known agent types
#[derive(Debug, Default)]
pub struct AgentRegistry {
    entries: HashMap<String, AgentRegistration>,
}

impl AgentRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent type
    ///
    /// Registering the same type twice is an error: silently replacing an
    /// executable would make workflow behavior depend on startup order.
    pub fn register(&mut self, registration: AgentRegistration) -> Result<()> {
        if self.entries.contains_key(&registration.agent_type) {
            return Err(ConductorError::DuplicateAgentType(
                registration.agent_type.clone(),
            ));
        }

        tracing::debug!(agent_type = %registration.agent_type, "Registered agent type");
        self.entries
            .insert(registration.agent_type.clone(), registration);
        Ok(())
    }

    /// Look up an agent type
    ///
    /// Unknown types are an error rather than `None` so a bad workflow
    /// definition fails at validation instead of deep inside a dispatch
    /// loop.
    pub fn get(&self, agent_type: &str) -> Result<&AgentRegistration> {
        self.entries
            .get(agent_type)
            .ok_or_else(|| ConductorError::UnknownAgentType(agent_type.to_string()))
    }

    /// Check whether an agent type is registered
    pub fn contains(&self, agent_type: &str) -> bool {
        self.entries.contains_key(agent_type)
    }

    /// Read-only descriptors of every registered type, sorted by type name
    pub fn list(&self) -> Vec<AgentDescriptor> {
        let mut descriptors: Vec<AgentDescriptor> = self
            .entries
            .values()
            .map(|entry| AgentDescriptor {
                agent_type: entry.agent_type.clone(),
                name: entry.name.clone(),
                description: entry.description.clone(),
            })
            .collect();
        descriptors.sort_by(|a, b| a.agent_type.cmp(&b.agent_type));
        descriptors
    }

    /// Number of registered agent types
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no agent types are registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
