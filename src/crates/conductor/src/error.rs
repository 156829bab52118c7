//! Error types for conductor
//!
//! Fatal errors surfaced to callers of `execute`/`resume` live here. Failures
//! of individual agent nodes are not errors in this sense; they are recorded
//! in the [`ExecutionContext`](crate::context::ExecutionContext) and never
//! propagate as exceptions from the scheduler.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result type alias for conductor operations
pub type Result<T> = std::result::Result<T, ConductorError>;

/// A single problem found while validating a workflow definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationIssue {
    /// A node lists a dependency that does not exist in the workflow
    MissingDependency { node: String, depends_on: String },

    /// An input binding references a source node that does not exist
    MissingBindingSource {
        node: String,
        input: String,
        source: String,
    },

    /// A node references an agent type absent from the registry
    UnknownAgentType { node: String, agent_type: String },

    /// The dependency relation contains a cycle through these nodes
    CycleDetected { nodes: Vec<String> },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingDependency { node, depends_on } => {
                write!(f, "node '{}' depends on unknown node '{}'", node, depends_on)
            }
            Self::MissingBindingSource {
                node,
                input,
                source,
            } => write!(
                f,
                "node '{}' binds input '{}' from unknown node '{}'",
                node, input, source
            ),
            Self::UnknownAgentType { node, agent_type } => {
                write!(f, "node '{}' uses unknown agent type '{}'", node, agent_type)
            }
            Self::CycleDetected { nodes } => {
                write!(f, "dependency cycle through nodes: {}", nodes.join(", "))
            }
        }
    }
}

/// Every validation problem found in a workflow, reported together
///
/// Validation collects all issues in one pass so a caller can fix a workflow
/// definition without replaying validate-fix cycles one error at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationFailure {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.issues.iter().map(|i| i.to_string()).collect();
        write!(f, "{}", rendered.join("; "))
    }
}

/// Main error type for conductor operations
#[derive(Debug, Error)]
pub enum ConductorError {
    /// The workflow definition is malformed; all issues are collected
    #[error("workflow validation failed: {0}")]
    Validation(ValidationFailure),

    /// An agent type was registered twice
    #[error("agent type already registered: {0}")]
    DuplicateAgentType(String),

    /// Lookup of an agent type that was never registered
    #[error("unknown agent type: {0}")]
    UnknownAgentType(String),

    /// The budget collaborator denied admission
    #[error("budget preflight denied: {0}")]
    BudgetDenied(String),

    /// The cancellation token was already active at admission time
    #[error("cancellation active: {0}")]
    Cancelled(String),

    /// Resume was called on a run with no checkpoint pending
    #[error("no checkpoint is pending for run {0}")]
    NoPendingCheckpoint(String),

    /// A defect in the engine itself (e.g. a layering bug)
    #[error("scheduler defect: {0}")]
    Internal(String),

    /// JSON serialization error
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ConductorError {
    /// Build a validation error from collected issues
    pub fn validation(issues: Vec<ValidationIssue>) -> Self {
        Self::Validation(ValidationFailure { issues })
    }

    /// The collected issues, if this is a validation error
    pub fn validation_issues(&self) -> Option<&[ValidationIssue]> {
        match self {
            Self::Validation(failure) => Some(&failure.issues),
            _ => None,
        }
    }
}
