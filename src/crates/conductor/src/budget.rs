//! Budget admission control
//!
//! The engine never does its own cost accounting; it consults a
//! [`BudgetGate`] before starting and before resuming a run. A denial is
//! side-effect-free: no execution context is created or mutated.
//! [`FixedLimitBudget`] is the in-process reference implementation for
//! callers that do not bring their own accounting subsystem.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Outcome of a preflight admission check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreflightDecision {
    /// Whether the run may proceed
    pub allowed: bool,

    /// Why admission was denied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Non-fatal notes, e.g. approaching the limit
    #[serde(default)]
    pub warnings: Vec<String>,

    /// Budget remaining after the estimated spend, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining: Option<f64>,
}

impl PreflightDecision {
    /// Allow with no further detail
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            warnings: Vec::new(),
            remaining: None,
        }
    }

    /// Deny with a reason
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            warnings: Vec::new(),
            remaining: None,
        }
    }

    /// Attach a warning
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// Attach the remaining budget
    pub fn with_remaining(mut self, remaining: f64) -> Self {
        self.remaining = Some(remaining);
        self
    }
}

/// External budget collaborator consulted at execute and resume time
///
/// Never consulted mid-run between layers: a budget change does not
/// retroactively abort an already-admitted run.
#[async_trait]
pub trait BudgetGate: Send + Sync {
    /// Decide whether work with this estimated cost may start
    async fn preflight_check(&self, estimated_cost: f64) -> PreflightDecision;
}

/// Reference budget gate with a hard limit and a warn threshold
#[derive(Debug)]
pub struct FixedLimitBudget {
    limit: f64,
    warn_ratio: f64,
    spent: Mutex<f64>,
}

impl FixedLimitBudget {
    /// Create a gate that blocks once estimated spend would exceed `limit`
    pub fn new(limit: f64) -> Self {
        Self {
            limit,
            warn_ratio: 0.8,
            spent: Mutex::new(0.0),
        }
    }

    /// Fraction of the limit at which warnings start (default 0.8)
    pub fn with_warn_ratio(mut self, warn_ratio: f64) -> Self {
        self.warn_ratio = warn_ratio;
        self
    }

    /// Record actual spend against the limit
    pub fn record_spend(&self, cost: f64) {
        *self.spent.lock() += cost;
    }

    /// Total spend recorded so far
    pub fn spent(&self) -> f64 {
        *self.spent.lock()
    }

    /// Budget left before the limit
    pub fn remaining(&self) -> f64 {
        (self.limit - self.spent()).max(0.0)
    }
}

#[async_trait]
impl BudgetGate for FixedLimitBudget {
    async fn preflight_check(&self, estimated_cost: f64) -> PreflightDecision {
        let spent = self.spent();
        let projected = spent + estimated_cost;

        if projected > self.limit {
            return PreflightDecision::deny(format!(
                "estimated cost {:.2} would exceed limit {:.2} (spent {:.2})",
                estimated_cost, self.limit, spent
            ))
            .with_remaining(self.limit - spent);
        }

        let mut decision = PreflightDecision::allow().with_remaining(self.limit - projected);
        if self.limit > 0.0 && projected / self.limit >= self.warn_ratio {
            decision = decision.with_warning(format!(
                "budget usage at {:.1}% after this run",
                projected / self.limit * 100.0
            ));
        }
        decision
    }
}
