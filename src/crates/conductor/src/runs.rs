//! In-memory run registry
//!
//! Checkpoints persist only as long as the owning execution context is
//! retained. Callers park contexts here between `execute` and `resume`,
//! keyed by run ID, and answer status queries from the stored context.
//! Nothing is durable: a process restart loses resumability, and durable
//! persistence is the caller's concern.

use crate::context::{ExecutionContext, RunSummary};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Registry of retained execution contexts keyed by run ID
#[derive(Debug, Default)]
pub struct RunRegistry {
    runs: Mutex<HashMap<String, ExecutionContext>>,
}

impl RunRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Retain a context; returns its run ID
    pub fn insert(&self, ctx: ExecutionContext) -> String {
        let run_id = ctx.run_id().to_string();
        self.runs.lock().insert(run_id.clone(), ctx);
        run_id
    }

    /// Remove and return a context, e.g. to hand it to `resume`
    pub fn take(&self, run_id: &str) -> Option<ExecutionContext> {
        self.runs.lock().remove(run_id)
    }

    /// Derive a summary for a retained run without removing it
    pub fn summary(&self, run_id: &str) -> Option<RunSummary> {
        self.runs.lock().get(run_id).map(|ctx| ctx.summary())
    }

    /// Whether a run is currently retained
    pub fn contains(&self, run_id: &str) -> bool {
        self.runs.lock().contains_key(run_id)
    }

    /// Discard a retained run; returns true when something was removed
    pub fn discard(&self, run_id: &str) -> bool {
        self.runs.lock().remove(run_id).is_some()
    }

    /// IDs of every retained run
    pub fn run_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.runs.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of retained runs
    pub fn len(&self) -> usize {
        self.runs.lock().len()
    }

    /// True when no runs are retained
    pub fn is_empty(&self) -> bool {
        self.runs.lock().is_empty()
    }
}
