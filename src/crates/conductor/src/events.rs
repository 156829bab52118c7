//! Typed progress events
//!
//! Progress notification is an explicit parameter supplied by the caller: a
//! [`ProgressSink`] either mirrors events into tracing only, or additionally
//! forwards them over a channel the caller consumes. Nothing registers
//! itself anywhere; there is no hidden emitter lifecycle to clean up.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Event types emitted while a run executes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// A run was admitted and its context created
    RunStarted {
        run_id: String,
        workflow_id: String,
        node_count: usize,
        timestamp: i64,
    },
    /// A node was dispatched
    NodeStarted {
        run_id: String,
        node_id: String,
        agent_type: String,
        timestamp: i64,
    },
    /// A node completed successfully
    NodeCompleted {
        run_id: String,
        node_id: String,
        duration_ms: u64,
        cost: f64,
        timestamp: i64,
    },
    /// A node failed after its retries were exhausted
    NodeFailed {
        run_id: String,
        node_id: String,
        error: String,
        duration_ms: u64,
        timestamp: i64,
    },
    /// A node was skipped because its condition evaluated false
    NodeSkipped {
        run_id: String,
        node_id: String,
        timestamp: i64,
    },
    /// A checkpoint fired and the run is awaiting a decision
    RunPaused {
        run_id: String,
        node_id: String,
        timestamp: i64,
    },
    /// A resume decision was applied to the pending checkpoint
    RunResumed {
        run_id: String,
        node_id: String,
        approved: bool,
        timestamp: i64,
    },
    /// The run finished processing layers
    RunCompleted {
        run_id: String,
        completed: usize,
        failed: usize,
        duration_ms: u64,
        timestamp: i64,
    },
}

impl ExecutionEvent {
    /// Get the timestamp of the event
    pub fn timestamp(&self) -> i64 {
        match self {
            ExecutionEvent::RunStarted { timestamp, .. }
            | ExecutionEvent::NodeStarted { timestamp, .. }
            | ExecutionEvent::NodeCompleted { timestamp, .. }
            | ExecutionEvent::NodeFailed { timestamp, .. }
            | ExecutionEvent::NodeSkipped { timestamp, .. }
            | ExecutionEvent::RunPaused { timestamp, .. }
            | ExecutionEvent::RunResumed { timestamp, .. }
            | ExecutionEvent::RunCompleted { timestamp, .. } => *timestamp,
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            ExecutionEvent::RunStarted {
                workflow_id,
                node_count,
                ..
            } => format!("Run started: {} ({} nodes)", workflow_id, node_count),
            ExecutionEvent::NodeStarted {
                node_id,
                agent_type,
                ..
            } => format!("Node started: {} ({})", node_id, agent_type),
            ExecutionEvent::NodeCompleted {
                node_id,
                duration_ms,
                ..
            } => format!("Node completed: {} ({}ms)", node_id, duration_ms),
            ExecutionEvent::NodeFailed { node_id, error, .. } => {
                format!("Node failed: {} - {}", node_id, error)
            }
            ExecutionEvent::NodeSkipped { node_id, .. } => {
                format!("Node skipped: {}", node_id)
            }
            ExecutionEvent::RunPaused { node_id, .. } => {
                format!("Run paused at checkpoint: {}", node_id)
            }
            ExecutionEvent::RunResumed {
                node_id, approved, ..
            } => format!(
                "Run resumed: {} ({})",
                node_id,
                if *approved { "approved" } else { "rejected" }
            ),
            ExecutionEvent::RunCompleted {
                completed, failed, ..
            } => format!("Run finished: {} succeeded, {} failed", completed, failed),
        }
    }

    pub fn run_started(
        run_id: impl Into<String>,
        workflow_id: impl Into<String>,
        node_count: usize,
    ) -> Self {
        ExecutionEvent::RunStarted {
            run_id: run_id.into(),
            workflow_id: workflow_id.into(),
            node_count,
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn node_started(
        run_id: impl Into<String>,
        node_id: impl Into<String>,
        agent_type: impl Into<String>,
    ) -> Self {
        ExecutionEvent::NodeStarted {
            run_id: run_id.into(),
            node_id: node_id.into(),
            agent_type: agent_type.into(),
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn node_completed(
        run_id: impl Into<String>,
        node_id: impl Into<String>,
        duration_ms: u64,
        cost: f64,
    ) -> Self {
        ExecutionEvent::NodeCompleted {
            run_id: run_id.into(),
            node_id: node_id.into(),
            duration_ms,
            cost,
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn node_failed(
        run_id: impl Into<String>,
        node_id: impl Into<String>,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        ExecutionEvent::NodeFailed {
            run_id: run_id.into(),
            node_id: node_id.into(),
            error: error.into(),
            duration_ms,
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn node_skipped(run_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        ExecutionEvent::NodeSkipped {
            run_id: run_id.into(),
            node_id: node_id.into(),
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn run_paused(run_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        ExecutionEvent::RunPaused {
            run_id: run_id.into(),
            node_id: node_id.into(),
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn run_resumed(
        run_id: impl Into<String>,
        node_id: impl Into<String>,
        approved: bool,
    ) -> Self {
        ExecutionEvent::RunResumed {
            run_id: run_id.into(),
            node_id: node_id.into(),
            approved,
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn run_completed(
        run_id: impl Into<String>,
        completed: usize,
        failed: usize,
        duration_ms: u64,
    ) -> Self {
        ExecutionEvent::RunCompleted {
            run_id: run_id.into(),
            completed,
            failed,
            duration_ms,
            timestamp: Utc::now().timestamp(),
        }
    }
}

/// Caller-supplied destination for progress events
///
/// Every event is mirrored into tracing. With a channel attached, events are
/// additionally forwarded to the receiver; a dropped receiver is tolerated
/// so a caller can stop listening mid-run.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::UnboundedSender<ExecutionEvent>>,
}

impl ProgressSink {
    /// A sink that only mirrors events into tracing
    pub fn logging_only() -> Self {
        Self::default()
    }

    /// A sink paired with a channel the caller consumes
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ExecutionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Emit one event
    pub fn emit(&self, event: ExecutionEvent) {
        tracing::info!(
            timestamp = event.timestamp(),
            description = %event.description(),
            "Execution event"
        );

        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_constructors_and_descriptions() {
        let event = ExecutionEvent::run_started("run-1", "wf-1", 4);
        assert!(event.description().contains("wf-1"));
        assert!(event.description().contains("4 nodes"));

        let event = ExecutionEvent::node_failed("run-1", "score", "timed out", 250);
        assert!(event.description().contains("score"));
        assert!(event.description().contains("timed out"));

        let event = ExecutionEvent::run_resumed("run-1", "approve_draft", false);
        assert!(event.description().contains("rejected"));
    }

    #[test]
    fn test_event_timestamp_is_current() {
        let event = ExecutionEvent::node_skipped("run-1", "gate");
        let now = Utc::now().timestamp();
        assert!((event.timestamp() - now).abs() <= 1);
    }

    #[test]
    fn test_event_serialization() {
        let event = ExecutionEvent::node_completed("run-1", "draft", 1500, 0.75);

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("node_completed"));
        assert!(json.contains("draft"));

        let back: ExecutionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[tokio::test]
    async fn test_channel_sink_forwards_events() {
        let (sink, mut rx) = ProgressSink::channel();

        sink.emit(ExecutionEvent::node_skipped("run-1", "gate"));
        sink.emit(ExecutionEvent::run_paused("run-1", "approve"));

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, ExecutionEvent::NodeSkipped { .. }));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, ExecutionEvent::RunPaused { .. }));
    }

    #[test]
    fn test_logging_only_sink_does_not_panic() {
        let sink = ProgressSink::logging_only();
        sink.emit(ExecutionEvent::run_completed("run-1", 3, 0, 900));
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_tolerated() {
        let (sink, rx) = ProgressSink::channel();
        drop(rx);
        sink.emit(ExecutionEvent::node_skipped("run-1", "gate"));
    }
}
