//! Integration tests for budget admission control

mod common;

use conductor::{
    AgentNode, BudgetGate, ConductorError, ExecuteOptions, FixedLimitBudget, PreflightDecision,
    RunStatus, WorkflowGraph,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn costed_graph(costs: &[(&str, f64)]) -> WorkflowGraph {
    let mut graph = WorkflowGraph::new("wf-budget", "Budgeted");
    let mut previous: Option<String> = None;
    for (id, cost) in costs {
        let mut node = AgentNode::new(*id, "costly").with_static_input("cost", *cost);
        if let Some(prev) = &previous {
            node = node.depends_on([prev.clone()]);
        }
        graph.add_agent(node);
        previous = Some(id.to_string());
    }
    graph
}

#[tokio::test]
async fn test_preflight_denial_is_side_effect_free() {
    common::init();

    let scheduler = common::base_scheduler();
    let graph = costed_graph(&[("a", 30.0), ("b", 40.0)]);

    let gate = Arc::new(FixedLimitBudget::new(50.0));
    let options = ExecuteOptions::new().with_budget(gate.clone());

    let err = scheduler.execute(&graph, &options).await.unwrap_err();
    assert!(matches!(err, ConductorError::BudgetDenied(_)));
    // Nothing was admitted, nothing was spent
    assert_eq!(gate.spent(), 0.0);
}

#[tokio::test]
async fn test_run_admitted_under_limit() {
    common::init();

    let scheduler = common::base_scheduler();
    let graph = costed_graph(&[("a", 10.0), ("b", 15.0)]);

    let options = ExecuteOptions::new().with_budget(Arc::new(FixedLimitBudget::new(100.0)));
    let ctx = scheduler.execute(&graph, &options).await.unwrap();

    assert_eq!(ctx.summary().status, RunStatus::Completed);
    assert_eq!(ctx.costs().estimated_total, 25.0);
}

#[tokio::test]
async fn test_budget_is_not_consulted_between_layers() {
    common::init();

    struct CountingGate {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl BudgetGate for CountingGate {
        async fn preflight_check(&self, _estimated_cost: f64) -> PreflightDecision {
            self.calls.fetch_add(1, Ordering::SeqCst);
            PreflightDecision::allow()
        }
    }

    let gate = Arc::new(CountingGate {
        calls: AtomicUsize::new(0),
    });

    let scheduler = common::base_scheduler();
    // Three layers, but admission control runs exactly once
    let graph = costed_graph(&[("a", 1.0), ("b", 1.0), ("c", 1.0)]);
    let options = ExecuteOptions::new().with_budget(gate.clone());

    scheduler.execute(&graph, &options).await.unwrap();
    assert_eq!(gate.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_resume_preflight_covers_remaining_nodes_only() {
    common::init();

    struct RecordingGate {
        seen: parking_lot::Mutex<Vec<f64>>,
    }

    #[async_trait::async_trait]
    impl BudgetGate for RecordingGate {
        async fn preflight_check(&self, estimated_cost: f64) -> PreflightDecision {
            self.seen.lock().push(estimated_cost);
            PreflightDecision::allow()
        }
    }

    let gate = Arc::new(RecordingGate {
        seen: parking_lot::Mutex::new(Vec::new()),
    });

    let mut graph = costed_graph(&[("a", 5.0), ("b", 7.0), ("c", 11.0)]);
    graph.nodes.get_mut("b").unwrap().checkpoint = true;

    let scheduler = common::base_scheduler();
    let options = ExecuteOptions::new().with_budget(gate.clone());

    let mut ctx = scheduler.execute(&graph, &options).await.unwrap();
    assert_eq!(ctx.summary().status, RunStatus::Paused);

    scheduler
        .resume(&graph, &mut ctx, true, None, &options)
        .await
        .unwrap();
    assert_eq!(ctx.summary().status, RunStatus::Completed);

    let seen = gate.seen.lock().clone();
    // Execute saw the whole workflow; resume saw only the pending node
    assert_eq!(seen, vec![23.0, 11.0]);
}

#[tokio::test]
async fn test_denied_resume_leaves_checkpoint_pending() {
    common::init();

    let mut graph = costed_graph(&[("a", 5.0), ("b", 50.0)]);
    graph.nodes.get_mut("a").unwrap().checkpoint = true;

    let scheduler = common::base_scheduler();
    let execute_options = ExecuteOptions::default();
    let mut ctx = scheduler.execute(&graph, &execute_options).await.unwrap();
    assert_eq!(ctx.summary().status, RunStatus::Paused);

    // The budget tightened while the run was paused
    let gate = Arc::new(FixedLimitBudget::new(100.0));
    gate.record_spend(80.0);
    let resume_options = ExecuteOptions::new().with_budget(gate);

    let err = scheduler
        .resume(&graph, &mut ctx, true, None, &resume_options)
        .await
        .unwrap_err();
    assert!(matches!(err, ConductorError::BudgetDenied(_)));

    // Denial mutated nothing: the checkpoint is still pending
    assert_eq!(ctx.summary().status, RunStatus::Paused);
    assert_eq!(ctx.summary().pending_checkpoint.as_deref(), Some("a"));

    // With a fresh allowance the same resume goes through
    let retry_options =
        ExecuteOptions::new().with_budget(Arc::new(FixedLimitBudget::new(100.0)));
    scheduler
        .resume(&graph, &mut ctx, true, None, &retry_options)
        .await
        .unwrap();
    assert_eq!(ctx.summary().status, RunStatus::Completed);
}

#[tokio::test]
async fn test_zero_cost_workflow_passes_any_gate() {
    common::init();

    let mut graph = WorkflowGraph::new("wf-free", "Free");
    graph.add_agent(AgentNode::new("a", "echo").with_static_input("v", 1));

    let scheduler = common::base_scheduler();
    let options = ExecuteOptions::new().with_budget(Arc::new(FixedLimitBudget::new(0.0)));
    let ctx = scheduler.execute(&graph, &options).await.unwrap();

    assert_eq!(ctx.summary().status, RunStatus::Completed);
}
