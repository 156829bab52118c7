//! Integration tests for concurrent layer dispatch, cancellation and timeouts

mod common;

use conductor::{
    AgentNode, CancelToken, ExecuteOptions, NodeErrorKind, NodeState, RetryPolicy, RunStatus,
    WorkflowGraph,
};
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_layer_siblings_run_concurrently() {
    common::init();

    let mut graph = WorkflowGraph::new("wf-par", "Parallel layer");
    for id in ["s1", "s2", "s3"] {
        graph.add_agent(AgentNode::new(id, "sleeper").with_static_input("sleep_ms", 100));
    }

    let scheduler = common::base_scheduler();
    let start = Instant::now();
    let ctx = scheduler
        .execute(&graph, &ExecuteOptions::default())
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert_eq!(ctx.summary().status, RunStatus::Completed);
    // Three 100ms sleeps in one layer finish together, not back to back
    assert!(elapsed >= Duration::from_millis(90), "too fast: {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(250), "too slow: {:?}", elapsed);
}

#[tokio::test]
async fn test_dependent_layers_run_sequentially() {
    common::init();

    let mut graph = WorkflowGraph::new("wf-seq", "Sequential layers");
    graph
        .add_agent(AgentNode::new("first", "sleeper").with_static_input("sleep_ms", 100))
        .add_agent(
            AgentNode::new("second", "sleeper")
                .depends_on(["first"])
                .with_static_input("sleep_ms", 100),
        );

    let scheduler = common::base_scheduler();
    let start = Instant::now();
    scheduler
        .execute(&graph, &ExecuteOptions::default())
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(190), "layers overlapped: {:?}", elapsed);
}

#[tokio::test]
async fn test_sibling_failure_does_not_cancel_survivor() {
    common::init();

    let mut graph = WorkflowGraph::new("wf-sibling-fail", "Sibling failure");
    graph
        .add_agent(AgentNode::new("slow_ok", "sleeper").with_static_input("sleep_ms", 100))
        .add_agent(AgentNode::new("fast_bad", "failing"));

    let scheduler = common::base_scheduler();
    let ctx = scheduler
        .execute(&graph, &ExecuteOptions::default())
        .await
        .unwrap();

    // Both siblings reached a terminal state; the failure did not cancel
    // the survivor
    assert_eq!(ctx.state("fast_bad"), Some(NodeState::Failed));
    assert_eq!(ctx.state("slow_ok"), Some(NodeState::Completed));
    assert_eq!(ctx.output("slow_ok").unwrap()["slept_ms"], 100);
}

#[tokio::test]
async fn test_cancellation_prevents_later_dispatch() {
    common::init();

    let cancel = CancelToken::new();
    let trigger = cancel.clone();

    let mut registry = common::base_registry();
    registry
        .register(conductor::AgentRegistration::new(
            "tripwire",
            "Tripwire",
            "Cancels the run from inside the first layer",
            move |_inputs, _options| {
                let trigger = trigger.clone();
                async move {
                    trigger.cancel();
                    Ok(serde_json::json!({"tripped": true}))
                }
            },
        ))
        .unwrap();

    let mut graph = WorkflowGraph::new("wf-cancel", "Cancelled");
    graph
        .add_agent(AgentNode::new("trip", "tripwire"))
        .add_agent(AgentNode::new("never", "echo").depends_on(["trip"]));

    let scheduler = common::scheduler_with(registry);
    let options = ExecuteOptions::new().with_cancel(cancel);
    let ctx = scheduler.execute(&graph, &options).await.unwrap();

    // The first layer finished normally; the second was killed before start
    assert_eq!(ctx.state("trip"), Some(NodeState::Completed));
    assert_eq!(ctx.state("never"), Some(NodeState::Failed));
    assert_eq!(ctx.error("never").unwrap().kind, NodeErrorKind::Killed);
    assert_eq!(ctx.summary().status, RunStatus::Failed);
}

#[tokio::test]
async fn test_cancellation_before_execute_denies_admission() {
    common::init();

    let cancel = CancelToken::new();
    cancel.cancel();

    let mut graph = WorkflowGraph::new("wf-dead", "Dead on arrival");
    graph
        .add_agent(AgentNode::new("a", "echo"))
        .add_agent(AgentNode::new("b", "echo"));

    let scheduler = common::base_scheduler();
    let options = ExecuteOptions::new().with_cancel(cancel);

    // An already-active token denies admission before any context exists
    let err = scheduler.execute(&graph, &options).await.unwrap_err();
    assert!(matches!(err, conductor::ConductorError::Cancelled(_)));
}

#[tokio::test]
async fn test_timeout_fails_the_node() {
    common::init();

    let mut graph = WorkflowGraph::new("wf-timeout", "Timeout");
    graph.add_agent(
        AgentNode::new("slow", "sleeper")
            .with_static_input("sleep_ms", 500)
            .with_timeout_ms(50)
            .with_retry(RetryPolicy::new(1)),
    );

    let scheduler = common::base_scheduler();
    let start = Instant::now();
    let ctx = scheduler
        .execute(&graph, &ExecuteOptions::default())
        .await
        .unwrap();

    assert!(start.elapsed() < Duration::from_millis(400));
    assert_eq!(ctx.state("slow"), Some(NodeState::Failed));

    let error = ctx.error("slow").unwrap();
    assert_eq!(error.kind, NodeErrorKind::Timeout);
    assert!(error.message.contains("timed out"));
}

#[tokio::test]
async fn test_workflow_default_timeout_applies_per_node() {
    common::init();

    let mut graph = WorkflowGraph::new("wf-default-timeout", "Default timeout")
        .with_default_timeout_ms(50)
        .with_default_retry(RetryPolicy::new(1));
    graph
        .add_agent(AgentNode::new("fast", "sleeper").with_static_input("sleep_ms", 10))
        .add_agent(AgentNode::new("slow", "sleeper").with_static_input("sleep_ms", 500));

    let scheduler = common::base_scheduler();
    let ctx = scheduler
        .execute(&graph, &ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(ctx.state("fast"), Some(NodeState::Completed));
    assert_eq!(ctx.error("slow").unwrap().kind, NodeErrorKind::Timeout);
}
