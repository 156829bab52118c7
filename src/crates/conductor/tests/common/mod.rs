//! Shared helpers for integration tests
#![allow(dead_code)]

use conductor::{AgentRegistration, AgentRegistry, Scheduler};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Install the tracing subscriber once for readable test logs
pub fn init() {
    tooling::logging::init();
}

/// Agent that returns its resolved inputs as the output object
pub fn echo() -> AgentRegistration {
    AgentRegistration::new("echo", "Echo", "Returns its inputs", |inputs, _options| async move {
        Ok(Value::Object(inputs))
    })
}

/// Agent that sleeps for `sleep_ms` (default 50) before answering
pub fn sleeper() -> AgentRegistration {
    AgentRegistration::new(
        "sleeper",
        "Sleeper",
        "Sleeps then answers",
        |inputs, _options| async move {
            let ms = inputs
                .get("sleep_ms")
                .and_then(|v| v.as_u64())
                .unwrap_or(50);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(json!({ "slept_ms": ms }))
        },
    )
}

/// Agent that always fails with the `message` input (default not retryable)
pub fn failing() -> AgentRegistration {
    AgentRegistration::new(
        "failing",
        "Failing",
        "Always errors",
        |inputs, _options| async move {
            let message = inputs
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("agent exploded")
                .to_string();
            Err(message.into())
        },
    )
}

/// Agent whose cost estimate is its `cost` input, doubled once it has run
pub fn costly() -> AgentRegistration {
    AgentRegistration::new(
        "costly",
        "Costly",
        "Bills its cost input",
        |inputs, _options| async move { Ok(Value::Object(inputs)) },
    )
    .with_cost_estimator(|inputs, output| {
        let base = inputs.get("cost").and_then(|v| v.as_f64()).unwrap_or(0.0);
        match output {
            Some(_) => base * 2.0,
            None => base,
        }
    })
}

/// Registry with the standard test agents registered
pub fn base_registry() -> AgentRegistry {
    let mut registry = AgentRegistry::new();
    registry.register(echo()).unwrap();
    registry.register(sleeper()).unwrap();
    registry.register(failing()).unwrap();
    registry.register(costly()).unwrap();
    registry
}

/// Scheduler over the standard test registry
pub fn base_scheduler() -> Scheduler {
    Scheduler::new(Arc::new(base_registry()))
}

/// Scheduler over a custom registry
pub fn scheduler_with(registry: AgentRegistry) -> Scheduler {
    Scheduler::new(Arc::new(registry))
}
