//! Workflow graph data structures
//!
//! A [`WorkflowGraph`] is an immutable-after-validation description of agent
//! slots ([`AgentNode`]) and the dependency edges between them. Graphs are
//! built once and may back many concurrent runs; all per-run state lives in
//! [`ExecutionContext`](crate::context::ExecutionContext).
//!
//! Validation collects every problem (missing dependency references, missing
//! binding sources, cycles) before reporting, so a workflow definition can be
//! fixed in one pass.

use crate::context::ExecutionContext;
use crate::error::{ConductorError, Result, ValidationIssue};
use crate::layers::topological_layers;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tooling::RetryPolicy;

/// Node identifier - unique name for each agent slot in the workflow
pub type NodeId = String;

/// JSON object used for agent inputs, outputs and metadata
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Predicate over the run state, evaluated at dispatch time
///
/// When the predicate returns false the node is marked skipped without
/// running. Conditions are plain closures and do not survive serialization.
pub type NodeCondition = Arc<dyn Fn(&ExecutionContext) -> bool + Send + Sync>;

/// Default per-node timeout when neither the node nor the workflow sets one
pub const DEFAULT_TIMEOUT_MS: u64 = 300_000;

/// Pulls a value out of a dependency's output once that dependency completes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputBinding {
    /// Node whose output supplies the value
    pub source: NodeId,

    /// Sub-field of the source output to bind; the whole output when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_key: Option<String>,
}

impl InputBinding {
    /// Bind the whole output object of `source`
    pub fn whole(source: impl Into<NodeId>) -> Self {
        Self {
            source: source.into(),
            output_key: None,
        }
    }

    /// Bind a named sub-field of the output of `source`
    pub fn key(source: impl Into<NodeId>, output_key: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            output_key: Some(output_key.into()),
        }
    }
}

/// One agent slot in the workflow graph
#[derive(Clone)]
pub struct AgentNode {
    /// Unique identifier within the workflow
    pub id: NodeId,

    /// Key into the agent registry
    pub agent_type: String,

    /// IDs of nodes that must reach a pass state before this one runs
    pub depends_on: Vec<NodeId>,

    /// Inputs supplied at graph-build time
    pub static_inputs: JsonMap,

    /// Input key -> binding into a dependency's output
    pub input_bindings: HashMap<String, InputBinding>,

    /// Optional dispatch-time predicate; false marks the node skipped
    pub condition: Option<NodeCondition>,

    /// Pause the whole run immediately after this node completes
    pub checkpoint: bool,

    /// Per-node timeout override in milliseconds
    pub timeout_ms: Option<u64>,

    /// Per-node retry override
    pub retry: Option<RetryPolicy>,
}

impl AgentNode {
    /// Create a new node for the given agent type
    pub fn new(id: impl Into<NodeId>, agent_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent_type: agent_type.into(),
            depends_on: Vec::new(),
            static_inputs: JsonMap::new(),
            input_bindings: HashMap::new(),
            condition: None,
            checkpoint: false,
            timeout_ms: None,
            retry: None,
        }
    }

    /// Declare the nodes this one depends on
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Supply a static input value
    pub fn with_static_input(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.static_inputs.insert(key.into(), value.into());
        self
    }

    /// Bind an input to the whole output of a dependency
    pub fn bind_input(mut self, key: impl Into<String>, source: impl Into<NodeId>) -> Self {
        self.input_bindings
            .insert(key.into(), InputBinding::whole(source));
        self
    }

    /// Bind an input to a named sub-field of a dependency's output
    pub fn bind_input_key(
        mut self,
        key: impl Into<String>,
        source: impl Into<NodeId>,
        output_key: impl Into<String>,
    ) -> Self {
        self.input_bindings
            .insert(key.into(), InputBinding::key(source, output_key));
        self
    }

    /// Attach a dispatch-time condition
    pub fn with_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&ExecutionContext) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    /// Mark this node as a human-in-the-loop checkpoint
    pub fn with_checkpoint(mut self, checkpoint: bool) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    /// Override the workflow-level timeout for this node
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Override the workflow-level retry policy for this node
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }
}

impl std::fmt::Debug for AgentNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentNode")
            .field("id", &self.id)
            .field("agent_type", &self.agent_type)
            .field("depends_on", &self.depends_on)
            .field("static_inputs", &self.static_inputs)
            .field("input_bindings", &self.input_bindings)
            .field("condition", &self.condition.as_ref().map(|_| "<function>"))
            .field("checkpoint", &self.checkpoint)
            .field("timeout_ms", &self.timeout_ms)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Immutable-after-validation workflow description
///
/// A mapping from node ID to [`AgentNode`] plus workflow-level metadata and
/// defaults. The same graph can back many concurrent runs.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    /// Workflow identifier
    pub id: String,

    /// Human-readable workflow name
    pub name: String,

    /// Definition version, carried through serialization
    pub version: String,

    /// All agent slots keyed by node ID
    pub nodes: HashMap<NodeId, AgentNode>,

    /// Workflow-level default timeout in milliseconds
    pub default_timeout_ms: u64,

    /// Workflow-level default retry policy
    pub default_retry: RetryPolicy,

    /// Free-form workflow metadata
    pub metadata: JsonMap,
}

impl WorkflowGraph {
    /// Create an empty workflow graph
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: "1".to_string(),
            nodes: HashMap::new(),
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            default_retry: RetryPolicy::default(),
            metadata: JsonMap::new(),
        }
    }

    /// Set the definition version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Set the workflow-level default timeout
    pub fn with_default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    /// Set the workflow-level default retry policy
    pub fn with_default_retry(mut self, retry: RetryPolicy) -> Self {
        self.default_retry = retry;
        self
    }

    /// Attach a metadata entry
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Add an agent slot to the workflow
    pub fn add_agent(&mut self, node: AgentNode) -> &mut Self {
        self.nodes.insert(node.id.clone(), node);
        self
    }

    /// Collect structural problems: dangling dependency and binding references
    ///
    /// Nodes are visited in ID order so the issue list is deterministic.
    pub fn structural_issues(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        let mut ids: Vec<&NodeId> = self.nodes.keys().collect();
        ids.sort();

        for id in ids {
            let node = &self.nodes[id];

            for dep in &node.depends_on {
                if !self.nodes.contains_key(dep) {
                    issues.push(ValidationIssue::MissingDependency {
                        node: id.clone(),
                        depends_on: dep.clone(),
                    });
                }
            }

            let mut inputs: Vec<&String> = node.input_bindings.keys().collect();
            inputs.sort();
            for input in inputs {
                let binding = &node.input_bindings[input];
                if !self.nodes.contains_key(&binding.source) {
                    issues.push(ValidationIssue::MissingBindingSource {
                        node: id.clone(),
                        input: input.clone(),
                        source: binding.source.clone(),
                    });
                }
            }
        }

        issues
    }

    /// Validate the graph structure
    ///
    /// Collects every missing-reference issue and the cycle check into a
    /// single [`ConductorError::Validation`] rather than stopping at the
    /// first problem.
    pub fn validate(&self) -> Result<()> {
        let mut issues = self.structural_issues();

        if let Err(cycle) = topological_layers(self) {
            issues.push(cycle);
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConductorError::validation(issues))
        }
    }

    /// Convert to the plain-data serialization form
    ///
    /// Condition closures are not serializable and are dropped; callers
    /// re-attach them after deserialization if needed.
    pub fn to_spec(&self) -> WorkflowSpec {
        let agents = self
            .nodes
            .values()
            .map(|node| {
                (
                    node.id.clone(),
                    AgentSpec {
                        agent_type: node.agent_type.clone(),
                        depends_on: node.depends_on.clone(),
                        inputs: node.static_inputs.clone(),
                        input_map: node.input_bindings.clone(),
                        options: AgentSpecOptions {
                            timeout_ms: node.timeout_ms,
                            retry: node.retry.clone(),
                        },
                        checkpoint: node.checkpoint,
                    },
                )
            })
            .collect();

        WorkflowSpec {
            id: self.id.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
            agents,
            default_timeout_ms: self.default_timeout_ms,
            default_retry: self.default_retry.clone(),
            metadata: self.metadata.clone(),
        }
    }

    /// Reconstruct a graph from its plain-data form
    pub fn from_spec(spec: WorkflowSpec) -> Self {
        let mut graph = WorkflowGraph::new(spec.id, spec.name)
            .with_version(spec.version)
            .with_default_timeout_ms(spec.default_timeout_ms)
            .with_default_retry(spec.default_retry);
        graph.metadata = spec.metadata;

        for (id, agent) in spec.agents {
            graph.add_agent(AgentNode {
                id,
                agent_type: agent.agent_type,
                depends_on: agent.depends_on,
                static_inputs: agent.inputs,
                input_bindings: agent.input_map,
                condition: None,
                checkpoint: agent.checkpoint,
                timeout_ms: agent.options.timeout_ms,
                retry: agent.options.retry,
            });
        }

        graph
    }

    /// Serialize the graph definition to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_spec())?)
    }

    /// Load a graph definition from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let spec: WorkflowSpec = serde_json::from_str(json)?;
        Ok(Self::from_spec(spec))
    }

    /// Serialize the graph definition to YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.to_spec())?)
    }

    /// Load a graph definition from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let spec: WorkflowSpec = serde_yaml::from_str(yaml)?;
        Ok(Self::from_spec(spec))
    }
}

/// Plain-data form of a workflow definition
///
/// Sufficient to reconstruct an equivalent graph; condition closures are
/// excluded and must be re-attached by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub id: String,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub agents: HashMap<NodeId, AgentSpec>,
    #[serde(default = "default_timeout")]
    pub default_timeout_ms: u64,
    #[serde(default)]
    pub default_retry: RetryPolicy,
    #[serde(default)]
    pub metadata: JsonMap,
}

/// Plain-data form of one agent slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub agent_type: String,
    #[serde(default)]
    pub depends_on: Vec<NodeId>,
    #[serde(default)]
    pub inputs: JsonMap,
    #[serde(default)]
    pub input_map: HashMap<String, InputBinding>,
    #[serde(default)]
    pub options: AgentSpecOptions,
    #[serde(default)]
    pub checkpoint: bool,
}

/// Per-node option overrides in the plain-data form
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentSpecOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

fn default_version() -> String {
    "1".to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_MS
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn diamond() -> WorkflowGraph {
        let mut graph = WorkflowGraph::new("wf-1", "diamond");
        graph
            .add_agent(AgentNode::new("a", "noop"))
            .add_agent(AgentNode::new("b", "noop").depends_on(["a"]))
            .add_agent(AgentNode::new("c", "noop").depends_on(["a"]))
            .add_agent(AgentNode::new("d", "noop").depends_on(["b", "c"]));
        graph
    }

    #[test]
    fn test_graph_builder() {
        let graph = diamond();
        assert_eq!(graph.nodes.len(), 4);
        assert_eq!(graph.version, "1");
        assert_eq!(graph.default_timeout_ms, DEFAULT_TIMEOUT_MS);
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_node_builder() {
        let node = AgentNode::new("score", "lead_scorer")
            .depends_on(["fetch"])
            .with_static_input("threshold", 80)
            .bind_input_key("leads", "fetch", "records")
            .with_checkpoint(true)
            .with_timeout_ms(5_000);

        assert_eq!(node.agent_type, "lead_scorer");
        assert_eq!(node.depends_on, vec!["fetch".to_string()]);
        assert_eq!(node.static_inputs["threshold"], json!(80));
        assert_eq!(
            node.input_bindings["leads"],
            InputBinding::key("fetch", "records")
        );
        assert!(node.checkpoint);
        assert_eq!(node.timeout_ms, Some(5_000));
    }

    #[test]
    fn test_validation_collects_all_issues() {
        let mut graph = WorkflowGraph::new("wf-2", "broken");
        graph
            .add_agent(AgentNode::new("a", "noop").depends_on(["ghost"]))
            .add_agent(AgentNode::new("b", "noop").bind_input("data", "phantom"));

        let err = graph.validate().unwrap_err();
        let issues = err.validation_issues().unwrap();

        assert_eq!(issues.len(), 2);
        assert!(issues.contains(&ValidationIssue::MissingDependency {
            node: "a".to_string(),
            depends_on: "ghost".to_string(),
        }));
        assert!(issues.contains(&ValidationIssue::MissingBindingSource {
            node: "b".to_string(),
            input: "data".to_string(),
            source: "phantom".to_string(),
        }));
    }

    #[test]
    fn test_validation_detects_cycle() {
        let mut graph = WorkflowGraph::new("wf-3", "cyclic");
        graph
            .add_agent(AgentNode::new("a", "noop").depends_on(["b"]))
            .add_agent(AgentNode::new("b", "noop").depends_on(["a"]));

        let err = graph.validate().unwrap_err();
        let issues = err.validation_issues().unwrap();
        assert!(issues
            .iter()
            .any(|i| matches!(i, ValidationIssue::CycleDetected { .. })));
    }

    #[test]
    fn test_spec_round_trip_json() {
        let mut graph = diamond();
        graph.nodes.get_mut("d").unwrap().retry =
            Some(RetryPolicy::new(5).with_initial_interval(0.1));

        let json = graph.to_json().unwrap();
        let restored = WorkflowGraph::from_json(&json).unwrap();

        assert_eq!(restored.id, graph.id);
        assert_eq!(restored.nodes.len(), 4);
        assert_eq!(restored.nodes["d"].depends_on.len(), 2);
        assert_eq!(restored.nodes["d"].retry.as_ref().unwrap().max_attempts, 5);
        assert!(restored.validate().is_ok());
    }

    #[test]
    fn test_spec_round_trip_yaml() {
        let graph = diamond();
        let yaml = graph.to_yaml().unwrap();
        let restored = WorkflowGraph::from_yaml(&yaml).unwrap();

        assert_eq!(restored.name, "diamond");
        assert_eq!(restored.nodes["b"].depends_on, vec!["a".to_string()]);
    }

    #[test]
    fn test_condition_is_not_serialized() {
        let mut graph = WorkflowGraph::new("wf-4", "conditional");
        graph.add_agent(AgentNode::new("gate", "noop").with_condition(|_| false));

        let json = graph.to_json().unwrap();
        let restored = WorkflowGraph::from_json(&json).unwrap();
        assert!(restored.nodes["gate"].condition.is_none());
    }

    #[test]
    fn test_minimal_spec_defaults() {
        let json = r#"{
            "id": "wf-5",
            "name": "minimal",
            "agents": {
                "only": {"agent_type": "noop"}
            }
        }"#;

        let graph = WorkflowGraph::from_json(json).unwrap();
        assert_eq!(graph.version, "1");
        assert_eq!(graph.default_timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(graph.default_retry.max_attempts, 3);
        assert!(!graph.nodes["only"].checkpoint);
    }
}
