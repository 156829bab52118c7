//! Topological layering of workflow graphs
//!
//! Converts a validated graph into an ordered sequence of parallel-execution
//! groups. Nodes within a layer have no dependency relation among themselves
//! and are eligible to run concurrently; a node never appears before every
//! node it depends on.

use crate::error::ValidationIssue;
use crate::graph::{NodeId, WorkflowGraph};
use std::collections::HashMap;

/// Compute execution layers with a layered variant of Kahn's algorithm
///
/// Every round collects *all* nodes whose remaining in-degree is zero into
/// one layer, then removes the layer and decrements the in-degree of its
/// dependents. Draining whole waves rather than one node at a time maximizes
/// safe concurrency while preserving the dependency partial order.
///
/// Nodes within a layer are sorted by ID so the result does not depend on
/// map iteration order. Dangling dependency references are ignored here;
/// they are reported by structural validation.
///
/// Returns a [`ValidationIssue::CycleDetected`] naming the remaining nodes
/// when no progress can be made, rather than looping forever.
pub fn topological_layers(
    graph: &WorkflowGraph,
) -> std::result::Result<Vec<Vec<NodeId>>, ValidationIssue> {
    let mut in_degree: HashMap<&str, usize> = graph
        .nodes
        .keys()
        .map(|id| (id.as_str(), 0))
        .collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for node in graph.nodes.values() {
        for dep in &node.depends_on {
            if graph.nodes.contains_key(dep) {
                if let Some(degree) = in_degree.get_mut(node.id.as_str()) {
                    *degree += 1;
                }
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(node.id.as_str());
            }
        }
    }

    let mut layers: Vec<Vec<NodeId>> = Vec::new();

    while !in_degree.is_empty() {
        let mut ready: Vec<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();

        if ready.is_empty() {
            let mut remaining: Vec<String> =
                in_degree.keys().map(|id| id.to_string()).collect();
            remaining.sort();
            return Err(ValidationIssue::CycleDetected { nodes: remaining });
        }

        ready.sort_unstable();

        for id in &ready {
            in_degree.remove(*id);
            if let Some(children) = dependents.get(*id) {
                for child in children {
                    if let Some(degree) = in_degree.get_mut(*child) {
                        *degree -= 1;
                    }
                }
            }
        }

        layers.push(ready.into_iter().map(String::from).collect());
    }

    Ok(layers)
}
