//! Topological levelization with Kahn's algorithm.

use indexmap::{IndexMap, IndexSet};
use pretvm_core::Environment;
use serde::Serialize;

use crate::dag::{DependencyGraph, NodeKey};
use crate::error::GraphError;

/// Level assignment over the instantaneous edges of a graph.
///
/// Every instantaneous edge `a -> b` satisfies `level(a) < level(b)`, and
/// nodes within a level are sorted by key.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Levelization {
    pub levels: Vec<Vec<NodeKey>>,
    level_of: IndexMap<NodeKey, usize>,
}

impl Levelization {
    pub fn level(&self, node: NodeKey) -> Option<usize> {
        self.level_of.get(&node).copied()
    }

    /// All nodes in (level, key) order.
    pub fn order(&self) -> impl Iterator<Item = NodeKey> + '_ {
        self.levels.iter().flatten().copied()
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn len(&self) -> usize {
        self.level_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.level_of.is_empty()
    }
}

/// Compute levels, or report every reaction caught in a zero-delay cycle.
pub fn levelize(graph: &DependencyGraph, env: &Environment) -> Result<Levelization, GraphError> {
    let mut in_degree: IndexMap<NodeKey, usize> = graph.nodes.iter().map(|n| (*n, 0)).collect();
    for edge in graph.instantaneous_edges() {
        *in_degree.entry(edge.to).or_default() += 1;
    }

    let mut result = Levelization::default();
    let mut current: Vec<NodeKey> = graph
        .nodes
        .iter()
        .copied()
        .filter(|n| in_degree.get(n).copied() == Some(0))
        .collect();

    while !current.is_empty() {
        // Sort for determinism
        current.sort();
        let level = result.levels.len();
        let mut next = Vec::new();
        for node in &current {
            result.level_of.insert(*node, level);
            for succ in graph.successors(*node) {
                if let Some(degree) = in_degree.get_mut(&succ) {
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(succ);
                    }
                }
            }
        }
        result.levels.push(current);
        current = next;
    }

    let mut nodes: Vec<NodeKey> = graph.self_loops().collect();
    if result.level_of.len() != graph.nodes.len() {
        nodes.extend(cycle_members(graph, &result));
    }
    if !nodes.is_empty() {
        nodes.sort();
        nodes.dedup();
        let reactions = nodes
            .iter()
            .filter_map(|n| n.reaction())
            .map(|r| env.reaction(r).full_name.clone())
            .collect();
        return Err(GraphError::Cycle { reactions, nodes });
    }

    tracing::debug!(levels = result.depth(), nodes = result.len(), "Levelized dependency graph");
    Ok(result)
}

/// Nodes left after Kahn's algorithm that can also reach a cycle: trim the
/// residual graph from the sink side until only cycle members and the paths
/// between cycles remain.
fn cycle_members(graph: &DependencyGraph, levelized: &Levelization) -> Vec<NodeKey> {
    let mut residual: IndexSet<NodeKey> = graph
        .nodes
        .iter()
        .copied()
        .filter(|n| levelized.level(*n).is_none())
        .collect();

    loop {
        let sinks: Vec<NodeKey> = residual
            .iter()
            .copied()
            .filter(|n| !graph.successors(*n).any(|s| residual.contains(&s)))
            .collect();
        if sinks.is_empty() {
            break;
        }
        for s in sinks {
            residual.shift_remove(&s);
        }
    }

    let mut nodes: Vec<NodeKey> = residual.into_iter().collect();
    nodes.sort();
    nodes
}
