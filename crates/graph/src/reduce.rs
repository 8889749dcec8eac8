use indexmap::IndexSet;

use crate::dag::DependencyGraph;

/// Drop instantaneous edges already implied by a longer path.
///
/// Orderings are transitive, so the pruned graph admits exactly the same
/// schedules while producing fewer synchronization points. Must run on an
/// acyclic graph. Returns the number of edges removed.
pub fn prune_redundant_edges(graph: &mut DependencyGraph) -> usize {
    let mut drop: IndexSet<usize> = IndexSet::new();
    for (i, edge) in graph.edges.iter().enumerate() {
        if edge.instantaneous && graph.reachable_without(edge.from, edge.to, i) {
            drop.insert(i);
        }
    }
    if !drop.is_empty() {
        graph.remove_edges(&drop);
    }
    tracing::debug!(removed = drop.len(), "Pruned redundant edges");
    drop.len()
}
