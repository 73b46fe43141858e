//! Cycle elimination over the call graph.
//!
//! Repeatedly finds a cycle and removes exactly one of its edges until no
//! cycle remains. Edge selection:
//!
//! 1. never remove an edge into a force-inline target - that edge is the
//!    target's required inlining opportunity; if a cycle offers no other
//!    edge, forced inlining is unsatisfiable and compilation fails
//! 2. among the remaining candidates, prefer an edge whose source is not
//!    itself force-inline, keeping forced targets true leaves (zero
//!    callees) wherever topologically possible
//! 3. remaining ties resolve by discovery order: the back edge that closed
//!    the cycle is considered first
//!
//! Only rule 1 is semantically load-bearing; the rest keeps the result
//! deterministic.

use crate::{
    callgraph::CallGraphNode,
    model::SymbolTable,
    utils::graph::{algorithms, DirectedGraph, NodeId},
    Error, Result,
};

/// Breaks all cycles, returning the number of edges removed.
///
/// Idempotent: on an acyclic graph this removes nothing and returns 0.
///
/// # Errors
///
/// Returns [`Error::CyclicForceInlining`] for a cycle in which every edge
/// targets a force-inline method.
pub fn break_cycles(
    graph: &mut DirectedGraph<CallGraphNode>,
    symbols: &SymbolTable,
) -> Result<usize> {
    let mut removed = 0;

    while let Some(cycle) = algorithms::find_cycle(graph) {
        let edge = select_edge(graph, &cycle)
            .ok_or_else(|| cyclic_force_inlining_error(graph, symbols, &cycle))?;
        let did_remove = graph.remove_edge(edge.0, edge.1);
        debug_assert!(did_remove, "selected edge must exist");
        removed += 1;
    }

    Ok(removed)
}

/// Selects the edge to drop from a cycle, or `None` if every edge targets a
/// force-inline method.
fn select_edge(
    graph: &DirectedGraph<CallGraphNode>,
    cycle: &[NodeId],
) -> Option<(NodeId, NodeId)> {
    let is_forced = |id: NodeId| {
        graph
            .node(id)
            .is_some_and(CallGraphNode::is_force_inline)
    };

    // Discovery order: the back edge closing the cycle first, then the
    // path edges.
    let closing = (cycle[cycle.len() - 1], cycle[0]);
    let edges = std::iter::once(closing)
        .chain(cycle.windows(2).map(|w| (w[0], w[1])))
        .collect::<Vec<_>>();

    let removable: Vec<(NodeId, NodeId)> = edges
        .into_iter()
        .filter(|&(_, target)| !is_forced(target))
        .collect();

    removable
        .iter()
        .copied()
        .find(|&(source, _)| !is_forced(source))
        .or_else(|| removable.first().copied())
}

/// Renders the unsatisfiable cycle for the fatal diagnostic.
fn cyclic_force_inlining_error(
    graph: &DirectedGraph<CallGraphNode>,
    symbols: &SymbolTable,
    cycle: &[NodeId],
) -> Error {
    let rendered = cycle
        .iter()
        .filter_map(|&id| graph.node(id))
        .map(|node| symbols.display_method(node.method()))
        .collect::<Vec<_>>()
        .join(" -> ");
    Error::CyclicForceInlining { cycle: rendered }
}
