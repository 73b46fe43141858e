//! Call graph construction and queries.

use std::collections::HashMap;

use crate::{
    bytecode::Op,
    callgraph::{cycles, CallGraphNode, CallSite},
    ir::IrFunction,
    model::{Application, MethodId},
    utils::graph::{algorithms, DirectedGraph, NodeId},
    Error, Result,
};

/// The inter-procedural call graph of one compilation.
///
/// Built in two passes over the compiled methods' IR: first a node per
/// method, then an edge per invoke whose target resolves to another
/// in-program method with code. Edges to library methods and codeless
/// methods are not represented; nothing orders them.
///
/// # Example
///
/// ```rust,ignore
/// let mut graph = CallGraph::build(&app, functions.iter());
/// let removed = graph.break_cycles(app.symbols())?;
/// for method in graph.reverse_topological() {
///     // callees first
/// }
/// ```
#[derive(Debug, Default)]
pub struct CallGraph {
    graph: DirectedGraph<CallGraphNode>,
    method_to_node: HashMap<MethodId, NodeId>,
}

impl CallGraph {
    /// Creates an empty call graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the call graph from the program's IR functions.
    ///
    /// Force-inline marks are taken from the corresponding
    /// [`ProgramMethod`](crate::model::ProgramMethod)s. Virtual/interface
    /// invoke targets are resolved against the static receiver type; an
    /// unresolved or out-of-program target simply contributes no edge (the
    /// always-throwing desugaring deals with genuinely broken targets).
    pub fn build<'a>(
        app: &Application,
        functions: impl Iterator<Item = &'a IrFunction> + Clone,
    ) -> Self {
        let symbols = app.symbols();
        let mut graph = DirectedGraph::new();
        let mut method_to_node = HashMap::new();

        // First pass: one node per compiled method.
        for func in functions.clone() {
            let method = func.method();
            let mut node = CallGraphNode::new(method);
            if app
                .program_method(method)
                .is_some_and(|m| m.force_inline)
            {
                node.mark_force_inline();
            }
            let id = graph.add_node(node);
            method_to_node.insert(method, id);
        }

        // Second pass: edges from invoke instructions.
        for func in functions {
            let caller = method_to_node[&func.method()];
            for instr in func.all_instructions() {
                let Op::Invoke { kind, target } = *instr.op() else {
                    continue;
                };
                if let Some(node) = graph.node_mut(caller) {
                    node.add_call_site(CallSite {
                        instr: instr.id(),
                        kind,
                        target,
                    });
                }
                let data = symbols.method(target);
                let resolved = app
                    .resolve_method(data.holder, data.proto)
                    .method()
                    .unwrap_or(target);
                if let Some(&callee) = method_to_node.get(&resolved) {
                    if callee != caller {
                        graph.add_edge(caller, callee);
                    }
                }
            }
        }

        Self {
            graph,
            method_to_node,
        }
    }

    /// The node handle of a method, if it is in the graph.
    fn node_id(&self, method: MethodId) -> Option<NodeId> {
        self.method_to_node.get(&method).copied()
    }

    /// The node payload of a method.
    #[must_use]
    pub fn node(&self, method: MethodId) -> Option<&CallGraphNode> {
        self.node_id(method).and_then(|id| self.graph.node(id))
    }

    /// Marks a method force-inline (normally taken from the program model;
    /// exposed for tests and late synthesis).
    pub fn mark_force_inline(&mut self, method: MethodId) {
        if let Some(id) = self.node_id(method) {
            if let Some(node) = self.graph.node_mut(id) {
                node.mark_force_inline();
            }
        }
    }

    /// Adds a node for a method (idempotent).
    pub fn add_method(&mut self, method: MethodId) {
        self.ensure_node(method);
    }

    fn ensure_node(&mut self, method: MethodId) -> NodeId {
        if let Some(id) = self.node_id(method) {
            return id;
        }
        let id = self.graph.add_node(CallGraphNode::new(method));
        self.method_to_node.insert(method, id);
        id
    }

    /// Adds a call edge between two methods (both added if missing).
    pub fn add_callee(&mut self, caller: MethodId, callee: MethodId) {
        let from = self.ensure_node(caller);
        let to = self.ensure_node(callee);
        self.graph.add_edge(from, to);
    }

    /// Returns `true` if the method has no callees left in the graph.
    #[must_use]
    pub fn is_leaf(&self, method: MethodId) -> bool {
        self.node_id(method)
            .is_some_and(|id| self.graph.out_degree(id) == 0)
    }

    /// The remaining callees of a method.
    #[must_use]
    pub fn callees(&self, method: MethodId) -> Vec<MethodId> {
        self.node_id(method)
            .map(|id| {
                self.graph
                    .successors(id)
                    .filter_map(|s| self.graph.node(s))
                    .map(CallGraphNode::method)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The callers of a method.
    #[must_use]
    pub fn callers(&self, method: MethodId) -> Vec<MethodId> {
        self.node_id(method)
            .map(|id| {
                self.graph
                    .predecessors(id)
                    .filter_map(|p| self.graph.node(p))
                    .map(CallGraphNode::method)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of methods in the graph.
    #[must_use]
    pub fn method_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of call edges in the graph.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Breaks every cycle by removing one edge per discovered cycle.
    ///
    /// See [`crate::callgraph`] for the edge-selection policy. Idempotent:
    /// once the graph is acyclic, further calls remove nothing and return 0.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CyclicForceInlining`] for a cycle whose every edge
    /// targets a force-inline method.
    pub fn break_cycles(&mut self, symbols: &crate::model::SymbolTable) -> Result<usize> {
        cycles::break_cycles(&mut self.graph, symbols)
    }

    /// Methods in reverse-topological (callees-first) order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GraphError`] if the graph still contains a cycle;
    /// call [`CallGraph::break_cycles`] first.
    pub fn reverse_topological(&self) -> Result<Vec<MethodId>> {
        let order = algorithms::topological_sort(&self.graph)
            .ok_or_else(|| Error::GraphError("call graph contains a cycle".to_string()))?;
        Ok(order
            .into_iter()
            .rev()
            .filter_map(|id| self.graph.node(id))
            .map(CallGraphNode::method)
            .collect())
    }

    /// Groups methods into parallel waves honoring forced-inline ordering.
    ///
    /// Wave `i` contains methods whose force-inline callees all sit in
    /// waves `< i`; methods in one wave may be processed concurrently.
    /// Ordinary call edges impose no wave constraint (non-forced inlining
    /// is advisory).
    ///
    /// # Errors
    ///
    /// Returns [`Error::GraphError`] if the graph still contains a cycle.
    pub fn processing_waves(&self) -> Result<Vec<Vec<MethodId>>> {
        let order = self.reverse_topological()?;
        let mut level: HashMap<MethodId, usize> = HashMap::new();
        let mut waves: Vec<Vec<MethodId>> = Vec::new();

        for method in order {
            let wave = self
                .callees(method)
                .into_iter()
                .filter(|callee| {
                    self.node(*callee)
                        .is_some_and(CallGraphNode::is_force_inline)
                })
                .map(|callee| level.get(&callee).copied().unwrap_or(0) + 1)
                .max()
                .unwrap_or(0);
            level.insert(method, wave);
            if waves.len() <= wave {
                waves.resize_with(wave + 1, Vec::new);
            }
            waves[wave].push(method);
        }
        Ok(waves)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SymbolTable;

    fn methods(symbols: &SymbolTable, count: usize) -> Vec<MethodId> {
        let holder = symbols.object_type("com/example/Graph");
        (0..count)
            .map(|i| {
                let proto = symbols.intern_proto(&format!("m{i}"), vec![], symbols.void());
                symbols.intern_method(holder, proto)
            })
            .collect()
    }

    #[test]
    fn test_two_node_cycle_with_force_inline_target() {
        let symbols = SymbolTable::new();
        let m = methods(&symbols, 2);
        let (a, b) = (m[0], m[1]);

        let mut graph = CallGraph::new();
        graph.add_callee(a, b);
        graph.add_callee(b, a);
        graph.mark_force_inline(b);

        let removed = graph.break_cycles(&symbols).unwrap();
        assert_eq!(removed, 1);
        assert!(graph.is_leaf(b), "the force-inline target must become a leaf");
        assert!(!graph.is_leaf(a));
        assert_eq!(graph.callers(b), vec![a], "the inlining edge must survive");
    }

    #[test]
    fn test_three_cycle_with_chord() {
        let symbols = SymbolTable::new();
        let m = methods(&symbols, 3);
        let (n1, n2, n3) = (m[0], m[1], m[2]);

        let mut graph = CallGraph::new();
        graph.add_callee(n1, n2);
        graph.add_callee(n2, n3);
        graph.add_callee(n3, n1);
        graph.add_callee(n2, n1);

        let removed = graph.break_cycles(&symbols).unwrap();
        assert_eq!(removed, 2, "both the 2-cycle and the 3-cycle must break");
        assert_eq!(graph.break_cycles(&symbols).unwrap(), 0, "idempotent");
    }

    #[test]
    fn test_all_force_inline_cycle_is_an_error() {
        let symbols = SymbolTable::new();
        let m = methods(&symbols, 2);

        let mut graph = CallGraph::new();
        graph.add_callee(m[0], m[1]);
        graph.add_callee(m[1], m[0]);
        graph.mark_force_inline(m[0]);
        graph.mark_force_inline(m[1]);

        let err = graph.break_cycles(&symbols).unwrap_err();
        assert!(matches!(err, Error::CyclicForceInlining { .. }));
    }

    #[test]
    fn test_reverse_topological_is_callees_first() {
        let symbols = SymbolTable::new();
        let m = methods(&symbols, 3);

        let mut graph = CallGraph::new();
        graph.add_callee(m[0], m[1]);
        graph.add_callee(m[1], m[2]);

        let order = graph.reverse_topological().unwrap();
        let pos = |x: MethodId| order.iter().position(|&y| y == x).unwrap();
        assert!(pos(m[2]) < pos(m[1]));
        assert!(pos(m[1]) < pos(m[0]));
    }

    #[test]
    fn test_processing_waves_respect_forced_edges_only() {
        let symbols = SymbolTable::new();
        let m = methods(&symbols, 3);

        // m0 calls m1 (forced) and m2 (ordinary).
        let mut graph = CallGraph::new();
        graph.add_callee(m[0], m[1]);
        graph.add_callee(m[0], m[2]);
        graph.mark_force_inline(m[1]);

        let waves = graph.processing_waves().unwrap();
        assert_eq!(waves.len(), 2);
        assert!(waves[0].contains(&m[1]));
        assert!(waves[0].contains(&m[2]), "ordinary callee needs no earlier wave");
        assert!(waves[1].contains(&m[0]));
    }

    #[test]
    fn test_self_loop_removed_quietly() {
        let symbols = SymbolTable::new();
        let m = methods(&symbols, 1);

        let mut graph = CallGraph::new();
        graph.add_callee(m[0], m[0]);

        // A recursive method is its own caller; the self edge is dropped
        // (recursion cannot be force-inlined and needs no ordering).
        let removed = graph.break_cycles(&symbols).unwrap();
        assert_eq!(removed, 1);
        assert!(graph.is_leaf(m[0]));
    }
}
