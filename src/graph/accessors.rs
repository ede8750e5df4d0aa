//! Advanced graph accessor methods
//!
//! Neighbourhood queries, topological ordering and diagnostic dumps.

use std::collections::VecDeque;
use std::fmt::Write;

use rustc_hash::FxHashMap;

use crate::error::{EngineResult, FusionError};

use super::context::ComputeGraph;
use super::node::{InPort, NodeId, OpPattern, OutPort};

impl ComputeGraph {
    // ========================================================================
    // Neighbourhood
    // ========================================================================

    /// Producer feeding an input port
    pub fn producer_of(&self, dst: InPort) -> Option<OutPort> {
        self.node(dst.node)
            .and_then(|n| n.inputs.get(dst.index).copied().flatten())
    }

    /// Distinct data successors, in port then consumer order
    pub fn data_successors(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        if let Some(node) = self.node(id) {
            for index in 0..node.output_count {
                for dst in self.consumers_of(OutPort::new(id, index)) {
                    if !result.contains(&dst.node) {
                        result.push(dst.node);
                    }
                }
            }
        }
        result
    }

    /// Distinct data predecessors, in input port order
    pub fn data_predecessors(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        if let Some(node) = self.node(id) {
            for src in node.inputs.iter().flatten() {
                if !result.contains(&src.node) {
                    result.push(src.node);
                }
            }
        }
        result
    }

    /// Data and control successors
    pub fn all_successors(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = self.data_successors(id);
        if let Some(node) = self.node(id) {
            for dst in &node.control_out {
                if !result.contains(dst) {
                    result.push(*dst);
                }
            }
        }
        result
    }

    /// Data and control predecessors
    pub fn all_predecessors(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = self.data_predecessors(id);
        if let Some(node) = self.node(id) {
            for src in &node.control_in {
                if !result.contains(src) {
                    result.push(*src);
                }
            }
        }
        result
    }

    /// Largest number of consumers on any single output port
    pub fn max_port_fanout(&self, id: NodeId) -> usize {
        self.node(id)
            .map(|node| {
                (0..node.output_count)
                    .map(|i| self.consumers_of(OutPort::new(id, i)).len())
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }

    /// Check if `consumer` reads any output of `producer`
    pub fn are_adjacent(&self, producer: NodeId, consumer: NodeId) -> bool {
        self.data_successors(producer).contains(&consumer)
    }

    // ========================================================================
    // Lookup helpers
    // ========================================================================

    /// Find nodes by op type
    pub fn find_nodes_by_type(&self, op_type: &str) -> Vec<NodeId> {
        self.nodes()
            .filter(|n| n.op_type == op_type)
            .map(|n| n.id)
            .collect()
    }

    /// Find nodes by op-pattern tag
    pub fn find_nodes_by_pattern(&self, pattern: &OpPattern) -> Vec<NodeId> {
        self.nodes()
            .filter(|n| &n.pattern == pattern)
            .map(|n| n.id)
            .collect()
    }

    // ========================================================================
    // Ordering
    // ========================================================================

    /// Topological order over data and control edges
    ///
    /// Ties are broken by insertion order, so the result is deterministic.
    /// Fails with [`FusionError::GraphCycle`] if the graph has a cycle.
    pub fn topological_sort(&self) -> EngineResult<Vec<NodeId>> {
        let mut in_degree: FxHashMap<NodeId, usize> = self
            .nodes()
            .map(|n| (n.id, self.all_predecessors(n.id).len()))
            .collect();

        let mut ready: VecDeque<NodeId> = self
            .nodes()
            .filter(|n| in_degree[&n.id] == 0)
            .map(|n| n.id)
            .collect();

        let mut order = Vec::with_capacity(self.node_count());
        while let Some(id) = ready.pop_front() {
            order.push(id);
            for next in self.all_successors(id) {
                if let Some(d) = in_degree.get_mut(&next) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push_back(next);
                    }
                }
            }
        }

        if order.len() != self.node_count() {
            return Err(FusionError::GraphCycle(self.name().to_string()));
        }
        Ok(order)
    }

    /// Check if the graph is free of cycles
    pub fn is_acyclic(&self) -> bool {
        self.topological_sort().is_ok()
    }

    /// Human-readable dump used in cycle diagnostics
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "graph {} ({} nodes)", self.name(), self.node_count());
        for node in self.nodes() {
            let inputs: Vec<String> = node
                .inputs
                .iter()
                .map(|i| match i {
                    Some(src) => format!("{}:{}", src.node, src.index),
                    None => "-".to_string(),
                })
                .collect();
            let _ = write!(
                out,
                "  {} {} [{}/{}] <- ({})",
                node.id,
                node.name,
                node.op_type,
                node.pattern,
                inputs.join(", ")
            );
            if !node.control_in.is_empty() {
                let ctrl: Vec<String> = node.control_in.iter().map(|c| c.to_string()).collect();
                let _ = write!(out, " ctrl<- ({})", ctrl.join(", "));
            }
            if let Some(scope) = node.scope_attr() {
                let _ = write!(out, " scope={}", scope);
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_diamond() -> (ComputeGraph, [NodeId; 4]) {
        let mut g = ComputeGraph::new("diamond");
        let a = g.add_op("a", "Relu", OpPattern::ElemWise, &[]);
        let b = g.add_op("b", "Abs", OpPattern::ElemWise, &[a]);
        let c = g.add_op("c", "ReduceSum", OpPattern::Reduce, &[a]);
        let d = g.add_op("d", "Add", OpPattern::ElemWise, &[b, c]);
        (g, [a, b, c, d])
    }

    #[test]
    fn test_neighbourhood() {
        let (g, [a, b, c, d]) = make_diamond();
        assert_eq!(g.data_successors(a), vec![b, c]);
        assert_eq!(g.data_predecessors(d), vec![b, c]);
        assert_eq!(g.max_port_fanout(a), 2);
        assert_eq!(g.max_port_fanout(d), 0);
        assert!(g.are_adjacent(a, b));
        assert!(!g.are_adjacent(a, d));
    }

    #[test]
    fn test_control_edges_in_all_neighbours() {
        let (mut g, [a, b, _c, d]) = make_diamond();
        g.add_control_edge(b, d).unwrap();
        g.add_control_edge(a, d).unwrap();
        assert_eq!(g.all_predecessors(d).len(), 3);
        assert!(g.all_successors(a).contains(&d));
    }

    #[test]
    fn test_topological_sort() {
        let (g, [a, b, c, d]) = make_diamond();
        assert_eq!(g.topological_sort().unwrap(), vec![a, b, c, d]);
    }

    #[test]
    fn test_topological_sort_detects_cycle() {
        let (mut g, [a, _b, _c, d]) = make_diamond();
        g.add_control_edge(d, a).unwrap();
        assert!(matches!(
            g.topological_sort(),
            Err(FusionError::GraphCycle(_))
        ));
        assert!(!g.is_acyclic());
    }

    #[test]
    fn test_find_nodes() {
        let (g, [_a, _b, c, _d]) = make_diamond();
        assert_eq!(g.find_nodes_by_type("ReduceSum"), vec![c]);
        assert_eq!(g.find_nodes_by_pattern(&OpPattern::ElemWise).len(), 3);
    }

    #[test]
    fn test_dump_mentions_every_node() {
        let (g, _) = make_diamond();
        let dump = g.dump();
        for name in ["a", "b", "c", "d"] {
            assert!(dump.contains(&format!(" {} [", name)));
        }
    }
}
