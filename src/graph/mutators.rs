//! Graph mutation operations
//!
//! Methods for modifying the graph structure: adding and removing nodes,
//! data edges and control edges.

use ndarray::ArrayD;
use rustc_hash::FxHashSet;

use crate::error::{EngineResult, FusionError};
use crate::pattern::ops::CONST;

use super::context::ComputeGraph;
use super::maps::build_name_map;
use super::node::{InPort, Node, NodeId, OpPattern, OutPort};

/// A batch of data-edge edits applied all-or-nothing
///
/// Removals are applied before additions, so an addition may reuse an input
/// port freed by a removal in the same batch.
#[derive(Debug, Default, Clone)]
pub struct EdgeEdits {
    removals: Vec<InPort>,
    additions: Vec<(OutPort, InPort)>,
}

impl EdgeEdits {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Disconnect an input port
    pub fn remove(&mut self, dst: InPort) -> &mut Self {
        self.removals.push(dst);
        self
    }

    /// Connect an output port to an input port
    pub fn add(&mut self, src: OutPort, dst: InPort) -> &mut Self {
        self.additions.push((src, dst));
        self
    }

    /// Number of queued edits
    pub fn len(&self) -> usize {
        self.removals.len() + self.additions.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.additions.is_empty()
    }

    /// Edges added by this batch
    pub fn additions(&self) -> &[(OutPort, InPort)] {
        &self.additions
    }
}

impl ComputeGraph {
    // ========================================================================
    // Node mutation
    // ========================================================================

    /// Insert a new node with the given number of output ports
    pub fn add_node(
        &mut self,
        name: &str,
        op_type: &str,
        pattern: OpPattern,
        output_count: usize,
    ) -> NodeId {
        let id = self.alloc_id();
        let mut node = Node::new(id, name, op_type, pattern);
        node.output_count = output_count;
        self.names.insert(name.to_string(), id);
        self.nodes.insert(id, node);
        id
    }

    /// Insert a single-output node fed by output 0 of each producer, in order
    ///
    /// Producers that do not exist leave their input port unconnected.
    pub fn add_op(
        &mut self,
        name: &str,
        op_type: &str,
        pattern: OpPattern,
        producers: &[NodeId],
    ) -> NodeId {
        let id = self.add_node(name, op_type, pattern, 1);
        for (index, producer) in producers.iter().enumerate() {
            if self.contains(*producer) {
                self.connect_unchecked(OutPort::new(*producer, 0), InPort::new(id, index));
            }
        }
        id
    }

    /// Insert a constant node carrying the given payload
    pub fn add_const(&mut self, name: &str, value: ArrayD<f32>) -> NodeId {
        let id = self.add_node(name, CONST, OpPattern::Opaque, 1);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.constant = Some(value);
        }
        id
    }

    /// Remove a node and every edge touching it
    pub fn remove_node(&mut self, id: NodeId) -> EngineResult<Node> {
        self.isolate_node(id)?;
        let node = self
            .nodes
            .shift_remove(&id)
            .ok_or(FusionError::NodeNotFound(id))?;
        if self.names.get(&node.name) == Some(&id) {
            // an earlier node with the same name becomes reachable by name again
            self.names = build_name_map(&self.nodes);
        }
        Ok(node)
    }

    /// Disconnect every data and control edge of a node
    pub fn isolate_node(&mut self, id: NodeId) -> EngineResult<()> {
        let node = self.try_node(id)?;
        let input_ports: Vec<InPort> = node
            .inputs
            .iter()
            .enumerate()
            .filter(|(_, src)| src.is_some())
            .map(|(i, _)| InPort::new(id, i))
            .collect();
        let output_count = node.output_count;
        let control_in: Vec<NodeId> = node.control_in.to_vec();
        let control_out: Vec<NodeId> = node.control_out.to_vec();

        for port in input_ports {
            self.remove_data_edge(port)?;
        }
        for index in 0..output_count {
            let consumers = self.consumers_of(OutPort::new(id, index)).to_vec();
            for dst in consumers {
                self.remove_data_edge(dst)?;
            }
        }
        for src in control_in {
            self.remove_control_edge(src, id);
        }
        for dst in control_out {
            self.remove_control_edge(id, dst);
        }
        Ok(())
    }

    // ========================================================================
    // Data edges
    // ========================================================================

    /// Connect `src` to `dst`
    ///
    /// Fails if either node is missing, the output index is out of range, the
    /// edge would be a self-loop, or `dst` already has a producer.
    pub fn add_data_edge(&mut self, src: OutPort, dst: InPort) -> EngineResult<()> {
        self.check_new_edge(src, dst)?;
        if self.producer_of(dst).is_some() {
            return Err(FusionError::PortOccupied {
                node: dst.node,
                port: dst.index,
            });
        }
        self.connect_unchecked(src, dst);
        Ok(())
    }

    /// Disconnect an input port and return its former producer
    pub fn remove_data_edge(&mut self, dst: InPort) -> EngineResult<OutPort> {
        let node = self.try_node_mut(dst.node)?;
        let src = node
            .inputs
            .get_mut(dst.index)
            .and_then(Option::take)
            .ok_or_else(|| {
                FusionError::InvalidEdge(format!("{}:{} has no producer", dst.node, dst.index))
            })?;

        if let Some(list) = self.consumers.get_mut(&src) {
            list.retain(|p| *p != dst);
            if list.is_empty() {
                self.consumers.remove(&src);
            }
        }
        Ok(src)
    }

    /// Apply a batch of edits, or none of them if any edit is invalid
    pub fn apply_edits(&mut self, edits: &EdgeEdits) -> EngineResult<()> {
        let mut freed: FxHashSet<InPort> = FxHashSet::default();
        for dst in &edits.removals {
            if self.producer_of(*dst).is_none() || !freed.insert(*dst) {
                return Err(FusionError::InvalidEdge(format!(
                    "{}:{} has no producer to remove",
                    dst.node, dst.index
                )));
            }
        }

        let mut claimed: FxHashSet<InPort> = FxHashSet::default();
        for (src, dst) in &edits.additions {
            self.check_new_edge(*src, *dst)?;
            let occupied = self.producer_of(*dst).is_some() && !freed.contains(dst);
            if occupied || !claimed.insert(*dst) {
                return Err(FusionError::PortOccupied {
                    node: dst.node,
                    port: dst.index,
                });
            }
        }

        for dst in &edits.removals {
            self.remove_data_edge(*dst)?;
        }
        for (src, dst) in &edits.additions {
            self.connect_unchecked(*src, *dst);
        }
        Ok(())
    }

    fn check_new_edge(&self, src: OutPort, dst: InPort) -> EngineResult<()> {
        let producer = self.try_node(src.node)?;
        self.try_node(dst.node)?;
        if src.index >= producer.output_count {
            return Err(FusionError::InvalidEdge(format!(
                "{} has no output {}",
                src.node, src.index
            )));
        }
        if src.node == dst.node {
            return Err(FusionError::InvalidEdge(format!(
                "self-loop on {}",
                src.node
            )));
        }
        Ok(())
    }

    fn connect_unchecked(&mut self, src: OutPort, dst: InPort) {
        if let Some(node) = self.nodes.get_mut(&dst.node) {
            if node.inputs.len() <= dst.index {
                node.inputs.resize(dst.index + 1, None);
            }
            node.inputs[dst.index] = Some(src);
            self.consumers.entry(src).or_default().push(dst);
        }
    }

    // ========================================================================
    // Control edges
    // ========================================================================

    /// Add a control edge; returns `false` if it already existed
    pub fn add_control_edge(&mut self, src: NodeId, dst: NodeId) -> EngineResult<bool> {
        if src == dst {
            return Err(FusionError::InvalidEdge(format!("self-loop on {}", src)));
        }
        self.try_node(dst)?;
        let from = self.try_node_mut(src)?;
        if from.control_out.contains(&dst) {
            return Ok(false);
        }
        from.control_out.push(dst);
        if let Some(to) = self.nodes.get_mut(&dst) {
            to.control_in.push(src);
        }
        Ok(true)
    }

    /// Remove a control edge; returns `false` if it did not exist
    pub fn remove_control_edge(&mut self, src: NodeId, dst: NodeId) -> bool {
        let mut removed = false;
        if let Some(from) = self.nodes.get_mut(&src) {
            let before = from.control_out.len();
            from.control_out.retain(|n| *n != dst);
            removed = from.control_out.len() != before;
        }
        if let Some(to) = self.nodes.get_mut(&dst) {
            to.control_in.retain(|n| *n != src);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_chain() -> (ComputeGraph, NodeId, NodeId, NodeId) {
        let mut g = ComputeGraph::new("g");
        let a = g.add_op("a", "Relu", OpPattern::ElemWise, &[]);
        let b = g.add_op("b", "Abs", OpPattern::ElemWise, &[a]);
        let c = g.add_op("c", "Exp", OpPattern::ElemWise, &[b]);
        (g, a, b, c)
    }

    #[test]
    fn test_single_producer_invariant() {
        let (mut g, a, _b, c) = make_chain();
        let err = g
            .add_data_edge(OutPort::new(a, 0), InPort::new(c, 0))
            .unwrap_err();
        assert!(matches!(err, FusionError::PortOccupied { .. }));

        // A free port accepts the edge
        g.add_data_edge(OutPort::new(a, 0), InPort::new(c, 1)).unwrap();
        assert_eq!(g.consumers_of(OutPort::new(a, 0)).len(), 2);
    }

    #[test]
    fn test_invalid_edges() {
        let (mut g, a, b, _c) = make_chain();
        assert!(g
            .add_data_edge(OutPort::new(a, 3), InPort::new(b, 1))
            .is_err());
        assert!(g
            .add_data_edge(OutPort::new(a, 0), InPort::new(a, 1))
            .is_err());
        assert!(g.add_control_edge(a, a).is_err());
    }

    #[test]
    fn test_remove_data_edge() {
        let (mut g, a, b, _c) = make_chain();
        let src = g.remove_data_edge(InPort::new(b, 0)).unwrap();
        assert_eq!(src, OutPort::new(a, 0));
        assert!(g.consumers_of(OutPort::new(a, 0)).is_empty());
        assert!(g.remove_data_edge(InPort::new(b, 0)).is_err());
    }

    #[test]
    fn test_control_edges() {
        let (mut g, a, _b, c) = make_chain();
        assert!(g.add_control_edge(a, c).unwrap());
        assert!(!g.add_control_edge(a, c).unwrap());
        assert_eq!(g.node(c).unwrap().control_inputs(), &[a]);
        assert!(g.remove_control_edge(a, c));
        assert!(!g.remove_control_edge(a, c));
        assert!(g.node(c).unwrap().control_inputs().is_empty());
    }

    #[test]
    fn test_remove_node_disconnects() {
        let (mut g, a, b, c) = make_chain();
        g.add_control_edge(b, c).unwrap();
        let removed = g.remove_node(b).unwrap();
        assert_eq!(removed.name, "b");
        assert!(!g.contains(b));
        assert!(g.find_node("b").is_none());
        assert!(g.consumers_of(OutPort::new(a, 0)).is_empty());
        assert_eq!(g.node(c).unwrap().inputs(), &[None]);
        assert!(g.node(c).unwrap().control_inputs().is_empty());
    }

    #[test]
    fn test_remove_shadowing_node_restores_name() {
        let mut g = ComputeGraph::new("dup");
        let first = g.add_op("x", "Relu", OpPattern::ElemWise, &[]);
        let second = g.add_op("x", "Exp", OpPattern::ElemWise, &[]);
        assert_eq!(g.find_node("x"), Some(second));
        g.remove_node(second).unwrap();
        assert_eq!(g.find_node("x"), Some(first));
    }

    #[test]
    fn test_apply_edits_all_or_nothing() {
        let (mut g, a, b, c) = make_chain();

        // Rewire c to read from a: remove b->c, add a->c
        let mut edits = EdgeEdits::new();
        edits
            .remove(InPort::new(c, 0))
            .add(OutPort::new(a, 0), InPort::new(c, 0));
        g.apply_edits(&edits).unwrap();
        assert_eq!(g.node(c).unwrap().inputs()[0], Some(OutPort::new(a, 0)));

        // Second batch is invalid in its last edit: nothing is applied
        let mut bad = EdgeEdits::new();
        bad.remove(InPort::new(b, 0))
            .add(OutPort::new(c, 0), InPort::new(b, 0))
            .add(OutPort::new(c, 7), InPort::new(b, 1));
        assert!(g.apply_edits(&bad).is_err());
        assert_eq!(g.node(b).unwrap().inputs()[0], Some(OutPort::new(a, 0)));
    }

    #[test]
    fn test_add_const() {
        let mut g = ComputeGraph::new("g");
        let k = g.add_const("k", ndarray::ArrayD::zeros(vec![2]));
        assert!(g.node(k).unwrap().is_constant());
        assert_eq!(g.node(k).unwrap().op_type, "Const");
    }
}
