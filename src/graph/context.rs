//! Compute graph container
//!
//! `ComputeGraph` is the central structure the fusion engine rewrites.
//! It owns the nodes, a consumer index for O(1) fan-out queries, graph
//! attributes and nested subgraphs.

use crate::error::{EngineResult, FusionError};

use super::maps::{AttrMap, ConsumerMap, NameMap, NodeMap};
use super::node::{AttrValue, InPort, Node, NodeId, OutPort};

/// Graph attribute counting fusion sweeps over this graph
pub const ATTR_RUN_COUNT: &str = "_fusion_run_count";

/// Mutable dataflow graph with data and control edges
///
/// Data edges connect one producer output port to any number of consumer
/// input ports; every input port has at most one producer.
#[derive(Debug, Clone)]
pub struct ComputeGraph {
    name: String,
    pub(crate) nodes: NodeMap,
    pub(crate) consumers: ConsumerMap,
    pub(crate) names: NameMap,
    pub(crate) attrs: AttrMap,
    pub(crate) subgraphs: Vec<ComputeGraph>,
    next_id: u32,
}

impl ComputeGraph {
    /// Create an empty graph
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            nodes: NodeMap::default(),
            consumers: ConsumerMap::default(),
            names: NameMap::default(),
            attrs: AttrMap::default(),
            subgraphs: Vec::new(),
            next_id: 0,
        }
    }

    /// Graph name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn alloc_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    // ========================================================================
    // Node accessors
    // ========================================================================

    /// Get a node by id
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Get a mutable node by id
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// Get a node or fail with [`FusionError::NodeNotFound`]
    pub fn try_node(&self, id: NodeId) -> EngineResult<&Node> {
        self.nodes.get(&id).ok_or(FusionError::NodeNotFound(id))
    }

    /// Get a mutable node or fail with [`FusionError::NodeNotFound`]
    pub fn try_node_mut(&mut self, id: NodeId) -> EngineResult<&mut Node> {
        self.nodes.get_mut(&id).ok_or(FusionError::NodeNotFound(id))
    }

    /// Check if a node exists
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Look up a node id by name
    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    /// Get the number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Iterate over all nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Node ids in insertion order
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    /// Consumers of an output port
    pub fn consumers_of(&self, port: OutPort) -> &[InPort] {
        self.consumers
            .get(&port)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    // ========================================================================
    // Graph attributes
    // ========================================================================

    /// Get a graph attribute
    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attrs.get(key)
    }

    /// Set a graph attribute
    pub fn set_attr(&mut self, key: &str, value: AttrValue) {
        self.attrs.insert(key.to_string(), value);
    }

    /// Number of fusion sweeps recorded on this graph
    pub fn run_count(&self) -> i64 {
        self.attr(ATTR_RUN_COUNT)
            .and_then(AttrValue::as_int)
            .unwrap_or(0)
    }

    /// Increment the sweep counter and return the new value
    pub fn bump_run_count(&mut self) -> i64 {
        let next = self.run_count() + 1;
        self.set_attr(ATTR_RUN_COUNT, AttrValue::Int(next));
        next
    }

    // ========================================================================
    // Subgraphs
    // ========================================================================

    /// Nested subgraphs
    pub fn subgraphs(&self) -> &[ComputeGraph] {
        &self.subgraphs
    }

    /// Mutable nested subgraphs
    pub fn subgraphs_mut(&mut self) -> &mut [ComputeGraph] {
        &mut self.subgraphs
    }

    /// Attach a nested subgraph
    pub fn add_subgraph(&mut self, graph: ComputeGraph) {
        self.subgraphs.push(graph);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::OpPattern;

    fn make_test_graph() -> ComputeGraph {
        let mut g = ComputeGraph::new("main");
        let conv = g.add_op("conv_0", "Conv2D", OpPattern::Convolution, &[]);
        g.add_op("relu_0", "Relu", OpPattern::ElemWise, &[conv]);
        g
    }

    #[test]
    fn test_graph_creation() {
        let g = make_test_graph();
        assert_eq!(g.name(), "main");
        assert_eq!(g.node_count(), 2);
        assert!(g.find_node("conv_0").is_some());
        assert!(g.find_node("missing").is_none());
    }

    #[test]
    fn test_try_node_missing() {
        let g = make_test_graph();
        let err = g.try_node(NodeId(99)).unwrap_err();
        assert!(matches!(err, FusionError::NodeNotFound(_)));
    }

    #[test]
    fn test_consumers_of() {
        let g = make_test_graph();
        let conv = g.find_node("conv_0").unwrap();
        let relu = g.find_node("relu_0").unwrap();
        assert_eq!(
            g.consumers_of(OutPort::new(conv, 0)),
            &[InPort::new(relu, 0)]
        );
        assert!(g.consumers_of(OutPort::new(relu, 0)).is_empty());
    }

    #[test]
    fn test_run_count() {
        let mut g = make_test_graph();
        assert_eq!(g.run_count(), 0);
        assert_eq!(g.bump_run_count(), 1);
        assert_eq!(g.bump_run_count(), 2);
        assert_eq!(g.run_count(), 2);
    }

    #[test]
    fn test_subgraphs() {
        let mut g = make_test_graph();
        g.add_subgraph(ComputeGraph::new("body"));
        assert_eq!(g.subgraphs().len(), 1);
        assert_eq!(g.subgraphs_mut()[0].name(), "body");
    }

    #[test]
    fn test_node_iteration_order() {
        let g = make_test_graph();
        let names: Vec<_> = g.nodes().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["conv_0", "relu_0"]);
    }
}
