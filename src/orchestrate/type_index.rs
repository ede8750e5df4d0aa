//! Node lookup by op type and pattern tag
//!
//! Pattern passes seed matching from nodes whose op type or tag satisfies a
//! head descriptor. The index keeps those nodes per key in topological
//! order and is built once per sweep of a graph.

use rustc_hash::FxHashMap;

use crate::error::EngineResult;
use crate::graph::{build_position_map, ComputeGraph, NodeId};
use crate::pattern::TYPE_ANY;

/// Op type / pattern tag → nodes, in topological order
#[derive(Debug, Clone, Default)]
pub struct NodeTypeIndex {
    by_key: FxHashMap<String, Vec<NodeId>>,
    order: Vec<NodeId>,
    position: FxHashMap<NodeId, usize>,
}

impl NodeTypeIndex {
    /// Build the index for `graph`
    pub fn build(graph: &ComputeGraph) -> EngineResult<Self> {
        let order = graph.topological_sort()?;
        let mut by_key: FxHashMap<String, Vec<NodeId>> = FxHashMap::default();
        for &id in &order {
            if let Some(node) = graph.node(id) {
                by_key.entry(node.op_type.clone()).or_default().push(id);
                let tag = node.pattern.as_str();
                if tag != node.op_type {
                    by_key.entry(tag.to_string()).or_default().push(id);
                }
            }
        }
        Ok(Self {
            by_key,
            position: build_position_map(&order),
            order,
        })
    }

    /// Nodes registered under a key
    pub fn nodes_of(&self, key: &str) -> &[NodeId] {
        self.by_key.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Nodes matching any of `types`, deduplicated, in topological order
    pub fn candidates(&self, types: &[String]) -> Vec<NodeId> {
        if types.iter().any(|t| t == TYPE_ANY) {
            return self.order.clone();
        }
        let mut nodes: Vec<NodeId> = types
            .iter()
            .flat_map(|t| self.nodes_of(t).iter().copied())
            .collect();
        nodes.sort_by_key(|id| self.position.get(id).copied().unwrap_or(usize::MAX));
        nodes.dedup();
        nodes
    }

    /// Indexed nodes in topological order
    pub fn all(&self) -> &[NodeId] {
        &self.order
    }

    /// Number of indexed nodes
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::OpPattern;

    #[test]
    fn test_lookup_by_type_and_tag() {
        let mut g = ComputeGraph::new("g");
        let c = g.add_op("c", "Conv2D", OpPattern::Convolution, &[]);
        let r = g.add_op("r", "Relu", OpPattern::ElemWise, &[c]);
        let e = g.add_op("e", "Exp", OpPattern::ElemWise, &[r]);

        let index = NodeTypeIndex::build(&g).unwrap();
        assert_eq!(index.nodes_of("Relu"), &[r]);
        assert_eq!(index.nodes_of("ElemWise"), &[r, e]);
        assert_eq!(index.nodes_of("Convolution"), &[c]);
        assert!(index.nodes_of("MatMul").is_empty());

        let types = vec!["Exp".to_string(), "Relu".to_string()];
        assert_eq!(index.candidates(&types), vec![r, e]);
        assert_eq!(index.candidates(&[TYPE_ANY.to_string()]).len(), 3);
    }
}
