//! Graph map types and builders
//!
//! Defines the core data structures for efficient graph traversal.

use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use super::node::{AttrValue, InPort, Node, NodeId, OutPort};

/// Node storage: id → node (insertion order preserved)
pub type NodeMap = IndexMap<NodeId, Node>;

/// Consumer map: output port → consuming input ports
/// SmallVec optimized for common case of 1-4 consumers
pub type ConsumerMap = FxHashMap<OutPort, SmallVec<[InPort; 4]>>;

/// Attribute map for nodes and graphs
pub type AttrMap = FxHashMap<String, AttrValue>;

/// Set of node ids
pub type NodeSet = FxHashSet<NodeId>;

/// Name lookup: node name → id
pub type NameMap = FxHashMap<String, NodeId>;

/// Build the name map from node storage
pub fn build_name_map(nodes: &NodeMap) -> NameMap {
    nodes
        .values()
        .map(|n| (n.name.clone(), n.id))
        .collect()
}

/// Build a map of node id → position in the given order
pub fn build_position_map(order: &[NodeId]) -> FxHashMap<NodeId, usize> {
    order.iter().enumerate().map(|(i, id)| (*id, i)).collect()
}
