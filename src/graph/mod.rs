//! Compute graph consumed by the fusion engine
//!
//! This module provides the graph the engine rewrites:
//!
//! - [`ComputeGraph`]: nodes, data/control edges, attributes, subgraphs
//! - [`maps`]: Type definitions and builders for graph maps
//! - [`traversal`]: BFS iterator, path queries and the group cycle check
//!
//! # Example
//!
//! ```ignore
//! use fusion_engine::graph::{ComputeGraph, OpPattern};
//!
//! let mut g = ComputeGraph::new("main");
//! let conv = g.add_op("conv_0", "Conv2D", OpPattern::Convolution, &[]);
//! let relu = g.add_op("relu_0", "Relu", OpPattern::ElemWise, &[conv]);
//!
//! assert_eq!(g.data_successors(conv), vec![relu]);
//! let order = g.topological_sort()?;
//! ```
//!
//! # Maps
//!
//! | Map | Description |
//! |-----|-------------|
//! | `nodes` | node id → Node (order preserved) |
//! | `consumers` | output port → consuming input ports |
//! | `names` | node name → node id |
//! | `attrs` | graph attribute name → value |

pub mod accessors;
pub mod context;
pub mod maps;
pub mod mutators;
pub mod node;
pub mod traversal;

// Re-export main types
pub use context::{ComputeGraph, ATTR_RUN_COUNT};
pub use maps::{build_position_map, AttrMap, ConsumerMap, NodeMap, NodeSet};
pub use mutators::EdgeEdits;
pub use node::{
    AttrValue, InPort, Node, NodeId, OpPattern, OutPort, ATTR_DUP_COUNT, ATTR_PASS_NAME,
    ATTR_SCOPE_ID,
};
pub use traversal::{group_creates_cycle, has_path, BfsIterator, Direction};
