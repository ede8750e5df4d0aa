//! Narrow graph rewrites outside the fusion sweep
//!
//! - [`switch_trans_data_and_cast`]: move a narrowing `Cast` in front of the
//!   `TransData` feeding it, so the layout transform moves fewer bytes
//!
//! Every rewrite is applied as one [`EdgeEdits`] batch and undone if the
//! graph stops being acyclic.
//!
//! # Example
//!
//! ```ignore
//! use fusion_engine::transform::switch_trans_data_and_cast;
//!
//! let swapped = switch_trans_data_and_cast(&mut graph)?;
//! ```

use tracing::debug;

use crate::error::EngineResult;
use crate::graph::{AttrValue, ComputeGraph, EdgeEdits, InPort, NodeId, OutPort};
use crate::pattern::ops::{CAST, TRANS_DATA};

/// Cast attribute naming the input element type
pub const ATTR_SRC_TYPE: &str = "src_type";
/// Cast attribute naming the output element type
pub const ATTR_DST_TYPE: &str = "dst_type";
/// TransData attribute naming the element type it moves
pub const ATTR_DTYPE: &str = "dtype";

/// Size in bytes of a named element type
pub fn dtype_size(dtype: &str) -> Option<usize> {
    match dtype {
        "bool" | "int8" | "uint8" => Some(1),
        "float16" | "bfloat16" | "int16" | "uint16" => Some(2),
        "float32" | "int32" | "uint32" => Some(4),
        "float64" | "int64" | "uint64" => Some(8),
        _ => None,
    }
}

/// Swap every `TransData -> Cast` pair where the cast narrows the type
///
/// Returns the number of pairs swapped.
pub fn switch_trans_data_and_cast(graph: &mut ComputeGraph) -> EngineResult<usize> {
    let mut swapped = 0;
    for trans in graph.find_nodes_by_type(TRANS_DATA) {
        let Some(cast) = swappable_cast(graph, trans) else {
            continue;
        };
        if swap_pair(graph, trans, cast)? {
            swapped += 1;
        }
    }
    Ok(swapped)
}

fn swappable_cast(graph: &ComputeGraph, trans: NodeId) -> Option<NodeId> {
    let node = graph.node(trans)?;
    if node.output_count() != 1 || node.inputs().iter().flatten().count() != 1 {
        return None;
    }
    node.inputs().first().copied().flatten()?;

    let consumers = graph.consumers_of(OutPort::new(trans, 0));
    if consumers.len() != 1 || consumers[0].index != 0 {
        return None;
    }
    let cast = graph.node(consumers[0].node)?;
    if cast.op_type != CAST || cast.output_count() != 1 {
        return None;
    }

    let src = cast.attr(ATTR_SRC_TYPE).and_then(AttrValue::as_str).and_then(dtype_size)?;
    let dst = cast.attr(ATTR_DST_TYPE).and_then(AttrValue::as_str).and_then(dtype_size)?;
    (dst < src).then_some(cast.id())
}

/// Rewire `x -> trans -> cast -> consumers` into `x -> cast -> trans -> consumers`
fn swap_pair(graph: &mut ComputeGraph, trans: NodeId, cast: NodeId) -> EngineResult<bool> {
    let trans_in = InPort::new(trans, 0);
    let cast_in = InPort::new(cast, 0);
    let Some(upstream) = graph.producer_of(trans_in) else {
        return Ok(false);
    };
    let downstream: Vec<InPort> = graph.consumers_of(OutPort::new(cast, 0)).to_vec();

    let mut edits = EdgeEdits::new();
    edits.remove(trans_in).remove(cast_in);
    for &dst in &downstream {
        edits.remove(dst);
    }
    edits
        .add(upstream, cast_in)
        .add(OutPort::new(cast, 0), trans_in);
    for &dst in &downstream {
        edits.add(OutPort::new(trans, 0), dst);
    }
    graph.apply_edits(&edits)?;

    if !graph.is_acyclic() {
        let mut undo = EdgeEdits::new();
        undo.remove(trans_in).remove(cast_in);
        for &dst in &downstream {
            undo.remove(dst);
        }
        undo.add(upstream, trans_in)
            .add(OutPort::new(trans, 0), cast_in);
        for &dst in &downstream {
            undo.add(OutPort::new(cast, 0), dst);
        }
        graph.apply_edits(&undo)?;
        debug!(trans = %trans, cast = %cast, "swap rejected: cycle");
        return Ok(false);
    }

    let narrow = graph
        .node(cast)
        .and_then(|n| n.attr(ATTR_DST_TYPE))
        .cloned();
    if let (Some(dtype), Some(node)) = (narrow, graph.node_mut(trans)) {
        node.set_attr(ATTR_DTYPE, dtype);
    }
    debug!(trans = %trans, cast = %cast, consumers = downstream.len(), "swapped TransData and Cast");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::OpPattern;

    fn cast_node(g: &mut ComputeGraph, input: NodeId, src: &str, dst: &str) -> NodeId {
        let cast = g.add_op("cast", CAST, OpPattern::ElemWise, &[input]);
        let node = g.node_mut(cast).unwrap();
        node.set_attr(ATTR_SRC_TYPE, AttrValue::Str(src.to_string()));
        node.set_attr(ATTR_DST_TYPE, AttrValue::Str(dst.to_string()));
        cast
    }

    fn make_test_graph(src: &str, dst: &str) -> (ComputeGraph, [NodeId; 5]) {
        let mut g = ComputeGraph::new("g");
        let x = g.add_op("x", "Data", OpPattern::Opaque, &[]);
        let trans = g.add_op("trans", TRANS_DATA, OpPattern::Opaque, &[x]);
        let cast = cast_node(&mut g, trans, src, dst);
        let a = g.add_op("a", "Relu", OpPattern::ElemWise, &[cast]);
        let b = g.add_op("b", "Exp", OpPattern::ElemWise, &[cast]);
        (g, [x, trans, cast, a, b])
    }

    #[test]
    fn test_dtype_size() {
        assert_eq!(dtype_size("float16"), Some(2));
        assert_eq!(dtype_size("int64"), Some(8));
        assert_eq!(dtype_size("complex64"), None);
    }

    #[test]
    fn test_narrowing_cast_swapped() {
        let (mut g, [x, trans, cast, a, b]) = make_test_graph("float32", "float16");
        assert_eq!(switch_trans_data_and_cast(&mut g).unwrap(), 1);

        assert_eq!(g.producer_of(InPort::new(cast, 0)), Some(OutPort::new(x, 0)));
        assert_eq!(g.producer_of(InPort::new(trans, 0)), Some(OutPort::new(cast, 0)));
        assert_eq!(g.producer_of(InPort::new(a, 0)), Some(OutPort::new(trans, 0)));
        assert_eq!(g.producer_of(InPort::new(b, 0)), Some(OutPort::new(trans, 0)));
        assert_eq!(
            g.node(trans).unwrap().attr(ATTR_DTYPE),
            Some(&AttrValue::Str("float16".to_string()))
        );
        assert!(g.is_acyclic());
    }

    #[test]
    fn test_widening_cast_kept() {
        let (mut g, [_, trans, cast, _, _]) = make_test_graph("float16", "float32");
        assert_eq!(switch_trans_data_and_cast(&mut g).unwrap(), 0);
        assert_eq!(g.producer_of(InPort::new(cast, 0)), Some(OutPort::new(trans, 0)));
    }

    #[test]
    fn test_shared_trans_data_kept() {
        let (mut g, [_, trans, cast, _, _]) = make_test_graph("float32", "int8");
        g.add_op("other", "Relu", OpPattern::ElemWise, &[trans]);
        assert_eq!(switch_trans_data_and_cast(&mut g).unwrap(), 0);
        assert_eq!(g.producer_of(InPort::new(cast, 0)), Some(OutPort::new(trans, 0)));
    }

    #[test]
    fn test_swap_reverted_on_cycle() {
        let (mut g, [x, trans, cast, a, _]) = make_test_graph("float32", "float16");
        let side = g.add_op("side", "Relu", OpPattern::ElemWise, &[]);
        g.add_control_edge(trans, side).unwrap();
        g.add_control_edge(side, cast).unwrap();
        let before = g.dump();

        assert_eq!(switch_trans_data_and_cast(&mut g).unwrap(), 0);
        assert_eq!(g.dump(), before);
        assert_eq!(g.producer_of(InPort::new(trans, 0)), Some(OutPort::new(x, 0)));
        assert_eq!(g.producer_of(InPort::new(a, 0)), Some(OutPort::new(cast, 0)));
    }
}
