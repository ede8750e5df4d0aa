//! Fusion runners
//!
//! - [`BufferFusionRunner`]: runs authored pattern passes
//! - [`AutoFusion`]: opportunistic fusion of simple operators
//! - [`FusionSession`]: the reachability matrix and scope table of one graph
//!
//! Both runners commit through the scope table and keep the matrix in step
//! with every accepted group.

pub mod auto_fusion;
pub mod buffer_fusion;
pub mod session;
pub mod stats;

pub use auto_fusion::{AutoFusion, AutoFusionOutcome, AUTO_FUSION_PASS};
pub use buffer_fusion::BufferFusionRunner;
pub use session::FusionSession;
pub use stats::FusionStats;

use crate::error::EngineResult;
use crate::graph::ComputeGraph;
use crate::scope::ScopeTable;
use crate::traits::SliceInfoCalculator;

/// Recompute slice info for every live scope; returns the number of scopes
pub fn calc_slice_info(
    graph: &mut ComputeGraph,
    scopes: &ScopeTable,
    calculator: &dyn SliceInfoCalculator,
) -> EngineResult<usize> {
    let mut count = 0;
    for record in scopes.live_scopes() {
        calculator.calc_slice_info(graph, &record.members)?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::graph::{AttrValue, NodeId, OpPattern};

    struct CountingCalc {
        seen: RefCell<Vec<usize>>,
    }

    impl SliceInfoCalculator for CountingCalc {
        fn calc_slice_info(&self, graph: &mut ComputeGraph, nodes: &[NodeId]) -> EngineResult<()> {
            self.seen.borrow_mut().push(nodes.len());
            for &id in nodes {
                graph.try_node_mut(id)?.set_attr("_slice_info", AttrValue::Bool(true));
            }
            Ok(())
        }
    }

    #[test]
    fn test_calc_slice_info_visits_every_scope() {
        let mut g = ComputeGraph::new("g");
        let a = g.add_op("a", "Relu", OpPattern::ElemWise, &[]);
        let b = g.add_op("b", "Abs", OpPattern::ElemWise, &[a]);
        let c = g.add_op("c", "Exp", OpPattern::ElemWise, &[]);

        let mut scopes = ScopeTable::new(8);
        scopes.create(&g, &[a, b], "p").unwrap();
        scopes.create(&g, &[c], "q").unwrap();

        let calc = CountingCalc {
            seen: RefCell::new(Vec::new()),
        };
        assert_eq!(calc_slice_info(&mut g, &scopes, &calc).unwrap(), 2);
        assert_eq!(*calc.seen.borrow(), vec![2, 1]);
        assert_eq!(
            g.node(b).unwrap().attr("_slice_info").and_then(AttrValue::as_bool),
            Some(true)
        );
    }
}
