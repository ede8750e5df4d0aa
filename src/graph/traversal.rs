//! Graph traversal utilities
//!
//! BFS over data and control edges, plus the group contraction cycle check.

use std::collections::VecDeque;

use rustc_hash::FxHashSet;

use super::context::ComputeGraph;
use super::node::NodeId;

/// Direction of traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Forward: follow successor edges
    Forward,
    /// Backward: follow predecessor edges
    Backward,
}

fn neighbours(graph: &ComputeGraph, id: NodeId, direction: Direction) -> Vec<NodeId> {
    match direction {
        Direction::Forward => graph.all_successors(id),
        Direction::Backward => graph.all_predecessors(id),
    }
}

/// BFS traversal iterator
pub struct BfsIterator<'a> {
    graph: &'a ComputeGraph,
    queue: VecDeque<NodeId>,
    visited: FxHashSet<NodeId>,
    direction: Direction,
}

impl<'a> BfsIterator<'a> {
    /// Create a new BFS iterator starting from the given node
    pub fn new(graph: &'a ComputeGraph, start: NodeId, direction: Direction) -> Self {
        let mut queue = VecDeque::new();
        let mut visited = FxHashSet::default();

        if graph.contains(start) {
            queue.push_back(start);
            visited.insert(start);
        }

        Self {
            graph,
            queue,
            visited,
            direction,
        }
    }

    /// Create forward BFS (follows successors)
    pub fn forward(graph: &'a ComputeGraph, start: NodeId) -> Self {
        Self::new(graph, start, Direction::Forward)
    }

    /// Create backward BFS (follows predecessors)
    pub fn backward(graph: &'a ComputeGraph, start: NodeId) -> Self {
        Self::new(graph, start, Direction::Backward)
    }
}

impl Iterator for BfsIterator<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.queue.pop_front()?;
        for next in neighbours(self.graph, id, self.direction) {
            if self.visited.insert(next) {
                self.queue.push_back(next);
            }
        }
        Some(id)
    }
}

/// Check if there's a path between two nodes
pub fn has_path(graph: &ComputeGraph, from: NodeId, to: NodeId) -> bool {
    from == to || BfsIterator::forward(graph, from).any(|n| n == to)
}

/// Check whether contracting `group` into one node would create a cycle
///
/// `unit_of` maps a node to the other nodes it is already contracted with
/// (an existing fusion scope); those are traversed as one unit. The check
/// walks the graph directly and does not depend on any reachability cache.
pub fn group_creates_cycle<F>(graph: &ComputeGraph, group: &[NodeId], unit_of: F) -> bool
where
    F: Fn(NodeId) -> Vec<NodeId>,
{
    let members: FxHashSet<NodeId> = group.iter().copied().collect();
    let mut visited: FxHashSet<NodeId> = FxHashSet::default();
    let mut queue: VecDeque<NodeId> = VecDeque::new();

    for &m in group {
        for next in graph.all_successors(m) {
            if !members.contains(&next) && visited.insert(next) {
                queue.push_back(next);
            }
        }
    }

    while let Some(id) = queue.pop_front() {
        let mut unit = unit_of(id);
        if !unit.contains(&id) {
            unit.push(id);
        }
        for u in unit {
            if members.contains(&u) {
                return true;
            }
            visited.insert(u);
            for next in graph.all_successors(u) {
                if members.contains(&next) {
                    return true;
                }
                if visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::OpPattern;

    fn make_chain_graph() -> (ComputeGraph, Vec<NodeId>) {
        let mut g = ComputeGraph::new("chain");
        let n0 = g.add_op("node_0", "Conv2D", OpPattern::Convolution, &[]);
        let n1 = g.add_op("node_1", "Relu", OpPattern::ElemWise, &[n0]);
        let n2 = g.add_op("node_2", "Conv2D", OpPattern::Convolution, &[n1]);
        let n3 = g.add_op("node_3", "Relu", OpPattern::ElemWise, &[n2]);
        (g, vec![n0, n1, n2, n3])
    }

    #[test]
    fn test_bfs_forward() {
        let (g, ids) = make_chain_graph();
        let nodes: Vec<_> = BfsIterator::forward(&g, ids[0]).collect();
        assert_eq!(nodes, ids);
    }

    #[test]
    fn test_bfs_backward() {
        let (g, ids) = make_chain_graph();
        let nodes: Vec<_> = BfsIterator::backward(&g, ids[3]).collect();
        let mut expected = ids.clone();
        expected.reverse();
        assert_eq!(nodes, expected);
    }

    #[test]
    fn test_has_path() {
        let (g, ids) = make_chain_graph();
        assert!(has_path(&g, ids[0], ids[3]));
        assert!(has_path(&g, ids[1], ids[1]));
        assert!(!has_path(&g, ids[3], ids[0]));
    }

    #[test]
    fn test_has_path_through_control_edge() {
        let mut g = ComputeGraph::new("ctrl");
        let a = g.add_op("a", "Relu", OpPattern::ElemWise, &[]);
        let b = g.add_op("b", "Relu", OpPattern::ElemWise, &[]);
        assert!(!has_path(&g, a, b));
        g.add_control_edge(a, b).unwrap();
        assert!(has_path(&g, a, b));
    }

    #[test]
    fn test_group_creates_cycle() {
        // a -> b -> c and a -> c: grouping {a, c} leaves b outside on a path
        let mut g = ComputeGraph::new("tri");
        let a = g.add_op("a", "Relu", OpPattern::ElemWise, &[]);
        let b = g.add_op("b", "ReduceSum", OpPattern::Reduce, &[a]);
        let c = g.add_op("c", "Add", OpPattern::ElemWise, &[a, b]);

        assert!(group_creates_cycle(&g, &[a, c], |n| vec![n]));
        assert!(!group_creates_cycle(&g, &[a, b], |n| vec![n]));
        assert!(!group_creates_cycle(&g, &[a, b, c], |n| vec![n]));
    }

    #[test]
    fn test_group_creates_cycle_through_existing_unit() {
        // a -> x, y -> c, with x and y already contracted together
        let mut g = ComputeGraph::new("units");
        let a = g.add_op("a", "Relu", OpPattern::ElemWise, &[]);
        let x = g.add_op("x", "Abs", OpPattern::ElemWise, &[a]);
        let y = g.add_op("y", "Exp", OpPattern::ElemWise, &[]);
        let c = g.add_op("c", "Neg", OpPattern::ElemWise, &[y]);

        assert!(!group_creates_cycle(&g, &[a, c], |n| vec![n]));
        let unit = |n: NodeId| {
            if n == x || n == y {
                vec![x, y]
            } else {
                vec![n]
            }
        };
        assert!(group_creates_cycle(&g, &[a, c], unit));
    }
}
