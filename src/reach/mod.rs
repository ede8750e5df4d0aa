//! Reachability index (connection matrix)
//!
//! For every node the matrix stores the set of nodes that reach it through
//! data or control edges, as a bit row. It is built once per graph compile
//! and then updated incrementally: after a group of nodes is fused, the
//! group behaves as one node, so everything downstream of any member becomes
//! reachable from every ancestor of every member.
//!
//! # Example
//!
//! ```ignore
//! use fusion_engine::reach::ConnectionMatrix;
//!
//! let mut matrix = ConnectionMatrix::build(&graph)?;
//! assert!(matrix.is_reachable(conv, relu));
//!
//! let backup = matrix.clone();
//! matrix.update(&[conv, relu]);
//! // roll back if the fusion is rejected later
//! matrix = backup;
//! ```

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::EngineResult;
use crate::graph::{ComputeGraph, NodeId};

const WORD_BITS: usize = 64;

/// Growable bit set backing one matrix row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitRow {
    words: Vec<u64>,
}

impl BitRow {
    /// Create a row able to hold `bits` bits without growing
    pub fn with_len(bits: usize) -> Self {
        Self {
            words: vec![0; bits.div_ceil(WORD_BITS)],
        }
    }

    /// Set a bit, growing the row if needed
    pub fn set(&mut self, bit: usize) {
        let word = bit / WORD_BITS;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (bit % WORD_BITS);
    }

    /// Test a bit; bits beyond the row are unset
    pub fn contains(&self, bit: usize) -> bool {
        self.words
            .get(bit / WORD_BITS)
            .map(|w| w & (1 << (bit % WORD_BITS)) != 0)
            .unwrap_or(false)
    }

    /// In-place union
    pub fn union_with(&mut self, other: &BitRow) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a |= *b;
        }
    }

    /// Whether the two rows share a set bit
    pub fn intersects(&self, other: &BitRow) -> bool {
        self.words
            .iter()
            .zip(&other.words)
            .any(|(a, b)| a & b != 0)
    }

    /// Number of set bits
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}

/// Incrementally maintained reachability index over one graph
#[derive(Debug, Clone)]
pub struct ConnectionMatrix {
    index: FxHashMap<NodeId, usize>,
    rows: Vec<BitRow>,
}

impl ConnectionMatrix {
    /// Build the matrix for `graph`; fails if the graph is cyclic
    pub fn build(graph: &ComputeGraph) -> EngineResult<Self> {
        let order = graph.topological_sort()?;
        let width = order.len();
        let mut matrix = Self {
            index: FxHashMap::default(),
            rows: Vec::with_capacity(width),
        };

        for id in order {
            let mut row = BitRow::with_len(width);
            row.set(matrix.rows.len());
            for pred in graph.all_predecessors(id) {
                if let Some(&p) = matrix.index.get(&pred) {
                    row.union_with(&matrix.rows[p]);
                }
            }
            matrix.index.insert(id, matrix.rows.len());
            matrix.rows.push(row);
        }

        Ok(matrix)
    }

    /// Number of indexed nodes
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Whether the node is covered by the index
    pub fn contains_node(&self, id: NodeId) -> bool {
        self.index.contains_key(&id)
    }

    /// Whether `to` is reachable from `from`; a node reaches itself
    ///
    /// Nodes unknown to the index are never reachable.
    pub fn is_reachable(&self, from: NodeId, to: NodeId) -> bool {
        match (self.index.get(&from), self.index.get(&to)) {
            (Some(&f), Some(&t)) => self.rows[t].contains(f),
            _ => false,
        }
    }

    /// Index a node added after the build
    ///
    /// Must be called before the node receives any successor.
    pub fn insert_node(&mut self, graph: &ComputeGraph, id: NodeId) {
        if self.index.contains_key(&id) {
            return;
        }
        let slot = self.rows.len();
        let mut row = BitRow::with_len(slot + 1);
        row.set(slot);
        for pred in graph.all_predecessors(id) {
            if let Some(&p) = self.index.get(&pred) {
                row.union_with(&self.rows[p]);
            }
        }
        self.index.insert(id, slot);
        self.rows.push(row);
    }

    /// Treat `group` as one fused node from now on
    pub fn update(&mut self, group: &[NodeId]) {
        let mask = self.mask_of(group);
        let mut merged = BitRow::default();
        for id in group {
            if let Some(&i) = self.index.get(id) {
                merged.union_with(&self.rows[i]);
            }
        }
        for row in &mut self.rows {
            if row.intersects(&mask) {
                row.union_with(&merged);
            }
        }
    }

    /// Find a node outside `group` that lies on a path leaving and
    /// re-entering the group
    ///
    /// Returns `None` when fusing the group keeps the graph acyclic.
    pub fn find_cycle_witness(&self, graph: &ComputeGraph, group: &[NodeId]) -> Option<NodeId> {
        let members: FxHashSet<NodeId> = group.iter().copied().collect();
        let mask = self.mask_of(group);
        for &member in group {
            for pred in graph.all_predecessors(member) {
                if members.contains(&pred) {
                    continue;
                }
                if let Some(&p) = self.index.get(&pred) {
                    if self.rows[p].intersects(&mask) {
                        return Some(pred);
                    }
                }
            }
        }
        None
    }

    /// Whether fusing `group` would create a cycle
    pub fn creates_cycle(&self, graph: &ComputeGraph, group: &[NodeId]) -> bool {
        self.find_cycle_witness(graph, group).is_some()
    }

    fn mask_of(&self, group: &[NodeId]) -> BitRow {
        let mut mask = BitRow::with_len(self.rows.len());
        for id in group {
            if let Some(&i) = self.index.get(id) {
                mask.set(i);
            }
        }
        mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::OpPattern;

    // a -> b -> c, a -> c, d isolated
    fn make_graph() -> (ComputeGraph, [NodeId; 4]) {
        let mut g = ComputeGraph::new("g");
        let a = g.add_op("a", "Relu", OpPattern::ElemWise, &[]);
        let b = g.add_op("b", "ReduceSum", OpPattern::Reduce, &[a]);
        let c = g.add_op("c", "Add", OpPattern::ElemWise, &[a, b]);
        let d = g.add_op("d", "Exp", OpPattern::ElemWise, &[]);
        (g, [a, b, c, d])
    }

    #[test]
    fn test_bit_row() {
        let mut r = BitRow::with_len(10);
        r.set(3);
        r.set(130);
        assert!(r.contains(3));
        assert!(r.contains(130));
        assert!(!r.contains(4));
        assert!(!r.contains(1000));
        assert_eq!(r.count(), 2);

        let mut other = BitRow::default();
        other.set(130);
        assert!(r.intersects(&other));
        other.union_with(&r);
        assert_eq!(other.count(), 2);
    }

    #[test]
    fn test_build_reachability() {
        let (g, [a, b, c, d]) = make_graph();
        let m = ConnectionMatrix::build(&g).unwrap();

        assert_eq!(m.len(), 4);
        assert!(m.is_reachable(a, c));
        assert!(m.is_reachable(b, c));
        assert!(m.is_reachable(a, a));
        assert!(!m.is_reachable(c, a));
        assert!(!m.is_reachable(d, c));
    }

    #[test]
    fn test_build_rejects_cycle() {
        let (mut g, [a, _b, c, _d]) = make_graph();
        g.add_control_edge(c, a).unwrap();
        assert!(ConnectionMatrix::build(&g).is_err());
    }

    #[test]
    fn test_cycle_witness() {
        let (g, [a, b, c, _d]) = make_graph();
        let m = ConnectionMatrix::build(&g).unwrap();

        // Fusing a and c leaves b on the path a -> b -> c
        assert_eq!(m.find_cycle_witness(&g, &[a, c]), Some(b));
        assert!(!m.creates_cycle(&g, &[a, b]));
        assert!(!m.creates_cycle(&g, &[a, b, c]));
    }

    #[test]
    fn test_update_merges_group() {
        // x -> y, p -> q: fusing {y, p} makes q reachable from x
        let mut g = ComputeGraph::new("g");
        let x = g.add_op("x", "Relu", OpPattern::ElemWise, &[]);
        let y = g.add_op("y", "Abs", OpPattern::ElemWise, &[x]);
        let p = g.add_op("p", "Exp", OpPattern::ElemWise, &[]);
        let q = g.add_op("q", "Neg", OpPattern::ElemWise, &[p]);

        let mut m = ConnectionMatrix::build(&g).unwrap();
        assert!(!m.is_reachable(x, q));

        let backup = m.clone();
        m.update(&[y, p]);
        assert!(m.is_reachable(x, q));
        assert!(m.is_reachable(x, p));
        assert!(!m.is_reachable(q, x));

        m = backup;
        assert!(!m.is_reachable(x, q));
    }

    #[test]
    fn test_insert_node() {
        let (mut g, [a, _b, c, _d]) = make_graph();
        let mut m = ConnectionMatrix::build(&g).unwrap();
        let e = g.add_op("e", "Neg", OpPattern::ElemWise, &[c]);
        assert!(!m.contains_node(e));
        m.insert_node(&g, e);
        assert!(m.is_reachable(a, e));
        assert!(!m.is_reachable(e, a));
    }
}
