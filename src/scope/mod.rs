//! Fusion scope manager
//!
//! A scope is a group of nodes that will be compiled into one fused kernel.
//! The table hands out monotonically increasing ids, enforces that a node
//! belongs to at most one live scope, and keeps every scope within the
//! platform's size ceiling. Rejected operations leave the table untouched.

use std::collections::BTreeMap;
use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::error::{EngineResult, FusionError};
use crate::graph::{
    group_creates_cycle, AttrValue, ComputeGraph, NodeId, ATTR_PASS_NAME, ATTR_SCOPE_ID,
};

/// Identifier of a fusion scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u64);

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// One live scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeRecord {
    /// Scope id
    pub id: ScopeId,
    /// Member nodes in insertion order
    pub members: Vec<NodeId>,
    /// Whether the members use the dynamic-shape implementation
    pub dynamic: bool,
    /// Pass that created or last extended the scope
    pub pass_name: String,
}

/// Table of all live scopes of one graph
#[derive(Debug, Clone)]
pub struct ScopeTable {
    next_id: u64,
    scopes: BTreeMap<ScopeId, ScopeRecord>,
    node_scope: FxHashMap<NodeId, ScopeId>,
    max_scope_size: usize,
}

impl ScopeTable {
    /// Create an empty table with the given per-scope node ceiling
    pub fn new(max_scope_size: usize) -> Self {
        Self {
            next_id: 0,
            scopes: BTreeMap::new(),
            node_scope: FxHashMap::default(),
            max_scope_size,
        }
    }

    /// Rebuild the table from scope ids persisted on node attributes
    pub fn from_graph(graph: &ComputeGraph, max_scope_size: usize) -> EngineResult<Self> {
        let mut table = Self::new(max_scope_size);

        for node in graph.nodes() {
            let Some(raw) = node.scope_attr() else {
                continue;
            };
            let id = ScopeId(raw);
            let pass_name = node
                .attr(ATTR_PASS_NAME)
                .and_then(AttrValue::as_str)
                .unwrap_or_default()
                .to_string();
            let record = table.scopes.entry(id).or_insert_with(|| ScopeRecord {
                id,
                members: Vec::new(),
                dynamic: node.dynamic_impl,
                pass_name,
            });
            if record.dynamic != node.dynamic_impl {
                return Err(FusionError::ScopeKindMismatch(format!(
                    "persisted scope {} mixes dynamic and static nodes",
                    id
                )));
            }
            record.members.push(node.id());
            table.node_scope.insert(node.id(), id);
            table.next_id = table.next_id.max(raw + 1);
        }

        Ok(table)
    }

    /// Per-scope node ceiling
    pub fn max_scope_size(&self) -> usize {
        self.max_scope_size
    }

    /// Reserve a fresh id
    pub fn allocate(&mut self) -> ScopeId {
        let id = ScopeId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Create a scope over `nodes`
    ///
    /// Fails without touching the table if a node is missing or already
    /// scoped, if the group exceeds the ceiling, or if it mixes dynamic and
    /// static nodes.
    pub fn create(
        &mut self,
        graph: &ComputeGraph,
        nodes: &[NodeId],
        pass_name: &str,
    ) -> EngineResult<ScopeId> {
        let mut members: Vec<NodeId> = Vec::with_capacity(nodes.len());
        let mut seen = FxHashSet::default();
        for &id in nodes {
            if seen.insert(id) {
                members.push(id);
            }
        }
        if members.is_empty() {
            return Err(FusionError::Internal("cannot create an empty scope".into()));
        }

        for &id in &members {
            graph.try_node(id)?;
            if let Some(&scope) = self.node_scope.get(&id) {
                return Err(FusionError::ScopeConflict { node: id, scope });
            }
        }
        self.check_size(members.len())?;
        let dynamic = Self::uniform_kind(graph, &members)?;

        let id = self.allocate();
        for &m in &members {
            self.node_scope.insert(m, id);
        }
        debug!(scope = %id, size = members.len(), pass = pass_name, "scope created");
        self.scopes.insert(
            id,
            ScopeRecord {
                id,
                members,
                dynamic,
                pass_name: pass_name.to_string(),
            },
        );
        Ok(id)
    }

    /// Add an unscoped node to an existing scope
    pub fn add_member(
        &mut self,
        graph: &ComputeGraph,
        scope: ScopeId,
        node: NodeId,
    ) -> EngineResult<()> {
        let dynamic = graph.try_node(node)?.dynamic_impl;
        if let Some(&owner) = self.node_scope.get(&node) {
            return Err(FusionError::ScopeConflict { node, scope: owner });
        }
        let record = self
            .scopes
            .get(&scope)
            .ok_or(FusionError::ScopeNotFound(scope))?;
        self.check_size(record.members.len() + 1)?;
        if record.dynamic != dynamic {
            return Err(FusionError::ScopeKindMismatch(format!(
                "{} cannot join scope {}",
                node, scope
            )));
        }

        if let Some(record) = self.scopes.get_mut(&scope) {
            record.members.push(node);
        }
        self.node_scope.insert(node, scope);
        Ok(())
    }

    /// Merge two scopes, re-pointing the smaller into the larger
    ///
    /// Returns the surviving id. Equal sizes keep the older scope.
    pub fn merge(&mut self, a: ScopeId, b: ScopeId) -> EngineResult<ScopeId> {
        if a == b {
            return if self.scopes.contains_key(&a) {
                Ok(a)
            } else {
                Err(FusionError::ScopeNotFound(a))
            };
        }
        let ra = self.scopes.get(&a).ok_or(FusionError::ScopeNotFound(a))?;
        let rb = self.scopes.get(&b).ok_or(FusionError::ScopeNotFound(b))?;

        self.check_size(ra.members.len() + rb.members.len())?;
        if ra.dynamic != rb.dynamic {
            return Err(FusionError::ScopeKindMismatch(format!(
                "scopes {} and {} differ in implementation kind",
                a, b
            )));
        }

        let (keep, retire) = if rb.members.len() > ra.members.len()
            || (rb.members.len() == ra.members.len() && b < a)
        {
            (b, a)
        } else {
            (a, b)
        };

        let Some(retired) = self.scopes.remove(&retire) else {
            return Err(FusionError::ScopeNotFound(retire));
        };
        for &m in &retired.members {
            self.node_scope.insert(m, keep);
        }
        if let Some(record) = self.scopes.get_mut(&keep) {
            record.members.extend(retired.members);
        }
        debug!(kept = %keep, retired = %retire, "scopes merged");
        Ok(keep)
    }

    /// Scope owning a node
    pub fn scope_of(&self, node: NodeId) -> Option<ScopeId> {
        self.node_scope.get(&node).copied()
    }

    /// Whether a node already belongs to a live scope
    pub fn is_claimed(&self, node: NodeId) -> bool {
        self.node_scope.contains_key(&node)
    }

    /// Members of a scope; empty for unknown ids
    pub fn members(&self, scope: ScopeId) -> &[NodeId] {
        self.scopes
            .get(&scope)
            .map(|r| r.members.as_slice())
            .unwrap_or(&[])
    }

    /// Record of a live scope
    pub fn record(&self, scope: ScopeId) -> Option<&ScopeRecord> {
        self.scopes.get(&scope)
    }

    /// Live scopes ordered by id
    pub fn live_scopes(&self) -> impl Iterator<Item = &ScopeRecord> {
        self.scopes.values()
    }

    /// Number of live scopes
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    /// Check if there are no live scopes
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// The contraction unit of a node: its scope members, or the node alone
    pub fn unit_of(&self, node: NodeId) -> Vec<NodeId> {
        match self.scope_of(node) {
            Some(scope) => self.members(scope).to_vec(),
            None => vec![node],
        }
    }

    /// Whether contracting `group` (together with the scopes its members
    /// already belong to) would create a cycle in the graph
    pub fn group_creates_cycle(&self, graph: &ComputeGraph, group: &[NodeId]) -> bool {
        let mut expanded: Vec<NodeId> = Vec::with_capacity(group.len());
        let mut seen = FxHashSet::default();
        for &id in group {
            for m in self.unit_of(id) {
                if seen.insert(m) {
                    expanded.push(m);
                }
            }
        }
        group_creates_cycle(graph, &expanded, |n| self.unit_of(n))
    }

    /// Drop members that no longer exist in the graph, retiring empty scopes
    pub fn retain_existing(&mut self, graph: &ComputeGraph) {
        self.node_scope.retain(|id, _| graph.contains(*id));
        for record in self.scopes.values_mut() {
            record.members.retain(|id| graph.contains(*id));
        }
        self.scopes.retain(|_, r| !r.members.is_empty());
    }

    /// Whether the graph stays acyclic with every scope contracted to one node
    pub fn quotient_is_acyclic(&self, graph: &ComputeGraph) -> bool {
        let mut unit: FxHashMap<NodeId, usize> = FxHashMap::default();
        let mut unit_count = 0usize;
        for record in self.scopes.values() {
            for &m in &record.members {
                unit.insert(m, unit_count);
            }
            unit_count += 1;
        }
        for id in graph.node_ids() {
            unit.entry(id).or_insert_with(|| {
                unit_count += 1;
                unit_count - 1
            });
        }

        let mut edges: FxHashSet<(usize, usize)> = FxHashSet::default();
        for id in graph.node_ids() {
            let from = unit[&id];
            for succ in graph.all_successors(id) {
                if let Some(&to) = unit.get(&succ) {
                    if from != to {
                        edges.insert((from, to));
                    }
                }
            }
        }

        let mut indegree = vec![0usize; unit_count];
        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); unit_count];
        for &(from, to) in &edges {
            adjacency[from].push(to);
            indegree[to] += 1;
        }
        let mut ready: Vec<usize> = (0..unit_count).filter(|&u| indegree[u] == 0).collect();
        let mut visited = 0usize;
        while let Some(u) = ready.pop() {
            visited += 1;
            for &v in &adjacency[u] {
                indegree[v] -= 1;
                if indegree[v] == 0 {
                    ready.push(v);
                }
            }
        }
        visited == unit_count
    }

    /// Write scope ids and pass names onto node attributes
    ///
    /// Nodes that carry a stale scope attribute but are no longer scoped get
    /// it removed.
    pub fn persist(&self, graph: &mut ComputeGraph) {
        for id in graph.node_ids() {
            let Some(node) = graph.node_mut(id) else {
                continue;
            };
            match self.node_scope.get(&id).and_then(|s| self.scopes.get(s)) {
                Some(record) => {
                    node.set_attr(ATTR_SCOPE_ID, AttrValue::Int(record.id.0 as i64));
                    node.set_attr(ATTR_PASS_NAME, AttrValue::Str(record.pass_name.clone()));
                }
                None => {
                    node.remove_attr(ATTR_SCOPE_ID);
                    node.remove_attr(ATTR_PASS_NAME);
                }
            }
        }
    }

    fn check_size(&self, size: usize) -> EngineResult<()> {
        if size > self.max_scope_size {
            return Err(FusionError::ScopeOverflow {
                size,
                limit: self.max_scope_size,
            });
        }
        Ok(())
    }

    fn uniform_kind(graph: &ComputeGraph, members: &[NodeId]) -> EngineResult<bool> {
        let mut kind: Option<bool> = None;
        for &id in members {
            let dynamic = graph.try_node(id)?.dynamic_impl;
            match kind {
                None => kind = Some(dynamic),
                Some(k) if k != dynamic => {
                    return Err(FusionError::ScopeKindMismatch(format!(
                        "{} differs in implementation kind from the rest of the group",
                        id
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(kind.unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::OpPattern;

    fn make_test_graph() -> (ComputeGraph, Vec<NodeId>) {
        let mut g = ComputeGraph::new("scopes");
        let a = g.add_op("a", "Relu", OpPattern::ElemWise, &[]);
        let b = g.add_op("b", "Abs", OpPattern::ElemWise, &[a]);
        let c = g.add_op("c", "Exp", OpPattern::ElemWise, &[b]);
        let d = g.add_op("d", "Neg", OpPattern::ElemWise, &[c]);
        (g, vec![a, b, c, d])
    }

    #[test]
    fn test_create_and_lookup() {
        let (g, n) = make_test_graph();
        let mut table = ScopeTable::new(8);
        let s = table.create(&g, &[n[0], n[1]], "p").unwrap();

        assert_eq!(table.scope_of(n[0]), Some(s));
        assert!(table.is_claimed(n[1]));
        assert!(!table.is_claimed(n[2]));
        assert_eq!(table.members(s), &[n[0], n[1]]);
        assert_eq!(table.record(s).unwrap().pass_name, "p");
    }

    #[test]
    fn test_ids_are_monotonic() {
        let (g, n) = make_test_graph();
        let mut table = ScopeTable::new(8);
        let s0 = table.create(&g, &[n[0]], "p").unwrap();
        let s1 = table.create(&g, &[n[1]], "p").unwrap();
        let merged = table.merge(s0, s1).unwrap();
        let s2 = table.create(&g, &[n[2]], "p").unwrap();
        assert!(s0 < s1 && s1 < s2);
        assert_eq!(merged, s0);
    }

    #[test]
    fn test_conflict_rejected() {
        let (g, n) = make_test_graph();
        let mut table = ScopeTable::new(8);
        let s = table.create(&g, &[n[0], n[1]], "p").unwrap();
        let err = table.create(&g, &[n[1], n[2]], "q").unwrap_err();
        assert!(matches!(err, FusionError::ScopeConflict { scope, .. } if scope == s));
        assert!(!table.is_claimed(n[2]));
    }

    #[test]
    fn test_overflow_leaves_state_unchanged() {
        let (g, n) = make_test_graph();
        let mut table = ScopeTable::new(3);
        let a = table.create(&g, &[n[0], n[1]], "p").unwrap();
        let b = table.create(&g, &[n[2], n[3]], "p").unwrap();

        let err = table.merge(a, b).unwrap_err();
        assert!(matches!(err, FusionError::ScopeOverflow { size: 4, limit: 3 }));
        assert_eq!(table.members(a), &[n[0], n[1]]);
        assert_eq!(table.members(b), &[n[2], n[3]]);

        // Repeating the rejected merge changes nothing either
        assert!(table.merge(a, b).is_err());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_kind_mismatch() {
        let (mut g, n) = make_test_graph();
        g.node_mut(n[1]).unwrap().dynamic_impl = true;
        let mut table = ScopeTable::new(8);
        assert!(matches!(
            table.create(&g, &[n[0], n[1]], "p"),
            Err(FusionError::ScopeKindMismatch(_))
        ));

        let s = table.create(&g, &[n[0]], "p").unwrap();
        assert!(table.add_member(&g, s, n[1]).is_err());
        assert_eq!(table.members(s), &[n[0]]);
    }

    #[test]
    fn test_merge_smaller_into_larger() {
        let (g, n) = make_test_graph();
        let mut table = ScopeTable::new(8);
        let small = table.create(&g, &[n[0]], "p").unwrap();
        let large = table.create(&g, &[n[1], n[2]], "p").unwrap();

        let kept = table.merge(small, large).unwrap();
        assert_eq!(kept, large);
        assert!(table.record(small).is_none());
        assert_eq!(table.scope_of(n[0]), Some(large));
        assert_eq!(table.members(large).len(), 3);
    }

    #[test]
    fn test_persist_and_reload() {
        let (mut g, n) = make_test_graph();
        let mut table = ScopeTable::new(8);
        let s = table.create(&g, &[n[1], n[2]], "chain").unwrap();
        table.persist(&mut g);

        assert_eq!(g.node(n[1]).unwrap().scope_attr(), Some(s.0));
        assert_eq!(g.node(n[0]).unwrap().scope_attr(), None);

        let reloaded = ScopeTable::from_graph(&g, 8).unwrap();
        assert_eq!(reloaded.scope_of(n[2]), Some(s));
        assert_eq!(reloaded.record(s).unwrap().pass_name, "chain");

        let mut reloaded = reloaded;
        assert!(reloaded.allocate() > s);
    }

    #[test]
    fn test_retain_existing() {
        let (mut g, n) = make_test_graph();
        let mut table = ScopeTable::new(8);
        let s = table.create(&g, &[n[3]], "p").unwrap();
        g.remove_node(n[3]).unwrap();
        table.retain_existing(&g);
        assert!(table.record(s).is_none());
        assert!(!table.is_claimed(n[3]));
    }

    #[test]
    fn test_quotient_cycle() {
        let (g, n) = make_test_graph();
        let mut table = ScopeTable::new(8);
        assert!(table.group_creates_cycle(&g, &[n[0], n[2]]));
        assert!(!table.group_creates_cycle(&g, &[n[0], n[1]]));

        // Bypassing the scope check to force an illegal contraction
        table.create(&g, &[n[0], n[2]], "bad").unwrap();
        assert!(!table.quotient_is_acyclic(&g));

        let mut ok = ScopeTable::new(8);
        ok.create(&g, &[n[1], n[2]], "good").unwrap();
        assert!(ok.quotient_is_acyclic(&g));
    }
}
