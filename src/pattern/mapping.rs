//! Result of matching one pattern from one head node

use indexmap::IndexMap;
use rustc_hash::FxHashSet;

use crate::graph::NodeId;

/// Descriptor name to the concrete nodes matched into that role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pattern: String,
    head: NodeId,
    entries: IndexMap<String, Vec<NodeId>>,
    sentinels: FxHashSet<String>,
}

impl Mapping {
    /// Empty mapping for `pattern` seeded at `head`
    pub fn new(pattern: &str, head: NodeId) -> Self {
        Self {
            pattern: pattern.to_string(),
            head,
            entries: IndexMap::new(),
            sentinels: FxHashSet::default(),
        }
    }

    /// Record a node under a descriptor
    pub fn push(&mut self, desc: &str, sentinel: bool, node: NodeId) {
        if sentinel {
            self.sentinels.insert(desc.to_string());
        }
        self.entries.entry(desc.to_string()).or_default().push(node);
    }

    /// Remove a node recorded under a descriptor
    pub(crate) fn remove(&mut self, desc: &str, node: NodeId) {
        if let Some(nodes) = self.entries.get_mut(desc) {
            nodes.retain(|n| *n != node);
            if nodes.is_empty() {
                self.entries.shift_remove(desc);
            }
        }
    }

    /// Pattern name
    pub fn pattern_name(&self) -> &str {
        &self.pattern
    }

    /// Node the match was seeded from
    pub fn head(&self) -> NodeId {
        self.head
    }

    /// Nodes matched to a descriptor
    pub fn nodes_for(&self, desc: &str) -> &[NodeId] {
        self.entries.get(desc).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Entries in match order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[NodeId])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Whether a descriptor is a wildcard or boundary sentinel
    pub fn is_sentinel(&self, desc: &str) -> bool {
        self.sentinels.contains(desc)
    }

    /// Nodes to fuse: every match except sentinel ones, deduplicated
    pub fn fused_nodes(&self) -> Vec<NodeId> {
        let mut seen = FxHashSet::default();
        self.entries
            .iter()
            .filter(|(desc, _)| !self.sentinels.contains(*desc))
            .flat_map(|(_, nodes)| nodes.iter().copied())
            .filter(|n| seen.insert(*n))
            .collect()
    }

    /// Whether a node is matched under a non-sentinel descriptor
    pub fn contains(&self, node: NodeId) -> bool {
        self.entries
            .iter()
            .filter(|(desc, _)| !self.sentinels.contains(*desc))
            .any(|(_, nodes)| nodes.contains(&node))
    }

    /// Matched entries, counting repeats and sentinels
    pub fn total_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Distinct matched nodes, sentinels included
    pub fn distinct_count(&self) -> usize {
        self.entries
            .values()
            .flatten()
            .collect::<FxHashSet<_>>()
            .len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `self` beats `other`: more entries, then more distinct nodes
    pub fn is_better_than(&self, other: &Mapping) -> bool {
        (self.total_count(), self.distinct_count()) > (other.total_count(), other.distinct_count())
    }
}
