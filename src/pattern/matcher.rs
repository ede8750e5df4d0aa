//! Backtracking pattern matcher
//!
//! Matching grows a mapping outward from a head node along data edges, one
//! round per dequeued node: each data successor of the node is offered to
//! the descriptors that are live at that point of the pattern. Candidates
//! that would close a cycle through an unmatched node are blacklisted, and
//! an alternative branch that excludes the matched node responsible instead
//! is queued on an explicit stack. The best mapping over all branches wins.
//!
//! # Example
//!
//! ```ignore
//! use fusion_engine::pattern::PatternMatcher;
//!
//! let matcher = PatternMatcher::new(&graph, &matrix, &config.matcher).with_scopes(&scopes);
//! for mapping in matcher.match_pattern(&pattern) {
//!     println!("{} from {}: {:?}", mapping.pattern_name(), mapping.head(), mapping.fused_nodes());
//! }
//! ```

use std::collections::{BTreeSet, VecDeque};

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use super::builder::FusionPattern;
use super::desc::{DescId, DescKind, OpDesc};
use super::mapping::Mapping;
use crate::config::MatcherConfig;
use crate::graph::{group_creates_cycle, ComputeGraph, NodeId};
use crate::reach::ConnectionMatrix;
use crate::scope::ScopeTable;

/// Mutable search state of one backtracking branch
#[derive(Debug, Clone)]
pub struct MatchState {
    /// Matched (node, descriptor) pairs whose successors are still to be explored
    pub cursor_queue: VecDeque<(NodeId, DescId)>,
    /// Mapping built so far
    pub mapping: Mapping,
    /// Nodes matched under non-sentinel descriptors
    pub matched: FxHashSet<NodeId>,
    /// `matched` in acceptance order
    pub match_order: Vec<NodeId>,
    /// Nodes excluded from this branch
    pub blacklist: BTreeSet<NodeId>,
    /// Repeat count per descriptor
    pub repeats: Vec<usize>,
}

impl MatchState {
    /// Initial state with `head` matched to descriptor `desc`
    pub fn seed(pattern: &FusionPattern, head: NodeId, desc: DescId) -> Self {
        let mut mapping = Mapping::new(pattern.name(), head);
        let mut matched = FxHashSet::default();
        let mut match_order = Vec::new();
        let mut repeats = vec![0; pattern.descs().len()];

        if let Some(d) = pattern.desc(desc) {
            let sentinel = d.kind().is_sentinel();
            mapping.push(&d.name, sentinel, head);
            if !sentinel {
                matched.insert(head);
                match_order.push(head);
            }
            repeats[desc] = 1;
        }

        Self {
            cursor_queue: VecDeque::from([(head, desc)]),
            mapping,
            matched,
            match_order,
            blacklist: BTreeSet::new(),
            repeats,
        }
    }
}

/// Outcome of matching from one node, with search diagnostics
#[derive(Debug, Clone, Default)]
pub struct MatchReport {
    /// Best acyclic mapping, if any
    pub mapping: Option<Mapping>,
    /// Backtracking branches explored
    pub branches: usize,
    /// Every node blacklisted in any branch
    pub blacklisted: BTreeSet<NodeId>,
}

/// Per-round descriptor usage
#[derive(Debug, Default)]
struct Round {
    used: Vec<(DescId, Vec<NodeId>)>,
    groups: FxHashMap<u32, DescId>,
    eligible: usize,
}

impl Round {
    fn available(&self, id: DescId, desc: &OpDesc) -> bool {
        if let Some(group) = desc.group {
            if let Some(&owner) = self.groups.get(&group) {
                if owner != id {
                    return false;
                }
            }
        }
        desc.parallel || !self.used.iter().any(|(used, _)| *used == id)
    }

    fn accept(&mut self, id: DescId, desc: &OpDesc, node: NodeId) {
        if let Some(group) = desc.group {
            self.groups.entry(group).or_insert(id);
        }
        match self.used.iter_mut().find(|(used, _)| *used == id) {
            Some((_, nodes)) => nodes.push(node),
            None => self.used.push((id, vec![node])),
        }
    }
}

/// Pattern matcher over one graph and its reachability index
pub struct PatternMatcher<'a> {
    graph: &'a ComputeGraph,
    matrix: &'a ConnectionMatrix,
    scopes: Option<&'a ScopeTable>,
    max_backtracks: usize,
}

impl<'a> PatternMatcher<'a> {
    /// Create a matcher
    pub fn new(graph: &'a ComputeGraph, matrix: &'a ConnectionMatrix, config: &MatcherConfig) -> Self {
        Self {
            graph,
            matrix,
            scopes: None,
            max_backtracks: config.max_backtracks,
        }
    }

    /// Exclude nodes already claimed by a scope and treat scopes as units
    /// in the final cycle check
    pub fn with_scopes(mut self, scopes: &'a ScopeTable) -> Self {
        self.scopes = Some(scopes);
        self
    }

    /// Best mapping for every node satisfying a head descriptor, in
    /// topological order
    pub fn match_pattern(&self, pattern: &FusionPattern) -> Vec<Mapping> {
        let order = self
            .graph
            .topological_sort()
            .unwrap_or_else(|_| self.graph.node_ids());
        order
            .into_iter()
            .filter_map(|id| self.match_from(pattern, id))
            .collect()
    }

    /// Best mapping seeded at `node`
    pub fn match_from(&self, pattern: &FusionPattern, node: NodeId) -> Option<Mapping> {
        self.match_with_report(pattern, node).mapping
    }

    /// Like [`match_from`](Self::match_from), keeping search diagnostics
    pub fn match_with_report(&self, pattern: &FusionPattern, node: NodeId) -> MatchReport {
        let mut report = MatchReport::default();
        for &head in pattern.heads() {
            let head_report = self.search(pattern, node, head);
            report.branches += head_report.branches;
            report.blacklisted.extend(head_report.blacklisted);
            if let Some(mapping) = head_report.mapping {
                if report
                    .mapping
                    .as_ref()
                    .map_or(true, |best| mapping.is_better_than(best))
                {
                    report.mapping = Some(mapping);
                }
            }
        }
        if let Some(mapping) = &report.mapping {
            debug!(
                pattern = pattern.name(),
                head = %node,
                nodes = mapping.total_count(),
                branches = report.branches,
                "pattern matched"
            );
        }
        report
    }

    fn search(&self, pattern: &FusionPattern, node: NodeId, head: DescId) -> MatchReport {
        let mut report = MatchReport::default();
        if !self.can_seed(pattern, node, head) {
            return report;
        }

        let seed = MatchState::seed(pattern, node, head);
        let mut stack = vec![seed.clone()];
        let mut tried: FxHashSet<Vec<NodeId>> = FxHashSet::default();
        tried.insert(Vec::new());
        let mut best: Option<Mapping> = None;

        while let Some(mut state) = stack.pop() {
            if report.branches > self.max_backtracks {
                trace!(pattern = pattern.name(), head = %node, "backtrack limit reached");
                break;
            }
            report.branches += 1;

            let start_blacklist = state.blacklist.clone();
            let offenders = self.expand(pattern, &mut state);
            report.blacklisted.extend(state.blacklist.iter().copied());

            for offender in offenders {
                let mut blacklist = start_blacklist.clone();
                blacklist.insert(offender);
                if tried.insert(blacklist.iter().copied().collect()) {
                    let mut retry = seed.clone();
                    retry.blacklist = blacklist;
                    stack.push(retry);
                }
            }

            if !minimums_met(pattern, head, &state.repeats) {
                continue;
            }
            if best
                .as_ref()
                .map_or(true, |b| state.mapping.is_better_than(b))
            {
                best = Some(state.mapping);
            }
        }

        report.mapping = best.filter(|m| self.group_is_acyclic(m));
        report
    }

    fn can_seed(&self, pattern: &FusionPattern, node: NodeId, head: DescId) -> bool {
        let (Some(n), Some(d)) = (self.graph.node(node), pattern.desc(head)) else {
            return false;
        };
        if d.kind() != DescKind::Output && self.is_claimed(node) {
            return false;
        }
        d.accepts(n) && d.branch.accepts(self.graph.data_successors(node).len())
    }

    fn is_claimed(&self, node: NodeId) -> bool {
        self.scopes.map_or(false, |s| s.is_claimed(node))
    }

    /// Run one branch until its queue drains; returns matched nodes whose
    /// exclusion might let a blacklisted candidate in
    fn expand(&self, pattern: &FusionPattern, state: &mut MatchState) -> Vec<NodeId> {
        let mut offenders = Vec::new();

        while let Some((node, desc)) = state.cursor_queue.pop_front() {
            let live = live_successors(pattern, desc, &state.repeats);
            if live.is_empty() {
                continue;
            }

            let successors = self.graph.data_successors(node);
            let mut round = Round::default();

            for &succ in &successors {
                if state.blacklist.contains(&succ) || state.matched.contains(&succ) {
                    continue;
                }
                let Some(chosen) = self.choose_desc(pattern, &live, &round, succ) else {
                    round.eligible += 1;
                    continue;
                };
                let Some(d) = pattern.desc(chosen) else {
                    continue;
                };
                let sentinel = d.kind().is_sentinel();

                if !sentinel {
                    if let Some(offender) = self.cycle_conflict(state, succ) {
                        trace!(candidate = %succ, "candidate closes a cycle");
                        state.blacklist.insert(succ);
                        if let Some(o) = offender {
                            if !offenders.contains(&o) {
                                offenders.push(o);
                            }
                        }
                        continue;
                    }
                    state.matched.insert(succ);
                    state.match_order.push(succ);
                }

                round.eligible += 1;
                state.mapping.push(&d.name, sentinel, succ);
                round.accept(chosen, d, succ);
            }

            close_round(pattern, state, round);
        }

        offenders
    }

    fn choose_desc(
        &self,
        pattern: &FusionPattern,
        live: &[DescId],
        round: &Round,
        node: NodeId,
    ) -> Option<DescId> {
        let n = self.graph.node(node)?;
        let claimed = self.is_claimed(node);
        let fanout = self.graph.data_successors(node).len();

        let mut best: Option<(DescKind, DescId)> = None;
        for &id in live {
            let Some(d) = pattern.desc(id) else {
                continue;
            };
            let kind = d.kind();
            if kind != DescKind::Output && claimed {
                continue;
            }
            if !d.accepts(n) || !d.branch.accepts(fanout) || !round.available(id, d) {
                continue;
            }
            if best.map_or(true, |(k, _)| kind < k) {
                best = Some((kind, id));
            }
        }
        best.map(|(_, id)| id)
    }

    /// Whether accepting `candidate` would put an unmatched node on a path
    /// between two matched ones
    ///
    /// Returns the first non-head matched node on such a path, if any.
    fn cycle_conflict(&self, state: &MatchState, candidate: NodeId) -> Option<Option<NodeId>> {
        let head = state.mapping.head();

        for pred in self.graph.all_predecessors(candidate) {
            if state.matched.contains(&pred) {
                continue;
            }
            let reaching: Vec<NodeId> = state
                .match_order
                .iter()
                .copied()
                .filter(|&m| self.matrix.is_reachable(m, pred))
                .collect();
            if !reaching.is_empty() {
                return Some(reaching.into_iter().find(|&m| m != head));
            }
        }

        for succ in self.graph.all_successors(candidate) {
            if state.matched.contains(&succ) {
                continue;
            }
            let reached: Vec<NodeId> = state
                .match_order
                .iter()
                .copied()
                .filter(|&m| self.matrix.is_reachable(succ, m))
                .collect();
            if !reached.is_empty() {
                return Some(reached.into_iter().find(|&m| m != head));
            }
        }

        None
    }

    fn group_is_acyclic(&self, mapping: &Mapping) -> bool {
        let fused = mapping.fused_nodes();
        if fused.is_empty() {
            return false;
        }
        let cyclic = match self.scopes {
            Some(scopes) => scopes.group_creates_cycle(self.graph, &fused),
            None => group_creates_cycle(self.graph, &fused, |n| vec![n]),
        };
        if cyclic {
            debug!(pattern = mapping.pattern_name(), head = %mapping.head(), "mapping dropped by cycle check");
        }
        !cyclic
    }
}

/// Descriptors a successor of a node matched to `desc` may take
///
/// The descriptor itself stays live below its max repeat. Once its minimum
/// is met its outputs are live too, and optional or satisfied outputs pass
/// liveness on to their own outputs.
fn live_successors(pattern: &FusionPattern, desc: DescId, repeats: &[usize]) -> Vec<DescId> {
    let mut live = Vec::new();
    let Some(d) = pattern.desc(desc) else {
        return live;
    };
    let mut seen: FxHashSet<DescId> = FxHashSet::default();
    seen.insert(desc);
    if repeats[desc] < d.repeat_max {
        live.push(desc);
    }
    if repeats[desc] < d.repeat_min {
        return live;
    }

    let mut queue: VecDeque<DescId> = d.outputs().iter().copied().collect();
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        let Some(out) = pattern.desc(id) else {
            continue;
        };
        if repeats[id] < out.repeat_max {
            live.push(id);
        }
        if repeats[id] >= out.repeat_min {
            queue.extend(out.outputs().iter().copied());
        }
    }
    live
}

/// Commit a round: parallel descriptors that missed a sibling are rolled
/// back, the rest bump their repeat counts. Only concrete matches are
/// queued for expansion; sentinel matches stay outside the fused set, so
/// anything past them would close a cycle through them
fn close_round(pattern: &FusionPattern, state: &mut MatchState, round: Round) {
    for (id, nodes) in round.used {
        let Some(d) = pattern.desc(id) else {
            continue;
        };
        let kind = d.kind();

        if d.parallel && nodes.len() < round.eligible {
            for node in nodes {
                state.mapping.remove(&d.name, node);
                if !kind.is_sentinel() {
                    state.matched.remove(&node);
                    state.match_order.retain(|m| *m != node);
                }
            }
            continue;
        }

        state.repeats[id] += if d.parallel { 1 } else { nodes.len() };
        if kind == DescKind::Concrete {
            state
                .cursor_queue
                .extend(nodes.into_iter().map(|node| (node, id)));
        }
    }
}

/// Whether every descriptor reachable from `head` met its minimum repeat
///
/// Sentinels are never required. An absent member of a mutual-exclusion
/// group is exempt, with its subtree, when another member of the group matched.
fn minimums_met(pattern: &FusionPattern, head: DescId, repeats: &[usize]) -> bool {
    let descs = pattern.descs();
    let mut seen: FxHashSet<DescId> = FxHashSet::default();
    let mut queue: VecDeque<DescId> = VecDeque::from([head]);

    while let Some(id) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        let d = &descs[id];
        if d.kind().is_sentinel() {
            if repeats[id] > 0 {
                queue.extend(d.outputs().iter().copied());
            }
            continue;
        }
        if repeats[id] == 0 {
            if let Some(group) = d.group {
                let alternative_matched = descs
                    .iter()
                    .enumerate()
                    .any(|(i, o)| i != id && o.group == Some(group) && repeats[i] > 0);
                if alternative_matched {
                    continue;
                }
            }
        }
        if repeats[id] < d.repeat_min {
            return false;
        }
        queue.extend(d.outputs().iter().copied());
    }
    true
}
