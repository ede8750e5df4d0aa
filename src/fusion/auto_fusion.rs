//! Opportunistic fusion of simple operators
//!
//! Without any authored pattern, adjacent element-wise and broadcast nodes
//! are grouped into scopes. Nodes are visited in reverse topological order
//! so every producer sees the scopes its consumers already joined.
//!
//! A producer may join a consumer's scope only if it "fuses on all paths"
//! into it: the consumer is fusible, and every other operand of the
//! consumer that the producer reaches can itself fuse into the consumer.
//! Otherwise fusing would leave a node outside the group on a path between
//! two members.

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;
use tracing::{debug, info};

use super::session::FusionSession;
use crate::config::{DuplicationPolicy, PlatformInfo};
use crate::error::{EngineResult, FusionError};
use crate::graph::{AttrValue, ComputeGraph, NodeId, OpPattern, ATTR_DUP_COUNT, ATTR_PASS_NAME, ATTR_SCOPE_ID};
use crate::scope::ScopeId;
use crate::traits::SliceInfoCalculator;

/// Pass name recorded on scopes formed by opportunistic fusion
pub const AUTO_FUSION_PASS: &str = "AutomaticUbFusion";

/// Result of one opportunistic fusion run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoFusionOutcome {
    /// Scopes created or extended, still live, by id
    pub scopes: Vec<ScopeId>,
    /// Nodes marked unable to fuse
    pub unable: BTreeSet<NodeId>,
    /// Producers fused into a subset of their consumers
    pub duplicated: Vec<NodeId>,
    /// Merges refused by the cycle guard or the scope table
    pub rejected_merges: usize,
}

/// Opportunistic fusion over a whole graph
pub struct AutoFusion<'a> {
    platform: &'a PlatformInfo,
    fusible: &'a [OpPattern],
    slice_calc: Option<&'a dyn SliceInfoCalculator>,
}

impl<'a> AutoFusion<'a> {
    /// Create a run fusing nodes tagged with one of `fusible`
    pub fn new(platform: &'a PlatformInfo, fusible: &'a [OpPattern]) -> Self {
        Self {
            platform,
            fusible,
            slice_calc: None,
        }
    }

    /// Recompute slice info for every touched scope after the run
    pub fn with_slice_calculator(mut self, calc: &'a dyn SliceInfoCalculator) -> Self {
        self.slice_calc = Some(calc);
        self
    }

    /// Run over `graph`
    pub fn run(
        &self,
        graph: &mut ComputeGraph,
        session: &mut FusionSession,
    ) -> EngineResult<AutoFusionOutcome> {
        let order = graph.topological_sort()?;
        let mut outcome = AutoFusionOutcome::default();

        // fusible by tag, claim and fan-out; `outcome.unable` also gains
        // producers that cannot fuse into every consumer
        let unfusible: BTreeSet<NodeId> = order
            .iter()
            .copied()
            .filter(|&id| !self.is_fusible(graph, session, id))
            .collect();
        outcome.unable = unfusible.clone();

        let mut memo: FxHashMap<(NodeId, NodeId), bool> = FxHashMap::default();
        let mut touched: BTreeSet<ScopeId> = BTreeSet::new();
        let mut dup_counts: Vec<(NodeId, usize)> = Vec::new();

        for &producer in order.iter().rev() {
            if outcome.unable.contains(&producer) {
                continue;
            }
            let consumers = graph.data_successors(producer);
            if consumers.is_empty() {
                continue;
            }

            let fusible_into: Vec<NodeId> = consumers
                .iter()
                .copied()
                .filter(|&c| fuses_on_all_paths(session, graph, &unfusible, &mut memo, producer, c))
                .collect();

            if fusible_into.len() < consumers.len() {
                match self.platform.duplication {
                    DuplicationPolicy::NoDuplication => {
                        debug!(node = %producer, "unable to fuse into every consumer");
                        outcome.unable.insert(producer);
                        continue;
                    }
                    DuplicationPolicy::AllowDuplication => {
                        if fusible_into.is_empty() {
                            outcome.unable.insert(producer);
                            continue;
                        }
                    }
                }
            }

            let mut merged = 0;
            for &consumer in &fusible_into {
                match self.merge(graph, session, producer, consumer)? {
                    Some(scope) => {
                        touched.insert(scope);
                        merged += 1;
                    }
                    None => outcome.rejected_merges += 1,
                }
            }
            if merged > 0 && fusible_into.len() < consumers.len() {
                dup_counts.push((producer, consumers.len() - fusible_into.len()));
                outcome.duplicated.push(producer);
            }
        }

        for (producer, count) in dup_counts {
            if let Some(node) = graph.node_mut(producer) {
                node.set_attr(ATTR_DUP_COUNT, AttrValue::Int(count as i64));
            }
        }

        outcome.scopes = touched
            .into_iter()
            .filter(|s| session.scopes.record(*s).is_some())
            .collect();

        for &scope in &outcome.scopes {
            let members = session.scopes.members(scope).to_vec();
            if let Some(calc) = self.slice_calc {
                calc.calc_slice_info(graph, &members)?;
            }
            let pass_name = session
                .scopes
                .record(scope)
                .map(|r| r.pass_name.clone())
                .unwrap_or_else(|| AUTO_FUSION_PASS.to_string());
            for id in members {
                if let Some(node) = graph.node_mut(id) {
                    node.set_attr(ATTR_SCOPE_ID, AttrValue::Int(scope.0 as i64));
                    node.set_attr(ATTR_PASS_NAME, AttrValue::Str(pass_name.clone()));
                }
            }
        }

        info!(
            graph = graph.name(),
            scopes = outcome.scopes.len(),
            unable = outcome.unable.len(),
            "automatic fusion finished"
        );
        Ok(outcome)
    }

    fn is_fusible(&self, graph: &ComputeGraph, session: &FusionSession, id: NodeId) -> bool {
        let Some(node) = graph.node(id) else {
            return false;
        };
        self.fusible.contains(&node.pattern)
            && !session.scopes.is_claimed(id)
            && graph.max_port_fanout(id) <= self.platform.max_branch_count
    }

    /// Put `producer` and `consumer` into one scope; `None` means rejected
    /// with no state change
    fn merge(
        &self,
        graph: &ComputeGraph,
        session: &mut FusionSession,
        producer: NodeId,
        consumer: NodeId,
    ) -> EngineResult<Option<ScopeId>> {
        let scopes = &mut session.scopes;
        let (sp, sc) = (scopes.scope_of(producer), scopes.scope_of(consumer));
        if sp.is_some() && sp == sc {
            return Ok(sp);
        }

        let mut group = scopes.unit_of(producer);
        group.extend(scopes.unit_of(consumer));
        if let Some(witness) = session.matrix.find_cycle_witness(graph, &group) {
            debug!(producer = %producer, consumer = %consumer, via = %witness, "merge rejected: cycle");
            return Ok(None);
        }

        let result = match (sp, sc) {
            (None, None) => scopes.create(graph, &[producer, consumer], AUTO_FUSION_PASS),
            (Some(s), None) => scopes.add_member(graph, s, consumer).map(|_| s),
            (None, Some(s)) => scopes.add_member(graph, s, producer).map(|_| s),
            (Some(a), Some(b)) => scopes.merge(a, b),
        };

        match result {
            Ok(scope) => {
                session.matrix.update(&group);
                Ok(Some(scope))
            }
            Err(
                e @ (FusionError::ScopeOverflow { .. }
                | FusionError::ScopeKindMismatch(_)
                | FusionError::ScopeConflict { .. }),
            ) => {
                debug!(producer = %producer, consumer = %consumer, error = %e, "two scopes not fusible");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Whether `producer` can join `consumer` with every node on a path between
/// them fusible into `consumer` as well
fn fuses_on_all_paths(
    session: &FusionSession,
    graph: &ComputeGraph,
    unfusible: &BTreeSet<NodeId>,
    memo: &mut FxHashMap<(NodeId, NodeId), bool>,
    producer: NodeId,
    consumer: NodeId,
) -> bool {
    if producer == consumer {
        return true;
    }
    if let Some(&known) = memo.get(&(producer, consumer)) {
        return known;
    }
    let mut ok = !unfusible.contains(&consumer);
    if ok {
        for operand in graph.data_predecessors(consumer) {
            if operand != producer && !session.matrix.is_reachable(producer, operand) {
                continue;
            }
            if !fuses_on_all_paths(session, graph, unfusible, memo, producer, operand) {
                ok = false;
                break;
            }
        }
    }
    memo.insert((producer, consumer), ok);
    ok
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(
        g: &mut ComputeGraph,
        platform: &PlatformInfo,
    ) -> (FusionSession, AutoFusionOutcome) {
        let fusible = [OpPattern::ElemWise, OpPattern::Broadcast];
        let mut session = FusionSession::new(g, platform).unwrap();
        let outcome = AutoFusion::new(platform, &fusible)
            .run(g, &mut session)
            .unwrap();
        (session, outcome)
    }

    #[test]
    fn test_chain_fuses_into_one_scope() {
        let mut g = ComputeGraph::new("g");
        let a = g.add_op("a", "Relu", OpPattern::ElemWise, &[]);
        let b = g.add_op("b", "Add", OpPattern::Broadcast, &[a]);
        let c = g.add_op("c", "Exp", OpPattern::ElemWise, &[b]);

        let (session, outcome) = run(&mut g, &PlatformInfo::default());
        assert_eq!(outcome.scopes.len(), 1);
        let s = outcome.scopes[0];
        assert_eq!(session.scopes.members(s).len(), 3);
        for id in [a, b, c] {
            assert_eq!(g.node(id).unwrap().scope_attr(), Some(s.0));
        }
    }

    #[test]
    fn test_no_duplication_exclusion() {
        // p feeds a fusible c1 and a non-fusible c2
        let mut g = ComputeGraph::new("g");
        let p = g.add_op("p", "Relu", OpPattern::ElemWise, &[]);
        let c1 = g.add_op("c1", "Exp", OpPattern::ElemWise, &[p]);
        let c2 = g.add_op("c2", "Conv2D", OpPattern::Convolution, &[p]);

        let (session, outcome) = run(&mut g, &PlatformInfo::default());
        assert!(outcome.unable.contains(&p));
        assert!(outcome.unable.contains(&c2));
        assert!(!session.scopes.is_claimed(p));
        assert!(!session.scopes.is_claimed(c1));
    }

    #[test]
    fn test_allow_duplication_fuses_subset() {
        let mut g = ComputeGraph::new("g");
        let p = g.add_op("p", "Relu", OpPattern::ElemWise, &[]);
        let c1 = g.add_op("c1", "Exp", OpPattern::ElemWise, &[p]);
        g.add_op("c2", "Conv2D", OpPattern::Convolution, &[p]);

        let platform = PlatformInfo::default().with_duplication(DuplicationPolicy::AllowDuplication);
        let (session, outcome) = run(&mut g, &platform);
        assert_eq!(outcome.duplicated, vec![p]);
        assert_eq!(session.scopes.scope_of(p), session.scopes.scope_of(c1));
        assert!(session.scopes.is_claimed(p));
        assert_eq!(g.node(p).unwrap().attr(ATTR_DUP_COUNT), Some(&AttrValue::Int(1)));
    }

    #[test]
    fn test_diamond_through_unfusible_node() {
        // p -> q(conv) -> c and p -> c: p must not join c
        let mut g = ComputeGraph::new("g");
        let p = g.add_op("p", "Relu", OpPattern::ElemWise, &[]);
        let q = g.add_op("q", "Conv2D", OpPattern::Convolution, &[p]);
        let c = g.add_op("c", "Add", OpPattern::Broadcast, &[p, q]);

        let platform = PlatformInfo::default().with_duplication(DuplicationPolicy::AllowDuplication);
        let (session, outcome) = run(&mut g, &platform);
        assert!(outcome.unable.contains(&p));
        assert!(!session.scopes.is_claimed(c));
        assert!(session.scopes.quotient_is_acyclic(&g));
    }

    #[test]
    fn test_chain_into_unfusible_consumer() {
        // a -> b -> conv: b cannot join conv, but a still joins b
        let mut g = ComputeGraph::new("g");
        let a = g.add_op("a", "Relu", OpPattern::ElemWise, &[]);
        let b = g.add_op("b", "Exp", OpPattern::ElemWise, &[a]);
        let conv = g.add_op("conv", "Conv2D", OpPattern::Convolution, &[b]);

        let (session, outcome) = run(&mut g, &PlatformInfo::default());
        assert_eq!(outcome.scopes.len(), 1);
        assert!(session.scopes.is_claimed(a));
        assert_eq!(session.scopes.scope_of(a), session.scopes.scope_of(b));
        assert!(!session.scopes.is_claimed(conv));
        assert!(!outcome.unable.contains(&a));
    }

    #[test]
    fn test_all_paths_checks_intermediate_operands() {
        // p -> x -> c and p -> c: x sits between p and c and is fusible
        let mut g = ComputeGraph::new("g");
        let p = g.add_op("p", "Relu", OpPattern::ElemWise, &[]);
        let x = g.add_op("x", "Exp", OpPattern::ElemWise, &[p]);
        let c = g.add_op("c", "Add", OpPattern::Broadcast, &[x, p]);

        let (session, outcome) = run(&mut g, &PlatformInfo::default());
        assert_eq!(outcome.scopes.len(), 1);
        let scope = session.scopes.scope_of(c);
        assert!(scope.is_some());
        assert_eq!(session.scopes.scope_of(p), scope);
        assert_eq!(session.scopes.scope_of(x), scope);
    }

    #[test]
    fn test_no_duplication_recorded_without_merge() {
        // p -> c1 -> d and p -> conv; {c1, d} fills the scope, so p joins nothing
        let mut g = ComputeGraph::new("g");
        let p = g.add_op("p", "Relu", OpPattern::ElemWise, &[]);
        let c1 = g.add_op("c1", "Exp", OpPattern::ElemWise, &[p]);
        g.add_op("conv", "Conv2D", OpPattern::Convolution, &[p]);
        let d = g.add_op("d", "Abs", OpPattern::ElemWise, &[c1]);

        let platform = PlatformInfo::default()
            .with_duplication(DuplicationPolicy::AllowDuplication)
            .with_max_scope_size(2);
        let (session, outcome) = run(&mut g, &platform);
        assert_eq!(session.scopes.scope_of(c1), session.scopes.scope_of(d));
        assert!(!session.scopes.is_claimed(p));
        assert_eq!(outcome.rejected_merges, 1);
        assert!(outcome.duplicated.is_empty());
        assert_eq!(g.node(p).unwrap().attr(ATTR_DUP_COUNT), None);
    }

    #[test]
    fn test_branch_ceiling() {
        let mut g = ComputeGraph::new("g");
        let p = g.add_op("p", "Relu", OpPattern::ElemWise, &[]);
        for i in 0..3 {
            g.add_op(&format!("c{}", i), "Exp", OpPattern::ElemWise, &[p]);
        }
        let platform = PlatformInfo::default().with_max_branch_count(2);
        let (_, outcome) = run(&mut g, &platform);
        assert!(outcome.unable.contains(&p));
    }

    #[test]
    fn test_scope_ceiling_rejects_merge() {
        let mut g = ComputeGraph::new("g");
        let a = g.add_op("a", "Relu", OpPattern::ElemWise, &[]);
        let b = g.add_op("b", "Abs", OpPattern::ElemWise, &[a]);
        let c = g.add_op("c", "Exp", OpPattern::ElemWise, &[b]);

        let platform = PlatformInfo::default().with_max_scope_size(2);
        let (session, outcome) = run(&mut g, &platform);
        assert_eq!(outcome.rejected_merges, 1);
        assert_eq!(session.scopes.scope_of(b), session.scopes.scope_of(c));
        assert!(!session.scopes.is_claimed(a));
        assert!(session.scopes.live_scopes().all(|r| r.members.len() <= 2));
    }

    #[test]
    fn test_prior_scope_excluded() {
        let mut g = ComputeGraph::new("g");
        let a = g.add_op("a", "Relu", OpPattern::ElemWise, &[]);
        let b = g.add_op("b", "Abs", OpPattern::ElemWise, &[a]);
        let platform = PlatformInfo::default();
        let fusible = [OpPattern::ElemWise];

        let mut session = FusionSession::new(&g, &platform).unwrap();
        let prior = session.scopes.create(&g, &[b], "pattern").unwrap();
        let outcome = AutoFusion::new(&platform, &fusible)
            .run(&mut g, &mut session)
            .unwrap();

        assert!(outcome.scopes.is_empty());
        assert_eq!(session.scopes.members(prior), &[b]);
        assert!(!session.scopes.is_claimed(a));
    }
}
