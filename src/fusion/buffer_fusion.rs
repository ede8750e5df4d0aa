//! Pattern-based fusion runner
//!
//! Runs one [`PatternFusionPass`]: every valid pattern is matched from the
//! head candidates of the type index, the pass picks the nodes to fuse from
//! each mapping, and accepted groups become scopes.
//!
//! A group is committed in three steps. The reachability matrix is backed up
//! and updated, the optional [`OpCompiler`] vets the group, then the scope
//! table records it. A rejection at any step restores the backup, so a
//! rejected group leaves no trace.

use tracing::{debug, warn};

use super::session::FusionSession;
use super::stats::FusionStats;
use crate::config::MatcherConfig;
use crate::error::{EngineResult, FusionError};
use crate::graph::{AttrValue, ComputeGraph, NodeId, ATTR_PASS_NAME, ATTR_SCOPE_ID};
use crate::orchestrate::NodeTypeIndex;
use crate::pattern::{FusionPattern, PatternMatcher};
use crate::scope::ScopeId;
use crate::traits::{OpCompiler, PassStatus, PatternFusionPass};

/// Runs pattern fusion passes against one graph
pub struct BufferFusionRunner<'a> {
    config: &'a MatcherConfig,
    compiler: Option<&'a dyn OpCompiler>,
}

impl<'a> BufferFusionRunner<'a> {
    /// Create a runner without a fusion check
    pub fn new(config: &'a MatcherConfig) -> Self {
        Self {
            config,
            compiler: None,
        }
    }

    /// Vet every group with the backend compiler before committing it
    pub fn with_compiler(mut self, compiler: &'a dyn OpCompiler) -> Self {
        self.compiler = Some(compiler);
        self
    }

    /// Run one pass
    ///
    /// Malformed patterns are skipped with a warning. Errors returned by
    /// the pass or the compiler abort the run.
    pub fn run(
        &self,
        graph: &mut ComputeGraph,
        session: &mut FusionSession,
        index: &NodeTypeIndex,
        pass: &dyn PatternFusionPass,
    ) -> EngineResult<(PassStatus, FusionStats)> {
        let mut stats = FusionStats::new();
        let mut status = PassStatus::NotChanged;

        for pattern in pass.define_patterns() {
            if let Err(e) = pattern.validate() {
                warn!(pass = pass.name(), error = %e, "skipping malformed pattern");
                stats.patterns_skipped += 1;
                continue;
            }

            for node in head_candidates(&pattern, index) {
                if !graph.contains(node) || session.scopes.is_claimed(node) {
                    continue;
                }

                let mapping = PatternMatcher::new(graph, &session.matrix, self.config)
                    .with_scopes(&session.scopes)
                    .match_from(&pattern, node);
                let Some(mapping) = mapping else {
                    continue;
                };
                stats.patterns_matched += 1;

                let nodes = pass.fusion(graph, &mapping)?;
                if nodes.is_empty() {
                    continue;
                }
                if self.commit(graph, session, pass.name(), &nodes)?.is_some() {
                    stats.record_fusion(pass.name(), nodes.len());
                    status = PassStatus::Changed;
                } else {
                    stats.record_rejection();
                }
            }
        }

        Ok((status, stats))
    }

    /// Try to turn `nodes` into a scope; `None` means rejected
    pub fn commit(
        &self,
        graph: &mut ComputeGraph,
        session: &mut FusionSession,
        pass_name: &str,
        nodes: &[NodeId],
    ) -> EngineResult<Option<ScopeId>> {
        if session.scopes.group_creates_cycle(graph, nodes) {
            debug!(pass = pass_name, size = nodes.len(), "group rejected: cycle");
            return Ok(None);
        }

        let backup = session.matrix.clone();
        session.matrix.update(nodes);

        if let Some(compiler) = self.compiler {
            match compiler.check_supported(graph, nodes) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(pass = pass_name, size = nodes.len(), "group rejected by compiler");
                    session.matrix = backup;
                    return Ok(None);
                }
                Err(e) => {
                    session.matrix = backup;
                    return Err(e);
                }
            }
        }

        let scope = match session.scopes.create(graph, nodes, pass_name) {
            Ok(scope) => scope,
            Err(
                e @ (FusionError::ScopeOverflow { .. }
                | FusionError::ScopeKindMismatch(_)
                | FusionError::ScopeConflict { .. }),
            ) => {
                warn!(pass = pass_name, error = %e, "group rejected by scope table");
                session.matrix = backup;
                return Ok(None);
            }
            Err(e) => {
                session.matrix = backup;
                return Err(e);
            }
        };

        for &id in nodes {
            if let Some(node) = graph.node_mut(id) {
                node.set_attr(ATTR_SCOPE_ID, AttrValue::Int(scope.0 as i64));
                node.set_attr(ATTR_PASS_NAME, AttrValue::Str(pass_name.to_string()));
            }
        }
        debug!(pass = pass_name, scope = %scope, size = nodes.len(), "fused");
        Ok(Some(scope))
    }
}

fn head_candidates(pattern: &FusionPattern, index: &NodeTypeIndex) -> Vec<NodeId> {
    let mut types: Vec<String> = Vec::new();
    for &head in pattern.heads() {
        if let Some(desc) = pattern.desc(head) {
            types.extend(desc.types.iter().cloned());
        }
    }
    index.candidates(&types)
}
