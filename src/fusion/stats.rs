//! Fusion statistics

use indexmap::IndexMap;

/// Statistics from a fusion run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FusionStats {
    /// Passes and rules invoked
    pub passes_run: usize,
    /// Mappings produced by the matcher
    pub patterns_matched: usize,
    /// Patterns skipped as malformed
    pub patterns_skipped: usize,
    /// Scopes created or extended
    pub scopes_formed: usize,
    /// Nodes placed into scopes
    pub nodes_fused: usize,
    /// Groups rejected by the compiler, the cycle check or the scope table
    pub rejected: usize,
    /// Nodes fused per pass, in first-seen order
    pub fused_by_pass: IndexMap<String, usize>,
}

impl FusionStats {
    /// Create empty stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted group
    pub fn record_fusion(&mut self, pass: &str, nodes: usize) {
        self.scopes_formed += 1;
        self.nodes_fused += nodes;
        *self.fused_by_pass.entry(pass.to_string()).or_insert(0) += nodes;
    }

    /// Record a rejected group
    pub fn record_rejection(&mut self) {
        self.rejected += 1;
    }

    /// Merge with another result
    pub fn merge(&mut self, other: FusionStats) {
        self.passes_run += other.passes_run;
        self.patterns_matched += other.patterns_matched;
        self.patterns_skipped += other.patterns_skipped;
        self.scopes_formed += other.scopes_formed;
        self.nodes_fused += other.nodes_fused;
        self.rejected += other.rejected;
        for (pass, count) in other.fused_by_pass {
            *self.fused_by_pass.entry(pass).or_insert(0) += count;
        }
    }
}
