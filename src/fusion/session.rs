//! Per-graph fusion state

use crate::config::PlatformInfo;
use crate::error::EngineResult;
use crate::graph::ComputeGraph;
use crate::reach::ConnectionMatrix;
use crate::scope::ScopeTable;

/// Reachability index and scope table owned by one graph's compile
#[derive(Debug, Clone)]
pub struct FusionSession {
    /// Reachability over the current graph, scopes contracted
    pub matrix: ConnectionMatrix,
    /// Live fusion scopes
    pub scopes: ScopeTable,
}

impl FusionSession {
    /// Build the matrix and load scopes persisted on the graph
    pub fn new(graph: &ComputeGraph, platform: &PlatformInfo) -> EngineResult<Self> {
        let scopes = ScopeTable::from_graph(graph, platform.max_scope_size)?;
        let mut matrix = ConnectionMatrix::build(graph)?;
        for record in scopes.live_scopes() {
            matrix.update(&record.members);
        }
        Ok(Self { matrix, scopes })
    }

    /// Re-derive state after a rule rewrote the graph structure
    ///
    /// Removed nodes leave their scopes; the matrix is built again with
    /// every surviving scope contracted.
    pub fn resync(&mut self, graph: &ComputeGraph) -> EngineResult<()> {
        self.scopes.retain_existing(graph);
        let mut matrix = ConnectionMatrix::build(graph)?;
        for record in self.scopes.live_scopes() {
            matrix.update(&record.members);
        }
        self.matrix = matrix;
        Ok(())
    }
}
