//! # Fusion Engine
//!
//! Operator-fusion graph rewriting for accelerator compilers.
//!
//! This crate groups nodes of a compute graph into fusion scopes that a
//! backend compiles as one kernel, without ever making the graph cyclic.
//!
//! ## Features
//!
//! - **Pattern Fusion**: Declarative fusion patterns matched with backtracking
//! - **Automatic Fusion**: Greedy fusion of element-wise and broadcast chains
//! - **Orchestration**: Prioritized pass and rule sweeps with a quant phase
//! - **Cycle Safety**: Reachability matrix with scope contraction and rollback
//!
//! ## Example
//!
//! ```ignore
//! use fusion_engine::prelude::*;
//!
//! let registry = Arc::new(PassRegistry::new());
//! registry.register(PassEntry::pass("ConvRelu", 0, || Box::new(ConvReluPass)));
//!
//! let mut orch = FusionOrchestrator::new(registry, FusionConfig::default(), PlatformInfo::default());
//! let stats = orch.run_fusion(&mut graph)?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// ============================================================================
// Module declarations
// ============================================================================

pub mod config;
pub mod error;
pub mod fusion;
pub mod graph;
pub mod orchestrate;
pub mod pattern;
pub mod reach;
pub mod scope;
pub mod traits;
pub mod transform;


// ============================================================================
// Prelude module for convenient imports
// ============================================================================

/// Prelude module - import commonly used types with `use fusion_engine::prelude::*`
pub mod prelude {
    pub use crate::config::{DuplicationPolicy, FusionConfig, IsaVersion, MatcherConfig, PlatformInfo};
    pub use crate::error::{EngineResult, FusionError};
    pub use crate::fusion::{calc_slice_info, AutoFusion, BufferFusionRunner, FusionSession, FusionStats};
    pub use crate::graph::{AttrValue, ComputeGraph, EdgeEdits, InPort, NodeId, OpPattern, OutPort};
    pub use crate::orchestrate::{FusionOrchestrator, PassEntry, PassRegistry, QuantMode, SweepState};
    pub use crate::pattern::{FusionPattern, Mapping, OpDesc, PatternMatcher};
    pub use crate::reach::ConnectionMatrix;
    pub use crate::scope::{ScopeId, ScopeTable};
    pub use crate::traits::{OpCompiler, PassStatus, PatternFusionPass, RuleEngine, RuleType, SliceInfoCalculator};
    pub use crate::transform::switch_trans_data_and_cast;
    pub use std::sync::Arc;
}

// ============================================================================
// Crate-level re-exports
// ============================================================================

pub use error::{EngineResult, FusionError};
pub use graph::ComputeGraph;
pub use orchestrate::FusionOrchestrator;

// ============================================================================
// Version information
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
