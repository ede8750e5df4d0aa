//! Capability traits at the engine's seams
//!
//! Fusion passes are authored against [`PatternFusionPass`]. The rule
//! engine, the op compiler and the slice-info calculator are external
//! collaborators the engine only calls into.

use std::fmt;

use crate::error::EngineResult;
use crate::graph::{ComputeGraph, NodeId};
use crate::pattern::{FusionPattern, Mapping};

/// Outcome of one pass or rule invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassStatus {
    /// The graph was modified
    Changed,
    /// Nothing applied; not a failure
    NotChanged,
}

impl PassStatus {
    /// Whether the graph was modified
    pub fn is_changed(self) -> bool {
        matches!(self, PassStatus::Changed)
    }

    /// Combine two outcomes
    pub fn or(self, other: PassStatus) -> PassStatus {
        if self.is_changed() || other.is_changed() {
            PassStatus::Changed
        } else {
            PassStatus::NotChanged
        }
    }
}

/// Where a declarative rule comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleType {
    /// Shipped with the compiler
    BuiltIn,
    /// Supplied by the user
    Custom,
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleType::BuiltIn => write!(f, "built-in"),
            RuleType::Custom => write!(f, "custom"),
        }
    }
}

/// A pattern-based fusion pass
///
/// # Example
///
/// ```ignore
/// struct ConvRelu;
///
/// impl PatternFusionPass for ConvRelu {
///     fn name(&self) -> &str {
///         "ConvReluFusion"
///     }
///
///     fn define_patterns(&self) -> Vec<FusionPattern> {
///         vec![FusionPattern::new("conv_relu")
///             .add_op_desc(OpDesc::new("conv", &["Convolution"]))
///             .add_op_desc(OpDesc::new("relu", &["Relu"]))
///             .set_head(&["conv"])
///             .set_outputs("conv", &["relu"])]
///     }
/// }
/// ```
pub trait PatternFusionPass {
    /// Name of the pass
    fn name(&self) -> &str;

    /// Patterns to match, tried in order
    fn define_patterns(&self) -> Vec<FusionPattern>;

    /// Select the nodes to fuse from a mapping
    ///
    /// An empty result skips the mapping.
    fn fusion(&self, _graph: &ComputeGraph, mapping: &Mapping) -> EngineResult<Vec<NodeId>> {
        Ok(mapping.fused_nodes())
    }
}

/// Declarative rule engine
pub trait RuleEngine {
    /// Apply the named rule to the graph
    fn run_rule_by_type(
        &self,
        graph: &mut ComputeGraph,
        rule_type: RuleType,
        rule_name: &str,
    ) -> EngineResult<PassStatus>;
}

/// Backend compiler used to vet a tentative fusion group
pub trait OpCompiler {
    /// Whether the backend can build one kernel from `nodes`
    fn check_supported(&self, graph: &ComputeGraph, nodes: &[NodeId]) -> EngineResult<bool>;
}

/// Per-group slice and size metadata
pub trait SliceInfoCalculator {
    /// Compute and attach slice info for one fused group
    fn calc_slice_info(&self, graph: &mut ComputeGraph, nodes: &[NodeId]) -> EngineResult<()>;
}
