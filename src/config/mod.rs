//! Configuration inputs
//!
//! Read-only platform description plus the knobs of a fusion run.
//!
//! # Example
//!
//! ```ignore
//! use fusion_engine::config::{DuplicationPolicy, FusionConfig, IsaVersion, PlatformInfo};
//!
//! let platform = PlatformInfo::default()
//!     .with_isa(IsaVersion::V220)
//!     .with_duplication(DuplicationPolicy::AllowDuplication);
//! let config = FusionConfig::default().with_cycle_check(true);
//! ```

use std::fmt;

use crate::graph::OpPattern;

/// Instruction-set version of the target accelerator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IsaVersion {
    /// First generation
    V100,
    /// Second generation
    V200,
    /// Second generation, revised vector unit
    V220,
    /// Third generation
    V300,
}

impl IsaVersion {
    /// Version string
    pub fn as_str(&self) -> &'static str {
        match self {
            IsaVersion::V100 => "v100",
            IsaVersion::V200 => "v200",
            IsaVersion::V220 => "v220",
            IsaVersion::V300 => "v300",
        }
    }
}

impl fmt::Display for IsaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether automatic fusion may recompute a producer on unfused paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicationPolicy {
    /// A producer that cannot fuse into all consumers is never fused
    #[default]
    NoDuplication,
    /// A producer may fuse into a subset of its consumers
    AllowDuplication,
}

/// Hardware description consumed by automatic fusion and the quant phase
#[derive(Debug, Clone)]
pub struct PlatformInfo {
    /// Instruction-set version
    pub isa_version: IsaVersion,
    /// Maximum consumers on one output port for an automatically fused node
    pub max_branch_count: usize,
    /// Maximum number of nodes in one fusion scope
    pub max_scope_size: usize,
    /// Duplication policy for automatic fusion
    pub duplication: DuplicationPolicy,
}

impl Default for PlatformInfo {
    fn default() -> Self {
        Self {
            isa_version: IsaVersion::V200,
            max_branch_count: 8,
            max_scope_size: 32,
            duplication: DuplicationPolicy::NoDuplication,
        }
    }
}

impl PlatformInfo {
    /// Set the instruction-set version
    pub fn with_isa(mut self, isa: IsaVersion) -> Self {
        self.isa_version = isa;
        self
    }

    /// Set the fan-out ceiling
    pub fn with_max_branch_count(mut self, count: usize) -> Self {
        self.max_branch_count = count;
        self
    }

    /// Set the per-scope node ceiling
    pub fn with_max_scope_size(mut self, size: usize) -> Self {
        self.max_scope_size = size;
        self
    }

    /// Set the duplication policy
    pub fn with_duplication(mut self, policy: DuplicationPolicy) -> Self {
        self.duplication = policy;
        self
    }
}

/// Pattern matcher configuration
#[derive(Debug, Clone)]
pub struct MatcherConfig {
    /// Maximum backtracking retries per head node
    pub max_backtracks: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self { max_backtracks: 32 }
    }
}

/// Fusion run configuration
#[derive(Debug, Clone)]
pub struct FusionConfig {
    /// Engine whose pass list is executed
    pub engine_name: String,
    /// Single-op compilation scene
    pub single_op_scene: bool,
    /// Topologically sort after every step and abort on a cycle
    pub check_cycle_after_each_pass: bool,
    /// Run the automatic fusion phase
    pub auto_fusion: bool,
    /// Op patterns automatic fusion may group
    pub auto_fusible: Vec<OpPattern>,
    /// Matcher settings
    pub matcher: MatcherConfig,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            engine_name: "AIcoreEngine".to_string(),
            single_op_scene: false,
            check_cycle_after_each_pass: false,
            auto_fusion: true,
            auto_fusible: vec![OpPattern::ElemWise, OpPattern::Broadcast],
            matcher: MatcherConfig::default(),
        }
    }
}

impl FusionConfig {
    /// Set the engine name
    pub fn with_engine(mut self, name: &str) -> Self {
        self.engine_name = name.to_string();
        self
    }

    /// Select the single-op scene
    pub fn with_single_op_scene(mut self, single: bool) -> Self {
        self.single_op_scene = single;
        self
    }

    /// Enable or disable the per-step cycle check
    pub fn with_cycle_check(mut self, enabled: bool) -> Self {
        self.check_cycle_after_each_pass = enabled;
        self
    }

    /// Enable or disable automatic fusion
    pub fn with_auto_fusion(mut self, enabled: bool) -> Self {
        self.auto_fusion = enabled;
        self
    }

    /// Set the backtracking bound
    pub fn with_max_backtracks(mut self, max: usize) -> Self {
        self.matcher.max_backtracks = max;
        self
    }
}
