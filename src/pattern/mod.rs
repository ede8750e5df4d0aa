//! Fusion patterns and the backtracking matcher
//!
//! A [`FusionPattern`] is a small DAG of [`OpDesc`] vertices. Matching it
//! against a compute graph yields one [`Mapping`] per head node: descriptor
//! name to the concrete nodes matched into that role.
//!
//! # Descriptor features
//!
//! | Feature | Meaning |
//! |---------|---------|
//! | `repeat(min, max)` | role filled by a chain of `min..=max` nodes; `min == 0` is optional |
//! | `parallel()` | every sibling branch must match the role |
//! | `group(id)` | at most one descriptor of the group per expansion round |
//! | `branch(rule)` | required output fan-out of matched nodes |
//! | [`TYPE_ANY`] | wildcard, recorded but never fused or expanded |
//! | [`TYPE_OUTPUT`] | boundary sentinel, recorded but never fused or expanded |
//!
//! # Example
//!
//! ```ignore
//! use fusion_engine::pattern::{FusionPattern, OpDesc, PatternMatcher};
//!
//! let pattern = FusionPattern::new("conv_relu")
//!     .add_op_desc(OpDesc::new("conv", &["Convolution"]))
//!     .add_op_desc(OpDesc::new("relu", &["Relu"]))
//!     .set_head(&["conv"])
//!     .set_outputs("conv", &["relu"]);
//!
//! let matcher = PatternMatcher::new(&graph, &matrix, &config.matcher);
//! let mappings = matcher.match_pattern(&pattern);
//! ```

pub mod builder;
pub mod desc;
pub mod mapping;
pub mod matcher;
pub mod ops;

// Re-export main types
pub use builder::FusionPattern;
pub use desc::{BranchRule, DescId, DescKind, OpDesc, TYPE_ANY, TYPE_OUTPUT};
pub use mapping::Mapping;
pub use matcher::{MatchReport, MatchState, PatternMatcher};
pub use ops::classify_op;
