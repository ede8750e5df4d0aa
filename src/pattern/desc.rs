//! Operator descriptors: the vertices of a fusion pattern

use crate::graph::Node;

/// Type entry that accepts any node; matches are never fused or expanded
pub const TYPE_ANY: &str = "*";

/// Boundary sentinel; matches mark where the fused region ends
pub const TYPE_OUTPUT: &str = "OutputData";

/// Index of a descriptor inside its pattern
pub type DescId = usize;

/// Output-branch requirement of a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BranchRule {
    /// Any number of data successors
    #[default]
    Waived,
    /// At most one data successor
    Single,
    /// Two or more data successors
    Multi,
}

impl BranchRule {
    /// Whether a node with `successors` distinct data successors satisfies the rule
    pub fn accepts(self, successors: usize) -> bool {
        match self {
            BranchRule::Waived => true,
            BranchRule::Single => successors <= 1,
            BranchRule::Multi => successors > 1,
        }
    }
}

/// Match priority class; lower wins
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DescKind {
    /// Accepts listed op types or pattern tags
    Concrete,
    /// Wildcard
    Any,
    /// Boundary sentinel
    Output,
}

impl DescKind {
    /// Whether matches of this kind are excluded from the fused node set
    pub fn is_sentinel(self) -> bool {
        !matches!(self, DescKind::Concrete)
    }
}

/// One vertex of a fusion pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpDesc {
    /// Unique name within the pattern
    pub name: String,
    /// Accepted op types or pattern tags
    pub types: Vec<String>,
    /// Minimum repeat count; 0 makes the descriptor optional
    pub repeat_min: usize,
    /// Maximum repeat count
    pub repeat_max: usize,
    /// Must match every sibling branch of a round
    pub parallel: bool,
    /// Mutual-exclusion group
    pub group: Option<u32>,
    /// Required output fan-out of matched nodes
    pub branch: BranchRule,
    pub(crate) outputs: Vec<DescId>,
}

impl OpDesc {
    /// Create a descriptor matched exactly once
    pub fn new(name: &str, types: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            types: types.iter().map(|t| t.to_string()).collect(),
            repeat_min: 1,
            repeat_max: 1,
            parallel: false,
            group: None,
            branch: BranchRule::Waived,
            outputs: Vec::new(),
        }
    }

    /// Set the repeat range
    pub fn repeat(mut self, min: usize, max: usize) -> Self {
        self.repeat_min = min;
        self.repeat_max = max;
        self
    }

    /// Allow the descriptor to be absent
    pub fn optional(mut self) -> Self {
        self.repeat_min = 0;
        self
    }

    /// Require every sibling branch to match
    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }

    /// Put the descriptor in a mutual-exclusion group
    pub fn group(mut self, id: u32) -> Self {
        self.group = Some(id);
        self
    }

    /// Set the output-branch rule
    pub fn branch(mut self, rule: BranchRule) -> Self {
        self.branch = rule;
        self
    }

    /// Priority class of the descriptor
    pub fn kind(&self) -> DescKind {
        if self.types.iter().any(|t| t == TYPE_OUTPUT) {
            DescKind::Output
        } else if self.types.iter().any(|t| t == TYPE_ANY) {
            DescKind::Any
        } else {
            DescKind::Concrete
        }
    }

    /// Successor descriptors
    pub fn outputs(&self) -> &[DescId] {
        &self.outputs
    }

    /// Whether the node's op type or pattern tag is accepted
    pub fn accepts(&self, node: &Node) -> bool {
        match self.kind() {
            DescKind::Any | DescKind::Output => true,
            DescKind::Concrete => self
                .types
                .iter()
                .any(|t| *t == node.op_type || t.as_str() == node.pattern.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ComputeGraph, OpPattern};

    #[test]
    fn test_branch_rule() {
        assert!(BranchRule::Waived.accepts(5));
        assert!(BranchRule::Single.accepts(0));
        assert!(BranchRule::Single.accepts(1));
        assert!(!BranchRule::Single.accepts(2));
        assert!(BranchRule::Multi.accepts(2));
        assert!(!BranchRule::Multi.accepts(1));
    }

    #[test]
    fn test_kind_priority() {
        assert!(DescKind::Concrete < DescKind::Any);
        assert!(DescKind::Any < DescKind::Output);
        assert_eq!(OpDesc::new("o", &[TYPE_OUTPUT]).kind(), DescKind::Output);
        assert_eq!(OpDesc::new("w", &[TYPE_ANY]).kind(), DescKind::Any);
        assert!(!OpDesc::new("c", &["Relu"]).kind().is_sentinel());
    }

    #[test]
    fn test_accepts_type_or_tag() {
        let mut g = ComputeGraph::new("g");
        let id = g.add_op("r", "Relu", OpPattern::ElemWise, &[]);
        let node = g.node(id).unwrap();

        assert!(OpDesc::new("a", &["Relu"]).accepts(node));
        assert!(OpDesc::new("b", &["ElemWise"]).accepts(node));
        assert!(!OpDesc::new("c", &["Conv2D", "Convolution"]).accepts(node));
        assert!(OpDesc::new("d", &[TYPE_ANY]).accepts(node));
    }

    #[test]
    fn test_builder_methods() {
        let d = OpDesc::new("x", &["Add"])
            .repeat(1, 4)
            .parallel()
            .group(2)
            .branch(BranchRule::Single);
        assert_eq!((d.repeat_min, d.repeat_max), (1, 4));
        assert!(d.parallel);
        assert_eq!(d.group, Some(2));
        assert_eq!(OpDesc::new("y", &["Add"]).optional().repeat_min, 0);
    }
}
