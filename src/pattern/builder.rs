//! Fusion pattern definition and validation
//!
//! Patterns are assembled with a chained builder. Definition mistakes do not
//! fail the builder calls; they are collected and reported together by
//! [`FusionPattern::validate`], so a pass can define all of its patterns and
//! have only the broken ones skipped.
//!
//! # Example
//!
//! ```ignore
//! use fusion_engine::pattern::{FusionPattern, OpDesc, TYPE_OUTPUT};
//!
//! let pattern = FusionPattern::new("conv_relu")
//!     .add_op_desc(OpDesc::new("conv", &["Convolution"]))
//!     .add_op_desc(OpDesc::new("relu", &["Relu"]).repeat(1, 2))
//!     .add_op_desc(OpDesc::new("out", &[TYPE_OUTPUT]).optional())
//!     .set_head(&["conv"])
//!     .set_outputs("conv", &["relu"])
//!     .set_outputs("relu", &["out"]);
//! pattern.validate()?;
//! ```

use rustc_hash::FxHashMap;

use super::desc::{DescId, DescKind, OpDesc};
use crate::error::{EngineResult, FusionError};

/// A named pattern graph of operator descriptors
#[derive(Debug, Clone)]
pub struct FusionPattern {
    name: String,
    descs: Vec<OpDesc>,
    by_name: FxHashMap<String, DescId>,
    heads: Vec<DescId>,
    errors: Vec<String>,
}

impl FusionPattern {
    /// Start an empty pattern
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            descs: Vec::new(),
            by_name: FxHashMap::default(),
            heads: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Add a descriptor
    pub fn add_op_desc(mut self, desc: OpDesc) -> Self {
        if self.by_name.contains_key(&desc.name) {
            self.errors
                .push(format!("duplicate descriptor '{}'", desc.name));
            return self;
        }
        self.by_name.insert(desc.name.clone(), self.descs.len());
        self.descs.push(desc);
        self
    }

    /// Declare the head descriptors
    pub fn set_head(mut self, names: &[&str]) -> Self {
        for name in names {
            match self.by_name.get(*name) {
                Some(&id) if !self.heads.contains(&id) => self.heads.push(id),
                Some(_) => {}
                None => self.errors.push(format!("unknown head '{}'", name)),
            }
        }
        self
    }

    /// Connect `from` to each of `to`
    pub fn set_outputs(mut self, from: &str, to: &[&str]) -> Self {
        let Some(&src) = self.by_name.get(from) else {
            self.errors.push(format!("unknown descriptor '{}'", from));
            return self;
        };
        for name in to {
            match self.by_name.get(*name) {
                Some(&dst) => {
                    if !self.descs[src].outputs.contains(&dst) {
                        self.descs[src].outputs.push(dst);
                    }
                }
                None => self.errors.push(format!("unknown descriptor '{}'", name)),
            }
        }
        self
    }

    /// Pattern name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All descriptors in definition order
    pub fn descs(&self) -> &[OpDesc] {
        &self.descs
    }

    /// Descriptor by index
    pub fn desc(&self, id: DescId) -> Option<&OpDesc> {
        self.descs.get(id)
    }

    /// Descriptor index by name
    pub fn desc_id(&self, name: &str) -> Option<DescId> {
        self.by_name.get(name).copied()
    }

    /// Head descriptors in declaration order
    pub fn heads(&self) -> &[DescId] {
        &self.heads
    }

    /// Check the definition
    pub fn validate(&self) -> EngineResult<()> {
        if let Some(first) = self.errors.first() {
            return Err(self.malformed(first));
        }
        if self.descs.is_empty() {
            return Err(self.malformed("no descriptors"));
        }
        if self.heads.is_empty() {
            return Err(self.malformed("no head descriptor"));
        }

        for desc in &self.descs {
            if desc.types.is_empty() {
                return Err(self.malformed(&format!("descriptor '{}' has no types", desc.name)));
            }
            if desc.repeat_max == 0 {
                return Err(self.malformed(&format!("descriptor '{}' has max repeat 0", desc.name)));
            }
            if desc.repeat_min > desc.repeat_max {
                return Err(self.malformed(&format!(
                    "descriptor '{}' has min repeat {} above max {}",
                    desc.name, desc.repeat_min, desc.repeat_max
                )));
            }
        }

        for &head in &self.heads {
            if self.descs[head].kind() == DescKind::Output {
                return Err(self.malformed(&format!(
                    "head '{}' is an output sentinel",
                    self.descs[head].name
                )));
            }
        }

        if let Some(name) = self.find_cycle() {
            return Err(self.malformed(&format!("cycle through descriptor '{}'", name)));
        }

        Ok(())
    }

    fn malformed(&self, reason: &str) -> FusionError {
        FusionError::MalformedPattern {
            pattern: self.name.clone(),
            reason: reason.to_string(),
        }
    }

    // Iterative three-colour DFS over descriptor outputs
    fn find_cycle(&self) -> Option<&str> {
        const WHITE: u8 = 0;
        const GREY: u8 = 1;
        const BLACK: u8 = 2;

        let mut colour = vec![WHITE; self.descs.len()];
        for root in 0..self.descs.len() {
            if colour[root] != WHITE {
                continue;
            }
            let mut stack: Vec<(DescId, usize)> = vec![(root, 0)];
            colour[root] = GREY;
            while let Some(top) = stack.last_mut() {
                let id = top.0;
                if let Some(&out) = self.descs[id].outputs.get(top.1) {
                    top.1 += 1;
                    match colour[out] {
                        GREY => return Some(&self.descs[out].name),
                        WHITE => {
                            colour[out] = GREY;
                            stack.push((out, 0));
                        }
                        _ => {}
                    }
                } else {
                    colour[id] = BLACK;
                    stack.pop();
                }
            }
        }
        None
    }
}
