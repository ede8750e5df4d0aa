//! Error types for the fusion engine
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

use crate::graph::NodeId;
use crate::scope::ScopeId;

/// Main error type for fusion operations
#[derive(Error, Debug)]
pub enum FusionError {
    /// A pattern definition failed validation; only that pattern is skipped
    #[error("Malformed pattern '{pattern}': {reason}")]
    MalformedPattern {
        /// Pattern name
        pattern: String,
        /// What is wrong with it
        reason: String,
    },

    /// Node not present in the graph
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// Edge edit refers to a missing port or would be a self-loop
    #[error("Invalid edge: {0}")]
    InvalidEdge(String),

    /// Input port already has a producer
    #[error("Input port {port} of {node} already has a producer")]
    PortOccupied {
        /// Consumer node
        node: NodeId,
        /// Input index
        port: usize,
    },

    /// Topological sort failed
    #[error("Graph '{0}' contains a cycle")]
    GraphCycle(String),

    /// A pass or rule left the graph cyclic
    #[error("Cycle detected in graph '{graph}' after '{pass}'")]
    CycleDetected {
        /// Offending pass or rule
        pass: String,
        /// Graph name
        graph: String,
    },

    /// A scope would exceed the per-scope node ceiling
    #[error("Scope overflow: {size} nodes exceeds ceiling {limit}")]
    ScopeOverflow {
        /// Requested size
        size: usize,
        /// Ceiling
        limit: usize,
    },

    /// Dynamic and static implementations cannot share a scope
    #[error("Implementation kind mismatch: {0}")]
    ScopeKindMismatch(String),

    /// Node is already claimed by a live scope
    #[error("{node} already belongs to scope {scope}")]
    ScopeConflict {
        /// Claimed node
        node: NodeId,
        /// Owning scope
        scope: ScopeId,
    },

    /// Scope id unknown or retired
    #[error("Scope not found: {0}")]
    ScopeNotFound(ScopeId),

    /// A rule entry ran without a rule engine attached
    #[error("No rule engine available for rule '{0}'")]
    RuleEngineMissing(String),

    /// A pass or rule returned a hard error
    #[error("Pass '{pass}' failed: {source}")]
    PassFailed {
        /// Failing pass or rule
        pass: String,
        /// Underlying error
        #[source]
        source: Box<FusionError>,
    },

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FusionError {
    /// Wrap an error with the name of the pass that produced it
    pub fn in_pass(self, pass: &str) -> Self {
        match self {
            e @ (FusionError::PassFailed { .. } | FusionError::CycleDetected { .. }) => e,
            other => FusionError::PassFailed {
                pass: pass.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Whether the error is a cycle detected during orchestration
    pub fn is_cycle(&self) -> bool {
        matches!(
            self,
            FusionError::CycleDetected { .. } | FusionError::GraphCycle(_)
        )
    }
}

/// Result type alias for fusion operations
pub type EngineResult<T> = Result<T, FusionError>;
