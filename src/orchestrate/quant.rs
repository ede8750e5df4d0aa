//! Quant phase: quant-mode derivation and pass scheduling
//!
//! Quant-tagged entries never run in the generic sweep. Once the sweep is
//! over, the quant mode is derived from the constant payloads feeding
//! quant-related nodes, and the quant entries applicable to the platform's
//! ISA run ordered by ISA version, then priority.

use std::fmt;

use tracing::debug;

use super::registry::PassEntry;
use crate::config::IsaVersion;
use crate::graph::{AttrValue, ComputeGraph};

/// Graph attribute recording the derived quant mode
pub const ATTR_QUANT_MODE: &str = "_quant_mode";

const FP16_MAX: f32 = 65504.0;
const FP16_MIN_NORMAL: f32 = 1.0 / 16384.0;

/// Precision regime of quantized kernels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuantMode {
    /// Some constant needs more than fp16
    HighPrecision,
    /// Every constant fits fp16 exactly
    HighPerformance,
}

impl QuantMode {
    /// Attribute value
    pub fn as_str(&self) -> &'static str {
        match self {
            QuantMode::HighPrecision => "high_precision",
            QuantMode::HighPerformance => "high_performance",
        }
    }
}

impl fmt::Display for QuantMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether `v` converts to fp16 and back without loss
pub fn fits_fp16(v: f32) -> bool {
    if v == 0.0 {
        return true;
    }
    if !v.is_finite() || v.abs() > FP16_MAX {
        return false;
    }
    if v.abs() < FP16_MIN_NORMAL {
        // fp16 subnormals are multiples of 2^-24
        let scaled = v * (1u32 << 24) as f32;
        return scaled.fract() == 0.0;
    }
    v.to_bits() & 0x1FFF == 0
}

/// Inspect constants feeding quant-related nodes
///
/// Graphs without such constants default to high performance.
pub fn derive_quant_mode(graph: &ComputeGraph) -> QuantMode {
    for node in graph.nodes().filter(|n| n.pattern.is_quant_related()) {
        for pred in graph.data_predecessors(node.id()) {
            let Some(payload) = graph.node(pred).and_then(|p| p.constant.as_ref()) else {
                continue;
            };
            if let Some(v) = payload.iter().find(|v| !fits_fp16(**v)) {
                debug!(node = %node.id(), constant = %pred, value = *v, "constant needs high precision");
                return QuantMode::HighPrecision;
            }
        }
    }
    QuantMode::HighPerformance
}

/// Derive the quant mode and record it on the graph
pub fn mark_quant_mode(graph: &mut ComputeGraph) -> QuantMode {
    let mode = derive_quant_mode(graph);
    graph.set_attr(ATTR_QUANT_MODE, AttrValue::Str(mode.as_str().to_string()));
    mode
}

/// Quant entries to run on `isa` under `mode`, in execution order
pub fn quant_schedule(entries: &[PassEntry], isa: IsaVersion, mode: QuantMode) -> Vec<PassEntry> {
    let mut scheduled: Vec<PassEntry> = entries
        .iter()
        .filter(|e| e.is_quant())
        .filter(|e| e.min_isa <= isa)
        .filter(|e| e.quant_mode.map_or(true, |m| m == mode))
        .cloned()
        .collect();
    scheduled.sort_by_key(|e| (e.min_isa, e.priority));
    scheduled
}
