//! Pass orchestration
//!
//! | Module | Role |
//! |--------|------|
//! | `registry` | Registered passes and rules, ordered per engine and scene |
//! | `type_index` | Node-type index keyed by op type and pattern tag |
//! | `quant` | Quant-mode derivation and quant-phase scheduling |
//! | `orchestrator` | Sweep driver with per-step cycle checks |
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use fusion_engine::orchestrate::{FusionOrchestrator, PassEntry, PassRegistry};
//!
//! let registry = Arc::new(PassRegistry::new());
//! registry.register(PassEntry::pass("ConvRelu", 0, || Box::new(ConvReluPass)));
//! let mut orch = FusionOrchestrator::new(registry, FusionConfig::default(), PlatformInfo::default());
//! let stats = orch.run_fusion(&mut graph)?;
//! ```

pub mod orchestrator;
pub mod quant;
pub mod registry;
pub mod type_index;

pub use orchestrator::{FusionOrchestrator, SweepState};
pub use quant::{derive_quant_mode, fits_fp16, mark_quant_mode, quant_schedule, QuantMode, ATTR_QUANT_MODE};
pub use registry::{PassCategory, PassEntry, PassFactory, PassMethod, PassRegistry};
pub use type_index::NodeTypeIndex;
