//! Registry of fusion passes and rules
//!
//! Entries are registered once at start-up and read by every orchestrator.
//! The priority-ordered list for an (engine, single-op scene) configuration
//! is derived on first use and cached under a hash of that configuration;
//! registering a new entry drops the cache.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHasher};

use super::quant::QuantMode;
use crate::config::IsaVersion;
use crate::traits::{PatternFusionPass, RuleType};

/// Creates a fresh pass instance per run
pub type PassFactory = Arc<dyn Fn() -> Box<dyn PatternFusionPass> + Send + Sync>;

/// How an entry is executed
#[derive(Clone)]
pub enum PassMethod {
    /// Pattern fusion pass run through the buffer fusion runner
    Pass(PassFactory),
    /// Declarative rule run by the rule engine
    Rule(RuleType),
}

impl fmt::Debug for PassMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassMethod::Pass(_) => write!(f, "Pass(<factory>)"),
            PassMethod::Rule(rule_type) => write!(f, "Rule({:?})", rule_type),
        }
    }
}

/// Sweep an entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PassCategory {
    /// Generic priority sweep
    #[default]
    Generic,
    /// Dedicated quant phase only
    Quant,
    /// Generic sweep and the pruning sweep
    Pruning,
}

/// One orchestrated pass or rule
#[derive(Debug, Clone)]
pub struct PassEntry {
    /// Name, also used as the rule name for rule entries
    pub name: String,
    /// Lower runs first
    pub priority: i32,
    /// Execution method
    pub method: PassMethod,
    /// Sweep category
    pub category: PassCategory,
    /// Oldest ISA the entry applies to (quant phase)
    pub min_isa: IsaVersion,
    /// Only run under this quant mode (quant phase)
    pub quant_mode: Option<QuantMode>,
    /// Only run for this engine
    pub engine: Option<String>,
    /// Only run in (or outside) single-op scenes
    pub single_op_scene: Option<bool>,
}

impl PassEntry {
    fn with_method(name: &str, priority: i32, method: PassMethod) -> Self {
        Self {
            name: name.to_string(),
            priority,
            method,
            category: PassCategory::Generic,
            min_isa: IsaVersion::V100,
            quant_mode: None,
            engine: None,
            single_op_scene: None,
        }
    }

    /// Entry running a pattern fusion pass
    pub fn pass<F>(name: &str, priority: i32, factory: F) -> Self
    where
        F: Fn() -> Box<dyn PatternFusionPass> + Send + Sync + 'static,
    {
        Self::with_method(name, priority, PassMethod::Pass(Arc::new(factory)))
    }

    /// Entry running a declarative rule
    pub fn rule(name: &str, priority: i32, rule_type: RuleType) -> Self {
        Self::with_method(name, priority, PassMethod::Rule(rule_type))
    }

    /// Move the entry to the quant phase
    pub fn quant(mut self) -> Self {
        self.category = PassCategory::Quant;
        self
    }

    /// Tag the entry for the pruning sweep
    pub fn pruning(mut self) -> Self {
        self.category = PassCategory::Pruning;
        self
    }

    /// Set the oldest applicable ISA
    pub fn with_min_isa(mut self, isa: IsaVersion) -> Self {
        self.min_isa = isa;
        self
    }

    /// Restrict to one quant mode
    pub fn with_quant_mode(mut self, mode: QuantMode) -> Self {
        self.quant_mode = Some(mode);
        self
    }

    /// Restrict to one engine
    pub fn for_engine(mut self, engine: &str) -> Self {
        self.engine = Some(engine.to_string());
        self
    }

    /// Restrict to single-op scenes, or to the rest
    pub fn for_scene(mut self, single_op: bool) -> Self {
        self.single_op_scene = Some(single_op);
        self
    }

    /// Whether the entry belongs to the quant phase
    pub fn is_quant(&self) -> bool {
        self.category == PassCategory::Quant
    }

    /// Whether the entry is selected for a configuration
    pub fn applies_to(&self, engine: &str, single_op: bool) -> bool {
        self.engine.as_deref().map_or(true, |e| e == engine)
            && self.single_op_scene.map_or(true, |s| s == single_op)
    }
}

#[derive(Default)]
struct RegistryInner {
    entries: Vec<PassEntry>,
    cache: FxHashMap<u64, Arc<Vec<PassEntry>>>,
}

/// Shared, mutex-guarded pass registry
#[derive(Default)]
pub struct PassRegistry {
    inner: Mutex<RegistryInner>,
}

impl PassRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry
    pub fn register(&self, entry: PassEntry) {
        let mut inner = self.inner.lock();
        inner.entries.push(entry);
        inner.cache.clear();
    }

    /// Number of registered entries
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Entries applying to the configuration, stably sorted by priority
    pub fn ordered(&self, engine: &str, single_op: bool) -> Arc<Vec<PassEntry>> {
        let key = config_key(engine, single_op);
        let mut inner = self.inner.lock();
        if let Some(list) = inner.cache.get(&key) {
            return Arc::clone(list);
        }

        let mut list: Vec<PassEntry> = inner
            .entries
            .iter()
            .filter(|e| e.applies_to(engine, single_op))
            .cloned()
            .collect();
        list.sort_by_key(|e| e.priority);
        let list = Arc::new(list);
        inner.cache.insert(key, Arc::clone(&list));
        list
    }

    /// Number of cached configurations
    pub fn cached_configs(&self) -> usize {
        self.inner.lock().cache.len()
    }
}

fn config_key(engine: &str, single_op: bool) -> u64 {
    let mut hasher = FxHasher::default();
    engine.hash(&mut hasher);
    single_op.hash(&mut hasher);
    hasher.finish()
}
