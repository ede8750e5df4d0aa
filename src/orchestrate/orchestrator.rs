//! Fusion sweep over a graph and its subgraphs
//!
//! One sweep per graph:
//!
//! 1. bump the run count and build the node-type index
//! 2. build the fusion session (reachability matrix, scope table)
//! 3. run every non-quant entry in priority order
//! 4. quant phase: derive the quant mode, run applicable quant entries
//! 5. automatic fusion
//! 6. persist scope ids onto node attributes
//!
//! With `check_cycle_after_each_pass`, every step is followed by a cycle
//! check over the graph with scopes contracted.

use std::sync::Arc;

use tracing::{debug, error, info};

use super::quant::{mark_quant_mode, quant_schedule};
use super::registry::{PassCategory, PassEntry, PassMethod, PassRegistry};
use super::type_index::NodeTypeIndex;
use crate::config::{FusionConfig, PlatformInfo};
use crate::error::{EngineResult, FusionError};
use crate::fusion::{AutoFusion, BufferFusionRunner, FusionSession, FusionStats, AUTO_FUSION_PASS};
use crate::graph::ComputeGraph;
use crate::traits::{OpCompiler, PassStatus, RuleEngine, SliceInfoCalculator};

/// Observable progress of a sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepState {
    /// Nothing started
    Idle,
    /// Building the type index and the session
    BuildingIndex,
    /// Running the i-th entry of the current list
    RunningPass(usize),
    /// Cycle check after the i-th entry; automatic fusion counts as the
    /// entry following the quant list
    CycleCheck(usize),
    /// Quant phase
    QuantPhase,
    /// Automatic fusion phase
    AutoFusion,
    /// Finished
    Done,
    /// Stopped on an error
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SweepKind {
    Full,
    Pruning,
}

/// Drives passes and rules over graphs
pub struct FusionOrchestrator {
    registry: Arc<PassRegistry>,
    config: FusionConfig,
    platform: PlatformInfo,
    rule_engine: Option<Arc<dyn RuleEngine + Send + Sync>>,
    compiler: Option<Arc<dyn OpCompiler + Send + Sync>>,
    slice_calc: Option<Arc<dyn SliceInfoCalculator + Send + Sync>>,
    history: Vec<SweepState>,
    executed: Vec<String>,
    stats: FusionStats,
    last_dump: Option<String>,
}

impl FusionOrchestrator {
    /// Create an orchestrator over a shared registry
    pub fn new(registry: Arc<PassRegistry>, config: FusionConfig, platform: PlatformInfo) -> Self {
        Self {
            registry,
            config,
            platform,
            rule_engine: None,
            compiler: None,
            slice_calc: None,
            history: vec![SweepState::Idle],
            executed: Vec::new(),
            stats: FusionStats::new(),
            last_dump: None,
        }
    }

    /// Attach the rule engine used by rule entries
    pub fn with_rule_engine(mut self, engine: Arc<dyn RuleEngine + Send + Sync>) -> Self {
        self.rule_engine = Some(engine);
        self
    }

    /// Vet pattern fusion groups with a backend compiler
    pub fn with_compiler(mut self, compiler: Arc<dyn OpCompiler + Send + Sync>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    /// Recompute slice info after automatic fusion
    pub fn with_slice_calculator(mut self, calc: Arc<dyn SliceInfoCalculator + Send + Sync>) -> Self {
        self.slice_calc = Some(calc);
        self
    }

    /// Current state
    pub fn state(&self) -> SweepState {
        self.history.last().copied().unwrap_or(SweepState::Idle)
    }

    /// States visited by the last run
    pub fn history(&self) -> &[SweepState] {
        &self.history
    }

    /// Entry names executed by the last run, in order
    pub fn executed_passes(&self) -> &[String] {
        &self.executed
    }

    /// Statistics of the last run
    pub fn stats(&self) -> &FusionStats {
        &self.stats
    }

    /// Graph dump captured when the last run hit a cycle
    pub fn last_dump(&self) -> Option<&str> {
        self.last_dump.as_deref()
    }

    /// Run the full sweep on `graph` and every nested subgraph
    pub fn run_fusion(&mut self, graph: &mut ComputeGraph) -> EngineResult<FusionStats> {
        self.run(graph, SweepKind::Full)
    }

    /// Run only the pruning-tagged entries on `graph` and its subgraphs
    pub fn run_pruning_pass(&mut self, graph: &mut ComputeGraph) -> EngineResult<FusionStats> {
        self.run(graph, SweepKind::Pruning)
    }

    fn run(&mut self, graph: &mut ComputeGraph, kind: SweepKind) -> EngineResult<FusionStats> {
        self.history = vec![SweepState::Idle];
        self.executed.clear();
        self.stats = FusionStats::new();
        self.last_dump = None;

        match self.run_graph(graph, kind) {
            Ok(()) => {
                self.history.push(SweepState::Done);
                info!(
                    graph = graph.name(),
                    passes = self.stats.passes_run,
                    scopes = self.stats.scopes_formed,
                    nodes = self.stats.nodes_fused,
                    "fusion sweep finished"
                );
                Ok(self.stats.clone())
            }
            Err(e) => {
                self.history.push(SweepState::Aborted);
                Err(e)
            }
        }
    }

    fn run_graph(&mut self, graph: &mut ComputeGraph, kind: SweepKind) -> EngineResult<()> {
        graph.bump_run_count();
        self.history.push(SweepState::BuildingIndex);

        let index = NodeTypeIndex::build(graph)?;
        let mut session = FusionSession::new(graph, &self.platform)?;

        let entries = self
            .registry
            .ordered(&self.config.engine_name, self.config.single_op_scene);
        let sweep: Vec<&PassEntry> = entries
            .iter()
            .filter(|e| match kind {
                SweepKind::Full => !e.is_quant(),
                SweepKind::Pruning => e.category == PassCategory::Pruning,
            })
            .collect();

        for (i, entry) in sweep.into_iter().enumerate() {
            self.history.push(SweepState::RunningPass(i));
            self.run_entry(graph, &mut session, &index, entry)?;
            if self.config.check_cycle_after_each_pass {
                self.history.push(SweepState::CycleCheck(i));
                self.check_cycle(graph, &session, &entry.name)?;
            }
        }

        if kind == SweepKind::Full {
            self.history.push(SweepState::QuantPhase);
            let mode = mark_quant_mode(graph);
            let scheduled = quant_schedule(&entries, self.platform.isa_version, mode);
            debug!(graph = graph.name(), mode = %mode, passes = scheduled.len(), "quant phase");
            for (i, entry) in scheduled.iter().enumerate() {
                self.history.push(SweepState::RunningPass(i));
                self.run_entry(graph, &mut session, &index, entry)?;
                if self.config.check_cycle_after_each_pass {
                    self.history.push(SweepState::CycleCheck(i));
                    self.check_cycle(graph, &session, &entry.name)?;
                }
            }

            if self.config.auto_fusion {
                self.history.push(SweepState::AutoFusion);
                self.run_auto_fusion(graph, &mut session)?;
                if self.config.check_cycle_after_each_pass {
                    self.history.push(SweepState::CycleCheck(scheduled.len()));
                    self.check_cycle(graph, &session, AUTO_FUSION_PASS)?;
                }
            }
        }

        session.scopes.persist(graph);

        for sub in graph.subgraphs_mut() {
            self.run_graph(sub, kind)?;
        }
        Ok(())
    }

    fn run_entry(
        &mut self,
        graph: &mut ComputeGraph,
        session: &mut FusionSession,
        index: &NodeTypeIndex,
        entry: &PassEntry,
    ) -> EngineResult<PassStatus> {
        let status = match &entry.method {
            PassMethod::Pass(factory) => {
                let pass = factory();
                let mut runner = BufferFusionRunner::new(&self.config.matcher);
                if let Some(compiler) = &self.compiler {
                    runner = runner.with_compiler(&**compiler);
                }
                let (status, stats) = runner
                    .run(graph, session, index, pass.as_ref())
                    .map_err(|e| e.in_pass(&entry.name))?;
                self.stats.merge(stats);
                status
            }
            PassMethod::Rule(rule_type) => {
                let engine = self
                    .rule_engine
                    .as_ref()
                    .ok_or_else(|| FusionError::RuleEngineMissing(entry.name.clone()).in_pass(&entry.name))?;
                let status = engine
                    .run_rule_by_type(graph, *rule_type, &entry.name)
                    .map_err(|e| e.in_pass(&entry.name))?;
                if status.is_changed() {
                    if !graph.is_acyclic() {
                        return Err(self.cycle_error(graph, &entry.name));
                    }
                    session.resync(graph).map_err(|e| e.in_pass(&entry.name))?;
                }
                status
            }
        };

        self.stats.passes_run += 1;
        self.executed.push(entry.name.clone());
        debug!(pass = %entry.name, changed = status.is_changed(), "entry finished");
        Ok(status)
    }

    fn run_auto_fusion(
        &mut self,
        graph: &mut ComputeGraph,
        session: &mut FusionSession,
    ) -> EngineResult<()> {
        let mut auto = AutoFusion::new(&self.platform, &self.config.auto_fusible);
        if let Some(calc) = &self.slice_calc {
            auto = auto.with_slice_calculator(&**calc);
        }
        let outcome = auto
            .run(graph, session)
            .map_err(|e| e.in_pass(AUTO_FUSION_PASS))?;

        for &scope in &outcome.scopes {
            let size = session.scopes.members(scope).len();
            self.stats.record_fusion(AUTO_FUSION_PASS, size);
        }
        self.stats.rejected += outcome.rejected_merges;
        self.stats.passes_run += 1;
        self.executed.push(AUTO_FUSION_PASS.to_string());
        Ok(())
    }

    fn check_cycle(
        &mut self,
        graph: &ComputeGraph,
        session: &FusionSession,
        pass: &str,
    ) -> EngineResult<()> {
        if graph.is_acyclic() && session.scopes.quotient_is_acyclic(graph) {
            return Ok(());
        }
        Err(self.cycle_error(graph, pass))
    }

    fn cycle_error(&mut self, graph: &ComputeGraph, pass: &str) -> FusionError {
        let dump = graph.dump();
        error!(pass, graph = graph.name(), "cycle detected after pass\n{}", dump);
        self.last_dump = Some(dump);
        FusionError::CycleDetected {
            pass: pass.to_string(),
            graph: graph.name().to_string(),
        }
    }
}
