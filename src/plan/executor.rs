//! The plan orchestrator: loads observed data, runs procedures in dependency
//! order and keeps their results.

use super::procedure::{Procedure, ProcedureDefinition, RunWindow};
use super::source::ObservedSource;
use crate::analysis::topology::{GraphEdge, GraphVertex, Topology};
use crate::compute::Ledger;
use crate::config::PlanConfig;
use crate::error::{ConfigurationError, ExecutionError};
use crate::procedures::FunctionRegistry;
use crate::solver::{CalibrationProblem, CalibrationReport, Objective};
use crate::store::{SlotId, TimeSeries, VariableKind};
use crate::validation::Validator;
use petgraph::graph::DiGraph;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanState {
    Idle,
    InputLoaded,
    Executing,
    Completed,
    Failed,
}

impl fmt::Display for PlanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlanState::Idle => "idle",
            PlanState::InputLoaded => "input-loaded",
            PlanState::Executing => "executing",
            PlanState::Completed => "completed",
            PlanState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Cooperative cancellation, checked between procedures.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self { Self::default() }
    pub fn cancel(&self) { self.0.store(true, Ordering::SeqCst) }
    pub fn is_cancelled(&self) -> bool { self.0.load(Ordering::SeqCst) }
}

#[derive(Debug, Clone)]
pub struct Plan {
    topology: Topology,
    procedures: Vec<Procedure>,
    order: Vec<usize>,
    window: RunWindow,
    state: PlanState,
    ledger: Ledger,
    last_error: Option<ExecutionError>,
}

impl Plan {
    /// Validates all wiring, binds procedures and fixes the execution order.
    pub fn new(
        topology: Topology,
        definitions: Vec<ProcedureDefinition>,
        window: RunWindow,
    ) -> Result<Self, ConfigurationError> {
        Validator::new(&topology, &definitions).validate().map_err(ConfigurationError::Validation)?;

        let procedures = definitions
            .into_iter()
            .map(|def| Procedure::bind(def, &topology))
            .collect::<Result<Vec<_>, _>>()?;
        let order = topology.execution_order(&procedures)?;
        debug!(procedures = procedures.len(), ?order, "plan assembled");

        Ok(Self { topology, procedures, order, window, state: PlanState::Idle, ledger: Ledger::new(), last_error: None })
    }

    pub fn from_config(config: &PlanConfig, registry: &FunctionRegistry) -> Result<Self, ConfigurationError> {
        let topology = Topology::new(config.build_nodes()?)?;
        let definitions = config
            .procedures
            .iter()
            .map(|pc| {
                Ok(ProcedureDefinition {
                    id: pc.id.clone(),
                    function: registry.build(&pc.function)?,
                    boundaries: pc.boundaries.clone(),
                    outputs: pc.outputs.clone(),
                })
            })
            .collect::<Result<Vec<_>, ConfigurationError>>()?;
        let window = RunWindow::new(config.window()?, config.forecast_origin());
        Self::new(topology, definitions, window)
    }

    // --- Accessors ---

    pub fn state(&self) -> PlanState { self.state }
    pub fn ledger(&self) -> &Ledger { &self.ledger }
    pub fn topology(&self) -> &Topology { &self.topology }
    pub fn window(&self) -> &RunWindow { &self.window }
    pub fn procedures(&self) -> &[Procedure] { &self.procedures }
    pub fn last_error(&self) -> Option<&ExecutionError> { self.last_error.as_ref() }

    pub fn procedure(&self, id: &str) -> Option<&Procedure> { self.procedures.iter().find(|p| p.id == id) }

    /// Procedure ids in execution order.
    pub fn execution_order(&self) -> Vec<&str> { self.order.iter().map(|&i| self.procedures[i].id.as_str()).collect() }

    pub fn dependency_graph(&self) -> DiGraph<GraphVertex, GraphEdge> { self.topology.dependency_graph(&self.procedures) }

    fn procedure_index(&self, id: &str) -> Result<usize, ConfigurationError> {
        self.procedures.iter().position(|p| p.id == id).ok_or_else(|| ConfigurationError::InvalidFunctionConfig {
            function: id.into(),
            reason: "no such procedure".into(),
        })
    }

    fn require_state(&self, action: &'static str, allowed: &[PlanState]) -> Result<(), ExecutionError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ExecutionError::InvalidState { action, state: self.state.to_string() })
        }
    }

    // --- Lifecycle ---

    /// Loads every observed variable the procedures read, directly or through
    /// synthesized variables. Variables written by a procedure are skipped.
    /// A failing source is logged and the variable is left without data.
    #[instrument(skip_all, name = "load_input")]
    pub fn load_input(&mut self, source: &dyn ObservedSource) -> Result<usize, ExecutionError> {
        self.require_state("load input", &[PlanState::Idle, PlanState::InputLoaded])?;

        let written: HashSet<SlotId> = self.procedures.iter().flat_map(|p| p.writes()).collect();
        let reads: Vec<SlotId> = self.procedures.iter().flat_map(|p| p.reads()).collect();
        let mut targets: Vec<SlotId> = self
            .topology
            .upstream_from(&reads)
            .into_iter()
            .filter(|s| !written.contains(s) && !self.topology.kind(*s).is_synthesized())
            .collect();
        targets.sort_unstable();

        let mut loaded = 0;
        for slot in targets {
            let reference = self.topology.reference(slot).clone();
            let grid = *self.topology.grid(slot);
            let sources = match self.topology.kind(slot) {
                VariableKind::Observed { sources } => sources.clone(),
                _ => Vec::new(),
            };
            let series = match source.load_observed(&reference, &sources, grid.start, grid.end) {
                Ok(series) => {
                    loaded += 1;
                    series
                }
                Err(reason) => {
                    warn!(variable = %reference, %reason, "observed data unavailable");
                    grid.empty_series()
                }
            };
            self.topology.store(slot, &series)?;
        }

        info!(loaded, "observed data loaded");
        self.state = PlanState::InputLoaded;
        Ok(loaded)
    }

    pub fn execute(&mut self) -> Result<(), ExecutionError> { self.execute_with(&CancelFlag::new()) }

    /// Runs every procedure once in execution order. The first failure stops
    /// the run; results of procedures that already finished are kept.
    #[instrument(skip_all, name = "execute", fields(procedures = self.procedures.len()))]
    pub fn execute_with(&mut self, cancel: &CancelFlag) -> Result<(), ExecutionError> {
        self.require_state("execute", &[PlanState::InputLoaded])?;
        self.state = PlanState::Executing;
        self.ledger.clear();
        self.last_error = None;

        let mut previous: Option<&str> = None;
        for &i in &self.order {
            let procedure = &self.procedures[i];
            if cancel.is_cancelled() {
                let err = ExecutionError::Cancelled { after: previous.unwrap_or("<none>").to_string() };
                warn!(%err, "run cancelled");
                self.state = PlanState::Failed;
                self.last_error = Some(err.clone());
                return Err(err);
            }

            let outcome = procedure.run(&self.topology, &self.window, None).and_then(|run| {
                for (index, (_, series)) in run.outputs.iter().enumerate() {
                    if let Some(slot) = procedure.output_slot(index) {
                        self.topology.store(slot, series)?;
                    }
                }
                Ok(run)
            });

            match outcome {
                Ok(run) => self.ledger.insert(run),
                Err(err) => {
                    warn!(procedure = %procedure.id, %err, "procedure failed");
                    self.state = PlanState::Failed;
                    self.last_error = Some(err.clone());
                    return Err(err);
                }
            }
            previous = Some(procedure.id.as_str());
        }

        info!(runs = self.ledger.len(), "plan completed");
        self.state = PlanState::Completed;
        Ok(())
    }

    /// `load_input` followed by `execute`.
    pub fn run(&mut self, source: &dyn ObservedSource) -> Result<(), ExecutionError> {
        self.load_input(source)?;
        self.execute()
    }

    /// Back to `Idle`; results of the previous run are discarded.
    pub fn reset(&mut self) {
        self.state = PlanState::Idle;
        self.ledger.clear();
        self.last_error = None;
    }

    // --- Calibration ---

    /// Builds a calibration problem for one procedure from the current
    /// topology data and the given observations, keyed by output name.
    pub fn calibration_problem(
        &self,
        procedure_id: &str,
        observed: Vec<(String, TimeSeries)>,
        objective: Objective,
    ) -> Result<CalibrationProblem, ExecutionError> {
        if self.state == PlanState::Executing {
            return Err(ExecutionError::InvalidState { action: "calibrate", state: self.state.to_string() });
        }
        let procedure = &self.procedures[self.procedure_index(procedure_id)?];
        let raw = procedure.load_input(&self.topology, &self.window);
        let prepared = procedure.prepare(&self.window, raw)?;
        Ok(CalibrationProblem::new(procedure_id, procedure.function.clone(), prepared, observed, objective)?)
    }

    /// Writes calibrated parameter values back into the procedure's function.
    pub fn apply_parameters(&mut self, report: &CalibrationReport) -> Result<(), ConfigurationError> {
        let index = self.procedure_index(&report.procedure_id)?;
        let function = &mut self.procedures[index].function;
        let tag = function.type_tag();
        for (name, value) in &report.parameters {
            function.parameters_mut().set(tag, name, *value)?;
        }
        Ok(())
    }

    pub fn set_parameter(&mut self, procedure_id: &str, name: &str, value: f64) -> Result<(), ConfigurationError> {
        let index = self.procedure_index(procedure_id)?;
        let function = &mut self.procedures[index].function;
        let tag = function.type_tag();
        function.parameters_mut().set(tag, name, value)
    }
}
