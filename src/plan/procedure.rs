//! A `ProcedureFunction` bound to topology variables.

use crate::analysis::topology::Topology;
use crate::compute::ProcedureRun;
use crate::error::{ConfigurationError, ExecutionError, FunctionError};
use crate::procedures::{check_unique, FunctionInputs, FunctionRun, ProcedureFunction};
use crate::store::{SlotId, TimeGrid, TimeSeries, VariableRef};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use smallvec::SmallVec;
use std::time::Instant;
use tracing::{debug, trace};

/// The plan window plus the forecast origin splitting it into warmup and
/// forecast parts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunWindow {
    pub grid: TimeGrid,
    pub forecast_origin: DateTime<Utc>,
}

impl RunWindow {
    pub fn new(grid: TimeGrid, forecast_origin: DateTime<Utc>) -> Self { Self { grid, forecast_origin } }

    /// Grid points strictly before the forecast origin.
    pub fn warmup_len(&self) -> usize { self.grid.count_before(self.forecast_origin) }
}

/// An unbound procedure: a function plus wiring by variable reference.
#[derive(Debug, Clone)]
pub struct ProcedureDefinition {
    pub id: String,
    pub function: Box<dyn ProcedureFunction>,
    pub boundaries: IndexMap<String, VariableRef>,
    pub outputs: IndexMap<String, VariableRef>,
}

impl ProcedureDefinition {
    pub fn new(
        id: &str,
        function: Box<dyn ProcedureFunction>,
        boundaries: IndexMap<String, VariableRef>,
        outputs: IndexMap<String, VariableRef>,
    ) -> Self {
        Self { id: id.into(), function, boundaries, outputs }
    }
}

/// Function inputs after masking and filling, ready for `compute`.
#[derive(Debug, Clone)]
pub struct PreparedInputs {
    pub series: Vec<TimeSeries>,
    pub grid: TimeGrid,
    pub warmup_len: usize,
    /// Values filled per optional boundary.
    pub filled: Vec<(String, usize)>,
}

impl PreparedInputs {
    pub fn as_function_inputs(&self) -> FunctionInputs<'_> {
        FunctionInputs { series: &self.series, grid: &self.grid, warmup_len: self.warmup_len }
    }
}

/// A function bound to slots. Slot lists run parallel to the function's
/// declared boundaries and outputs; unwired entries are `None`.
#[derive(Debug, Clone)]
pub struct Procedure {
    pub id: String,
    pub function: Box<dyn ProcedureFunction>,
    boundary_slots: SmallVec<[Option<SlotId>; 4]>,
    output_slots: SmallVec<[Option<SlotId>; 4]>,
}

impl Procedure {
    /// Resolves a definition's wiring against `topology`.
    pub fn bind(def: ProcedureDefinition, topology: &Topology) -> Result<Self, ConfigurationError> {
        check_unique(&def.id, "boundary", def.function.boundaries())?;
        check_unique(&def.id, "output", def.function.outputs())?;
        def.function.parameters().validate()?;

        let resolve = |wiring: &IndexMap<String, VariableRef>, name: &str| -> Result<Option<SlotId>, ConfigurationError> {
            wiring.get(name).map(|r| topology.slot(r)).transpose()
        };

        let boundary_slots = def
            .function
            .boundaries()
            .iter()
            .map(|b| resolve(&def.boundaries, &b.name))
            .collect::<Result<SmallVec<[Option<SlotId>; 4]>, _>>()?;
        let output_slots = def
            .function
            .outputs()
            .iter()
            .map(|o| resolve(&def.outputs, &o.name))
            .collect::<Result<SmallVec<[Option<SlotId>; 4]>, _>>()?;

        for slot in output_slots.iter().flatten() {
            if topology.kind(*slot).is_synthesized() {
                return Err(ConfigurationError::NotWritable(topology.label(*slot)));
            }
        }

        Ok(Self { id: def.id, function: def.function, boundary_slots, output_slots })
    }

    /// Slots read through wired boundaries.
    pub fn reads(&self) -> impl Iterator<Item = SlotId> + '_ { self.boundary_slots.iter().flatten().copied() }

    /// Slots written through wired outputs.
    pub fn writes(&self) -> impl Iterator<Item = SlotId> + '_ { self.output_slots.iter().flatten().copied() }

    pub fn boundary_wiring(&self) -> impl Iterator<Item = (&str, SlotId)> + '_ {
        self.function
            .boundaries()
            .iter()
            .zip(&self.boundary_slots)
            .filter_map(|(b, s)| s.map(|s| (b.name.as_str(), s)))
    }

    pub fn output_wiring(&self) -> impl Iterator<Item = (&str, SlotId)> + '_ {
        self.function
            .outputs()
            .iter()
            .zip(&self.output_slots)
            .filter_map(|(o, s)| s.map(|s| (o.name.as_str(), s)))
    }

    pub fn output_slot(&self, index: usize) -> Option<SlotId> { self.output_slots.get(index).copied().flatten() }

    /// Reads one series per declared boundary from the topology, aligned to
    /// the window. Unwired boundaries are all-missing.
    pub fn load_input(&self, topology: &Topology, window: &RunWindow) -> Vec<TimeSeries> {
        self.boundary_slots
            .iter()
            .map(|slot| match slot {
                Some(s) => topology.series(*s).aligned_to(&window.grid),
                None => window.grid.empty_series(),
            })
            .collect()
    }

    /// Applies the boundary flags to raw inputs: warmup-only inputs are masked
    /// from the forecast origin on, required inputs must be complete where
    /// they are required, and optional gaps are filled.
    pub fn prepare(&self, window: &RunWindow, inputs: Vec<TimeSeries>) -> Result<PreparedInputs, ExecutionError> {
        let declared = self.function.boundaries();
        if inputs.len() != declared.len() {
            return Err(ExecutionError::InputArity {
                procedure: self.id.clone(),
                expected: declared.len(),
                actual: inputs.len(),
            });
        }

        let grid = window.grid;
        let warmup_len = window.warmup_len();
        let mut series = Vec::with_capacity(inputs.len());
        let mut filled = Vec::new();

        for (boundary, input) in declared.iter().zip(inputs) {
            let mut aligned = input.aligned_to(&grid);
            let required_until = if boundary.warmup_only {
                aligned = aligned.masked_from(warmup_len);
                warmup_len
            } else {
                grid.len()
            };

            if boundary.optional {
                let count = self.function.fill_policy(boundary).apply(&mut aligned.values);
                if count > 0 {
                    trace!(procedure = %self.id, boundary = %boundary.name, count, "filled missing values");
                }
                filled.push((boundary.name.clone(), count));
            } else if let Some(i) = aligned.first_missing(0..required_until) {
                return Err(ExecutionError::MissingBoundaryData {
                    procedure: self.id.clone(),
                    boundary: boundary.name.clone(),
                    timestamp: grid.timestamp(i),
                });
            }
            series.push(aligned);
        }

        Ok(PreparedInputs { series, grid, warmup_len, filled })
    }

    /// Runs the function once. With `inputs == None` the procedure reads its
    /// own boundary data from `topology`. Nothing is written back; the
    /// caller decides where outputs go.
    pub fn run(
        &self,
        topology: &Topology,
        window: &RunWindow,
        inputs: Option<Vec<TimeSeries>>,
    ) -> Result<ProcedureRun, ExecutionError> {
        let started = Instant::now();
        let raw = match inputs {
            Some(series) => series,
            None => self.load_input(topology, window),
        };
        let prepared = self.prepare(window, raw)?;
        let run = evaluate(&self.id, self.function.as_ref(), &prepared)?;

        let elapsed = started.elapsed();
        debug!(procedure = %self.id, function = self.function.type_tag(), ?elapsed, "procedure finished");
        Ok(ProcedureRun {
            procedure_id: self.id.clone(),
            outputs: self.function.outputs().iter().map(|o| o.name.clone()).zip(run.outputs).collect(),
            results: run.results,
            parameters: self.function.parameters().pairs(),
            filled: prepared.filled,
            elapsed,
        })
    }
}

/// Invokes `function` on prepared inputs and checks the output contract.
pub(crate) fn evaluate(
    procedure: &str,
    function: &dyn ProcedureFunction,
    prepared: &PreparedInputs,
) -> Result<FunctionRun, ExecutionError> {
    let wrap = |source| ExecutionError::ProcedureExecution { procedure: procedure.to_string(), source };
    let run = function.compute(&prepared.as_function_inputs()).map_err(wrap)?;

    let expected = function.outputs().len();
    if run.outputs.len() != expected {
        return Err(wrap(FunctionError::Numerical(format!(
            "function returned {} output series, {} declared",
            run.outputs.len(),
            expected
        ))));
    }
    if let Some(bad) = run.outputs.iter().position(|s| s.len() != prepared.grid.len()) {
        return Err(wrap(FunctionError::Numerical(format!(
            "output '{}' has {} values, window has {}",
            function.outputs()[bad].name,
            run.outputs[bad].len(),
            prepared.grid.len()
        ))));
    }
    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::topology::tests::{day, ten_days};
    use crate::procedures::arithmetic::Difference;
    use crate::procedures::routing::LinearReservoirCascade;
    use crate::procedures::runoff::LinearBucket;
    use crate::procedures::{Constraints, FunctionBoundary, ParameterSet};
    use crate::store::Node;

    fn wiring(pairs: &[(&str, i64, &str)]) -> IndexMap<String, VariableRef> {
        pairs.iter().map(|(name, n, v)| (name.to_string(), VariableRef::new(*n, v))).collect()
    }

    fn topology() -> Topology {
        Topology::new(vec![Node::new(1, "basin", ten_days())
            .observed("pma")
            .observed("etp")
            .observed("q_obs")
            .observed("q_sim")
            .observed("storage")])
        .unwrap()
    }

    fn bucket(topo: &Topology) -> Procedure {
        let def = ProcedureDefinition::new(
            "bucket",
            Box::new(LinearBucket::new(100.0, 0.5)),
            wiring(&[("pma", 1, "pma"), ("etp", 1, "etp"), ("q_obs", 1, "q_obs")]),
            wiring(&[("q_sim", 1, "q_sim"), ("storage", 1, "storage")]),
        );
        Procedure::bind(def, topo).unwrap()
    }

    #[test]
    fn test_input_count_must_match_boundaries() {
        let topo = topology();
        let p = bucket(&topo);
        let window = RunWindow::new(ten_days(), day(5));
        let err = p.run(&topo, &window, Some(vec![ten_days().series(vec![0.0; 10])])).unwrap_err();
        assert_eq!(err, ExecutionError::InputArity { procedure: "bucket".into(), expected: 3, actual: 1 });
    }

    #[test]
    fn test_required_gap_reports_timestamp() {
        let mut topo = topology();
        let mut pma = vec![1.0; 10];
        pma[3] = f64::NAN;
        topo.store_ref(&VariableRef::new(1, "pma"), &ten_days().series(pma)).unwrap();
        let p = bucket(&topo);
        let err = p.run(&topo, &RunWindow::new(ten_days(), day(5)), None).unwrap_err();
        match err {
            ExecutionError::MissingBoundaryData { boundary, timestamp, .. } => {
                assert_eq!(boundary, "pma");
                assert_eq!(timestamp, day(3));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_warmup_only_boundary_is_masked_after_origin() {
        let mut topo = topology();
        topo.store_ref(&VariableRef::new(1, "pma"), &ten_days().series(vec![0.0; 10])).unwrap();
        let window = RunWindow::new(ten_days(), day(5));

        // Gaps after the origin are tolerated.
        let mut q = vec![4.0; 10];
        q[7] = f64::NAN;
        topo.store_ref(&VariableRef::new(1, "q_obs"), &ten_days().series(q.clone())).unwrap();
        let p = bucket(&topo);
        let baseline = p.run(&topo, &window, None).unwrap();

        // Changing post-origin observations must not change the outputs.
        for v in q.iter_mut().skip(5) {
            *v = 1000.0;
        }
        topo.store_ref(&VariableRef::new(1, "q_obs"), &ten_days().series(q)).unwrap();
        let perturbed = p.run(&topo, &window, None).unwrap();
        assert_eq!(baseline.outputs[0].1.values, perturbed.outputs[0].1.values);
        assert_eq!(baseline.results["assimilated_steps"], serde_json::json!(5));

        // A gap before the origin is fatal.
        let mut q = vec![4.0; 10];
        q[2] = f64::NAN;
        topo.store_ref(&VariableRef::new(1, "q_obs"), &ten_days().series(q)).unwrap();
        assert!(matches!(p.run(&topo, &window, None), Err(ExecutionError::MissingBoundaryData { .. })));
    }

    #[test]
    fn test_optional_boundary_filled_and_counted() {
        let topo = Topology::new(vec![Node::new(1, "reach", ten_days()).observed("in").observed("out")]).unwrap();
        let def = ProcedureDefinition::new(
            "route",
            Box::new(LinearReservoirCascade::new(2.0, 1.0)),
            wiring(&[("inflow", 1, "in")]),
            wiring(&[("outflow", 1, "out")]),
        );
        let p = Procedure::bind(def, &topo).unwrap();
        let inputs = vec![ten_days().series(vec![1.0; 10]), ten_days().empty_series()];
        let run = p.run(&topo, &RunWindow::new(ten_days(), day(9)), Some(inputs.clone())).unwrap();
        assert_eq!(run.filled, vec![("lateral".to_string(), 10)]);
        // Caller-provided inputs are untouched.
        assert_eq!(inputs[1].missing_count(), 10);
    }

    #[test]
    fn test_function_error_is_wrapped() {
        let topo = topology();
        let mut p = bucket(&topo);
        p.function.parameters_mut().set("linear_bucket", "k", -1.0).unwrap();
        let inputs = vec![ten_days().series(vec![0.0; 10]), ten_days().empty_series(), ten_days().series(vec![1.0; 10])];
        let err = p.run(&topo, &RunWindow::new(ten_days(), day(5)), Some(inputs)).unwrap_err();
        assert!(matches!(err, ExecutionError::ProcedureExecution { ref procedure, .. } if procedure == "bucket"));
    }

    #[derive(Debug, Clone)]
    struct Broken {
        boundaries: Vec<FunctionBoundary>,
        outputs: Vec<FunctionBoundary>,
        params: ParameterSet,
    }

    impl ProcedureFunction for Broken {
        fn type_tag(&self) -> &'static str { "broken" }
        fn boundaries(&self) -> &[FunctionBoundary] { &self.boundaries }
        fn outputs(&self) -> &[FunctionBoundary] { &self.outputs }
        fn parameters(&self) -> &ParameterSet { &self.params }
        fn parameters_mut(&mut self) -> &mut ParameterSet { &mut self.params }
        fn compute(&self, _inputs: &FunctionInputs<'_>) -> Result<FunctionRun, FunctionError> { Ok(FunctionRun::default()) }
        fn box_clone(&self) -> Box<dyn ProcedureFunction> { Box::new(self.clone()) }
    }

    #[test]
    fn test_output_count_mismatch_is_execution_error() {
        let topo = topology();
        let f = Broken { boundaries: vec![], outputs: vec![FunctionBoundary::required("out")], params: ParameterSet::new() };
        let p = Procedure::bind(ProcedureDefinition::new("b", Box::new(f), IndexMap::new(), IndexMap::new()), &topo).unwrap();
        let err = p.run(&topo, &RunWindow::new(ten_days(), day(5)), None).unwrap_err();
        assert!(matches!(err, ExecutionError::ProcedureExecution { .. }));
    }

    #[test]
    fn test_bind_rejects_duplicate_slot_names() {
        let topo = topology();
        let f = Broken {
            boundaries: vec![FunctionBoundary::required("x"), FunctionBoundary::required("x")],
            outputs: vec![],
            params: ParameterSet::new(),
        };
        let def = ProcedureDefinition::new("dup", Box::new(f), wiring(&[("x", 1, "pma")]), IndexMap::new());
        let err = Procedure::bind(def, &topo).unwrap_err();
        assert_eq!(err, ConfigurationError::DuplicateSlotName { function: "dup".into(), kind: "boundary", name: "x".into() });

        let f = Broken {
            boundaries: vec![],
            outputs: vec![FunctionBoundary::required("y"), FunctionBoundary::required("y")],
            params: ParameterSet::new(),
        };
        let def = ProcedureDefinition::new("dup", Box::new(f), IndexMap::new(), IndexMap::new());
        assert!(matches!(Procedure::bind(def, &topo), Err(ConfigurationError::DuplicateSlotName { kind: "output", .. })));
    }

    #[test]
    fn test_bind_rejects_inverted_constraints() {
        let topo = topology();
        let inverted = Constraints { min: 5.0, low_guide: 4.0, high_guide: 3.0, max: 1.0 };
        let f = Broken {
            boundaries: vec![],
            outputs: vec![],
            params: ParameterSet::new().with_constraints("gain", 2.0, inverted),
        };
        let def = ProcedureDefinition::new("bad", Box::new(f), IndexMap::new(), IndexMap::new());
        assert!(matches!(Procedure::bind(def, &topo), Err(ConfigurationError::InvalidConstraints { .. })));
    }

    #[test]
    fn test_bind_rejects_synthesized_output() {
        let topo = Topology::new(vec![Node::new(1, "n", ten_days())
            .observed("a")
            .observed("b")
            .derived("c", VariableRef::new(1, "a"), Default::default())])
        .unwrap();
        let def = ProcedureDefinition::new(
            "d",
            Box::new(Difference::new()),
            wiring(&[("minuend", 1, "a"), ("subtrahend", 1, "b")]),
            wiring(&[("output", 1, "c")]),
        );
        assert!(matches!(Procedure::bind(def, &topo), Err(ConfigurationError::NotWritable(_))));
    }
}
