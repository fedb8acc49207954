use crate::analysis::RunTelemetry;
use crate::config::PlanConfig;
use crate::display::trace;
use crate::plan::{InMemorySource, ObservedSource, Plan};
use crate::procedures::FunctionRegistry;
use crate::solver::{calibrate_multi_start, CalibrationOptions, Objective};
use crate::store::{TimeSeries, VariableRef};
use chrono::{DateTime, Duration, Utc};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

fn value_err(e: impl std::fmt::Display) -> PyErr { PyValueError::new_err(e.to_string()) }
fn runtime_err(e: impl std::fmt::Display) -> PyErr { PyRuntimeError::new_err(e.to_string()) }

fn parse_time(s: &str) -> PyResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).map(|d| d.with_timezone(&Utc)).map_err(value_err)
}

fn to_optional(series: &TimeSeries) -> Vec<Option<f64>> { (0..series.len()).map(|i| series.value_at(i)).collect() }

#[pyclass(name = "_Plan")]
#[derive(Debug, Clone)]
pub struct PyPlan {
    inner: Plan,
    source: InMemorySource,
}

#[pymethods]
impl PyPlan {
    /// Builds a plan from a JSON configuration document.
    #[staticmethod]
    pub fn from_json(document: &str) -> PyResult<Self> {
        let config = PlanConfig::from_json_str(document).map_err(value_err)?;
        let inner = Plan::from_config(&config, &FunctionRegistry::with_builtins()).map_err(value_err)?;
        Ok(Self { inner, source: InMemorySource::new() })
    }

    /// Registers observed values starting at `start` (RFC 3339), one every
    /// `interval_seconds`. `None` marks a missing value.
    pub fn set_observed(
        &mut self,
        node_id: i64,
        var_id: &str,
        start: &str,
        interval_seconds: i64,
        values: Vec<Option<f64>>,
    ) -> PyResult<()> {
        if interval_seconds <= 0 {
            return Err(PyValueError::new_err("interval_seconds must be positive"));
        }
        let values = values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect();
        let series = TimeSeries::new(parse_time(start)?, Duration::seconds(interval_seconds), values);
        self.source.insert(VariableRef::new(node_id, var_id), series);
        Ok(())
    }

    pub fn run(&mut self) -> PyResult<()> { self.inner.run(&self.source).map_err(runtime_err) }

    pub fn reset(&mut self) { self.inner.reset() }

    pub fn state(&self) -> String { self.inner.state().to_string() }

    pub fn execution_order(&self) -> Vec<String> {
        self.inner.execution_order().into_iter().map(String::from).collect()
    }

    pub fn series(&self, node_id: i64, var_id: &str) -> PyResult<Vec<Option<f64>>> {
        let series = self.inner.topology().series_of(&VariableRef::new(node_id, var_id)).map_err(value_err)?;
        Ok(to_optional(&series))
    }

    pub fn ledger_json(&self) -> PyResult<String> { self.inner.ledger().to_json().map_err(runtime_err) }

    pub fn telemetry_json(&self) -> PyResult<String> {
        serde_json::to_string_pretty(&RunTelemetry::analyze(self.inner.ledger())).map_err(runtime_err)
    }

    pub fn trace(&self, node_id: i64, var_id: &str) -> String {
        trace::format_trace(
            self.inner.topology(),
            self.inner.procedures(),
            self.inner.ledger(),
            &VariableRef::new(node_id, var_id),
        )
    }

    /// Calibrates one procedure output against the current data of an
    /// observed variable, applies the best parameters and returns the report
    /// as JSON.
    #[pyo3(signature = (procedure_id, output, node_id, var_id, objective = "rmse", seeds = vec![0], max_iterations = 500))]
    pub fn calibrate(
        &mut self,
        procedure_id: &str,
        output: &str,
        node_id: i64,
        var_id: &str,
        objective: &str,
        seeds: Vec<u64>,
        max_iterations: usize,
    ) -> PyResult<String> {
        let objective: Objective = serde_json::from_value(serde_json::Value::String(objective.into())).map_err(value_err)?;
        let variable = VariableRef::new(node_id, var_id);
        let topology = self.inner.topology();
        let grid = *topology.grid(topology.slot(&variable).map_err(value_err)?);
        let observed = self.source.load_observed(&variable, &[], grid.start, grid.end).map_err(value_err)?;

        let problem = self
            .inner
            .calibration_problem(procedure_id, vec![(output.to_string(), observed)], objective)
            .map_err(runtime_err)?;
        let options = CalibrationOptions { max_iterations, ..Default::default() };
        let report = calibrate_multi_start(&problem, &options, &seeds).map_err(runtime_err)?;
        self.inner.apply_parameters(&report).map_err(value_err)?;
        serde_json::to_string_pretty(&report).map_err(runtime_err)
    }
}

#[pyfunction]
fn core_version() -> &'static str { env!("CARGO_PKG_VERSION") }

/// Defines the `_core` Python module.
#[pymodule]
pub fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(core_version, m)?)?;
    m.add_class::<PyPlan>()?;
    Ok(())
}
