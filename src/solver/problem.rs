use crate::error::ConfigurationError;
use crate::plan::procedure::{evaluate, PreparedInputs};
use crate::procedures::{Constraints, ProcedureFunction};
use crate::store::TimeSeries;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Goodness-of-fit measure; every variant is minimized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    #[default]
    Rmse,
    Mse,
    Mae,
    /// Minimizes `1 - NSE`.
    NashSutcliffe,
}

impl Objective {
    /// Scores `sim` against `obs` over `range`, using only positions where
    /// both are present. `None` when no position qualifies.
    pub fn score(&self, sim: &[f64], obs: &[f64], range: Range<usize>) -> Option<f64> {
        let end = range.end.min(sim.len()).min(obs.len());
        let pairs: Vec<(f64, f64)> = (range.start..end)
            .map(|i| (sim[i], obs[i]))
            .filter(|(s, o)| !s.is_nan() && !o.is_nan())
            .collect();
        if pairs.is_empty() {
            return None;
        }
        let n = pairs.len() as f64;
        let sse: f64 = pairs.iter().map(|(s, o)| (s - o).powi(2)).sum();

        let value = match self {
            Objective::Mse => sse / n,
            Objective::Rmse => (sse / n).sqrt(),
            Objective::Mae => pairs.iter().map(|(s, o)| (s - o).abs()).sum::<f64>() / n,
            Objective::NashSutcliffe => {
                let mean = pairs.iter().map(|(_, o)| o).sum::<f64>() / n;
                let variance: f64 = pairs.iter().map(|(_, o)| (o - mean).powi(2)).sum();
                if variance == 0.0 {
                    return None;
                }
                sse / variance
            }
        };
        value.is_finite().then_some(value)
    }
}

/// One procedure's function, its fixed inputs and the observations its
/// outputs are scored against.
#[derive(Debug, Clone)]
pub struct CalibrationProblem {
    pub procedure_id: String,
    pub objective: Objective,
    function: Box<dyn ProcedureFunction>,
    inputs: PreparedInputs,
    /// `(output index, observed series aligned to the input grid)`.
    observed: Vec<(usize, TimeSeries)>,
    period: Range<usize>,
    /// Parameter positions that are free to move.
    free: Vec<usize>,
    bounds: Vec<Constraints>,
}

impl CalibrationProblem {
    pub fn new(
        procedure_id: &str,
        function: Box<dyn ProcedureFunction>,
        inputs: PreparedInputs,
        observed: Vec<(String, TimeSeries)>,
        objective: Objective,
    ) -> Result<Self, ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::InvalidFunctionConfig { function: procedure_id.into(), reason };

        function.parameters().validate()?;
        if observed.is_empty() {
            return Err(invalid("no observed series to calibrate against".into()));
        }
        let mut aligned = Vec::with_capacity(observed.len());
        for (name, series) in observed {
            let index = function
                .outputs()
                .iter()
                .position(|o| o.name == name)
                .ok_or_else(|| invalid(format!("'{}' is not an output", name)))?;
            aligned.push((index, series.aligned_to(&inputs.grid)));
        }

        let (free, bounds): (Vec<usize>, Vec<Constraints>) = function
            .parameters()
            .specs()
            .iter()
            .enumerate()
            .filter_map(|(i, spec)| spec.constraints.filter(|c| !c.is_fixed()).map(|c| (i, c)))
            .unzip();
        if free.is_empty() {
            return Err(invalid("no parameter has calibration bounds".into()));
        }

        let period = 0..inputs.grid.len();
        Ok(Self { procedure_id: procedure_id.into(), objective, function, inputs, observed: aligned, period, free, bounds })
    }

    /// Restricts scoring to `[start, end]`.
    pub fn with_period(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let grid = &self.inputs.grid;
        let from = grid.count_before(start);
        let to = grid.count_before(end + grid.interval).max(from);
        self.period = from..to;
        self
    }

    pub fn dimension(&self) -> usize { self.free.len() }
    pub fn bounds(&self) -> &[Constraints] { &self.bounds }

    pub fn free_parameters(&self) -> Vec<String> {
        let specs = self.function.parameters().specs();
        self.free.iter().map(|&i| specs[i].name.clone()).collect()
    }

    /// Current values of the free parameters.
    pub fn initial_point(&self) -> Vec<f64> {
        let values = self.function.parameters().values();
        self.free.iter().zip(&self.bounds).map(|(&i, b)| b.clamp(values[i])).collect()
    }

    /// Full parameter vector with the free positions replaced by `x`.
    pub fn full_parameters(&self, x: &[f64]) -> Vec<f64> {
        let mut values = self.function.parameters().values().to_vec();
        for (&i, v) in self.free.iter().zip(x) {
            values[i] = *v;
        }
        values
    }

    /// Objective at `x`; failed evaluations and unscorable outputs count as
    /// `+inf` so the search moves away from them.
    pub fn evaluate(&self, x: &[f64]) -> f64 {
        let mut function = self.function.clone();
        function.parameters_mut().set_values(&self.full_parameters(x));

        let run = match evaluate(&self.procedure_id, function.as_ref(), &self.inputs) {
            Ok(run) => run,
            Err(_) => return f64::INFINITY,
        };

        let mut total = 0.0;
        for (index, obs) in &self.observed {
            match self.objective.score(&run.outputs[*index].values, &obs.values, self.period.clone()) {
                Some(v) => total += v,
                None => return f64::INFINITY,
            }
        }
        total / self.observed.len() as f64
    }
}
