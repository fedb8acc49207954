//! Channel routing: pure lag and a Nash cascade of linear reservoirs.

use super::{positive, Constraints, FunctionBoundary, FunctionInputs, FunctionRun, ParameterSet, ProcedureFunction};
use crate::config::FunctionConfig;
use crate::error::{ConfigurationError, FunctionError};
use serde_json::json;

pub const LAG: &str = "lag";
pub const LINEAR_RESERVOIR_CASCADE: &str = "linear_reservoir_cascade";

/// Shifts the input forward by `lag` whole steps; the first `lag` output
/// steps are missing.
#[derive(Debug, Clone)]
pub struct Lag {
    boundaries: Vec<FunctionBoundary>,
    outputs: Vec<FunctionBoundary>,
    params: ParameterSet,
}

impl Lag {
    pub fn new(lag: f64) -> Self {
        let bounds = Constraints { min: 0.0, low_guide: 0.0, high_guide: 3.0, max: 10.0 };
        Self {
            boundaries: vec![FunctionBoundary::required("input")],
            outputs: vec![FunctionBoundary::required("output")],
            params: ParameterSet::new().with_constraints("lag", lag, bounds),
        }
    }

    pub fn from_config(_config: &FunctionConfig) -> Result<Self, ConfigurationError> { Ok(Self::new(1.0)) }
}

impl ProcedureFunction for Lag {
    fn type_tag(&self) -> &'static str { LAG }
    fn boundaries(&self) -> &[FunctionBoundary] { &self.boundaries }
    fn outputs(&self) -> &[FunctionBoundary] { &self.outputs }
    fn parameters(&self) -> &ParameterSet { &self.params }
    fn parameters_mut(&mut self) -> &mut ParameterSet { &mut self.params }

    fn compute(&self, inputs: &FunctionInputs<'_>) -> Result<FunctionRun, FunctionError> {
        let lag = self.params.require("lag")?;
        if !(lag.is_finite() && lag >= 0.0) {
            return Err(FunctionError::InvalidParameter { name: "lag".into(), reason: format!("must be >= 0, got {}", lag) });
        }
        let steps = lag.round() as usize;
        let src = inputs.values(0);
        let out = (0..inputs.len()).map(|t| if t < steps { f64::NAN } else { src[t - steps] }).collect();

        let mut run = FunctionRun { outputs: vec![inputs.grid.series(out)], ..Default::default() };
        run.results.insert("lag_steps".into(), json!(steps));
        Ok(run)
    }

    fn box_clone(&self) -> Box<dyn ProcedureFunction> { Box::new(self.clone()) }
}

/// Nash cascade: `n` identical linear reservoirs with storage constant `k`
/// (in time steps). `lateral` inflow is optional and zero-filled.
#[derive(Debug, Clone)]
pub struct LinearReservoirCascade {
    boundaries: Vec<FunctionBoundary>,
    outputs: Vec<FunctionBoundary>,
    params: ParameterSet,
}

impl LinearReservoirCascade {
    pub fn new(k: f64, n: f64) -> Self {
        Self {
            boundaries: vec![FunctionBoundary::required("inflow"), FunctionBoundary::optional("lateral")],
            outputs: vec![FunctionBoundary::required("outflow")],
            params: ParameterSet::new()
                .with_constraints("k", k, Constraints { min: 0.1, low_guide: 1.0, high_guide: 10.0, max: 50.0 })
                .with_constraints("n", n, Constraints { min: 1.0, low_guide: 1.0, high_guide: 4.0, max: 10.0 }),
        }
    }

    pub fn from_config(_config: &FunctionConfig) -> Result<Self, ConfigurationError> { Ok(Self::new(2.0, 2.0)) }
}

impl ProcedureFunction for LinearReservoirCascade {
    fn type_tag(&self) -> &'static str { LINEAR_RESERVOIR_CASCADE }
    fn boundaries(&self) -> &[FunctionBoundary] { &self.boundaries }
    fn outputs(&self) -> &[FunctionBoundary] { &self.outputs }
    fn parameters(&self) -> &ParameterSet { &self.params }
    fn parameters_mut(&mut self) -> &mut ParameterSet { &mut self.params }

    fn compute(&self, inputs: &FunctionInputs<'_>) -> Result<FunctionRun, FunctionError> {
        let k = positive(&self.params, "k")?;
        let n = positive(&self.params, "n")?.round().max(1.0) as usize;
        // Fraction of storage released per step for an exact linear reservoir.
        let release = 1.0 - (-1.0 / k).exp();

        let inflow = inputs.values(0);
        let lateral = inputs.values(1);
        let mut storage = vec![0.0; n];
        let mut out = Vec::with_capacity(inputs.len());

        for t in 0..inputs.len() {
            let mut q = inflow[t] + lateral[t];
            if q.is_nan() {
                return Err(FunctionError::Numerical(format!("non-finite inflow at step {}", t)));
            }
            for s in storage.iter_mut() {
                *s += q;
                q = *s * release;
                *s -= q;
            }
            out.push(q);
        }

        let mut run = FunctionRun { outputs: vec![inputs.grid.series(out)], ..Default::default() };
        run.results.insert("final_storage".into(), json!(storage));
        run.results.insert("reservoirs".into(), json!(n));
        Ok(run)
    }

    fn box_clone(&self) -> Box<dyn ProcedureFunction> { Box::new(self.clone()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TimeGrid;
    use chrono::{Duration, TimeZone, Utc};

    fn grid(n: i64) -> TimeGrid {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        TimeGrid::new(start, start + Duration::days(n - 1), Duration::days(1)).unwrap()
    }

    #[test]
    fn test_lag_shifts_forward() {
        let g = grid(4);
        let series = vec![g.series(vec![1.0, 2.0, 3.0, 4.0])];
        let mut f = Lag::new(2.0);
        let run = f.compute(&FunctionInputs { series: &series, grid: &g, warmup_len: 0 }).unwrap();
        assert_eq!(run.outputs[0].value_at(0), None);
        assert_eq!(run.outputs[0].value_at(2), Some(1.0));
        assert_eq!(run.outputs[0].value_at(3), Some(2.0));

        f.parameters_mut().set(LAG, "lag", -1.0).unwrap();
        assert!(f.compute(&FunctionInputs { series: &series, grid: &g, warmup_len: 0 }).is_err());
    }

    #[test]
    fn test_cascade_conserves_mass() {
        let g = grid(200);
        let mut inflow = vec![0.0; 200];
        inflow[0] = 100.0;
        let series = vec![g.series(inflow), g.series(vec![0.0; 200])];
        let f = LinearReservoirCascade::new(3.0, 3.0);
        let run = f.compute(&FunctionInputs { series: &series, grid: &g, warmup_len: 0 }).unwrap();

        let total: f64 = run.outputs[0].values.iter().sum();
        assert!((total - 100.0).abs() < 1e-6, "total outflow {}", total);
        // Attenuated: the peak is lower than the pulse.
        let peak = run.outputs[0].values.iter().cloned().fold(0.0, f64::max);
        assert!(peak < 100.0);
    }

    #[test]
    fn test_cascade_rejects_non_positive_k() {
        let g = grid(2);
        let series = vec![g.series(vec![1.0, 1.0]), g.series(vec![0.0, 0.0])];
        let mut f = LinearReservoirCascade::new(2.0, 1.0);
        f.parameters_mut().set(LINEAR_RESERVOIR_CASCADE, "k", 0.0).unwrap();
        let err = f.compute(&FunctionInputs { series: &series, grid: &g, warmup_len: 0 }).unwrap_err();
        assert!(matches!(err, FunctionError::InvalidParameter { .. }));
    }
}
