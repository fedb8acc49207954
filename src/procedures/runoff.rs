//! Single-store rainfall–runoff transform.
//!
//! `pma` (precipitation) drives a soil store of size `capacity`; `etp`
//! (potential evapotranspiration) is optional and zero-filled; `q_obs` is a
//! warmup-only boundary used to re-initialize the store from observed
//! discharge before the forecast origin.

use super::{positive, Constraints, FunctionBoundary, FunctionInputs, FunctionRun, ParameterSet, ProcedureFunction};
use crate::config::FunctionConfig;
use crate::error::{ConfigurationError, FunctionError};
use serde_json::json;

pub const LINEAR_BUCKET: &str = "linear_bucket";

#[derive(Debug, Clone)]
pub struct LinearBucket {
    boundaries: Vec<FunctionBoundary>,
    outputs: Vec<FunctionBoundary>,
    params: ParameterSet,
}

impl LinearBucket {
    pub fn new(capacity: f64, k: f64) -> Self {
        Self {
            boundaries: vec![
                FunctionBoundary::required("pma"),
                FunctionBoundary::optional("etp"),
                FunctionBoundary::warmup_only("q_obs"),
            ],
            outputs: vec![FunctionBoundary::required("q_sim"), FunctionBoundary::required("storage")],
            params: ParameterSet::new()
                .with_constraints("capacity", capacity, Constraints { min: 1.0, low_guide: 20.0, high_guide: 200.0, max: 1000.0 })
                .with_constraints("k", k, Constraints { min: 0.001, low_guide: 0.01, high_guide: 0.5, max: 1.0 }),
        }
    }

    pub fn from_config(_config: &FunctionConfig) -> Result<Self, ConfigurationError> { Ok(Self::new(100.0, 0.1)) }
}

impl ProcedureFunction for LinearBucket {
    fn type_tag(&self) -> &'static str { LINEAR_BUCKET }
    fn boundaries(&self) -> &[FunctionBoundary] { &self.boundaries }
    fn outputs(&self) -> &[FunctionBoundary] { &self.outputs }
    fn parameters(&self) -> &ParameterSet { &self.params }
    fn parameters_mut(&mut self) -> &mut ParameterSet { &mut self.params }

    fn compute(&self, inputs: &FunctionInputs<'_>) -> Result<FunctionRun, FunctionError> {
        let capacity = positive(&self.params, "capacity")?;
        let k = positive(&self.params, "k")?;
        if k > 1.0 {
            return Err(FunctionError::InvalidParameter { name: "k".into(), reason: format!("must be <= 1, got {}", k) });
        }

        let pma = inputs.values(0);
        let etp = inputs.values(1);
        let q_obs = inputs.values(2);

        let mut s = 0.0_f64;
        let mut q_sim = Vec::with_capacity(inputs.len());
        let mut storage = Vec::with_capacity(inputs.len());
        let mut assimilated = 0usize;

        for t in 0..inputs.len() {
            if pma[t].is_nan() {
                return Err(FunctionError::Numerical(format!("non-finite precipitation at step {}", t)));
            }
            s += pma[t].max(0.0);
            let et = (etp[t].max(0.0) * s / capacity).min(s);
            s -= et;
            let excess = (s - capacity).max(0.0);
            s -= excess;
            let base = k * s;
            s -= base;
            q_sim.push(excess + base);

            // Store re-initialization; never reads q_obs past the origin.
            if t < inputs.warmup_len {
                let obs = q_obs[t];
                if obs.is_finite() {
                    s = (obs / k * (1.0 - k)).clamp(0.0, capacity);
                    assimilated += 1;
                }
            }
            storage.push(s);
        }

        let mut run = FunctionRun {
            outputs: vec![inputs.grid.series(q_sim), inputs.grid.series(storage)],
            ..Default::default()
        };
        run.results.insert("assimilated_steps".into(), json!(assimilated));
        run.results.insert("final_storage".into(), json!(s));
        Ok(run)
    }

    fn box_clone(&self) -> Box<dyn ProcedureFunction> { Box::new(self.clone()) }
}
