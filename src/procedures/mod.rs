//! The pluggable computation unit shared by every procedure variant.
//!
//! A `ProcedureFunction` declares an ordered list of boundary slots and output
//! slots, owns a parameter set and maps one input series per boundary to one
//! output series per output. Wiring to topology variables, missing-data policy
//! and warmup masking happen in `plan::Procedure`, so a function only ever sees
//! inputs that already satisfy its declared slot flags.

pub mod arithmetic;
pub mod registry;
pub mod routing;
pub mod runoff;

pub use registry::FunctionRegistry;

use crate::compute::{kernel, Diagnostics};
use crate::error::{ConfigurationError, FunctionError};
use crate::store::{TimeGrid, TimeSeries};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Descriptor of a boundary or output slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionBoundary {
    pub name: String,
    /// Missing data is filled with the function's fill policy instead of
    /// aborting the run.
    pub optional: bool,
    /// Data is required only strictly before the forecast origin.
    pub warmup_only: bool,
}

impl FunctionBoundary {
    pub fn required(name: &str) -> Self { Self { name: name.into(), optional: false, warmup_only: false } }
    pub fn optional(name: &str) -> Self { Self { name: name.into(), optional: true, warmup_only: false } }
    pub fn warmup_only(name: &str) -> Self { Self { name: name.into(), optional: false, warmup_only: true } }
}

/// Rejects a slot list containing the same name twice.
pub fn check_unique(function: &str, kind: &'static str, slots: &[FunctionBoundary]) -> Result<(), ConfigurationError> {
    let mut seen = HashSet::new();
    for slot in slots {
        if !seen.insert(slot.name.as_str()) {
            return Err(ConfigurationError::DuplicateSlotName {
                function: function.to_string(),
                kind,
                name: slot.name.clone(),
            });
        }
    }
    Ok(())
}

/// Calibration bounds `(min, low_guide, high_guide, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    pub min: f64,
    pub low_guide: f64,
    pub high_guide: f64,
    pub max: f64,
}

impl Constraints {
    pub fn new(name: &str, min: f64, low_guide: f64, high_guide: f64, max: f64) -> Result<Self, ConfigurationError> {
        let c = Self { min, low_guide, high_guide, max };
        c.validate(name)?;
        Ok(c)
    }

    pub fn from_array(name: &str, v: [f64; 4]) -> Result<Self, ConfigurationError> {
        Self::new(name, v[0], v[1], v[2], v[3])
    }

    pub fn validate(&self, name: &str) -> Result<(), ConfigurationError> {
        let ordered = self.min <= self.low_guide && self.low_guide <= self.high_guide && self.high_guide <= self.max;
        let finite = [self.min, self.low_guide, self.high_guide, self.max].iter().all(|v| v.is_finite());
        if !finite || !ordered {
            return Err(ConfigurationError::InvalidConstraints {
                name: name.to_string(),
                reason: format!(
                    "expected min <= low_guide <= high_guide <= max, got ({}, {}, {}, {})",
                    self.min, self.low_guide, self.high_guide, self.max
                ),
            });
        }
        Ok(())
    }

    /// The four candidate coordinates an initial simplex draws from.
    pub fn candidates(&self) -> [f64; 4] { [self.min, self.low_guide, self.high_guide, self.max] }

    #[inline]
    pub fn contains(&self, v: f64) -> bool { v >= self.min && v <= self.max }

    #[inline]
    pub fn clamp(&self, v: f64) -> f64 { v.clamp(self.min, self.max) }

    pub fn is_fixed(&self) -> bool { self.min == self.max }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub name: String,
    pub constraints: Option<Constraints>,
}

/// Ordered parameter declarations and their current values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    specs: Vec<ParameterSpec>,
    values: Vec<f64>,
}

impl ParameterSet {
    pub fn new() -> Self { Self::default() }

    /// Declares a parameter with a default value.
    pub fn with(mut self, name: &str, default: f64) -> Self {
        self.specs.push(ParameterSpec { name: name.into(), constraints: None });
        self.values.push(default);
        self
    }

    /// Declares a calibratable parameter. The bounds are checked by
    /// `validate` when the function is bound or calibrated.
    pub fn with_constraints(mut self, name: &str, default: f64, constraints: Constraints) -> Self {
        self.specs.push(ParameterSpec { name: name.into(), constraints: Some(constraints) });
        self.values.push(default);
        self
    }

    pub fn len(&self) -> usize { self.specs.len() }
    pub fn is_empty(&self) -> bool { self.specs.is_empty() }
    pub fn specs(&self) -> &[ParameterSpec] { &self.specs }
    pub fn values(&self) -> &[f64] { &self.values }

    pub fn names(&self) -> Vec<String> { self.specs.iter().map(|s| s.name.clone()).collect() }

    pub fn position(&self, name: &str) -> Option<usize> { self.specs.iter().position(|s| s.name == name) }

    pub fn get(&self, name: &str) -> Option<f64> { self.position(name).map(|i| self.values[i]) }

    /// Value by name. Built-in functions declare every name they read, so a
    /// miss here is a programming error reported as an invalid parameter.
    pub fn require(&self, name: &str) -> Result<f64, FunctionError> {
        self.get(name).ok_or_else(|| FunctionError::InvalidParameter {
            name: name.into(),
            reason: "not declared".into(),
        })
    }

    pub fn set(&mut self, function: &str, name: &str, value: f64) -> Result<(), ConfigurationError> {
        let i = self.position(name).ok_or_else(|| ConfigurationError::UnknownParameter {
            function: function.into(),
            parameter: name.into(),
        })?;
        self.values[i] = value;
        Ok(())
    }

    pub fn constrain(&mut self, function: &str, name: &str, constraints: Constraints) -> Result<(), ConfigurationError> {
        constraints.validate(name)?;
        let i = self.position(name).ok_or_else(|| ConfigurationError::UnknownParameter {
            function: function.into(),
            parameter: name.into(),
        })?;
        self.specs[i].constraints = Some(constraints);
        Ok(())
    }

    /// Checks every declared bound.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for spec in &self.specs {
            if let Some(c) = &spec.constraints {
                c.validate(&spec.name)?;
            }
        }
        Ok(())
    }

    /// Overwrites values positionally; extra values are ignored.
    pub fn set_values(&mut self, values: &[f64]) {
        for (slot, v) in self.values.iter_mut().zip(values) {
            *slot = *v;
        }
    }

    pub fn pairs(&self) -> Vec<(String, f64)> {
        self.specs.iter().zip(&self.values).map(|(s, v)| (s.name.clone(), *v)).collect()
    }
}

/// How an optional boundary's gaps are filled before computation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FillPolicy {
    Zero,
    Constant(f64),
    /// Carry the last present value forward; leading gaps become zero.
    Previous,
}

impl FillPolicy {
    pub fn apply(&self, values: &mut [f64]) -> usize {
        match self {
            FillPolicy::Zero => kernel::fill_missing(values, 0.0),
            FillPolicy::Constant(c) => kernel::fill_missing(values, *c),
            FillPolicy::Previous => kernel::fill_forward(values, 0.0),
        }
    }
}

/// Inputs handed to `ProcedureFunction::compute`, one series per declared
/// boundary, all aligned on `grid`.
#[derive(Debug, Clone, Copy)]
pub struct FunctionInputs<'a> {
    pub series: &'a [TimeSeries],
    pub grid: &'a TimeGrid,
    /// Number of grid points strictly before the forecast origin.
    pub warmup_len: usize,
}

impl<'a> FunctionInputs<'a> {
    #[inline]
    pub fn values(&self, boundary: usize) -> &'a [f64] { &self.series[boundary].values }
    pub fn len(&self) -> usize { self.grid.len() }
    pub fn is_empty(&self) -> bool { false }
}

/// Outputs (one per declared output, in declaration order) plus diagnostics.
#[derive(Debug, Clone, Default)]
pub struct FunctionRun {
    pub outputs: Vec<TimeSeries>,
    pub results: Diagnostics,
}

/// Capability interface of every procedure variant.
pub trait ProcedureFunction: Send + Sync + fmt::Debug {
    /// Configuration tag this variant is registered under.
    fn type_tag(&self) -> &'static str;
    fn boundaries(&self) -> &[FunctionBoundary];
    fn outputs(&self) -> &[FunctionBoundary];
    fn parameters(&self) -> &ParameterSet;
    fn parameters_mut(&mut self) -> &mut ParameterSet;

    fn fill_policy(&self, _boundary: &FunctionBoundary) -> FillPolicy { FillPolicy::Zero }

    /// Runs the computation. Must not assume anything about warmup-only
    /// boundaries at or after `inputs.warmup_len`.
    fn compute(&self, inputs: &FunctionInputs<'_>) -> Result<FunctionRun, FunctionError>;

    fn box_clone(&self) -> Box<dyn ProcedureFunction>;
}

impl Clone for Box<dyn ProcedureFunction> {
    fn clone(&self) -> Self { self.box_clone() }
}

/// Rejects non-positive or non-finite parameter values.
pub(crate) fn positive(params: &ParameterSet, name: &str) -> Result<f64, FunctionError> {
    let v = params.require(name)?;
    if !(v.is_finite() && v > 0.0) {
        return Err(FunctionError::InvalidParameter { name: name.into(), reason: format!("must be > 0, got {}", v) });
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_slot_names_rejected() {
        let slots = vec![FunctionBoundary::required("a"), FunctionBoundary::optional("a")];
        let err = check_unique("f", "boundary", &slots).unwrap_err();
        assert!(matches!(err, ConfigurationError::DuplicateSlotName { .. }));
        assert!(check_unique("f", "boundary", &[FunctionBoundary::required("a")]).is_ok());
    }

    #[test]
    fn test_constraints_ordering() {
        assert!(Constraints::new("k", 0.0, 1.0, 2.0, 3.0).is_ok());
        assert!(Constraints::new("k", 0.0, 2.0, 1.0, 3.0).is_err());
        assert!(Constraints::new("k", 0.0, 1.0, 2.0, f64::NAN).is_err());
    }

    #[test]
    fn test_parameter_set_by_name() {
        let mut p = ParameterSet::new().with("k", 1.0).with("n", 2.0);
        p.set("f", "n", 3.0).unwrap();
        assert_eq!(p.get("n"), Some(3.0));
        assert!(matches!(p.set("f", "x", 1.0), Err(ConfigurationError::UnknownParameter { .. })));
        assert_eq!(p.pairs(), vec![("k".to_string(), 1.0), ("n".to_string(), 3.0)]);
    }
}
