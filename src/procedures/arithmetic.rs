//! Arithmetic combinators: difference, linear combination and free-form
//! expressions. Optional boundaries of these variants are zero-filled.

use super::{FunctionBoundary, FunctionInputs, FunctionRun, ParameterSet, ProcedureFunction};
use crate::compute::bytecode::{Compiler, Program};
use crate::config::FunctionConfig;
use crate::error::{ConfigurationError, FunctionError};
use serde_json::json;

pub const DIFFERENCE: &str = "difference";
pub const LINEAR_COMBINATION: &str = "linear_combination";
pub const EXPRESSION: &str = "expression";

/// Declares one boundary per configured input, flagging the optional ones.
fn declared_inputs(tag: &str, config: &FunctionConfig) -> Result<Vec<FunctionBoundary>, ConfigurationError> {
    if config.inputs.is_empty() {
        return Err(ConfigurationError::InvalidFunctionConfig {
            function: tag.into(),
            reason: "at least one input must be declared".into(),
        });
    }
    if let Some(unknown) = config.optional_inputs.iter().find(|o| !config.inputs.contains(*o)) {
        return Err(ConfigurationError::InvalidFunctionConfig {
            function: tag.into(),
            reason: format!("optional input '{}' is not a declared input", unknown),
        });
    }
    Ok(config
        .inputs
        .iter()
        .map(|name| {
            if config.optional_inputs.contains(name) {
                FunctionBoundary::optional(name)
            } else {
                FunctionBoundary::required(name)
            }
        })
        .collect())
}

/// `output = minuend - subtrahend`.
#[derive(Debug, Clone)]
pub struct Difference {
    boundaries: Vec<FunctionBoundary>,
    outputs: Vec<FunctionBoundary>,
    params: ParameterSet,
}

impl Difference {
    pub fn new() -> Self {
        Self {
            boundaries: vec![FunctionBoundary::required("minuend"), FunctionBoundary::required("subtrahend")],
            outputs: vec![FunctionBoundary::required("output")],
            params: ParameterSet::new(),
        }
    }

    pub fn from_config(_config: &FunctionConfig) -> Result<Self, ConfigurationError> { Ok(Self::new()) }
}

impl Default for Difference {
    fn default() -> Self { Self::new() }
}

impl ProcedureFunction for Difference {
    fn type_tag(&self) -> &'static str { DIFFERENCE }
    fn boundaries(&self) -> &[FunctionBoundary] { &self.boundaries }
    fn outputs(&self) -> &[FunctionBoundary] { &self.outputs }
    fn parameters(&self) -> &ParameterSet { &self.params }
    fn parameters_mut(&mut self) -> &mut ParameterSet { &mut self.params }

    fn compute(&self, inputs: &FunctionInputs<'_>) -> Result<FunctionRun, FunctionError> {
        let a = inputs.values(0);
        let b = inputs.values(1);
        let out = a.iter().zip(b).map(|(x, y)| x - y).collect();
        Ok(FunctionRun { outputs: vec![inputs.grid.series(out)], ..Default::default() })
    }

    fn box_clone(&self) -> Box<dyn ProcedureFunction> { Box::new(self.clone()) }
}

/// `output = intercept + Σ w_<input> * input`.
#[derive(Debug, Clone)]
pub struct LinearCombination {
    boundaries: Vec<FunctionBoundary>,
    outputs: Vec<FunctionBoundary>,
    params: ParameterSet,
}

impl LinearCombination {
    pub fn from_config(config: &FunctionConfig) -> Result<Self, ConfigurationError> {
        let boundaries = declared_inputs(LINEAR_COMBINATION, config)?;
        let params = boundaries
            .iter()
            .fold(ParameterSet::new().with("intercept", 0.0), |p, b| p.with(&format!("w_{}", b.name), 1.0));
        Ok(Self { boundaries, outputs: vec![FunctionBoundary::required("output")], params })
    }
}

impl ProcedureFunction for LinearCombination {
    fn type_tag(&self) -> &'static str { LINEAR_COMBINATION }
    fn boundaries(&self) -> &[FunctionBoundary] { &self.boundaries }
    fn outputs(&self) -> &[FunctionBoundary] { &self.outputs }
    fn parameters(&self) -> &ParameterSet { &self.params }
    fn parameters_mut(&mut self) -> &mut ParameterSet { &mut self.params }

    fn compute(&self, inputs: &FunctionInputs<'_>) -> Result<FunctionRun, FunctionError> {
        let values = self.params.values();
        let intercept = values[0];
        let mut out = vec![intercept; inputs.len()];
        for (i, w) in values[1..].iter().enumerate() {
            for (acc, x) in out.iter_mut().zip(inputs.values(i)) {
                *acc += w * x;
            }
        }
        let mut run = FunctionRun { outputs: vec![inputs.grid.series(out)], ..Default::default() };
        run.results.insert("weights".into(), json!(values[1..].to_vec()));
        Ok(run)
    }

    fn box_clone(&self) -> Box<dyn ProcedureFunction> { Box::new(self.clone()) }
}

/// Arithmetic expression over boundary names and parameter names, compiled
/// once at construction.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    program: Program,
    boundaries: Vec<FunctionBoundary>,
    outputs: Vec<FunctionBoundary>,
    params: ParameterSet,
}

impl Expression {
    pub fn from_config(config: &FunctionConfig) -> Result<Self, ConfigurationError> {
        let boundaries = declared_inputs(EXPRESSION, config)?;
        let source = config.expression.clone().ok_or_else(|| ConfigurationError::InvalidFunctionConfig {
            function: EXPRESSION.into(),
            reason: "missing 'expression'".into(),
        })?;
        let params = config.parameters.iter().fold(ParameterSet::new(), |p, (name, v)| p.with(name, *v));
        let input_names: Vec<String> = boundaries.iter().map(|b| b.name.clone()).collect();
        let program = Compiler::new(&input_names, &params.names())
            .compile(&source)
            .map_err(|e| ConfigurationError::InvalidFunctionConfig { function: EXPRESSION.into(), reason: e.to_string() })?;
        Ok(Self { source, program, boundaries, outputs: vec![FunctionBoundary::required("output")], params })
    }
}

impl ProcedureFunction for Expression {
    fn type_tag(&self) -> &'static str { EXPRESSION }
    fn boundaries(&self) -> &[FunctionBoundary] { &self.boundaries }
    fn outputs(&self) -> &[FunctionBoundary] { &self.outputs }
    fn parameters(&self) -> &ParameterSet { &self.params }
    fn parameters_mut(&mut self) -> &mut ParameterSet { &mut self.params }

    fn compute(&self, inputs: &FunctionInputs<'_>) -> Result<FunctionRun, FunctionError> {
        let columns: Vec<&[f64]> = (0..self.boundaries.len()).map(|i| inputs.values(i)).collect();
        let out = self.program.eval(&columns, self.params.values(), inputs.len());
        let mut run = FunctionRun { outputs: vec![inputs.grid.series(out)], ..Default::default() };
        run.results.insert("expression".into(), json!(self.source));
        Ok(run)
    }

    fn box_clone(&self) -> Box<dyn ProcedureFunction> { Box::new(self.clone()) }
}
