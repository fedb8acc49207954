//! Type-tag keyed construction of procedure functions.

use super::{arithmetic, check_unique, routing, runoff, Constraints, ProcedureFunction};
use crate::config::FunctionConfig;
use crate::error::ConfigurationError;
use std::collections::HashMap;
use std::fmt;

pub type FunctionBuilder =
    Box<dyn Fn(&FunctionConfig) -> Result<Box<dyn ProcedureFunction>, ConfigurationError> + Send + Sync>;

/// Maps configuration type tags to function builders. The engine only ever
/// talks to the built function through the `ProcedureFunction` trait.
pub struct FunctionRegistry {
    builders: HashMap<String, FunctionBuilder>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<&String> = self.builders.keys().collect();
        tags.sort();
        f.debug_struct("FunctionRegistry").field("types", &tags).finish()
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self { Self::with_builtins() }
}

fn boxed<F: ProcedureFunction + 'static>(
    built: Result<F, ConfigurationError>,
) -> Result<Box<dyn ProcedureFunction>, ConfigurationError> {
    Ok(Box::new(built?))
}

impl FunctionRegistry {
    pub fn empty() -> Self { Self { builders: HashMap::new() } }

    pub fn with_builtins() -> Self {
        let mut reg = Self::empty();
        reg.register(arithmetic::DIFFERENCE, |c| boxed(arithmetic::Difference::from_config(c)));
        reg.register(arithmetic::LINEAR_COMBINATION, |c| boxed(arithmetic::LinearCombination::from_config(c)));
        reg.register(arithmetic::EXPRESSION, |c| boxed(arithmetic::Expression::from_config(c)));
        reg.register(routing::LAG, |c| boxed(routing::Lag::from_config(c)));
        reg.register(routing::LINEAR_RESERVOIR_CASCADE, |c| boxed(routing::LinearReservoirCascade::from_config(c)));
        reg.register(runoff::LINEAR_BUCKET, |c| boxed(runoff::LinearBucket::from_config(c)));
        reg
    }

    /// Registers (or replaces) the builder for `tag`.
    pub fn register<F>(&mut self, tag: &str, builder: F)
    where
        F: Fn(&FunctionConfig) -> Result<Box<dyn ProcedureFunction>, ConfigurationError> + Send + Sync + 'static,
    {
        self.builders.insert(tag.to_string(), Box::new(builder));
    }

    pub fn contains(&self, tag: &str) -> bool { self.builders.contains_key(tag) }

    /// Builds a function, then applies configured parameter values and
    /// calibration constraints on top of the variant's defaults.
    pub fn build(&self, config: &FunctionConfig) -> Result<Box<dyn ProcedureFunction>, ConfigurationError> {
        let builder = self
            .builders
            .get(&config.type_tag)
            .ok_or_else(|| ConfigurationError::UnknownFunctionType(config.type_tag.clone()))?;
        let mut function = builder(config)?;

        check_unique(&config.type_tag, "boundary", function.boundaries())?;
        check_unique(&config.type_tag, "output", function.outputs())?;

        let params = function.parameters_mut();
        for (name, value) in &config.parameters {
            params.set(&config.type_tag, name, *value)?;
        }
        for (name, bounds) in &config.constraints {
            params.constrain(&config.type_tag, name, Constraints::from_array(name, *bounds)?)?;
        }
        Ok(function)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_type_tag() {
        let reg = FunctionRegistry::with_builtins();
        let err = reg.build(&FunctionConfig::new("gr4j")).unwrap_err();
        assert_eq!(err, ConfigurationError::UnknownFunctionType("gr4j".into()));
    }

    #[test]
    fn test_parameters_and_constraints_applied() {
        let reg = FunctionRegistry::with_builtins();
        let mut config = FunctionConfig::new("linear_reservoir_cascade").parameter("k", 3.0);
        config.constraints.insert("k".into(), [0.5, 1.0, 5.0, 10.0]);
        let f = reg.build(&config).unwrap();
        assert_eq!(f.parameters().get("k"), Some(3.0));
        assert_eq!(f.parameters().specs()[0].constraints.unwrap().max, 10.0);
    }

    #[test]
    fn test_unknown_parameter_rejected() {
        let reg = FunctionRegistry::with_builtins();
        let config = FunctionConfig::new("difference").parameter("gain", 1.0);
        assert!(matches!(reg.build(&config), Err(ConfigurationError::UnknownParameter { .. })));
    }

    #[test]
    fn test_bad_constraints_rejected() {
        let reg = FunctionRegistry::with_builtins();
        let mut config = FunctionConfig::new("lag");
        config.constraints.insert("lag".into(), [0.0, 5.0, 2.0, 10.0]);
        assert!(matches!(reg.build(&config), Err(ConfigurationError::InvalidConstraints { .. })));
    }

    #[test]
    fn test_duplicate_inputs_rejected() {
        let reg = FunctionRegistry::with_builtins();
        let mut config = FunctionConfig::new("linear_combination");
        config.inputs = vec!["a".into(), "a".into()];
        assert!(matches!(reg.build(&config), Err(ConfigurationError::DuplicateSlotName { .. })));
    }
}
