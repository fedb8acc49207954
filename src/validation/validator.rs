//! The central validator that orchestrates the execution of all validation rules.
use super::error::ValidationError;
use super::rules::{wiring, writers};
use crate::analysis::topology::Topology;
use crate::plan::ProcedureDefinition;

/// Collects every wiring problem of a plan before any procedure is bound,
/// so a single report lists all of them.
pub struct Validator<'a> {
    topology: &'a Topology,
    definitions: &'a [ProcedureDefinition],
}

impl<'a> Validator<'a> {
    pub fn new(topology: &'a Topology, definitions: &'a [ProcedureDefinition]) -> Self {
        Self { topology, definitions }
    }

    /// # Returns
    /// - `Ok(())` if no validation errors are found.
    /// - `Err(Vec<ValidationError>)` containing all errors discovered in the plan.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = writers::validate_writers(self.definitions);
        for def in self.definitions {
            errors.extend(wiring::validate_wiring(self.topology, def));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::topology::tests::ten_days;
    use crate::procedures::arithmetic::Difference;
    use crate::procedures::routing::{Lag, LinearReservoirCascade};
    use crate::store::{Node, Offset, VariableRef};
    use crate::validation::ValidationErrorType;
    use indexmap::IndexMap;

    fn topology() -> Topology {
        Topology::new(vec![
            Node::new(1, "up", ten_days()).observed("Q").observed("P"),
            Node::new(2, "down", ten_days()).observed("Q").derived("Qlag", VariableRef::new(1, "Q"), Offset::zero()),
        ])
        .unwrap()
    }

    fn wiring(pairs: &[(&str, i64, &str)]) -> IndexMap<String, VariableRef> {
        pairs.iter().map(|(name, n, v)| (name.to_string(), VariableRef::new(*n, v))).collect()
    }

    fn kinds(errors: &[ValidationError]) -> Vec<ValidationErrorType> {
        errors.iter().map(|e| e.error_type.clone()).collect()
    }

    #[test]
    fn test_valid_plan_passes() {
        let topo = topology();
        let defs = vec![ProcedureDefinition::new(
            "route",
            Box::new(LinearReservoirCascade::new(2.0, 1.0)),
            wiring(&[("inflow", 1, "Q")]),
            wiring(&[("outflow", 2, "Q")]),
        )];
        assert!(Validator::new(&topo, &defs).validate().is_ok());
    }

    #[test]
    fn test_collects_all_wiring_errors() {
        let topo = topology();
        let defs = vec![
            ProcedureDefinition::new(
                "diff",
                Box::new(Difference::new()),
                wiring(&[("minuend", 1, "Q"), ("divisor", 1, "P")]),
                wiring(&[("output", 2, "Qlag")]),
            ),
            ProcedureDefinition::new(
                "lag",
                Box::new(Lag::new(1.0)),
                wiring(&[("input", 7, "Q")]),
                wiring(&[("output", 2, "Qlag")]),
            ),
        ];
        let errors = Validator::new(&topo, &defs).validate().unwrap_err();
        let found = kinds(&errors);
        assert!(found.contains(&ValidationErrorType::UnknownSlot));
        assert!(found.contains(&ValidationErrorType::UnwiredBoundary));
        assert!(found.contains(&ValidationErrorType::SynthesizedOutput));
        assert!(found.contains(&ValidationErrorType::UnresolvedVariable));
        assert!(found.contains(&ValidationErrorType::ConflictingWriters));
    }

    #[test]
    fn test_duplicate_procedure_id() {
        let topo = topology();
        let defs = vec![
            ProcedureDefinition::new("a", Box::new(Lag::new(1.0)), wiring(&[("input", 1, "Q")]), IndexMap::new()),
            ProcedureDefinition::new("a", Box::new(Lag::new(1.0)), wiring(&[("input", 1, "P")]), IndexMap::new()),
        ];
        let errors = Validator::new(&topo, &defs).validate().unwrap_err();
        assert_eq!(kinds(&errors), vec![ValidationErrorType::DuplicateProcedure]);
    }
}
