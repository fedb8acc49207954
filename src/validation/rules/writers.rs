//! Validation rule for plan-wide ownership of written variables.

use crate::plan::ProcedureDefinition;
use crate::store::VariableRef;
use crate::validation::error::{ValidationError, ValidationErrorType};
use std::collections::{HashMap, HashSet};

/// Every variable has at most one writer, and procedure ids are unique.
pub(crate) fn validate_writers(definitions: &[ProcedureDefinition]) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut ids: HashSet<&str> = HashSet::new();
    let mut writers: HashMap<&VariableRef, &str> = HashMap::new();

    for def in definitions {
        if !ids.insert(def.id.as_str()) {
            errors.push(ValidationError {
                procedure: def.id.clone(),
                error_type: ValidationErrorType::DuplicateProcedure,
                message: format!("procedure id '{}' is used more than once", def.id),
            });
        }
        for reference in def.outputs.values() {
            if let Some(previous) = writers.insert(reference, def.id.as_str()) {
                errors.push(ValidationError {
                    procedure: def.id.clone(),
                    error_type: ValidationErrorType::ConflictingWriters,
                    message: format!("{} is already written by procedure '{}'", reference, previous),
                });
            }
        }
    }
    errors
}
