//! Validation rule for boundary and output wiring of a single procedure.

use crate::analysis::topology::Topology;
use crate::plan::ProcedureDefinition;
use crate::validation::error::{ValidationError, ValidationErrorType};

/// Checks one procedure's wiring against its function's declared slots and
/// against the topology.
pub(crate) fn validate_wiring(topology: &Topology, def: &ProcedureDefinition) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let error = |error_type, message: String| ValidationError { procedure: def.id.clone(), error_type, message };

    let declared = def.function.boundaries();
    for name in def.boundaries.keys() {
        if !declared.iter().any(|b| &b.name == name) {
            errors.push(error(
                ValidationErrorType::UnknownSlot,
                format!("'{}' is not a boundary of function '{}'", name, def.function.type_tag()),
            ));
        }
    }
    for boundary in declared {
        if !boundary.optional && !def.boundaries.contains_key(&boundary.name) {
            errors.push(error(
                ValidationErrorType::UnwiredBoundary,
                format!("required boundary '{}' is not wired", boundary.name),
            ));
        }
    }

    let outputs = def.function.outputs();
    for name in def.outputs.keys() {
        if !outputs.iter().any(|o| &o.name == name) {
            errors.push(error(
                ValidationErrorType::UnknownSlot,
                format!("'{}' is not an output of function '{}'", name, def.function.type_tag()),
            ));
        }
    }

    for (name, reference) in def.boundaries.iter().chain(&def.outputs) {
        if let Err(e) = topology.slot(reference) {
            errors.push(error(ValidationErrorType::UnresolvedVariable, format!("'{}' -> {}: {}", name, reference, e)));
        }
    }

    for (name, reference) in &def.outputs {
        if let Ok(slot) = topology.slot(reference) {
            if topology.kind(slot).is_synthesized() {
                errors.push(error(
                    ValidationErrorType::SynthesizedOutput,
                    format!("output '{}' targets {} variable {}", name, topology.kind(slot).label(), reference),
                ));
            }
        }
    }
    errors
}
