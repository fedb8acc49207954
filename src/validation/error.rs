//! Defines the error types for the validation module.

/// The specific category of a validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationErrorType {
    /// Two procedures share the same id.
    DuplicateProcedure,
    /// A wiring entry names a slot the function does not declare.
    UnknownSlot,
    /// A non-optional boundary has no variable wired to it.
    UnwiredBoundary,
    /// A wiring entry references a node or variable that does not exist.
    UnresolvedVariable,
    /// An output is wired to a derived or interpolated variable.
    SynthesizedOutput,
    /// More than one procedure writes the same variable.
    ConflictingWriters,
}

/// A structured error report from the static analysis engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Id of the procedure where the error was detected.
    pub procedure: String,
    /// The category of the error.
    pub error_type: ValidationErrorType,
    /// A human-readable message explaining the error.
    pub message: String,
}
