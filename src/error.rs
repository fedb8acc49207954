//! Error taxonomy for graph construction, procedure execution and the
//! computation units themselves.

use crate::validation::ValidationError;
use crate::store::{NodeId, VarId};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Fatal problems detected while building a topology, a plan or a
/// calibration setup. Never recovered silently.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("Origin node {node_id} referenced by {referrer} does not exist")]
    OriginNotFound { node_id: NodeId, referrer: String },
    #[error("Variable '{var_id}' not found on node {node_id}")]
    VariableNotFound { node_id: NodeId, var_id: VarId },
    #[error("Node {0} is declared more than once")]
    DuplicateNode(NodeId),
    #[error("Variable '{var_id}' is declared more than once on node {node_id}")]
    DuplicateVariable { node_id: NodeId, var_id: VarId },
    #[error("Cyclic dependency among {0:?}")]
    CyclicDependency(Vec<String>),
    #[error("Duplicate {kind} name '{name}' in function '{function}'")]
    DuplicateSlotName { function: String, kind: &'static str, name: String },
    #[error("Invalid constraints for parameter '{name}': {reason}")]
    InvalidConstraints { name: String, reason: String },
    #[error("Unknown procedure function type '{0}'")]
    UnknownFunctionType(String),
    #[error("Unknown parameter '{parameter}' for function '{function}'")]
    UnknownParameter { function: String, parameter: String },
    #[error("Invalid configuration for function '{function}': {reason}")]
    InvalidFunctionConfig { function: String, reason: String },
    #[error("Invalid time window: {0}")]
    InvalidWindow(String),
    #[error("Variable {0} is synthesized and cannot be written")]
    NotWritable(String),
    #[error("Configuration failed validation with {} error(s)", .0.len())]
    Validation(Vec<ValidationError>),
    #[error("Failed to read configuration document: {0}")]
    Parse(String),
}

/// Failures raised inside a procedure function's own computation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FunctionError {
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },
    #[error("Numerical error: {0}")]
    Numerical(String),
    #[error("Expression error: {0}")]
    Expression(String),
}

/// Failures while a plan is running.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Missing data for boundary '{boundary}' of procedure '{procedure}' at {timestamp}")]
    MissingBoundaryData { procedure: String, boundary: String, timestamp: DateTime<Utc> },
    #[error("Procedure '{procedure}' failed: {source}")]
    ProcedureExecution {
        procedure: String,
        #[source]
        source: FunctionError,
    },
    #[error("Procedure '{procedure}' expects {expected} input series, got {actual}")]
    InputArity { procedure: String, expected: usize, actual: usize },
    #[error("Cannot {action} while plan is {state}")]
    InvalidState { action: &'static str, state: String },
    #[error("Run cancelled after procedure '{after}'")]
    Cancelled { after: String },
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}
