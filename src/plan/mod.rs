//! Procedures bound to a topology and the orchestrator running them.
pub mod executor;
pub mod procedure;
pub mod source;

pub use executor::{CancelFlag, Plan, PlanState};
pub use procedure::{PreparedInputs, Procedure, ProcedureDefinition, RunWindow};
pub use source::{InMemorySource, ObservedSource};
