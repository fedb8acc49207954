//! Core of a hydrological forecast engine.
//!
//! A `Topology` of monitoring nodes and their variables, procedures that
//! compute output series from boundary series, a `Plan` that runs them in
//! dependency order, and bounded Nelder–Mead calibration of procedure
//! parameters.

pub mod analysis;
pub mod compute;
pub mod config;
pub mod display;
pub mod error;
pub mod plan;
pub mod procedures;
pub mod solver;
pub mod store;
pub mod validation;

#[cfg(feature = "python")]
mod bindings;

pub use analysis::{RunTelemetry, Topology};
pub use config::PlanConfig;
pub use error::{ConfigurationError, ExecutionError, FunctionError};
pub use plan::{CancelFlag, InMemorySource, ObservedSource, Plan, PlanState, Procedure, ProcedureDefinition, RunWindow};
pub use procedures::{FunctionBoundary, FunctionRegistry, ProcedureFunction};
pub use solver::{calibrate, calibrate_multi_start, CalibrationOptions, CalibrationProblem, CalibrationReport, Objective};
pub use store::{Node, TimeGrid, TimeSeries, VariableRef};

#[cfg(feature = "python")]
pub use bindings::python::_core;
