//! Parameter calibration: bounded Nelder–Mead over a procedure's free
//! parameters, scored against observed outputs.
pub mod optimizer;
pub mod problem;
pub mod simplex;

pub use optimizer::{calibrate, calibrate_multi_start, nelder_mead, CalibrationDivergence, CalibrationOptions, CalibrationReport};
pub use problem::{CalibrationProblem, Objective};
pub use simplex::initial_simplex;
