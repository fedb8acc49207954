//! Pure computation: kernels, variable synthesis, expression bytecode and the
//! run ledger.
pub mod bytecode;
pub mod kernel;
pub mod ledger;
pub mod synthesis;

pub use ledger::{Diagnostics, Ledger, ProcedureRun};
