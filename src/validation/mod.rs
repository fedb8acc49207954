//! Static checks of procedure wiring, run before a plan is assembled.

pub mod error;
mod rules;
pub mod validator;

pub use error::{ValidationError, ValidationErrorType};
pub use validator::Validator;
