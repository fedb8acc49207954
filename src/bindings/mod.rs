//! Foreign-language surfaces over the native core.
pub mod python;
