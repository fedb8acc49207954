pub(crate) mod wiring;
pub(crate) mod writers;
