//! Data model: identities, variable kinds, time series and the dense slot
//! registry a topology is built on.
pub mod node;
pub mod registry;
pub mod series;
pub mod types;

pub use node::{Node, VariableSpec, VariableSpecKind};
pub use registry::Registry;
pub use series::{TimeGrid, TimeSeries};
pub use types::{NodeId, Offset, SeriesSource, SlotId, VarId, VariableKind, VariableMetadata, VariableRef};
