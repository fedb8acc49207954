//! Graph structure of a plan and summaries of its runs.
pub mod telemetry;
pub mod topology;

pub use telemetry::RunTelemetry;
pub use topology::{GraphEdge, GraphVertex, NodeInfo, Topology};
