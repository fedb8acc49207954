use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dense index of a variable slot inside a topology's registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct SlotId(pub u32);

impl SlotId {
    #[inline(always)]
    pub fn index(&self) -> usize { self.0 as usize }
    pub fn new(idx: usize) -> Self { Self(idx as u32) }
}

/// Identity of a monitoring point as declared in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub i64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VarId(pub String);

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for VarId {
    fn from(s: &str) -> Self { Self(s.to_string()) }
}

/// Global identity of a variable: `(node_id, var_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariableRef {
    pub node_id: NodeId,
    pub var_id: VarId,
}

impl VariableRef {
    pub fn new(node_id: i64, var_id: &str) -> Self {
        Self { node_id: NodeId(node_id), var_id: VarId::from(var_id) }
    }
}

impl fmt::Display for VariableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.node_id, self.var_id)
    }
}

/// Time and value shift applied to an origin series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Offset {
    pub x_offset: Duration,
    pub y_offset: f64,
}

impl Offset {
    pub fn zero() -> Self { Self::default() }
}

impl Default for Offset {
    fn default() -> Self { Self { x_offset: Duration::zero(), y_offset: 0.0 } }
}

/// Named external series backing an observed variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesSource {
    pub name: String,
    #[serde(default)]
    pub series_id: Option<i64>,
}

/// How a variable obtains its data. Origins of synthesized kinds live in the
/// registry's parent list, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub enum VariableKind {
    Observed { sources: Vec<SeriesSource> },
    Derived { origin: Offset },
    Interpolated { first: Offset, second: Offset, coefficient: f64 },
}

impl VariableKind {
    pub fn is_synthesized(&self) -> bool { !matches!(self, VariableKind::Observed { .. }) }

    pub fn label(&self) -> &'static str {
        match self {
            VariableKind::Observed { .. } => "observed",
            VariableKind::Derived { .. } => "derived",
            VariableKind::Interpolated { .. } => "interpolated",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableMetadata {
    pub reference: VariableRef,
    pub name: String,
    pub unit: Option<String>,
}
