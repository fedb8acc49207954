//! Node and variable declarations, before origin references are resolved.

use super::series::TimeGrid;
use super::types::{NodeId, Offset, SeriesSource, VarId, VariableRef};
use crate::error::ConfigurationError;
use indexmap::IndexMap;

#[derive(Debug, Clone, PartialEq)]
pub enum VariableSpecKind {
    Observed { sources: Vec<SeriesSource> },
    Derived { origin: VariableRef, offset: Offset },
    Interpolated {
        first: (VariableRef, Offset),
        second: (VariableRef, Offset),
        coefficient: f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableSpec {
    pub name: String,
    pub unit: Option<String>,
    pub kind: VariableSpecKind,
}

/// A monitoring point: identity, location and its variables. Every variable
/// of a node shares the node's sampling window.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub location: Option<(f64, f64)>,
    pub grid: TimeGrid,
    pub variables: IndexMap<VarId, VariableSpec>,
}

impl Node {
    pub fn new(id: i64, name: &str, grid: TimeGrid) -> Self {
        Self { id: NodeId(id), name: name.into(), location: None, grid, variables: IndexMap::new() }
    }

    pub fn add_variable(&mut self, var_id: &str, spec: VariableSpec) -> Result<(), ConfigurationError> {
        let key = VarId::from(var_id);
        if self.variables.contains_key(&key) {
            return Err(ConfigurationError::DuplicateVariable { node_id: self.id, var_id: key });
        }
        self.variables.insert(key, spec);
        Ok(())
    }

    // Builder helpers: a repeated id replaces the earlier declaration.
    // `add_variable` reports duplicates instead.

    pub fn observed(mut self, var_id: &str) -> Self {
        self.variables.insert(var_id.into(), VariableSpec {
            name: var_id.into(),
            unit: None,
            kind: VariableSpecKind::Observed { sources: Vec::new() },
        });
        self
    }

    pub fn derived(mut self, var_id: &str, origin: VariableRef, offset: Offset) -> Self {
        self.variables.insert(var_id.into(), VariableSpec {
            name: var_id.into(),
            unit: None,
            kind: VariableSpecKind::Derived { origin, offset },
        });
        self
    }

    pub fn interpolated(mut self, var_id: &str, first: (VariableRef, Offset), second: (VariableRef, Offset), coefficient: f64) -> Self {
        self.variables.insert(var_id.into(), VariableSpec {
            name: var_id.into(),
            unit: None,
            kind: VariableSpecKind::Interpolated { first, second, coefficient },
        });
        self
    }
}
