//! ledger.rs
//! Accumulated per-procedure results of a plan run.

use crate::store::TimeSeries;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Opaque keyed diagnostic payload returned by a procedure function.
pub type Diagnostics = BTreeMap<String, serde_json::Value>;

/// What a single procedure produced during one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcedureRun {
    pub procedure_id: String,
    /// Output names in declaration order, paired with their series.
    pub outputs: Vec<(String, TimeSeries)>,
    pub results: Diagnostics,
    /// Parameter values the function ran with.
    pub parameters: Vec<(String, f64)>,
    /// Missing values filled per optional boundary.
    pub filled: Vec<(String, usize)>,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl ProcedureRun {
    pub fn output(&self, name: &str) -> Option<&TimeSeries> {
        self.outputs.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }
}

/// Results keyed by procedure id, kept in execution order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ledger {
    runs: Vec<ProcedureRun>,
}

impl Ledger {
    pub fn new() -> Self { Self::default() }

    /// Records a run, replacing any previous run of the same procedure.
    pub fn insert(&mut self, run: ProcedureRun) {
        match self.runs.iter_mut().find(|r| r.procedure_id == run.procedure_id) {
            Some(slot) => *slot = run,
            None => self.runs.push(run),
        }
    }

    pub fn get(&self, procedure_id: &str) -> Option<&ProcedureRun> {
        self.runs.iter().find(|r| r.procedure_id == procedure_id)
    }

    pub fn runs(&self) -> &[ProcedureRun] { &self.runs }
    pub fn len(&self) -> usize { self.runs.len() }
    pub fn is_empty(&self) -> bool { self.runs.is_empty() }
    pub fn clear(&mut self) { self.runs.clear(); }

    pub fn to_json(&self) -> serde_json::Result<String> { serde_json::to_string_pretty(self) }
}
