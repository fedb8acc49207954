use crate::compute::Ledger;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OutputStats {
    pub len: usize,
    pub missing: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcedureStats {
    pub procedure_id: String,
    pub outputs: BTreeMap<String, OutputStats>,
    /// Values filled per optional boundary.
    pub filled: BTreeMap<String, usize>,
    #[serde(skip)]
    pub elapsed: Duration,
}

/// Summary of a finished (or partially finished) run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunTelemetry {
    pub procedures: Vec<ProcedureStats>,
    pub total_filled: usize,
    pub total_missing: usize,
    #[serde(skip)]
    pub total_elapsed: Duration,
}

impl RunTelemetry {
    pub fn analyze(ledger: &Ledger) -> Self {
        let mut report = RunTelemetry::default();

        for run in ledger.runs() {
            let outputs: BTreeMap<String, OutputStats> = run
                .outputs
                .iter()
                .map(|(name, series)| {
                    let present = series.values.iter().copied().filter(|v| !v.is_nan());
                    let (min, max) = present.fold((None, None), |(lo, hi): (Option<f64>, Option<f64>), v| {
                        (Some(lo.map_or(v, |l| l.min(v))), Some(hi.map_or(v, |h| h.max(v))))
                    });
                    let stats = OutputStats { len: series.len(), missing: series.missing_count(), min, max };
                    (name.clone(), stats)
                })
                .collect();

            report.total_missing += outputs.values().map(|o| o.missing).sum::<usize>();
            report.total_filled += run.filled.iter().map(|(_, n)| n).sum::<usize>();
            report.total_elapsed += run.elapsed;
            report.procedures.push(ProcedureStats {
                procedure_id: run.procedure_id.clone(),
                outputs,
                filled: run.filled.iter().cloned().collect(),
                elapsed: run.elapsed,
            });
        }
        report
    }

    pub fn procedure(&self, id: &str) -> Option<&ProcedureStats> { self.procedures.iter().find(|p| p.procedure_id == id) }
}
