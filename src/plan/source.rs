//! Collaborator supplying observed data to a plan.

use crate::store::{SeriesSource, TimeGrid, TimeSeries, VariableRef};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Supplies observed series for a variable over `[start, end]`. Errors are
/// reported as text; the plan logs them and treats the variable as having no
/// data.
pub trait ObservedSource {
    fn load_observed(
        &self,
        variable: &VariableRef,
        sources: &[SeriesSource],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<TimeSeries, String>;
}

/// Series held in memory, keyed by variable.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    series: HashMap<VariableRef, TimeSeries>,
}

impl InMemorySource {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, variable: VariableRef, series: TimeSeries) -> Self {
        self.insert(variable, series);
        self
    }

    pub fn insert(&mut self, variable: VariableRef, series: TimeSeries) { self.series.insert(variable, series); }
}

impl ObservedSource for InMemorySource {
    fn load_observed(
        &self,
        variable: &VariableRef,
        _sources: &[SeriesSource],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<TimeSeries, String> {
        let series = self.series.get(variable).ok_or_else(|| format!("no series for {}", variable))?;
        let grid = TimeGrid::new(start, end, series.interval).map_err(|e| e.to_string())?;
        Ok(series.aligned_to(&grid))
    }
}
