//! Regular time series and sampling windows.
//!
//! Missing values are stored as `NaN` so arithmetic kernels propagate gaps
//! without branching; the accessors translate them back to `Option<f64>`.

use crate::compute::kernel;
use crate::error::ConfigurationError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// An inclusive, regularly spaced window `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeGrid {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(with = "duration_seconds")]
    pub interval: Duration,
}

impl TimeGrid {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, interval: Duration) -> Result<Self, ConfigurationError> {
        if interval < Duration::milliseconds(1) {
            return Err(ConfigurationError::InvalidWindow(format!(
                "time interval must be at least one millisecond, got {}",
                interval
            )));
        }
        if end < start {
            return Err(ConfigurationError::InvalidWindow(format!("end {} precedes start {}", end, start)));
        }
        Ok(Self { start, end, interval })
    }

    pub fn len(&self) -> usize {
        let span = (self.end - self.start).num_milliseconds();
        (span / self.interval.num_milliseconds()) as usize + 1
    }

    pub fn is_empty(&self) -> bool { false }

    #[inline]
    pub fn timestamp(&self, i: usize) -> DateTime<Utc> { self.start + self.interval * i as i32 }

    /// Exact grid position of `t`, if `t` is a sampling point of this window.
    pub fn index_of(&self, t: DateTime<Utc>) -> Option<usize> {
        position(self.start, self.interval, self.len(), t)
    }

    pub fn timestamps(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        (0..self.len()).map(move |i| self.timestamp(i))
    }

    /// Number of sampling points strictly before `origin`.
    pub fn count_before(&self, origin: DateTime<Utc>) -> usize {
        if origin <= self.start {
            return 0;
        }
        let span = (origin - self.start).num_milliseconds();
        let step = self.interval.num_milliseconds();
        let before = ((span - 1) / step) as usize + 1;
        before.min(self.len())
    }

    /// An all-missing series over this window.
    pub fn empty_series(&self) -> TimeSeries {
        TimeSeries::new(self.start, self.interval, vec![f64::NAN; self.len()])
    }

    pub fn series(&self, values: Vec<f64>) -> TimeSeries {
        TimeSeries::new(self.start, self.interval, values)
    }
}

/// A regularly sampled series. `values[i]` belongs to `start + i * interval`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeries {
    pub start: DateTime<Utc>,
    #[serde(with = "duration_seconds")]
    pub interval: Duration,
    #[serde(with = "missing_as_null")]
    pub values: Vec<f64>,
}

impl TimeSeries {
    pub fn new(start: DateTime<Utc>, interval: Duration, values: Vec<f64>) -> Self {
        Self { start, interval, values }
    }

    /// Builds a series on `grid` from sparse `(timestamp, value)` pairs.
    /// Pairs that do not fall on a grid point are dropped.
    pub fn from_points(grid: &TimeGrid, points: &[(DateTime<Utc>, f64)]) -> Self {
        let mut series = grid.empty_series();
        for &(t, v) in points {
            if let Some(i) = grid.index_of(t) {
                series.values[i] = v;
            }
        }
        series
    }

    pub fn len(&self) -> usize { self.values.len() }
    pub fn is_empty(&self) -> bool { self.values.is_empty() }

    #[inline]
    pub fn timestamp(&self, i: usize) -> DateTime<Utc> { self.start + self.interval * i as i32 }

    pub fn index_of(&self, t: DateTime<Utc>) -> Option<usize> {
        position(self.start, self.interval, self.values.len(), t)
    }

    #[inline]
    pub fn value_at(&self, i: usize) -> Option<f64> {
        self.values.get(i).copied().filter(|v| !v.is_nan())
    }

    pub fn get(&self, t: DateTime<Utc>) -> Option<f64> {
        self.index_of(t).and_then(|i| self.value_at(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = (DateTime<Utc>, Option<f64>)> + '_ {
        (0..self.values.len()).map(move |i| (self.timestamp(i), self.value_at(i)))
    }

    /// A copy with timestamps moved by `x_offset` and `y_offset` added to
    /// every present value.
    pub fn shifted(&self, x_offset: Duration, y_offset: f64) -> Self {
        let mut values = self.values.clone();
        kernel::add_scalar(&mut values, y_offset);
        Self::new(self.start + x_offset, self.interval, values)
    }

    /// Re-samples onto `grid` by exact timestamp match. Grid points with no
    /// matching sample are missing.
    pub fn aligned_to(&self, grid: &TimeGrid) -> Self {
        let values = grid
            .timestamps()
            .map(|t| self.index_of(t).map_or(f64::NAN, |i| self.values[i]))
            .collect();
        grid.series(values)
    }

    pub fn missing_count(&self) -> usize { self.values.iter().filter(|v| v.is_nan()).count() }

    /// First missing position inside `range`.
    pub fn first_missing(&self, range: Range<usize>) -> Option<usize> {
        let end = range.end.min(self.values.len());
        (range.start..end).find(|&i| self.values[i].is_nan())
    }

    /// Marks every position from `from` onwards as missing.
    pub fn masked_from(&self, from: usize) -> Self {
        let mut out = self.clone();
        for v in out.values.iter_mut().skip(from) {
            *v = f64::NAN;
        }
        out
    }
}

fn position(start: DateTime<Utc>, interval: Duration, len: usize, t: DateTime<Utc>) -> Option<usize> {
    if t < start {
        return None;
    }
    let offset = (t - start).num_milliseconds();
    let step = interval.num_milliseconds();
    if step <= 0 || offset % step != 0 {
        return None;
    }
    let idx = (offset / step) as usize;
    (idx < len).then_some(idx)
}

pub(crate) mod duration_seconds {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(d.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::seconds(i64::deserialize(d)?))
    }
}

mod missing_as_null {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(values: &[f64], s: S) -> Result<S::Ok, S::Error> {
        let opt: Vec<Option<f64>> = values.iter().map(|v| (!v.is_nan()).then_some(*v)).collect();
        opt.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<f64>, D::Error> {
        let opt = Vec::<Option<f64>>::deserialize(d)?;
        Ok(opt.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 1, 1 + d, 0, 0, 0).unwrap() }

    #[test]
    fn test_grid_length_and_lookup() {
        let grid = TimeGrid::new(day(0), day(9), Duration::days(1)).unwrap();
        assert_eq!(grid.len(), 10);
        assert_eq!(grid.index_of(day(3)), Some(3));
        assert_eq!(grid.index_of(day(3) + Duration::hours(6)), None);
        assert_eq!(grid.index_of(day(10)), None);
    }

    #[test]
    fn test_count_before_origin() {
        let grid = TimeGrid::new(day(0), day(9), Duration::days(1)).unwrap();
        assert_eq!(grid.count_before(day(0)), 0);
        assert_eq!(grid.count_before(day(5)), 5);
        assert_eq!(grid.count_before(day(5) + Duration::hours(1)), 6);
        assert_eq!(grid.count_before(day(20)), 10);
    }

    #[test]
    fn test_invalid_window_rejected() {
        assert!(TimeGrid::new(day(5), day(1), Duration::days(1)).is_err());
        assert!(TimeGrid::new(day(0), day(1), Duration::zero()).is_err());
    }

    #[test]
    fn test_sub_millisecond_interval_rejected() {
        let err = TimeGrid::new(day(0), day(1), Duration::microseconds(500)).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidWindow(_)));
        let grid = TimeGrid::new(day(0), day(0) + Duration::milliseconds(4), Duration::milliseconds(1)).unwrap();
        assert_eq!(grid.len(), 5);
    }

    #[test]
    fn test_shift_does_not_touch_input() {
        let grid = TimeGrid::new(day(0), day(2), Duration::days(1)).unwrap();
        let s = grid.series(vec![1.0, f64::NAN, 3.0]);
        let shifted = s.shifted(Duration::days(1), 0.5);
        assert_eq!(s.value_at(0), Some(1.0));
        assert_eq!(shifted.get(day(1)), Some(1.5));
        assert_eq!(shifted.get(day(2)), None);
        assert_eq!(shifted.get(day(3)), Some(3.5));
    }

    #[test]
    fn test_alignment_is_exact_match_only() {
        let hourly = TimeGrid::new(day(0), day(0) + Duration::hours(3), Duration::hours(1)).unwrap();
        let s = hourly.series(vec![1.0, 2.0, 3.0, 4.0]);
        let target = TimeGrid::new(day(0) + Duration::minutes(30), day(0) + Duration::minutes(150), Duration::minutes(60)).unwrap();
        let aligned = s.aligned_to(&target);
        assert_eq!(aligned.len(), 3);
        assert_eq!(aligned.missing_count(), 3);
    }

    #[test]
    fn test_serde_keeps_missing_as_null() {
        let grid = TimeGrid::new(day(0), day(1), Duration::days(1)).unwrap();
        let s = grid.series(vec![f64::NAN, 2.0]);
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("[null,2.0]"));
        let back: TimeSeries = serde_json::from_str(&json).unwrap();
        assert_eq!(back.value_at(0), None);
        assert_eq!(back.value_at(1), Some(2.0));
        assert_eq!(back.interval, Duration::days(1));
    }
}
