//! Derived and interpolated variable synthesis.
//!
//! Both are pure functions of the current origin data: nothing is cached, so
//! reading a synthesized variable after an upstream write sees the new data.

use super::kernel;
use crate::store::{Offset, TimeGrid, TimeSeries};

/// `value(t) = origin(t - x_offset) + y_offset`, re-sampled onto `grid`.
pub fn derive(origin: &TimeSeries, offset: &Offset, grid: &TimeGrid) -> TimeSeries {
    origin.shifted(offset.x_offset, offset.y_offset).aligned_to(grid)
}

/// `value(t) = c * first'(t) + (1 - c) * second'(t)` where each origin is
/// shifted by its own offset first. Missing in either side means missing.
pub fn interpolate(
    first: (&TimeSeries, &Offset),
    second: (&TimeSeries, &Offset),
    coefficient: f64,
    grid: &TimeGrid,
) -> TimeSeries {
    let a = derive(first.0, first.1, grid);
    let b = derive(second.0, second.1, grid);
    let mut out = vec![0.0; grid.len()];
    kernel::blend(&a.values, &b.values, coefficient, &mut out);
    grid.series(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn day(d: i64) -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(d) }

    fn ten_days() -> TimeGrid { TimeGrid::new(day(0), day(9), Duration::days(1)).unwrap() }

    #[test]
    fn test_derived_shift_by_one_day() {
        let grid = ten_days();
        let origin = grid.series(vec![1.0; 10]);
        let offset = Offset { x_offset: Duration::days(1), y_offset: 0.5 };

        let derived = derive(&origin, &offset, &grid);
        assert_eq!(derived.get(day(0)), None);
        assert_eq!(derived.get(day(1)), Some(1.5));
        assert_eq!(derived.get(day(9)), Some(1.5));
    }

    #[test]
    fn test_derived_matches_shifted_origin_everywhere() {
        let grid = ten_days();
        let origin = grid.series((0..10).map(|i| if i % 3 == 0 { f64::NAN } else { i as f64 }).collect());
        let offset = Offset { x_offset: Duration::days(2), y_offset: -1.0 };
        let derived = derive(&origin, &offset, &grid);

        for t in grid.timestamps() {
            let expected = origin.get(t - offset.x_offset).map(|v| v + offset.y_offset);
            assert_eq!(derived.get(t), expected, "at {}", t);
        }
    }

    #[test]
    fn test_negative_offset_reads_the_future() {
        let grid = ten_days();
        let origin = grid.series((0..10).map(|i| i as f64).collect());
        let offset = Offset { x_offset: Duration::days(-1), y_offset: 0.0 };
        let derived = derive(&origin, &offset, &grid);
        assert_eq!(derived.get(day(0)), Some(1.0));
        assert_eq!(derived.get(day(9)), None);
    }

    #[test]
    fn test_interpolation_blend() {
        let grid = ten_days();
        let a = grid.series(vec![2.0; 10]);
        let mut b_values = vec![4.0; 10];
        b_values[4] = f64::NAN;
        let b = grid.series(b_values);
        let zero = Offset::default();

        let out = interpolate((&a, &zero), (&b, &zero), 0.5, &grid);
        for (i, t) in grid.timestamps().enumerate() {
            if i == 4 {
                assert_eq!(out.get(t), None);
            } else {
                assert_eq!(out.get(t), Some(3.0));
            }
        }
    }

    #[test]
    fn test_interpolation_offsets_apply_independently() {
        let grid = ten_days();
        let a = grid.series(vec![1.0; 10]);
        let b = grid.series(vec![1.0; 10]);
        let lag_a = Offset { x_offset: Duration::days(1), y_offset: 1.0 };
        let lag_b = Offset { x_offset: Duration::zero(), y_offset: 3.0 };

        let out = interpolate((&a, &lag_a), (&b, &lag_b), 0.25, &grid);
        assert_eq!(out.get(day(0)), None);
        assert_eq!(out.get(day(1)), Some(0.25 * 2.0 + 0.75 * 4.0));
    }
}
