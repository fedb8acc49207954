//! Vectorized element-wise kernels. `NaN` marks a missing sample and
//! propagates through every kernel here.

use wide::f64x4;

const LANES: usize = 4;

/// Adds `y` to every element in place.
pub fn add_scalar(values: &mut [f64], y: f64) {
    if y == 0.0 {
        return;
    }
    let shift = f64x4::splat(y);
    let mut chunks = values.chunks_exact_mut(LANES);
    for chunk in &mut chunks {
        let v = f64x4::from([chunk[0], chunk[1], chunk[2], chunk[3]]) + shift;
        chunk.copy_from_slice(&v.to_array());
    }
    for v in chunks.into_remainder() {
        *v += y;
    }
}

/// `out[i] = c * a[i] + (1 - c) * b[i]`. A missing operand yields a missing
/// result even when its weight is zero.
pub fn blend(a: &[f64], b: &[f64], c: f64, out: &mut [f64]) {
    debug_assert!(a.len() == b.len() && a.len() == out.len());
    let wa = f64x4::splat(c);
    let wb = f64x4::splat(1.0 - c);

    let split = out.len() - out.len() % LANES;
    for i in (0..split).step_by(LANES) {
        let va = f64x4::from([a[i], a[i + 1], a[i + 2], a[i + 3]]);
        let vb = f64x4::from([b[i], b[i + 1], b[i + 2], b[i + 3]]);
        out[i..i + LANES].copy_from_slice(&(va * wa + vb * wb).to_array());
    }
    for i in split..out.len() {
        out[i] = c * a[i] + (1.0 - c) * b[i];
    }
}

/// Replaces missing values with `fill`, returning how many were replaced.
pub fn fill_missing(values: &mut [f64], fill: f64) -> usize {
    let mut filled = 0;
    for v in values.iter_mut().filter(|v| v.is_nan()) {
        *v = fill;
        filled += 1;
    }
    filled
}

/// Carries the last present value forward over gaps; leading gaps get `lead`.
pub fn fill_forward(values: &mut [f64], lead: f64) -> usize {
    let mut last = lead;
    let mut filled = 0;
    for v in values.iter_mut() {
        if v.is_nan() {
            *v = last;
            filled += 1;
        } else {
            last = *v;
        }
    }
    filled
}
