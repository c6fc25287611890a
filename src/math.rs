use itertools::izip;
use multiversion::multiversion;
use ndarray::{Array, ArrayBase, Data, DataMut, Dimension};

/// Smallest positive normal `f64`, the floor applied before taking logarithms.
pub const EPSILON: f64 = f64::MIN_POSITIVE;

/// `ln(EPSILON)`, the floor applied to log densities before exponentiation.
pub const LOG_EPSILON: f64 = -708.396_418_532_264_1;

/// `ln(max(x, EPSILON))`.
///
/// Total over `f64`: zero, subnormal and NaN inputs all map to `LOG_EPSILON`.
#[inline]
pub fn safe_log(x: f64) -> f64 {
    if x >= EPSILON {
        x.ln()
    } else {
        LOG_EPSILON
    }
}

#[inline]
pub fn safe_log_floor(x: f64, floor: f64) -> f64 {
    x.max(floor).ln()
}

/// `max(x, LOG_EPSILON)`.
#[inline]
pub fn clamp_log(x: f64) -> f64 {
    clamp_log_floor(x, LOG_EPSILON)
}

#[inline]
pub fn clamp_log_floor(x: f64, floor: f64) -> f64 {
    x.max(floor)
}

pub fn safe_log_array<S, D>(values: &ArrayBase<S, D>) -> Array<f64, D>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    values.mapv(safe_log)
}

pub fn clamp_log_array<S, D>(values: &ArrayBase<S, D>) -> Array<f64, D>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    values.mapv(clamp_log)
}

pub fn clamp_log_inplace<S, D>(values: &mut ArrayBase<S, D>)
where
    S: DataMut<Elem = f64>,
    D: Dimension,
{
    values.mapv_inplace(clamp_log)
}

/// `ln(exp(a) + exp(b))` without overflow.
#[inline]
pub fn logaddexp(a: f64, b: f64) -> f64 {
    let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
    if lo == f64::NEG_INFINITY || hi == f64::INFINITY {
        return hi;
    }
    hi + (lo - hi).exp().ln_1p()
}

/// Computes `ln Σ exp(max(a + b, LOG_EPSILON)) * w`.
///
/// This is the inner loop of the grid integral: `a` is a slice of the
/// precomputed correction term, `b` the hyperlikelihood on the same cells and
/// `w` the cell weights. The sum is taken relative to the largest exponent,
/// so unnormalized densities far above zero stay finite. Empty input gives
/// `-inf`.
#[multiversion(targets("x86_64+avx+avx2+fma", "aarch64+neon"))]
pub(crate) fn shifted_log_sum_exp(a: &[f64], b: &[f64], weights: &[f64]) -> f64 {
    let n = a.len();
    assert!(b.len() == n);
    assert!(weights.len() == n);

    let peak = izip!(a, b).fold(f64::NEG_INFINITY, |acc, (&a, &b)| acc.max(clamp_log(a + b)));
    if !peak.is_finite() {
        return peak;
    }
    let sum = izip!(a, b, weights).fold(0f64, |acc, (&a, &b, &w)| {
        acc + (clamp_log(a + b) - peak).exp() * w
    });
    peak + sum.ln()
}

/// Computes `ln Σ exp(x) * w`, shifted by `max x`.
#[multiversion(targets("x86_64+avx+avx2+fma", "aarch64+neon"))]
pub(crate) fn log_exp_dot(x: &[f64], weights: &[f64]) -> f64 {
    assert!(weights.len() == x.len());

    let peak = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !peak.is_finite() {
        return peak;
    }
    let sum = x
        .iter()
        .zip(weights.iter())
        .fold(0f64, |acc, (&x, &w)| acc + (x - peak).exp() * w);
    peak + sum.ln()
}

/// Computes `Σ exp(x) * w`.
#[multiversion(targets("x86_64+avx+avx2+fma", "aarch64+neon"))]
pub(crate) fn exp_dot(x: &[f64], weights: &[f64]) -> f64 {
    assert!(weights.len() == x.len());

    x.iter()
        .zip(weights.iter())
        .fold(0f64, |acc, (&x, &w)| acc + x.exp() * w)
}
