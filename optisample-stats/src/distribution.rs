//! Distribution Helpers
//!
//! Standard normal CDF/quantile and presentation rounding shared by the
//! planner, the analyzer and the simulator.

use statrs::function::erf::{erfc, erfc_inv};
use std::f64::consts::SQRT_2;

/// Standard normal CDF
pub(crate) fn normal_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / SQRT_2)
}

/// Standard normal survival function, `1 - cdf(x)` without cancellation
pub(crate) fn normal_sf(x: f64) -> f64 {
    0.5 * erfc(x / SQRT_2)
}

/// Standard normal quantile (inverse CDF)
pub(crate) fn normal_quantile(p: f64) -> f64 {
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }
    -SQRT_2 * erfc_inv(2.0 * p)
}

/// Round `value` to `places` decimal places, halves rounded away from zero.
///
/// Negative zero is normalised to `0.0` so that a vanishing difference always
/// reports as `0.0`.
pub fn round_to_places(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    let rounded = (value * scale).round() / scale;
    if rounded == 0.0 { 0.0 } else { rounded }
}
