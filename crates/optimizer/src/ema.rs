//! Throughput trend estimation.

use std::time::Duration;

const SHORT_TRANSFER: Duration = Duration::from_secs(30);
const LONG_TRANSFER: Duration = Duration::from_secs(900);

/// Fold `sample` into `current` with smoothing factor `alpha`.
///
/// A zero or negative sample means "no measurement" and leaves the average
/// untouched.
pub fn exponential_moving_average(sample: f64, alpha: f64, current: f64) -> f64 {
    if sample > 0.0 {
        sample * alpha + current * (1.0 - alpha)
    } else {
        current
    }
}

/// Averaging window for success rate and throughput, picked from how long
/// transfers on the link usually take.
pub fn calculate_time_frame(avg_duration: Duration) -> Duration {
    if avg_duration < SHORT_TRANSFER {
        Duration::from_secs(5 * 60)
    } else if avg_duration <= LONG_TRANSFER {
        Duration::from_secs(15 * 60)
    } else {
        Duration::from_secs(30 * 60)
    }
}

/// Rounded base-10 logarithm. Non-positive values have no magnitude.
pub fn order_of_magnitude(value: f64) -> Option<i32> {
    if value > 0.0 && value.is_finite() {
        Some(value.log10().round() as i32)
    } else {
        None
    }
}

/// Whether `current` is at least one order of magnitude below `previous`.
pub fn magnitude_decreased(previous: f64, current: f64) -> bool {
    match (order_of_magnitude(previous), order_of_magnitude(current)) {
        (Some(previous), Some(current)) => current < previous,
        _ => false,
    }
}
