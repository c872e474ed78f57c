use std::time::Duration;

use rand::Rng;

/// `base ± base * percent * U(-1, 1)`, with `percent` clamped to [0, 1].
pub fn jittered(
    base: Duration,
    percent: f64,
) -> Duration {
    let percent = if percent.is_nan() { 0.0 } else { percent.clamp(0.0, 1.0) };
    if base.is_zero() || percent == 0.0 {
        return base;
    }
    let factor = 1.0 + percent * rand::thread_rng().gen_range(-1.0..=1.0);
    base.mul_f64(factor.max(0.0))
}
