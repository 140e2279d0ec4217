//! Inter-arrival sampling for a linearly changing request rate.
//!
//! Requests arrive as a non-homogeneous Poisson process whose hazard function is the
//! instantaneous rate `λ(t) = a·t + c`. The cumulative probability that the next request has
//! arrived by time `t` is
//!
//! ```text
//! F(t) = 1 - exp(-(a·t²/2 + c·t))
//! ```
//!
//! Inverting `F` for a uniform draw `u` yields the time until the next arrival.

/// Returns the time in seconds until the next arrival.
///
/// `a` is the slope of the rate in requests/s², `c` the current rate in requests/s and `u` a
/// uniform draw in `[0, 1)`.
///
/// The result is not finite when no arrival can happen, for instance at a constant rate of
/// zero, or when a falling ramp reaches zero before `u` is reached. Callers treat such values
/// as "after the end of the level".
pub fn icdf(a: f64, c: f64, u: f64) -> f64 {
    let log = (1.0 - u).ln();
    if a == 0.0 {
        if c <= 0.0 {
            return f64::INFINITY;
        }
        -log / c
    } else {
        (-c + (c * c - 2.0 * a * log).sqrt()) / a
    }
}

/// Returns the cumulative probability `F(t)` that an arrival has occurred by time `t`.
pub fn cdf(a: f64, c: f64, t: f64) -> f64 {
    1.0 - (-(a * t * t / 2.0) - c * t).exp()
}

/// Samples the time until the next arrival within a level that ends in `remaining` seconds.
///
/// Returns `None` if the sampled arrival falls beyond the end of the level. For falling
/// ramps (`a < 0`) the CDF is only defined up to its value at the end of the level; draws
/// above that value mean the request occurs after the level ends.
pub fn next_arrival(a: f64, c: f64, u: f64, remaining: f64) -> Option<f64> {
    if a < 0.0 && u > cdf(a, c, remaining) {
        return None;
    }

    let delta = icdf(a, c, u);
    (delta.is_finite() && delta < remaining).then_some(delta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_rate() {
        let delta = icdf(0.0, 2.0, 0.5);
        assert!((delta - 0.34657).abs() < 1e-5);
        assert_eq!(delta, -(0.5f64).ln() / 2.0);
    }

    #[test]
    fn linear_rate_inverts_cdf() {
        for u in [0.1, 0.5, 0.9] {
            let t = icdf(1.0, 0.0, u);
            let p = 1.0 - (-t * t / 2.0).exp();
            assert!((p - u).abs() < 1e-9, "u={u}, t={t}, p={p}");
            assert!((cdf(1.0, 0.0, t) - u).abs() < 1e-9);
        }
    }

    #[test]
    fn zero_rate_never_arrives() {
        assert!(icdf(0.0, 0.0, 0.5).is_infinite());
        assert_eq!(next_arrival(0.0, 0.0, 0.5, 60.0), None);
    }

    #[test]
    fn falling_ramp_past_end_of_level() {
        // Rate falls from 1 to 0 over 10 seconds: F(10) = 1 - exp(-5).
        let a = -0.1;
        let f_end = cdf(a, 1.0, 10.0);
        assert!((f_end - (1.0 - (-5.0f64).exp())).abs() < 1e-12);

        assert_eq!(next_arrival(a, 1.0, f_end + 1e-6, 10.0), None);

        let delta = next_arrival(a, 1.0, 0.5, 10.0).unwrap();
        assert!((cdf(a, 1.0, delta) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn arrival_after_level_end() {
        // Mean interval of 10s, so a draw near 1 lands far beyond a one second level.
        assert_eq!(next_arrival(0.0, 0.1, 0.999, 1.0), None);
        assert!(next_arrival(0.0, 100.0, 0.5, 1.0).is_some());
    }
}
