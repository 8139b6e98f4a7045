//! Log-normal signed jitter for backoff delays and submission smoothing.

use rand::Rng;
use rand_distr::{Distribution, LogNormal};

/// Random signed offset in `[-max, max]` seconds.
///
/// Magnitudes follow a log-normal distribution with the median near 5% of
/// `max` and sigma growing with `max`, so small budgets produce small, tight
/// offsets while large budgets allow an occasional wide spread. `max <= 0`
/// yields 0.
pub fn jitter(max: f64) -> f64 {
    let max = max.max(0.0);
    if max == 0.0 {
        return 0.0;
    }

    // sigma scales with max, clamped to a sane band
    let reference = 1e-3; // 1ms
    let sigma = (0.4 + 0.3 * (max / reference).ln_1p()).clamp(0.3, 1.5);
    let mu = (0.05 * max + 1e-12).ln();

    let Ok(magnitudes) = LogNormal::new(mu, sigma) else {
        return 0.0;
    };

    let mut rng = rand::thread_rng();
    let magnitude = magnitudes.sample(&mut rng).min(max);
    if rng.gen_bool(0.5) {
        magnitude
    } else {
        -magnitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_and_negative_budgets_yield_zero() {
        assert_eq!(jitter(0.0), 0.0);
        assert_eq!(jitter(-1.0), 0.0);
    }

    #[test]
    fn stays_within_budget() {
        for _ in 0..1000 {
            let j = jitter(2.5);
            assert!(j.abs() <= 2.5, "jitter {} out of range", j);
        }
    }

    #[test]
    fn produces_both_signs() {
        let mut positive = false;
        let mut negative = false;
        for _ in 0..1000 {
            let j = jitter(1.0);
            positive |= j > 0.0;
            negative |= j < 0.0;
            if positive && negative {
                return;
            }
        }
        panic!("expected both signs within 1000 draws");
    }
}
