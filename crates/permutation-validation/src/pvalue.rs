use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use statrs::distribution::{ContinuousCDF, Normal};

/// One-sided 95% normal quantile, the default confidence level for the
/// Wilson upper bound.
pub const Z_ONE_SIDED_95: f64 = 1.644_853_626_951_472_2;

/// Converts an exceedance count `k` out of `N` permutations into a p-value.
pub trait PValuePolicy: Send + Sync {
    fn p_value(&self, k: u32, n: u32) -> Decimal;
}

/// The standard "+1" bias-corrected estimator: `(k + 1) / (N + 1)`. Never
/// reports exactly zero, which would be indistinguishable from "impossible"
/// rather than "not observed in N draws".
pub struct StandardPValuePolicy;

impl PValuePolicy for StandardPValuePolicy {
    fn p_value(&self, k: u32, n: u32) -> Decimal {
        Decimal::from(k + 1) / Decimal::from(n + 1)
    }
}

/// Conservative estimator: the Wilson score upper confidence bound applied
/// to the standard "+1" estimator, inflating it to account for Monte-Carlo
/// uncertainty at finite `N`.
pub struct WilsonPValuePolicy {
    z: f64,
}

impl WilsonPValuePolicy {
    pub fn new(z: f64) -> Self {
        Self { z }
    }

    /// Builds a policy whose `z` is the two-sided quantile for `confidence`
    /// (e.g. 0.95), via `statrs`'s inverse normal CDF. Falls back to the
    /// one-sided-95% constant if the distribution cannot be constructed,
    /// which only happens for malformed parameters we never pass.
    pub fn for_confidence(confidence: f64) -> Self {
        let normal = Normal::new(0.0, 1.0).expect("standard normal parameters are always valid");
        let z = normal.inverse_cdf(confidence);
        Self { z }
    }
}

impl Default for WilsonPValuePolicy {
    fn default() -> Self {
        Self { z: Z_ONE_SIDED_95 }
    }
}

impl PValuePolicy for WilsonPValuePolicy {
    fn p_value(&self, k: u32, n: u32) -> Decimal {
        let phat = (k as f64 + 1.0) / (n as f64 + 1.0);
        let ub = wilson_upper_bound(phat, n, self.z);
        Decimal::from_f64(ub).unwrap_or(Decimal::ONE)
    }
}

fn wilson_upper_bound(phat: f64, n: u32, z: f64) -> f64 {
    let n = n as f64;
    let z2 = z * z;
    let denom = 1.0 + z2 / n;
    let center = phat + z2 / (2.0 * n);
    let rad = z * ((phat * (1.0 - phat) + z2 / (4.0 * n)) / n).sqrt();
    ((center + rad) / denom).clamp(0.0, 1.0)
}
