use std::collections::HashMap;

use factorial::Factorial;
use num::complex::Complex64;
use parking_lot::RwLock;

use crate::{utils::pow_neg_one, SaplingError, SaplingResult};

fn factorial(n: i32) -> f64 {
    let n = n.max(0) as u64;
    n.checked_factorial()
        .map_or_else(|| (1..=n).map(|k| k as f64).product(), |f| f as f64)
}

/// The angle-independent parts of the closed-form sum for one $`d^J_{MN}`$.
#[derive(Clone, Debug)]
struct Expansion {
    prefactor: f64,
    // (power of cos(beta/2), power of sin(beta/2), 1 / coefficient)
    terms: Vec<(i32, i32, f64)>,
}

impl Expansion {
    fn new(two_j: i32, two_m: i32, two_n: i32) -> Self {
        let jpm = (two_j + two_m) / 2;
        let jpn = (two_j + two_n) / 2;
        let jmm = (two_j - two_m) / 2;
        let jmn = (two_j - two_n) / 2;
        let prefactor =
            pow_neg_one(jpm) * (factorial(jpm) * factorial(jmm) * factorial(jpn) * factorial(jmn)).sqrt();
        let mpn = (two_m + two_n) / 2;
        let terms = (mpn.max(0)..=jpm.min(jpn))
            .map(|k| {
                let cos_power = 2 * k - mpn;
                let sin_power = two_j + mpn - 2 * k;
                let coefficient = factorial(k) * factorial(jpm - k) * factorial(jpn - k) * factorial(k - mpn)
                    / pow_neg_one(k);
                (cos_power, sin_power, coefficient)
            })
            .collect();
        Self { prefactor, terms }
    }

    fn evaluate(&self, cos_half: f64, sin_half: f64) -> f64 {
        self.prefactor
            * self
                .terms
                .iter()
                .map(|(c, s, f)| cos_half.powi(*c) * sin_half.powi(*s) / f)
                .sum::<f64>()
    }
}

/// Wigner $`d`$- and $`D`$-functions with a cache of expansion coefficients.
///
/// Coefficients are computed on first use of each $`(J, M, N)`$ and stored per $`J`$, so the
/// table fills in whatever order the functions are requested. Each
/// [`Model`](crate::model::Model) owns its own cache.
#[derive(Debug, Default)]
pub struct WignerCache {
    tables: RwLock<HashMap<u32, HashMap<(i32, i32), Expansion>>>,
}

impl WignerCache {
    /// The small $`d^J_{MN}(\beta)`$ with doubled spin arguments.
    ///
    /// Projections with $`|M| > J`$ or $`|N| > J`$ give zero.
    ///
    /// # Errors
    ///
    /// [`SaplingError::InvalidSpinProjection`] if `two_m` or `two_n` has the wrong parity for
    /// `two_j`.
    pub fn d(&self, two_j: u32, two_m: i32, two_n: i32, beta: f64) -> SaplingResult<f64> {
        for two_p in [two_m, two_n] {
            if (two_j as i32 + two_p) % 2 != 0 {
                return Err(SaplingError::InvalidSpinProjection { two_j, two_m: two_p });
            }
        }
        if two_m.unsigned_abs() > two_j || two_n.unsigned_abs() > two_j {
            return Ok(0.0);
        }
        if two_j == 0 {
            return Ok(1.0);
        }
        let (two_m, two_n) = if beta < 0.0 { (two_n, two_m) } else { (two_m, two_n) };
        let half = beta.abs() / 2.0;
        let (sin_half, cos_half) = half.sin_cos();
        if let Some(expansion) = self.tables.read().get(&two_j).and_then(|t| t.get(&(two_m, two_n))) {
            return Ok(expansion.evaluate(cos_half, sin_half));
        }
        let expansion = Expansion::new(two_j as i32, two_m, two_n);
        let value = expansion.evaluate(cos_half, sin_half);
        self.tables
            .write()
            .entry(two_j)
            .or_default()
            .insert((two_m, two_n), expansion);
        Ok(value)
    }

    /// The Wigner $`D^J_{MN}(\alpha, \beta, \gamma) = e^{-iM\alpha} d^J_{MN}(\beta) e^{-iN\gamma}`$.
    pub fn big_d(
        &self,
        two_j: u32,
        two_m: i32,
        two_n: i32,
        alpha: f64,
        beta: f64,
        gamma: f64,
    ) -> SaplingResult<Complex64> {
        let arg = two_m as f64 / 2.0 * alpha + two_n as f64 / 2.0 * gamma;
        Ok(Complex64::from_polar(1.0, -arg) * self.d(two_j, two_m, two_n, beta)?)
    }

    /// Number of cached $`(J, M, N)`$ expansions.
    pub fn len(&self) -> usize {
        self.tables.read().values().map(|t| t.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::f64::consts::PI;

    use approx::assert_relative_eq;

    use super::*;

    fn angles() -> Vec<(f64, f64, f64)> {
        let mut rng = fastrand::Rng::with_seed(7);
        (0..25)
            .map(|_| {
                (
                    2.0 * PI * rng.f64() - PI,
                    2.0 * PI * rng.f64() - PI,
                    2.0 * PI * rng.f64() - PI,
                )
            })
            .collect()
    }

    #[test]
    fn test_known_d_values() {
        let cache = WignerCache::default();
        let beta = 0.7_f64;
        assert_relative_eq!(cache.d(2, 2, 2, beta).unwrap(), (1.0 + beta.cos()) / 2.0, epsilon = 1e-14);
        assert_relative_eq!(cache.d(2, 2, 0, beta).unwrap(), -beta.sin() / 2.0_f64.sqrt(), epsilon = 1e-14);
        assert_relative_eq!(cache.d(2, 0, 0, beta).unwrap(), beta.cos(), epsilon = 1e-14);
        assert_relative_eq!(cache.d(1, 1, -1, beta).unwrap(), -(beta / 2.0).sin(), epsilon = 1e-14);
        assert_relative_eq!(
            cache.d(4, 0, 0, beta).unwrap(),
            (3.0 * beta.cos().powi(2) - 1.0) / 2.0,
            epsilon = 1e-14
        );
        assert!(!cache.is_empty());
    }

    #[test]
    fn test_out_of_range_and_parity() {
        let cache = WignerCache::default();
        assert_eq!(cache.d(2, 4, 0, 0.3).unwrap(), 0.0);
        assert!(matches!(
            cache.d(2, 1, 0, 0.3),
            Err(SaplingError::InvalidSpinProjection { .. })
        ));
    }

    #[test]
    fn test_conjugation_symmetry() {
        let cache = WignerCache::default();
        for two_j in 0..=6u32 {
            for two_m in crate::utils::projections(two_j) {
                for two_n in crate::utils::projections(two_j) {
                    for (a, b, g) in angles() {
                        let lhs = cache.big_d(two_j, two_m, two_n, a, b, g).unwrap().conj();
                        let rhs = pow_neg_one((two_n - two_m) / 2)
                            * cache.big_d(two_j, -two_m, -two_n, a, b, g).unwrap();
                        assert_relative_eq!(lhs.re, rhs.re, epsilon = 1e-12);
                        assert_relative_eq!(lhs.im, rhs.im, epsilon = 1e-12);
                    }
                }
            }
        }
    }

    #[test]
    fn test_time_reversal_symmetry() {
        let cache = WignerCache::default();
        for two_j in 0..=6u32 {
            for two_m in crate::utils::projections(two_j) {
                for two_n in crate::utils::projections(two_j) {
                    for (a, b, g) in angles() {
                        let lhs = cache.big_d(two_j, two_m, two_n, a, b, g).unwrap();
                        let rhs = cache.big_d(two_j, two_n, two_m, -g, -b, -a).unwrap().conj();
                        assert_relative_eq!(lhs.re, rhs.re, epsilon = 1e-12);
                        assert_relative_eq!(lhs.im, rhs.im, epsilon = 1e-12);
                    }
                }
            }
        }
    }

    #[test]
    fn test_unitarity() {
        let cache = WignerCache::default();
        for two_j in 0..=4u32 {
            for two_m in crate::utils::projections(two_j) {
                let total: f64 = crate::utils::projections(two_j)
                    .into_iter()
                    .map(|two_n| cache.d(two_j, two_m, two_n, 1.1).unwrap().powi(2))
                    .sum();
                assert_relative_eq!(total, 1.0, epsilon = 1e-12);
            }
        }
    }
}
