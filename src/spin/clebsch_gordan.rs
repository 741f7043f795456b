//! Clebsch-Gordan coefficients for doubled spins.
//!
//! All spins and projections are passed doubled (`two_j = 2j`) so that half-integer values are
//! represented exactly.

use factorial::Factorial;

use crate::{utils::spin_to_string, SaplingError, SaplingResult};

fn factorial(n: i32) -> f64 {
    let n = n.max(0) as u64;
    n.checked_factorial()
        .map_or_else(|| (1..=n).map(|k| k as f64).product(), |f| f as f64)
}

/// Returns `true` if `two_m` is an allowed projection of `two_j`.
pub fn consistent(two_j: u32, two_m: i32) -> bool {
    two_m.unsigned_abs() <= two_j && (two_j as i32 + two_m) % 2 == 0
}

/// Returns `true` if `two_j` lies in the triangle of `two_j1` and `two_j2`.
pub fn triangle(two_j1: u32, two_j2: u32, two_j: u32) -> bool {
    two_j >= two_j1.abs_diff(two_j2) && two_j <= two_j1 + two_j2 && (two_j1 + two_j2 + two_j) % 2 == 0
}

/// A printable form $`(j_1 m_1, j_2 m_2 | J M)`$.
pub fn to_string(two_j1: u32, two_m1: i32, two_j2: u32, two_m2: i32, two_j: u32, two_m: i32) -> String {
    format!(
        "({} {}, {} {} | {} {})",
        spin_to_string(two_j1 as i32),
        spin_to_string(two_m1),
        spin_to_string(two_j2 as i32),
        spin_to_string(two_m2),
        spin_to_string(two_j as i32),
        spin_to_string(two_m)
    )
}

fn check(two_j1: u32, two_m1: i32, two_j2: u32, two_m2: i32, two_j: u32, two_m: i32) -> SaplingResult<()> {
    for (j, m) in [(two_j1, two_m1), (two_j2, two_m2), (two_j, two_m)] {
        if !consistent(j, m) {
            return Err(SaplingError::InvalidSpinProjection { two_j: j, two_m: m });
        }
    }
    if two_m != two_m1 + two_m2 {
        return Err(SaplingError::InconsistentSpinProjection {
            two_m1,
            two_m2,
            two_m,
        });
    }
    if !triangle(two_j1, two_j2, two_j) {
        return Err(SaplingError::AngularMomentumNotConserved {
            two_j1,
            two_j2,
            two_j,
        });
    }
    Ok(())
}

/// Checks the arguments of a Clebsch-Gordan coefficient and reports whether it can be nonzero.
///
/// # Errors
///
/// [`SaplingError::AngularMomentumNotConserved`] if `two_j` is outside the triangle of `two_j1`
/// and `two_j2`, [`SaplingError::InconsistentSpinProjection`] if `two_m != two_m1 + two_m2` and
/// [`SaplingError::InvalidSpinProjection`] if any projection is not allowed for its spin.
pub fn nonzero_coefficient(
    two_j1: u32,
    two_m1: i32,
    two_j2: u32,
    two_m2: i32,
    two_j: u32,
    two_m: i32,
) -> SaplingResult<bool> {
    check(two_j1, two_m1, two_j2, two_m2, two_j, two_m)?;
    // (j1 0, j2 0 | J 0) vanishes for odd j1 + j2 + J
    if two_m1 == 0 && two_m2 == 0 && ((two_j1 + two_j2 + two_j) / 2) % 2 == 1 {
        return Ok(false);
    }
    // accidental zeros of the Racah sum
    let accidental = [
        (3, 1, 3, 1, 4),
        (3, -1, 3, -1, 4),
        (4, 2, 3, -1, 3),
        (4, -2, 3, 1, 3),
        (4, 2, 4, 2, 6),
        (4, -2, 4, -2, 6),
    ];
    if accidental.contains(&(two_j1, two_m1, two_j2, two_m2, two_j)) {
        return Ok(false);
    }
    Ok(true)
}

/// The Clebsch-Gordan coefficient $`(j_1 m_1, j_2 m_2 | J M)`$ with $`M = m_1 + m_2`$.
///
/// Computed with the Racah formula.
///
/// # Errors
///
/// See [`nonzero_coefficient`].
pub fn coefficient(two_j1: u32, two_m1: i32, two_j2: u32, two_m2: i32, two_j: u32) -> SaplingResult<f64> {
    coefficient_with_projection(two_j1, two_m1, two_j2, two_m2, two_j, two_m1 + two_m2)
}

/// The Clebsch-Gordan coefficient $`(j_1 m_1, j_2 m_2 | J M)`$ with an explicit $`M`$.
pub fn coefficient_with_projection(
    two_j1: u32,
    two_m1: i32,
    two_j2: u32,
    two_m2: i32,
    two_j: u32,
    two_m: i32,
) -> SaplingResult<f64> {
    if !nonzero_coefficient(two_j1, two_m1, two_j2, two_m2, two_j, two_m)? {
        return Ok(0.0);
    }
    if two_j1 == 0 || two_j2 == 0 {
        return Ok(1.0);
    }
    let (j1, j2, j) = (two_j1 as i32, two_j2 as i32, two_j as i32);
    let (m1, m2, m) = (two_m1, two_m2, two_m);
    let z_min = [0, j2 - m1 - j, j1 + m2 - j].into_iter().max().unwrap_or(0) / 2;
    let z_max = [j1 + j2 - j, j1 - m1, j2 + m2].into_iter().min().unwrap_or(0) / 2;
    let z_sum: f64 = (z_min..=z_max)
        .map(|z| {
            crate::utils::pow_neg_one(z)
                / factorial(z)
                / factorial((j1 + j2 - j) / 2 - z)
                / factorial((j1 - m1) / 2 - z)
                / factorial((j2 + m2) / 2 - z)
                / factorial((j - j2 + m1) / 2 + z)
                / factorial((j - j1 - m2) / 2 + z)
        })
        .sum();
    let norm = (j + 1) as f64 * factorial((j1 + j2 - j) / 2) * factorial((j1 - j2 + j) / 2)
        / factorial((j1 + j2 + j) / 2 + 1)
        * factorial((j2 - j1 + j) / 2)
        * factorial((j1 + m1) / 2)
        * factorial((j1 - m1) / 2)
        * factorial((j2 + m2) / 2)
        * factorial((j2 - m2) / 2)
        * factorial((j + m) / 2)
        * factorial((j - m) / 2);
    Ok(z_sum * norm.sqrt())
}

/// Like [`coefficient`], but maps every coupling that cannot exist to zero.
pub fn coefficient_or_zero(two_j1: u32, two_m1: i32, two_j2: u32, two_m2: i32, two_j: u32) -> f64 {
    coefficient(two_j1, two_m1, two_j2, two_m2, two_j).unwrap_or(0.0)
}

/// Checks whether the $`LS`$ coupling of helicities $`\lambda_1, \lambda_2`$ into $`J`$ can be
/// nonzero.
pub fn nonzero_coupling(
    two_j1: u32,
    two_lambda1: i32,
    two_j2: u32,
    two_lambda2: i32,
    l: u32,
    two_s: u32,
    two_j: u32,
) -> SaplingResult<bool> {
    let two_lambda = two_lambda1 - two_lambda2;
    Ok(nonzero_coefficient(2 * l, 0, two_s, two_lambda, two_j, two_lambda)?
        && nonzero_coefficient(two_j1, two_lambda1, two_j2, -two_lambda2, two_s, two_lambda)?)
}

/// The product $`(L 0, S \lambda | J \lambda)(j_1 \lambda_1, j_2 -\lambda_2 | S \lambda)`$ with
/// $`\lambda = \lambda_1 - \lambda_2`$.
pub fn couple(
    two_j1: u32,
    two_lambda1: i32,
    two_j2: u32,
    two_lambda2: i32,
    l: u32,
    two_s: u32,
    two_j: u32,
) -> SaplingResult<f64> {
    if !nonzero_coupling(two_j1, two_lambda1, two_j2, two_lambda2, l, two_s, two_j)? {
        return Ok(0.0);
    }
    let two_lambda = two_lambda1 - two_lambda2;
    Ok(coefficient(2 * l, 0, two_s, two_lambda, two_j)?
        * coefficient(two_j1, two_lambda1, two_j2, -two_lambda2, two_s)?)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn valid_arguments(max_two_j: u32) -> Vec<(u32, i32, u32, i32, u32)> {
        let mut out = Vec::new();
        for two_j1 in 0..=max_two_j {
            for two_j2 in 0..=max_two_j {
                for two_j in two_j1.abs_diff(two_j2)..=(two_j1 + two_j2) {
                    if !triangle(two_j1, two_j2, two_j) {
                        continue;
                    }
                    for two_m1 in crate::utils::projections(two_j1) {
                        for two_m2 in crate::utils::projections(two_j2) {
                            if consistent(two_j, two_m1 + two_m2) {
                                out.push((two_j1, two_m1, two_j2, two_m2, two_j));
                            }
                        }
                    }
                }
            }
        }
        out
    }

    #[test]
    fn test_known_values() {
        // (1/2 1/2, 1/2 -1/2 | 1 0) = sqrt(1/2)
        assert_relative_eq!(coefficient(1, 1, 1, -1, 2).unwrap(), 0.5_f64.sqrt());
        // (1/2 1/2, 1/2 -1/2 | 0 0) = sqrt(1/2)
        assert_relative_eq!(coefficient(1, 1, 1, -1, 0).unwrap(), 0.5_f64.sqrt());
        // (1 1, 1 -1 | 0 0) = sqrt(1/3)
        assert_relative_eq!(coefficient(2, 2, 2, -2, 0).unwrap(), (1.0 / 3.0_f64).sqrt());
        // (1 0, 1 0 | 2 0) = sqrt(2/3)
        assert_relative_eq!(coefficient(2, 0, 2, 0, 4).unwrap(), (2.0 / 3.0_f64).sqrt());
        // (1 0, 1 0 | 1 0) = 0
        assert_eq!(coefficient(2, 0, 2, 0, 2).unwrap(), 0.0);
        // (3/2 1/2, 1 0 | 3/2 1/2) = sqrt(1/15)
        assert_relative_eq!(coefficient(3, 1, 2, 0, 3).unwrap(), (1.0 / 15.0_f64).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_projection_negation_symmetry() {
        for (j1, m1, j2, m2, j) in valid_arguments(4) {
            let sign = crate::utils::pow_neg_one(((j1 + j2) as i32 - j as i32) / 2);
            assert_relative_eq!(
                coefficient(j1, m1, j2, m2, j).unwrap(),
                sign * coefficient(j1, -m1, j2, -m2, j).unwrap(),
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn test_particle_swap_symmetry() {
        for (j1, m1, j2, m2, j) in valid_arguments(4) {
            let sign = crate::utils::pow_neg_one(((j1 + j2) as i32 - j as i32) / 2);
            assert_relative_eq!(
                coefficient(j1, m1, j2, m2, j).unwrap(),
                sign * coefficient(j2, m2, j1, m1, j).unwrap(),
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn test_spin_zero_partner() {
        for two_j in 0..=8 {
            for two_m in crate::utils::projections(two_j) {
                assert_eq!(coefficient(two_j, two_m, 0, 0, two_j).unwrap(), 1.0);
                for other in 0..=8 {
                    if other != two_j {
                        assert_eq!(coefficient_or_zero(two_j, two_m, 0, 0, other), 0.0);
                    }
                }
            }
        }
    }

    #[test]
    fn test_orthonormality() {
        // 1 x 1: sum over m1 of (1 m1, 1 M-m1 | J M)^2 = 1 for J = 0, 1, 2
        for two_j in [0, 2, 4] {
            for two_m in crate::utils::projections(two_j) {
                let total: f64 = crate::utils::projections(2)
                    .into_iter()
                    .map(|m1| coefficient_or_zero(2, m1, 2, two_m - m1, two_j).powi(2))
                    .sum();
                assert_relative_eq!(total, 1.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            coefficient(2, 0, 2, 0, 6),
            Err(SaplingError::AngularMomentumNotConserved { .. })
        ));
        assert!(matches!(
            coefficient_with_projection(2, 0, 2, 2, 2, 0),
            Err(SaplingError::InconsistentSpinProjection { .. })
        ));
        assert!(matches!(
            coefficient(2, 1, 2, 0, 2),
            Err(SaplingError::InvalidSpinProjection { .. })
        ));
        assert!(matches!(
            nonzero_coefficient(2, 0, 2, 0, 6, 0),
            Err(SaplingError::AngularMomentumNotConserved { .. })
        ));
    }

    #[test]
    fn test_couple() {
        // rho -> pi pi, L = 1, S = 0: (1 0, 0 0 | 1 0)(0 0, 0 0 | 0 0) = 1
        assert_relative_eq!(couple(0, 0, 0, 0, 1, 0, 2).unwrap(), 1.0);
        // J/psi -> e+ e- helicities (1/2, 1/2) with L = 0, S = 1
        assert_relative_eq!(couple(1, 1, 1, 1, 0, 2, 2).unwrap(), 0.5_f64.sqrt(), epsilon = 1e-12);
        assert!(!nonzero_coupling(0, 0, 0, 0, 0, 0, 2).unwrap_or(false));
    }
}
