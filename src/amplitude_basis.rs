//! The three amplitudes of a spin-0 decay into two spin-1 particles in the canonical
//! (partial-wave $`S, P, D`$), transversity ($`A_0, A_\parallel, A_\perp`$) and helicity
//! ($`H_0, H_+, H_-`$) bases.
//!
//! The bases are related by fixed real matrices. Covariances are $`6\times 6`$ matrices over
//! the (real, imaginary) parts of the three amplitudes, ordered amplitude by amplitude, and are
//! transformed with $`(J \otimes 1_2)\, C\, (J \otimes 1_2)^T`$.

use std::f64::consts::FRAC_1_SQRT_2;

use nalgebra::{Matrix3, Matrix6};
use num::complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::complex_basis::Cartesian;

/// Amplitudes and covariance shared by every basis.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
struct Coordinates {
    amplitudes: [Complex64; 3],
    covariance: Matrix6<f64>,
}

impl Coordinates {
    fn from_cartesian(amplitudes: [Cartesian; 3]) -> Self {
        let mut covariance = Matrix6::zeros();
        for (i, a) in amplitudes.iter().enumerate() {
            covariance
                .fixed_view_mut::<2, 2>(2 * i, 2 * i)
                .copy_from(a.covariance());
        }
        Self {
            amplitudes: amplitudes.map(|a| a.value()),
            covariance,
        }
    }

    fn transform(&self, jacobian: &Matrix3<f64>) -> Self {
        let mut amplitudes = [Complex64::ZERO; 3];
        for (i, out) in amplitudes.iter_mut().enumerate() {
            for (j, a) in self.amplitudes.iter().enumerate() {
                *out += jacobian[(i, j)] * *a;
            }
        }
        let expanded = Matrix6::from_fn(|i, j| {
            if i % 2 == j % 2 {
                jacobian[(i / 2, j / 2)]
            } else {
                0.0
            }
        });
        Self {
            amplitudes,
            covariance: expanded * self.covariance * expanded.transpose(),
        }
    }

    /// The $`2\times 2`$ covariance block of amplitude `i`.
    fn cartesian(&self, i: usize) -> Cartesian {
        Cartesian::new(
            self.amplitudes[i],
            self.covariance.fixed_view::<2, 2>(2 * i, 2 * i).into_owned(),
        )
    }
}

fn sqrt(x: f64) -> f64 {
    x.sqrt()
}

#[rustfmt::skip]
fn canonical_to_transversity() -> Matrix3<f64> {
    Matrix3::new(
        -sqrt(1.0 / 3.0), 0.0, sqrt(2.0 / 3.0),
        sqrt(2.0 / 3.0), 0.0, sqrt(1.0 / 3.0),
        0.0, 1.0, 0.0,
    )
}

#[rustfmt::skip]
fn transversity_to_helicity() -> Matrix3<f64> {
    Matrix3::new(
        1.0, 0.0, 0.0,
        0.0, FRAC_1_SQRT_2, FRAC_1_SQRT_2,
        0.0, FRAC_1_SQRT_2, -FRAC_1_SQRT_2,
    )
}

macro_rules! amplitude_basis {
    ($(#[$meta:meta])* $name:ident, [$a0:ident, $a1:ident, $a2:ident]) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
        pub struct $name(Coordinates);

        impl $name {
            /// Uncorrelated amplitudes, each with its own covariance.
            pub fn new($a0: Cartesian, $a1: Cartesian, $a2: Cartesian) -> Self {
                Self(Coordinates::from_cartesian([$a0, $a1, $a2]))
            }
            /// Amplitudes with a full covariance matrix.
            pub fn with_covariance(amplitudes: [Complex64; 3], covariance: Matrix6<f64>) -> Self {
                Self(Coordinates {
                    amplitudes,
                    covariance,
                })
            }
            pub fn amplitudes(&self) -> [Complex64; 3] {
                self.0.amplitudes
            }
            pub fn covariance(&self) -> &Matrix6<f64> {
                &self.0.covariance
            }
            pub fn $a0(&self) -> Cartesian {
                self.0.cartesian(0)
            }
            pub fn $a1(&self) -> Cartesian {
                self.0.cartesian(1)
            }
            pub fn $a2(&self) -> Cartesian {
                self.0.cartesian(2)
            }
        }
    };
}

amplitude_basis!(
    /// Partial-wave amplitudes with orbital angular momentum 0, 1 and 2.
    Canonical,
    [s, p, d]
);
amplitude_basis!(
    /// Longitudinal, parallel and perpendicular transversity amplitudes.
    Transversity,
    [longitudinal, parallel, perpendicular]
);
amplitude_basis!(
    /// Helicity amplitudes with daughter helicities 0, +1 and -1.
    Helicity,
    [zero, plus, minus]
);

impl Canonical {
    /// The amplitude with orbital angular momentum `l`, if `l <= 2`.
    pub fn wave(&self, l: usize) -> Option<Cartesian> {
        (l < 3).then(|| self.0.cartesian(l))
    }
}

impl From<&Canonical> for Transversity {
    fn from(c: &Canonical) -> Self {
        Self(c.0.transform(&canonical_to_transversity()))
    }
}

impl From<&Transversity> for Canonical {
    fn from(t: &Transversity) -> Self {
        Self(t.0.transform(&canonical_to_transversity().transpose()))
    }
}

impl From<&Transversity> for Helicity {
    fn from(t: &Transversity) -> Self {
        Self(t.0.transform(&transversity_to_helicity()))
    }
}

impl From<&Helicity> for Transversity {
    fn from(h: &Helicity) -> Self {
        // the transversity-helicity matrix is its own inverse
        Self(h.0.transform(&transversity_to_helicity()))
    }
}

impl From<&Canonical> for Helicity {
    fn from(c: &Canonical) -> Self {
        Self(c.0.transform(&(transversity_to_helicity() * canonical_to_transversity())))
    }
}

impl From<&Helicity> for Canonical {
    fn from(h: &Helicity) -> Self {
        Self(h.0.transform(&(transversity_to_helicity() * canonical_to_transversity()).transpose()))
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::Matrix2;

    use super::*;

    fn assert_same(a: [Complex64; 3], b: [Complex64; 3]) {
        for (x, y) in a.iter().zip(&b) {
            assert_relative_eq!(x.re, y.re, epsilon = 1e-12);
            assert_relative_eq!(x.im, y.im, epsilon = 1e-12);
        }
    }

    fn transversity() -> Transversity {
        Transversity::new(
            Cartesian::new(
                Complex64::from_polar(0.624, 357.0_f64.to_radians()),
                Matrix2::new(1.210, 0.101, 0.218, 1.951),
            ),
            Cartesian::new(
                Complex64::from_polar(0.157, 120.0_f64.to_radians()),
                Matrix2::new(2.176, 0.153, 0.156, 1.686),
            ),
            Cartesian::new(
                Complex64::from_polar(0.384, 163.0_f64.to_radians()),
                Matrix2::new(1.782, 0.278, 0.279, 2.064),
            ),
        )
    }

    #[test]
    fn test_jacobians_are_orthogonal() {
        assert_relative_eq!(
            canonical_to_transversity() * canonical_to_transversity().transpose(),
            Matrix3::identity(),
            epsilon = 1e-14
        );
        assert_relative_eq!(
            transversity_to_helicity() * transversity_to_helicity(),
            Matrix3::identity(),
            epsilon = 1e-14
        );
    }

    #[test]
    fn test_basis_round_trips() {
        let t1 = transversity();
        assert!(t1.covariance()[(0, 0)] != 0.0);
        let c1 = Canonical::from(&t1);
        let t2 = Transversity::from(&c1);
        assert_same(t1.amplitudes(), t2.amplitudes());
        assert_relative_eq!(*t1.covariance(), *t2.covariance(), epsilon = 1e-12);

        let h1 = Helicity::from(&t1);
        let h2 = Helicity::from(&c1);
        assert_same(h1.amplitudes(), h2.amplitudes());
        assert_relative_eq!(*h1.covariance(), *h2.covariance(), epsilon = 1e-12);

        let t3 = Transversity::from(&h1);
        assert_same(t3.amplitudes(), t1.amplitudes());
        assert_relative_eq!(*t3.covariance(), *t1.covariance(), epsilon = 1e-12);

        let c2 = Canonical::from(&h1);
        for l in 0..3 {
            let (a, b) = (c2.wave(l).unwrap(), c1.wave(l).unwrap());
            assert_relative_eq!(a.re(), b.re(), epsilon = 1e-12);
            assert_relative_eq!(a.im(), b.im(), epsilon = 1e-12);
        }
        assert!(c2.wave(3).is_none());
        assert_relative_eq!(*c2.covariance(), *c1.covariance(), epsilon = 1e-12);
    }

    #[test]
    fn test_helicity_amplitudes() {
        let t = transversity();
        let h = Helicity::from(&t);
        assert_eq!(h.zero().value(), t.longitudinal().value());
        let expected = (t.parallel().value() + t.perpendicular().value()) * FRAC_1_SQRT_2;
        assert_relative_eq!(h.plus().re(), expected.re, epsilon = 1e-14);
        assert_relative_eq!(h.plus().im(), expected.im, epsilon = 1e-14);
    }
}
