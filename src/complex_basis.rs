//! Complex numbers in Cartesian or polar form, each carrying a $`2\times 2`$ covariance.
//!
//! Conversions propagate the covariance through the Jacobian of the coordinate change,
//! $`C' = J C J^T`$.

use nalgebra::Matrix2;
use num::complex::Complex64;
use serde::{Deserialize, Serialize};

/// A complex value as (real, imaginary) with covariance.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cartesian {
    value: Complex64,
    covariance: Matrix2<f64>,
}

impl Cartesian {
    pub fn new(value: Complex64, covariance: Matrix2<f64>) -> Self {
        Self { value, covariance }
    }
    /// A value with uncorrelated real and imaginary parts.
    pub fn with_variances(value: Complex64, var_re: f64, var_im: f64) -> Self {
        Self::new(value, Matrix2::new(var_re, 0.0, 0.0, var_im))
    }
    pub fn value(&self) -> Complex64 {
        self.value
    }
    pub fn re(&self) -> f64 {
        self.value.re
    }
    pub fn im(&self) -> f64 {
        self.value.im
    }
    pub fn covariance(&self) -> &Matrix2<f64> {
        &self.covariance
    }
    /// The value as a real two-vector, the coordinates the covariance refers to.
    pub fn coordinates(&self) -> [f64; 2] {
        [self.value.re, self.value.im]
    }
}

impl From<Complex64> for Cartesian {
    fn from(value: Complex64) -> Self {
        Self::new(value, Matrix2::zeros())
    }
}

impl From<&Polar> for Cartesian {
    fn from(polar: &Polar) -> Self {
        let (sin, cos) = polar.phase.sin_cos();
        let r = polar.magnitude;
        let jacobian = Matrix2::new(cos, -r * sin, sin, r * cos);
        Self::new(
            Complex64::from_polar(r, polar.phase),
            jacobian * polar.covariance * jacobian.transpose(),
        )
    }
}

impl From<Polar> for Cartesian {
    fn from(polar: Polar) -> Self {
        Self::from(&polar)
    }
}

/// A complex value as (magnitude, phase in radians) with covariance.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Polar {
    magnitude: f64,
    phase: f64,
    covariance: Matrix2<f64>,
}

impl Polar {
    pub fn new(magnitude: f64, phase: f64, covariance: Matrix2<f64>) -> Self {
        Self {
            magnitude,
            phase,
            covariance,
        }
    }
    pub fn with_variances(magnitude: f64, phase: f64, var_magnitude: f64, var_phase: f64) -> Self {
        Self::new(magnitude, phase, Matrix2::new(var_magnitude, 0.0, 0.0, var_phase))
    }
    pub fn magnitude(&self) -> f64 {
        self.magnitude
    }
    pub fn phase(&self) -> f64 {
        self.phase
    }
    pub fn covariance(&self) -> &Matrix2<f64> {
        &self.covariance
    }
    pub fn value(&self) -> Complex64 {
        Complex64::from_polar(self.magnitude, self.phase)
    }
}

impl From<&Cartesian> for Polar {
    fn from(cartesian: &Cartesian) -> Self {
        let (x, y) = (cartesian.re(), cartesian.im());
        let r = cartesian.value.norm();
        let r2 = r * r;
        // undefined at the origin, where the phase carries no information
        let jacobian = if r > 0.0 {
            Matrix2::new(x / r, y / r, -y / r2, x / r2)
        } else {
            Matrix2::zeros()
        };
        Self::new(
            r,
            y.atan2(x),
            jacobian * cartesian.covariance * jacobian.transpose(),
        )
    }
}

impl From<Cartesian> for Polar {
    fn from(cartesian: Cartesian) -> Self {
        Self::from(&cartesian)
    }
}

#[cfg(test)]
mod tests {
    use std::f64::consts::PI;

    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_polar_round_trip() {
        let p1 = Polar::with_variances(1.1, 73.0_f64.to_radians(), 0.1, 10.0_f64.to_radians());
        let c1 = Cartesian::from(&p1);
        assert_relative_eq!(c1.re(), 1.1 * 73.0_f64.to_radians().cos(), epsilon = 1e-14);
        let p2 = Polar::from(c1);
        assert_relative_eq!(p2.magnitude(), p1.magnitude(), max_relative = 1e-12);
        assert_relative_eq!(p2.phase(), p1.phase(), max_relative = 1e-12);
        assert_relative_eq!(*p2.covariance(), *p1.covariance(), epsilon = 1e-12);
    }

    #[test]
    fn test_cartesian_covariance_propagation() {
        // a pure phase error on the imaginary axis is an error on the real part
        let p = Polar::with_variances(2.0, PI / 2.0, 0.0, 0.01);
        let c = Cartesian::from(p);
        assert_relative_eq!(c.covariance()[(0, 0)], 4.0 * 0.01, epsilon = 1e-12);
        assert_relative_eq!(c.covariance()[(1, 1)], 0.0, epsilon = 1e-12);
        assert_eq!(Polar::from(Cartesian::from(Complex64::ZERO)).covariance(), &Matrix2::zeros());
    }
}
