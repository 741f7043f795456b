use nalgebra::{Matrix4, Vector4};
use serde::{Deserialize, Serialize};

use crate::utils::vectors::{Vec3, Vec4};

/// A right-handed set of orthonormal axes.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoordinateSystem {
    axes: [Vec3; 3],
}

impl Default for CoordinateSystem {
    fn default() -> Self {
        Self {
            axes: [Vec3::x_hat(), Vec3::y_hat(), Vec3::z_hat()],
        }
    }
}

impl CoordinateSystem {
    /// Build a coordinate system from three axes, which are normalized but otherwise taken as
    /// given.
    pub fn new(x: Vec3, y: Vec3, z: Vec3) -> Self {
        Self {
            axes: [x.unit(), y.unit(), z.unit()],
        }
    }
    pub fn x(&self) -> Vec3 {
        self.axes[0]
    }
    pub fn y(&self) -> Vec3 {
        self.axes[1]
    }
    pub fn z(&self) -> Vec3 {
        self.axes[2]
    }
    /// Components of `v` along the three axes.
    pub fn project(&self, v: &Vec3) -> Vec3 {
        Vec3::new(v.dot(&self.x()), v.dot(&self.y()), v.dot(&self.z()))
    }
    /// The polar angles $`(\phi, \theta)`$ of `v` in this coordinate system.
    ///
    /// When $`\phi`$ is undefined it is set to $`\theta`$, so that vectors along the $`z`$-axis
    /// still receive a deterministic pair of angles.
    pub fn angles(&self, v: &Vec3) -> (f64, f64) {
        let u = v.unit();
        let theta = u.dot(&self.z()).clamp(-1.0, 1.0).acos();
        let mut phi = u.dot(&self.y()).atan2(u.dot(&self.x()));
        if phi.is_nan() {
            phi = theta;
        }
        (phi, theta)
    }
}

/// The helicity frame of a particle moving along `v`, measured in the frame `c`.
///
/// The new $`z`$-axis points along `v`, the new $`y`$-axis along $`\hat{z}_c \times \hat{z}`$ and
/// the $`x`$-axis completes the right-handed system. If `v` vanishes or already points along
/// $`\hat{z}_c`$, `c` itself is returned.
pub fn helicity_frame(v: &Vec3, c: &CoordinateSystem) -> CoordinateSystem {
    if v.mag2() == 0.0 {
        return *c;
    }
    let z = v.unit();
    if z == c.z() {
        return *c;
    }
    let mut y = c.z().cross(&z);
    if y.mag2() == 0.0 {
        y = c.y();
    }
    let y = y.unit();
    let x = y.cross(&z);
    CoordinateSystem::new(x, y, z)
}

/// The Lorentz boost by velocity `beta` as a matrix acting on $`(x, y, z, t)`$.
pub fn lorentz_boost(beta: &Vec3) -> Matrix4<f64> {
    let b2 = beta.mag2();
    if b2 == 0.0 {
        return Matrix4::identity();
    }
    let gamma = 1.0 / (1.0 - b2).sqrt();
    let b = beta.as_array();
    let mut m = Matrix4::identity();
    for i in 0..3 {
        for j in 0..3 {
            m[(i, j)] += (gamma - 1.0) * b[i] * b[j] / b2;
        }
        m[(i, 3)] = gamma * b[i];
        m[(3, i)] = gamma * b[i];
    }
    m[(3, 3)] = gamma;
    m
}

/// The boost that brings `p` to rest.
pub fn rest_frame_boost(p: &Vec4) -> Matrix4<f64> {
    lorentz_boost(&-p.beta())
}

/// Apply a Lorentz transformation to a four-vector.
pub fn transform(m: &Matrix4<f64>, p: &Vec4) -> Vec4 {
    (m * Vector4::from(*p)).into()
}

#[cfg(test)]
mod tests {
    use std::f64::consts::PI;

    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_boost_matrix_matches_vector_boost() {
        let pa = Vec4::new(3.0, 4.0, 5.0, 10.0);
        let pb = Vec4::new(3.4, 2.3, 1.2, 9.0);
        let by_matrix = transform(&rest_frame_boost(&pb), &pa);
        let by_vector = pa.boost(&-pb.beta());
        assert_relative_eq!(by_matrix.e(), by_vector.e(), epsilon = 1e-12);
        assert_relative_eq!(by_matrix.px(), by_vector.px(), epsilon = 1e-12);
        assert_relative_eq!(by_matrix.py(), by_vector.py(), epsilon = 1e-12);
        assert_relative_eq!(by_matrix.pz(), by_vector.pz(), epsilon = 1e-12);
        let rest = transform(&rest_frame_boost(&pb), &pb);
        assert_relative_eq!(rest.vec3().mag(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(rest.e(), pb.m(), epsilon = 1e-12);
    }

    #[test]
    fn test_helicity_frame_axes() {
        let c = CoordinateSystem::default();
        let v = Vec3::new(1.0, 0.0, 0.0);
        let h = helicity_frame(&v, &c);
        assert_relative_eq!(h.z().x, 1.0);
        // y = z_c x x_hat = y_hat
        assert_relative_eq!(h.y().y, 1.0);
        // x = y x z = -z_hat
        assert_relative_eq!(h.x().z, -1.0);
        assert_eq!(helicity_frame(&Vec3::zero(), &c), c);
        assert_eq!(helicity_frame(&Vec3::new(0.0, 0.0, 2.0), &c), c);
        let flipped = helicity_frame(&Vec3::new(0.0, 0.0, -2.0), &c);
        assert_relative_eq!(flipped.y().y, 1.0);
        assert_relative_eq!(flipped.z().z, -1.0);
    }

    #[test]
    fn test_angles() {
        let c = CoordinateSystem::default();
        let (phi, theta) = c.angles(&Vec3::new(0.0, 1.0, 0.0));
        assert_relative_eq!(phi, PI / 2.0);
        assert_relative_eq!(theta, PI / 2.0);
        let (phi, theta) = c.angles(&Vec3::new(1.0, 1.0, 2.0_f64.sqrt()));
        assert_relative_eq!(phi, PI / 4.0);
        assert_relative_eq!(theta, PI / 4.0, epsilon = 1e-12);
    }
}
