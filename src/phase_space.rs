use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::trace;

use crate::{
    utils::vectors::{Vec3, Vec4},
    SaplingError, SaplingResult,
};

/// The independent two-particle invariant masses that describe a point in phase space.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MassAxes {
    pairs: Vec<[usize; 2]>,
}

impl MassAxes {
    pub(crate) fn new(pairs: Vec<[usize; 2]>) -> Self {
        Self { pairs }
    }
    pub fn len(&self) -> usize {
        self.pairs.len()
    }
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
    /// The final-state index pairs, in axis order.
    pub fn pairs(&self) -> Vec<[usize; 2]> {
        self.pairs.clone()
    }
    pub fn iter(&self) -> std::slice::Iter<'_, [usize; 2]> {
        self.pairs.iter()
    }
}

fn check_axis(axis: [usize; 2], n: usize) -> SaplingResult<()> {
    if axis[0] >= n || axis[1] >= n || axis[0] == axis[1] {
        return Err(SaplingError::Custom(format!(
            "invalid mass axis ({}, {}) for {} final-state particles",
            axis[0], axis[1], n
        )));
    }
    Ok(())
}

/// The kinematic range of the invariant mass of `axis`: from the sum of its masses to the
/// initial mass minus every other mass.
///
/// # Errors
///
/// [`SaplingError::Custom`] if `axis` does not name two distinct entries of `masses`.
pub fn mass_range(initial_mass: f64, axis: [usize; 2], masses: &[f64]) -> SaplingResult<(f64, f64)> {
    check_axis(axis, masses.len())?;
    let inside: f64 = axis.iter().map(|&i| masses[i]).sum();
    let outside: f64 = masses
        .iter()
        .enumerate()
        .filter(|(i, _)| !axis.contains(i))
        .map(|(_, m)| m)
        .sum();
    Ok((inside, initial_mass - outside))
}

/// Square both ends of a range.
pub fn squared(range: (f64, f64)) -> (f64, f64) {
    (range.0 * range.0, range.1 * range.1)
}

/// Solve for final-state four-momenta in the rest frame of the initial state.
///
/// The pair invariants not on an axis follow from
/// $`\sum_{i<j} s_{ij} = M^2 + (n-2)\sum_i m_i^2`$; energies and three-momentum inner products
/// follow from the pair invariants. The first particle points along $`z`$, the second lies in
/// the $`xz`$-plane with positive $`x`$, the third has non-negative $`y`$, and the last balances
/// the momentum. A point outside the physical boundary (a three-momentum Gram matrix that is not
/// positive semi-definite) gives an empty vector.
///
/// # Errors
///
/// [`SaplingError::Unsupported`] for other than three or four final-state particles and
/// [`SaplingError::Custom`] if the axes do not match the values or do not determine the point.
pub fn calculate_four_momenta(
    initial_mass: f64,
    masses: &[f64],
    axes: &MassAxes,
    squared_masses: &[f64],
) -> SaplingResult<Vec<Vec4>> {
    let n = masses.len();
    if !(3..=4).contains(&n) {
        return Err(SaplingError::Unsupported(format!(
            "four-momenta of {} final-state particles",
            n
        )));
    }
    if axes.len() != 3 * n - 7 || squared_masses.len() != axes.len() {
        return Err(SaplingError::Custom(format!(
            "{} values given for {} mass axes of a {}-body final state",
            squared_masses.len(),
            axes.len(),
            n
        )));
    }
    let mut s = [[None; 4]; 4];
    for (&[a, b], &value) in axes.iter().zip(squared_masses) {
        if a >= n || b >= n || a == b {
            return Err(SaplingError::Custom(format!("invalid mass axis ({}, {})", a, b)));
        }
        s[a][b] = Some(value);
        s[b][a] = Some(value);
    }
    let mut missing = Vec::new();
    let mut known = 0.0;
    for i in 0..n {
        for j in i + 1..n {
            match s[i][j] {
                Some(value) => known += value,
                None => missing.push((i, j)),
            }
        }
    }
    let [(a, b)] = missing.as_slice() else {
        return Err(SaplingError::Custom(
            "mass axes do not determine a phase-space point".to_string(),
        ));
    };
    let m2: Vec<f64> = masses.iter().map(|m| m * m).collect();
    let big_m2 = initial_mass * initial_mass;
    let derived = big_m2 + (n as f64 - 2.0) * m2.iter().sum::<f64>() - known;
    s[*a][*b] = Some(derived);
    s[*b][*a] = Some(derived);

    let dot = |i: usize, j: usize| -> f64 {
        if i == j {
            m2[i]
        } else {
            (s[i][j].unwrap_or_default() - m2[i] - m2[j]) / 2.0
        }
    };
    let energies: Vec<f64> = (0..n)
        .map(|i| (0..n).map(|j| dot(i, j)).sum::<f64>() / initial_mass)
        .collect();
    if energies.iter().zip(masses).any(|(e, m)| *e < *m * (1.0 - 1e-12)) {
        trace!("energies {:?} below masses", energies);
        return Ok(Vec::new());
    }

    let tolerance = 1e-10 * big_m2;
    let k = n - 1;
    let mut l = [[0.0; 3]; 3];
    for i in 0..k {
        for j in 0..=i {
            let mut sum = energies[i] * energies[j] - dot(i, j);
            for c in 0..j {
                sum -= l[i][c] * l[j][c];
            }
            if i == j {
                if sum < -tolerance {
                    return Ok(Vec::new());
                }
                l[i][i] = sum.max(0.0).sqrt();
            } else if l[j][j] > 0.0 {
                l[i][j] = sum / l[j][j];
            } else if sum.abs() > tolerance {
                return Ok(Vec::new());
            }
        }
    }

    let mut momenta: Vec<Vec4> = (0..k)
        .map(|i| Vec3::new(l[i][1], l[i][2], l[i][0]).with_energy(energies[i]))
        .collect();
    let p_last = -momenta.iter().map(|p| p.vec3()).fold(Vec3::default(), |acc, p| acc + p);
    let e_last = initial_mass - energies[..k].iter().sum::<f64>();
    if (e_last * e_last - p_last.mag2() - m2[k]).abs() > tolerance || e_last < 0.0 {
        return Ok(Vec::new());
    }
    momenta.push(p_last.with_energy(e_last));
    Ok(momenta)
}

/// Squared two-particle invariant masses of `momenta` along `axes`.
///
/// # Errors
///
/// [`SaplingError::Custom`] if an axis index is out of range of `momenta`.
pub fn squared_masses(momenta: &[Vec4], axes: &MassAxes) -> SaplingResult<Vec<f64>> {
    axes.iter()
        .map(|&[a, b]| match (momenta.get(a), momenta.get(b)) {
            (Some(pa), Some(pb)) if a != b => Ok((pa + pb).m2()),
            _ => Err(SaplingError::Custom(format!(
                "invalid mass axis ({}, {}) for {} four-momenta",
                a,
                b,
                momenta.len()
            ))),
        })
        .collect()
}

/// Draws phase-space points uniformly in the squared invariant masses of a set of
/// [`MassAxes`], rejecting points outside the kinematic boundary.
#[derive(Debug, Clone)]
pub struct PhspGenerator {
    initial_mass: f64,
    masses: Vec<f64>,
    axes: MassAxes,
    ranges: Vec<(f64, f64)>,
    max_attempts: usize,
    rng: ChaCha8Rng,
}

impl PhspGenerator {
    /// # Errors
    ///
    /// [`SaplingError::FinalStateCountMismatch`] if `axes` need more particles than `masses`
    /// holds, and [`SaplingError::Custom`] for an invalid axis or an empty kinematic range.
    pub fn new(initial_mass: f64, masses: Vec<f64>, axes: MassAxes, seed: u64, max_attempts: usize) -> SaplingResult<Self> {
        if let Some(&max) = axes.iter().flatten().max() {
            if max >= masses.len() {
                return Err(SaplingError::FinalStateCountMismatch {
                    expected: max + 1,
                    found: masses.len(),
                });
            }
        }
        let mut ranges = Vec::with_capacity(axes.len());
        for &axis in axes.iter() {
            let range = squared(mass_range(initial_mass, axis, &masses)?);
            if !(range.0 < range.1) {
                return Err(SaplingError::Custom(format!(
                    "empty mass range for axis ({}, {})",
                    axis[0], axis[1]
                )));
            }
            ranges.push(range);
        }
        Ok(Self {
            initial_mass,
            masses,
            axes,
            ranges,
            max_attempts,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    /// Select an independent random stream, so generators sharing a seed can run side by side.
    pub fn set_stream(&mut self, stream: u64) {
        self.rng.set_stream(stream);
    }

    pub fn axes(&self) -> &MassAxes {
        &self.axes
    }
    /// The squared ranges sampled along each axis.
    pub fn ranges(&self) -> &[(f64, f64)] {
        &self.ranges
    }

    /// The next point inside phase space.
    ///
    /// # Errors
    ///
    /// [`SaplingError::Custom`] if `max_attempts` samples all fall outside.
    pub fn generate(&mut self) -> SaplingResult<Vec<Vec4>> {
        for _ in 0..self.max_attempts {
            let squared_masses: Vec<f64> = self
                .ranges
                .iter()
                .map(|&(lo, hi)| self.rng.gen_range(lo..hi))
                .collect();
            let momenta = calculate_four_momenta(self.initial_mass, &self.masses, &self.axes, &squared_masses)?;
            if !momenta.is_empty() {
                return Ok(momenta);
            }
        }
        Err(SaplingError::Custom(format!(
            "no phase-space point found in {} attempts",
            self.max_attempts
        )))
    }

    /// `n` points inside phase space.
    pub fn generate_n(&mut self, n: usize) -> SaplingResult<Vec<Vec<Vec4>>> {
        (0..n).map(|_| self.generate()).collect()
    }
}
