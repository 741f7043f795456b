use std::{fmt::Display, sync::Arc};

use num::complex::Complex64;

use crate::{
    accessors::DataAccessor,
    data::DataPoint,
    model::Model,
    particle_combination::{Equiv, ParticleCombination},
    spin::{
        clebsch_gordan::{self, consistent, couple, nonzero_coupling, triangle},
        wigner::WignerCache,
    },
    utils::{
        enums::Formalism,
        geometry::{rest_frame_boost, transform},
        is_integer_spin, projections, spin_to_string,
        vectors::Vec3,
    },
    SaplingError, SaplingResult,
};

/// The angular factor of one two-body vertex $`J \to j_1 j_2`$ with orbital angular momentum
/// $`L`$ and total daughter spin $`S`$.
///
/// A spin amplitude holds one value per allowed combination of parent projection and daughter
/// helicities, listed in [`SpinAmplitude::amplitudes`]. Its values depend only on kinematics,
/// so they are computed once per [`DataPoint`] when the point is created.
#[derive(Debug)]
pub struct SpinAmplitude {
    formalism: Formalism,
    two_j: u32,
    two_j1: u32,
    two_j2: u32,
    l: u32,
    two_s: u32,
    amplitudes: Vec<(i32, [i32; 2])>,
    couplings: Vec<f64>,
    unit: bool,
    accessor: DataAccessor,
}

impl SpinAmplitude {
    /// Build the spin amplitude for the given quantum numbers, stored in accessor slot `index`.
    ///
    /// # Errors
    ///
    /// [`SaplingError::AngularMomentumNotConserved`] if $`S`$ cannot couple $`j_1`$ and
    /// $`j_2`$, if $`J`$ is not reachable from $`L`$ and $`S`$, or if no projection survives.
    /// [`SaplingError::Unsupported`] for combinations the formalism cannot express.
    pub fn new(
        index: usize,
        formalism: Formalism,
        two_j: u32,
        two_j1: u32,
        two_j2: u32,
        l: u32,
        two_s: u32,
    ) -> SaplingResult<Self> {
        if !triangle(two_j1, two_j2, two_s) {
            return Err(SaplingError::AngularMomentumNotConserved {
                two_j1,
                two_j2,
                two_j: two_s,
            });
        }
        if !triangle(2 * l, two_s, two_j) {
            return Err(SaplingError::AngularMomentumNotConserved {
                two_j1: 2 * l,
                two_j2: two_s,
                two_j,
            });
        }
        let (amplitudes, couplings, unit, equiv) = match formalism {
            Formalism::Helicity => {
                let mut amplitudes = Vec::new();
                let mut couplings = Vec::new();
                for two_m in projections(two_j) {
                    for two_l1 in projections(two_j1) {
                        for two_l2 in projections(two_j2) {
                            let two_lambda = two_l1 - two_l2;
                            if !consistent(two_j, two_lambda) || !consistent(two_s, two_lambda) {
                                continue;
                            }
                            if !matches!(
                                nonzero_coupling(two_j1, two_l1, two_j2, two_l2, l, two_s, two_j),
                                Ok(true)
                            ) {
                                continue;
                            }
                            couplings.push(couple(two_j1, two_l1, two_j2, two_l2, l, two_s, two_j)?);
                            amplitudes.push((two_m, [two_l1, two_l2]));
                        }
                    }
                }
                let unit = two_j == 0 && two_j1 == 0 && two_j2 == 0;
                (amplitudes, couplings, unit, Equiv::UpAndDown)
            }
            Formalism::Zemach => {
                if !(is_integer_spin(two_j) && is_integer_spin(two_j1) && is_integer_spin(two_j2)) {
                    return Err(SaplingError::Unsupported(
                        "the Zemach formalism needs integer spins".to_string(),
                    ));
                }
                let allowed = if two_j != 0 {
                    two_j1 == 0 && two_j2 == 0 && 2 * l == two_j
                } else {
                    (two_j1 == 0 || two_j2 == 0) && 2 * l == two_s && two_j1 + two_j2 == two_s
                };
                if !allowed {
                    return Err(SaplingError::Unsupported(format!(
                        "Zemach amplitude for {} -> {} + {} with L = {} and S = {}",
                        spin_to_string(two_j as i32),
                        spin_to_string(two_j1 as i32),
                        spin_to_string(two_j2 as i32),
                        l,
                        spin_to_string(two_s as i32)
                    )));
                }
                if two_s > 4 {
                    return Err(SaplingError::Unsupported(format!(
                        "Zemach amplitudes with S = {} > 2",
                        spin_to_string(two_s as i32)
                    )));
                }
                (vec![(0, [0, 0])], vec![1.0], two_s == 0, Equiv::Zemach)
            }
        };
        if amplitudes.is_empty() {
            return Err(SaplingError::AngularMomentumNotConserved {
                two_j1,
                two_j2,
                two_j,
            });
        }
        let name = format!(
            "{}({} -> {} + {}, L = {}, S = {})",
            formalism,
            spin_to_string(two_j as i32),
            spin_to_string(two_j1 as i32),
            spin_to_string(two_j2 as i32),
            l,
            spin_to_string(two_s as i32)
        );
        Ok(Self {
            formalism,
            two_j,
            two_j1,
            two_j2,
            l,
            two_s,
            accessor: DataAccessor::new(index, &name, equiv, amplitudes.len(), 2),
            amplitudes,
            couplings,
            unit,
        })
    }

    pub fn formalism(&self) -> Formalism {
        self.formalism
    }
    pub fn two_j(&self) -> u32 {
        self.two_j
    }
    pub fn two_daughter_spins(&self) -> [u32; 2] {
        [self.two_j1, self.two_j2]
    }
    pub fn l(&self) -> u32 {
        self.l
    }
    pub fn two_s(&self) -> u32 {
        self.two_s
    }
    /// The allowed `(two_M, [two_lambda_1, two_lambda_2])` combinations.
    pub fn amplitudes(&self) -> &[(i32, [i32; 2])] {
        &self.amplitudes
    }
    /// Returns `true` if every value is identically one.
    pub fn is_unit(&self) -> bool {
        self.unit
    }
    pub fn accessor(&self) -> &DataAccessor {
        &self.accessor
    }
    pub(crate) fn accessor_mut(&mut self) -> &mut DataAccessor {
        &mut self.accessor
    }

    /// Returns `true` if this amplitude describes the same vertex.
    pub fn same_quantum_numbers(
        &self,
        formalism: Formalism,
        two_j: u32,
        two_j1: u32,
        two_j2: u32,
        l: u32,
        two_s: u32,
    ) -> bool {
        self.formalism == formalism
            && self.two_j == two_j
            && self.two_j1 == two_j1
            && self.two_j2 == two_j2
            && self.l == l
            && self.two_s == two_s
    }

    /// Position of `(two_m, [two_l1, two_l2])` in [`SpinAmplitude::amplitudes`].
    pub fn amplitude_index(&self, two_m: i32, two_lambdas: [i32; 2]) -> Option<usize> {
        self.amplitudes
            .iter()
            .position(|(m, l)| *m == two_m && *l == two_lambdas)
    }

    /// $`D^{J*}_{M, \lambda_1 - \lambda_2}(\phi, \theta, 0)`$ times the coupling of entry `k`.
    pub fn helicity_value(&self, wigner: &WignerCache, k: usize, phi: f64, theta: f64) -> SaplingResult<Complex64> {
        let (two_m, [two_l1, two_l2]) = self.amplitudes[k];
        Ok(wigner
            .big_d(self.two_j, two_m, two_l1 - two_l2, phi, theta, 0.0)?
            .conj()
            * self.couplings[k])
    }

    /// The Zemach tensor contraction of the spectator momentum `p` and the resonance-daughter
    /// momentum `q`, both in the resonance rest frame.
    ///
    /// The rank-$`S`$ contraction is
    /// $`\frac{(-2)^S S!}{(2S-1)!!} (|p||q|)^S P_S(\cos\theta_{pq})`$, which is $`-2\,p\cdot q`$
    /// for $`S = 1`$ and $`4((p\cdot q)^2 - p^2 q^2/3)`$ for $`S = 2`$.
    pub fn zemach_value(&self, p: &Vec3, q: &Vec3) -> Complex64 {
        let rank = self.two_s / 2;
        let pq = (p.mag2() * q.mag2()).sqrt();
        let cos = if pq > 0.0 { p.dot(q) / pq } else { 0.0 };
        let (mut legendre, mut previous) = (1.0, 0.0);
        let mut norm = 1.0;
        for n in 0..rank {
            let nf = n as f64;
            let next = ((2.0 * nf + 1.0) * cos * legendre - nf * previous) / (nf + 1.0);
            previous = legendre;
            legendre = next;
            norm *= -2.0 * (nf + 1.0) / (2.0 * nf + 1.0) * pq;
        }
        Complex64::new(norm * legendre, 0.0)
    }

    /// Compute entry `k` for `pc` from the kinematics cached in `point`, ignoring the unit
    /// shortcut.
    pub fn compute(
        &self,
        model: &Model,
        point: &DataPoint,
        pc: &Arc<ParticleCombination>,
        k: usize,
    ) -> SaplingResult<Complex64> {
        match self.formalism {
            Formalism::Helicity => {
                let (phi, theta) = model.helicity_angles().angles(point, pc)?;
                self.helicity_value(model.wigner(), k, phi, theta)
            }
            Formalism::Zemach => {
                // two-body combinations carry no spectator; their rank-S factor sits on the parent
                if pc.indices().len() < 3 {
                    return Ok(Complex64::ONE);
                }
                if pc.indices().len() > 3 || pc.daughters().len() != 2 {
                    return Err(SaplingError::Unsupported(format!(
                        "Zemach amplitudes for the {}-body combination {}",
                        pc.indices().len(),
                        pc
                    )));
                }
                let (resonance, spectator) = if pc.daughters()[0].indices().len() > 1 {
                    (&pc.daughters()[0], &pc.daughters()[1])
                } else {
                    (&pc.daughters()[1], &pc.daughters()[0])
                };
                let four_momenta = model.four_momenta();
                let boost = rest_frame_boost(&four_momenta.p(point, resonance)?);
                let p = transform(&boost, &four_momenta.p(point, spectator)?).vec3();
                let q = transform(&boost, &four_momenta.p(point, &resonance.daughters()[0])?).vec3();
                Ok(self.zemach_value(&p, &q))
            }
        }
    }

    /// Fill the cache of `point` for every registered combination.
    pub fn calculate(&self, model: &Model, point: &mut DataPoint) -> SaplingResult<()> {
        if self.unit {
            return Ok(());
        }
        for (sym, pc) in self.accessor.representatives() {
            for k in 0..self.amplitudes.len() {
                let value = self.compute(model, point, pc, k)?;
                point.set_cscalar(&self.accessor, sym, k, value);
            }
        }
        Ok(())
    }

    /// Cached entry `k` for `pc`.
    pub fn value(&self, point: &DataPoint, pc: &Arc<ParticleCombination>, k: usize) -> SaplingResult<Complex64> {
        if self.unit {
            return Ok(Complex64::ONE);
        }
        let sym = self.accessor.symmetrization_index(pc)?;
        Ok(point.get_cscalar(&self.accessor, sym, k))
    }

    /// Compare the unit shortcut with the general computation on sampled kinematics.
    ///
    /// # Errors
    ///
    /// [`SaplingError::Custom`] if the amplitude is flagged unit but a sampled value differs
    /// from one.
    pub fn check_unit(&self, wigner: &WignerCache, rng: &mut fastrand::Rng) -> SaplingResult<()> {
        if !self.unit {
            return Ok(());
        }
        for _ in 0..32 {
            for k in 0..self.amplitudes.len() {
                let value = match self.formalism {
                    Formalism::Helicity => {
                        let phi = std::f64::consts::TAU * rng.f64() - std::f64::consts::PI;
                        let theta = std::f64::consts::PI * rng.f64();
                        self.helicity_value(wigner, k, phi, theta)?
                    }
                    Formalism::Zemach => {
                        let p = Vec3::new(rng.f64() - 0.5, rng.f64() - 0.5, rng.f64() - 0.5);
                        let q = Vec3::new(rng.f64() - 0.5, rng.f64() - 0.5, rng.f64() - 0.5);
                        self.zemach_value(&p, &q)
                    }
                };
                if (value - Complex64::ONE).norm() > 1e-12 {
                    let (two_m, [two_l1, two_l2]) = self.amplitudes[k];
                    return Err(SaplingError::Custom(format!(
                        "{} is flagged unit but evaluates to {} for {}",
                        self,
                        value,
                        clebsch_gordan::to_string(
                            self.two_j1,
                            two_l1,
                            self.two_j2,
                            -two_l2,
                            self.two_s,
                            two_m
                        )
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Display for SpinAmplitude {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.accessor.name())
    }
}
