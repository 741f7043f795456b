use std::sync::Arc;

use num::complex::Complex64;

use crate::{
    accessors::{DataAccessor, RecalculableAccessor},
    data::DataPoint,
    model::Model,
    parameters::{ComplexParameter, ParameterBase, RealParameter},
    particle_combination::{Equiv, ParticleCombination},
    SaplingError, SaplingResult,
};

/// The squared breakup momentum of a two-body state with invariant mass squared `s` decaying to
/// masses `ma` and `mb`.
pub fn breakup_momentum_squared(s: f64, ma: f64, mb: f64) -> f64 {
    if ma == mb {
        return s / 4.0 - ma * ma;
    }
    (s - (ma + mb).powi(2)) * (s - (ma - mb).powi(2)) / (4.0 * s)
}

/// The squared Blatt-Weisskopf barrier factor $`B_L^2(z)`$ with $`z = q^2 r^2`$.
///
/// # Errors
///
/// [`SaplingError::Unsupported`] for $`L > 2`$.
pub fn squared_barrier_factor(l: u32, z: f64) -> SaplingResult<f64> {
    match l {
        0 => Ok(1.0),
        1 => Ok(2.0 * z / (1.0 + z)),
        2 => Ok(13.0 * z * z / (9.0 + 3.0 * z + z * z)),
        _ => Err(SaplingError::Unsupported(format!(
            "Blatt-Weisskopf barrier factors for L = {} > 2",
            l
        ))),
    }
}

/// The Blatt-Weisskopf barrier factor $`B_L(z)`$.
pub fn barrier_factor(l: u32, z: f64) -> SaplingResult<f64> {
    Ok(squared_barrier_factor(l, z)?.sqrt())
}

/// One decay channel of a [`MassShape::Flatte`] lineshape.
#[derive(Debug, Clone)]
pub struct FlatteChannel {
    pub coupling: Arc<RealParameter>,
    /// Mass of the (equal-mass) daughters of the channel
    pub mass: Arc<RealParameter>,
}

/// Resonance lineshapes.
#[derive(Debug, Clone)]
pub enum MassShape {
    /// $`T = m\Gamma / (m^2 - s - i m \Gamma)`$
    ConstantWidthBreitWigner {
        mass: Arc<RealParameter>,
        width: Arc<RealParameter>,
    },
    /// A relativistic Breit-Wigner whose width runs with the breakup momentum:
    /// $`\Gamma(s) = \Gamma_0 (m_0/\sqrt{s}) (q/q_0) (B_L(q)/B_L(q_0))^2`$.
    BreitWigner {
        mass: Arc<RealParameter>,
        width: Arc<RealParameter>,
    },
    /// $`T = 1/(M^2 - s - \sum_i \sqrt{4 m_i^2 g_i^2 / s - g_i^2})`$ with a complex square
    /// root.
    Flatte {
        mass: Arc<RealParameter>,
        channels: Vec<FlatteChannel>,
    },
    /// $`T = 1/(M_c^2 - s)`$ for a complex pole position $`M_c`$.
    PoleMass { pole: Arc<ComplexParameter> },
}

impl MassShape {
    pub fn constant_width_breit_wigner(mass: f64, width: f64) -> Self {
        Self::ConstantWidthBreitWigner {
            mass: Arc::new(RealParameter::new(mass)),
            width: Arc::new(RealParameter::new(width)),
        }
    }
    pub fn breit_wigner(mass: f64, width: f64) -> Self {
        Self::BreitWigner {
            mass: Arc::new(RealParameter::new(mass)),
            width: Arc::new(RealParameter::new(width)),
        }
    }
    /// A Flatté lineshape without channels; add them with [`MassShape::with_channel`].
    pub fn flatte(mass: f64) -> Self {
        Self::Flatte {
            mass: Arc::new(RealParameter::new(mass)),
            channels: Vec::new(),
        }
    }
    /// Add a channel to a Flatté lineshape. Other lineshapes are returned unchanged.
    pub fn with_channel(mut self, coupling: f64, mass: f64) -> Self {
        if let Self::Flatte { channels, .. } = &mut self {
            channels.push(FlatteChannel {
                coupling: Arc::new(RealParameter::new(coupling)),
                mass: Arc::new(RealParameter::new(mass)),
            });
        }
        self
    }
    pub fn pole_mass(pole: Complex64) -> Self {
        Self::PoleMass {
            pole: Arc::new(ComplexParameter::new(pole)),
        }
    }

    /// The real mass parameter, if the lineshape has one.
    pub fn mass(&self) -> Option<&Arc<RealParameter>> {
        match self {
            Self::ConstantWidthBreitWigner { mass, .. }
            | Self::BreitWigner { mass, .. }
            | Self::Flatte { mass, .. } => Some(mass),
            Self::PoleMass { .. } => None,
        }
    }

    pub fn parameters(&self) -> Vec<&dyn ParameterBase> {
        match self {
            Self::ConstantWidthBreitWigner { mass, width } | Self::BreitWigner { mass, width } => {
                vec![mass.as_ref() as &dyn ParameterBase, width.as_ref()]
            }
            Self::Flatte { mass, channels } => {
                let mut parameters: Vec<&dyn ParameterBase> = vec![mass.as_ref()];
                for c in channels {
                    parameters.push(c.coupling.as_ref());
                    parameters.push(c.mass.as_ref());
                }
                parameters
            }
            Self::PoleMass { pole } => vec![pole.as_ref() as &dyn ParameterBase],
        }
    }

    /// Returns `true` if the lineshape needs the measured daughter masses.
    pub fn needs_daughter_masses(&self) -> bool {
        matches!(self, Self::BreitWigner { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ConstantWidthBreitWigner { .. } => "ConstantWidthBreitWigner",
            Self::BreitWigner { .. } => "BreitWigner",
            Self::Flatte { .. } => "Flatte",
            Self::PoleMass { .. } => "PoleMass",
        }
    }

    /// The lineshape at invariant mass squared `s`.
    ///
    /// `daughter_masses` and `l` only enter the mass-dependent Breit-Wigner, with `radial_size`
    /// used for its barrier factors.
    pub fn amplitude(
        &self,
        s: f64,
        daughter_masses: (f64, f64),
        l: u32,
        radial_size: f64,
    ) -> SaplingResult<Complex64> {
        match self {
            Self::ConstantWidthBreitWigner { mass, width } => {
                let m = mass.value();
                let m_gamma = m * width.value();
                Ok(m_gamma / Complex64::new(m * m - s, -m_gamma))
            }
            Self::BreitWigner { mass, width } => {
                let m0 = mass.value();
                let (ma, mb) = daughter_masses;
                let q02 = breakup_momentum_squared(m0 * m0, ma, mb);
                if q02 <= 0.0 {
                    return Err(SaplingError::Custom(format!(
                        "nominal mass {} lies below the threshold {}",
                        m0,
                        ma + mb
                    )));
                }
                let q2 = breakup_momentum_squared(s, ma, mb).max(0.0);
                let r2 = radial_size * radial_size;
                let b2 = squared_barrier_factor(l, q2 * r2)?;
                let b02 = squared_barrier_factor(l, q02 * r2)?;
                let barrier_ratio = if l == 0 { 1.0 } else { b2 / b02 };
                let gamma = width.value() * (m0 / s.sqrt()) * (q2 / q02).sqrt() * barrier_ratio;
                let m_gamma = m0 * gamma;
                Ok(m_gamma / Complex64::new(m0 * m0 - s, -m_gamma))
            }
            Self::Flatte { mass, channels } => {
                let m = mass.value();
                let width_term: Complex64 = channels
                    .iter()
                    .map(|c| {
                        let g2 = c.coupling.value().powi(2);
                        let mi2 = c.mass.value().powi(2);
                        Complex64::new(4.0 * mi2 * g2 / s - g2, 0.0).sqrt()
                    })
                    .sum();
                Ok(1.0 / (Complex64::new(m * m - s, 0.0) - width_term))
            }
            Self::PoleMass { pole } => {
                let pole = pole.value();
                Ok(1.0 / (pole * pole - s))
            }
        }
    }
}

/// The cached lineshape of one decaying particle.
#[derive(Debug)]
pub struct MassShapeAccessor {
    particle: String,
    shape: MassShape,
    l: u32,
    radial_size: Arc<RealParameter>,
    accessor: DataAccessor,
}

impl MassShapeAccessor {
    pub fn new(index: usize, particle: &str, shape: MassShape, l: u32, radial_size: Arc<RealParameter>) -> Self {
        Self {
            particle: particle.to_string(),
            accessor: DataAccessor::new(
                index,
                &format!("{}({})", shape.name(), particle),
                Equiv::DownByOrderlessContent,
                1,
                2,
            ),
            shape,
            l,
            radial_size,
        }
    }
    pub fn shape(&self) -> &MassShape {
        &self.shape
    }
}

impl RecalculableAccessor for MassShapeAccessor {
    fn accessor(&self) -> &DataAccessor {
        &self.accessor
    }
    fn accessor_mut(&mut self) -> &mut DataAccessor {
        &mut self.accessor
    }
    fn label(&self) -> String {
        format!("{}({})", self.shape.name(), self.particle)
    }
    fn parameters(&self) -> Vec<&dyn ParameterBase> {
        let mut parameters = self.shape.parameters();
        if self.shape.needs_daughter_masses() {
            parameters.push(self.radial_size.as_ref());
        }
        parameters
    }
    fn evaluate(&self, model: &Model, point: &DataPoint, pc: &Arc<ParticleCombination>) -> SaplingResult<Complex64> {
        let four_momenta = model.four_momenta();
        let s = four_momenta.m2(point, pc)?;
        let daughter_masses = if self.shape.needs_daughter_masses() {
            if pc.daughters().len() != 2 {
                return Err(SaplingError::NotTwoBody(pc.daughters().len()));
            }
            (
                four_momenta.m(point, &pc.daughters()[0])?,
                four_momenta.m(point, &pc.daughters()[1])?,
            )
        } else {
            (0.0, 0.0)
        };
        self.shape
            .amplitude(s, daughter_masses, self.l, self.radial_size.value())
    }
}

/// The cached Blatt-Weisskopf barrier factor of one decaying particle and orbital angular
/// momentum.
#[derive(Debug)]
pub struct BlattWeisskopf {
    particle: String,
    l: u32,
    radial_size: Arc<RealParameter>,
    accessor: DataAccessor,
}

impl BlattWeisskopf {
    /// # Errors
    ///
    /// [`SaplingError::Unsupported`] for $`L > 2`$.
    pub fn new(index: usize, particle: &str, l: u32, radial_size: Arc<RealParameter>) -> SaplingResult<Self> {
        squared_barrier_factor(l, 0.0)?;
        Ok(Self {
            particle: particle.to_string(),
            l,
            radial_size,
            accessor: DataAccessor::new(
                index,
                &format!("BlattWeisskopf({}, L = {})", particle, l),
                Equiv::DownByOrderlessContent,
                1,
                2,
            ),
        })
    }
    pub fn l(&self) -> u32 {
        self.l
    }
    pub fn particle(&self) -> &str {
        &self.particle
    }
}

impl RecalculableAccessor for BlattWeisskopf {
    fn accessor(&self) -> &DataAccessor {
        &self.accessor
    }
    fn accessor_mut(&mut self) -> &mut DataAccessor {
        &mut self.accessor
    }
    fn label(&self) -> String {
        format!("BlattWeisskopf({}, L = {})", self.particle, self.l)
    }
    fn parameters(&self) -> Vec<&dyn ParameterBase> {
        vec![self.radial_size.as_ref() as &dyn ParameterBase]
    }
    fn evaluate(&self, model: &Model, point: &DataPoint, pc: &Arc<ParticleCombination>) -> SaplingResult<Complex64> {
        let q2 = model.breakup_momenta().q2(point, pc)?;
        let r = self.radial_size.value();
        Ok(Complex64::new(barrier_factor(self.l, q2 * r * r)?, 0.0))
    }
}
