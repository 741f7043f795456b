use std::{fmt::Display, path::Path, sync::Arc};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    mass_shapes::MassShape,
    model::ChannelId,
    parameters::RealParameter,
    particle_combination::ParticleCombination,
    utils::spin_to_string,
    SaplingError, SaplingResult,
};

/// Spin, parity and charge of a particle. Spins are stored doubled.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuantumNumbers {
    pub two_j: u32,
    /// Intrinsic parity, `+1` or `-1`
    pub parity: i8,
    pub charge: i32,
}

impl QuantumNumbers {
    pub fn new(two_j: u32, parity: i8, charge: i32) -> Self {
        Self {
            two_j,
            parity,
            charge,
        }
    }
}

impl Display for QuantumNumbers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{} (Q = {})",
            spin_to_string(self.two_j as i32),
            if self.parity < 0 { "-" } else { "+" },
            self.charge
        )
    }
}

/// A stable particle observed in the final state.
#[derive(Debug, Clone)]
pub struct FinalStateParticle {
    name: String,
    quantum_numbers: QuantumNumbers,
    mass: f64,
    pub(crate) particle_combinations: Vec<Arc<ParticleCombination>>,
}

impl FinalStateParticle {
    pub fn new(name: &str, quantum_numbers: QuantumNumbers, mass: f64) -> Self {
        Self {
            name: name.to_string(),
            quantum_numbers,
            mass,
            particle_combinations: Vec::new(),
        }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn quantum_numbers(&self) -> QuantumNumbers {
        self.quantum_numbers
    }
    pub fn mass(&self) -> f64 {
        self.mass
    }
    /// The final-state leaves this particle occupies in its model.
    pub fn particle_combinations(&self) -> &[Arc<ParticleCombination>] {
        &self.particle_combinations
    }
}

/// A particle that decays through one or more two-body channels.
#[derive(Debug, Clone)]
pub struct DecayingParticle {
    name: String,
    quantum_numbers: QuantumNumbers,
    mass: Arc<RealParameter>,
    radial_size: Arc<RealParameter>,
    mass_shape: Option<MassShape>,
    pub(crate) channels: Vec<ChannelId>,
}

impl DecayingParticle {
    pub fn new(name: &str, quantum_numbers: QuantumNumbers, mass: f64, radial_size: f64) -> Self {
        Self {
            name: name.to_string(),
            quantum_numbers,
            mass: Arc::new(RealParameter::new(mass)),
            radial_size: Arc::new(RealParameter::new(radial_size)),
            mass_shape: None,
            channels: Vec::new(),
        }
    }
    /// Attach a lineshape. A lineshape with its own mass parameter becomes the particle's mass.
    pub fn with_mass_shape(mut self, shape: MassShape) -> Self {
        if let Some(mass) = shape.mass() {
            self.mass = mass.clone();
        }
        self.mass_shape = Some(shape);
        self
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn quantum_numbers(&self) -> QuantumNumbers {
        self.quantum_numbers
    }
    pub fn mass(&self) -> &Arc<RealParameter> {
        &self.mass
    }
    pub fn radial_size(&self) -> &Arc<RealParameter> {
        &self.radial_size
    }
    pub fn mass_shape(&self) -> Option<&MassShape> {
        self.mass_shape.as_ref()
    }
    pub fn channels(&self) -> &[ChannelId] {
        &self.channels
    }
}

/// Either kind of particle held by a [`Model`](crate::model::Model).
#[derive(Debug, Clone)]
pub enum Particle {
    Final(FinalStateParticle),
    Decaying(DecayingParticle),
}

impl Particle {
    pub fn name(&self) -> &str {
        match self {
            Particle::Final(p) => p.name(),
            Particle::Decaying(p) => p.name(),
        }
    }
    pub fn quantum_numbers(&self) -> QuantumNumbers {
        match self {
            Particle::Final(p) => p.quantum_numbers(),
            Particle::Decaying(p) => p.quantum_numbers(),
        }
    }
    /// The nominal mass.
    pub fn mass(&self) -> f64 {
        match self {
            Particle::Final(p) => p.mass(),
            Particle::Decaying(p) => p.mass().value(),
        }
    }
    pub fn as_final(&self) -> Option<&FinalStateParticle> {
        match self {
            Particle::Final(p) => Some(p),
            Particle::Decaying(_) => None,
        }
    }
    pub fn as_decaying(&self) -> Option<&DecayingParticle> {
        match self {
            Particle::Decaying(p) => Some(p),
            Particle::Final(_) => None,
        }
    }
}

impl From<FinalStateParticle> for Particle {
    fn from(p: FinalStateParticle) -> Self {
        Particle::Final(p)
    }
}

impl From<DecayingParticle> for Particle {
    fn from(p: DecayingParticle) -> Self {
        Particle::Decaying(p)
    }
}

/// One row of a [`ParticleTable`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticleTableEntry {
    pub name: String,
    /// PDG code
    pub code: i64,
    pub mass: f64,
    #[serde(default)]
    pub width: f64,
    pub two_j: u32,
    pub parity: i8,
    pub charge: i32,
}

impl ParticleTableEntry {
    pub fn quantum_numbers(&self) -> QuantumNumbers {
        QuantumNumbers::new(self.two_j, self.parity, self.charge)
    }
}

/// Particle properties looked up by name or PDG code.
#[derive(Clone, Debug, Default)]
pub struct ParticleTable {
    entries: IndexMap<String, ParticleTableEntry>,
    codes: IndexMap<i64, String>,
}

impl ParticleTable {
    /// Add (or replace) an entry.
    pub fn insert(&mut self, entry: ParticleTableEntry) {
        self.codes.insert(entry.code, entry.name.clone());
        self.entries.insert(entry.name.clone(), entry);
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// # Errors
    ///
    /// [`SaplingError::ParticleNotFound`] if no entry is named `name`.
    pub fn get(&self, name: &str) -> SaplingResult<&ParticleTableEntry> {
        self.entries.get(name).ok_or_else(|| SaplingError::ParticleNotFound {
            name: name.to_string(),
        })
    }
    pub fn get_by_code(&self, code: i64) -> SaplingResult<&ParticleTableEntry> {
        self.codes
            .get(&code)
            .and_then(|name| self.entries.get(name))
            .ok_or_else(|| SaplingError::ParticleNotFound {
                name: code.to_string(),
            })
    }

    pub fn final_state_particle(&self, name: &str) -> SaplingResult<FinalStateParticle> {
        let entry = self.get(name)?;
        Ok(FinalStateParticle::new(&entry.name, entry.quantum_numbers(), entry.mass))
    }
    /// A decaying particle without a lineshape.
    pub fn decaying_particle(&self, name: &str, radial_size: f64) -> SaplingResult<DecayingParticle> {
        let entry = self.get(name)?;
        Ok(DecayingParticle::new(
            &entry.name,
            entry.quantum_numbers(),
            entry.mass,
            radial_size,
        ))
    }
    /// A decaying particle with a mass-dependent Breit-Wigner built from the table's mass and
    /// width.
    pub fn resonance(&self, name: &str, radial_size: f64) -> SaplingResult<DecayingParticle> {
        let entry = self.get(name)?;
        Ok(self
            .decaying_particle(name, radial_size)?
            .with_mass_shape(MassShape::breit_wigner(entry.mass, entry.width)))
    }

    /// Read a YAML list of [`ParticleTableEntry`]s.
    pub fn from_yaml_str(yaml: &str) -> SaplingResult<Self> {
        let entries: Vec<ParticleTableEntry> = serde_yaml::from_str(yaml)?;
        let mut table = Self::default();
        for entry in entries {
            table.insert(entry);
        }
        Ok(table)
    }
    /// Read a YAML particle table from a file. The path may contain `~` and environment
    /// variables.
    pub fn from_file<P: AsRef<Path>>(path: P) -> SaplingResult<Self> {
        let path = shellexpand::full(&path.as_ref().to_string_lossy())?.into_owned();
        Self::from_yaml_str(&std::fs::read_to_string(path)?)
    }
    pub fn to_yaml_string(&self) -> SaplingResult<String> {
        let entries: Vec<&ParticleTableEntry> = self.entries.values().collect();
        Ok(serde_yaml::to_string(&entries)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = r#"
- name: pi+
  code: 211
  mass: 0.13957
  two_j: 0
  parity: -1
  charge: 1
- name: rho0
  code: 113
  mass: 0.7755
  width: 0.1494
  two_j: 2
  parity: -1
  charge: 0
"#;

    #[test]
    fn test_table_lookup() {
        let table = ParticleTable::from_yaml_str(TABLE).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get_by_code(113).unwrap().name, "rho0");
        assert_eq!(table.get("pi+").unwrap().width, 0.0);
        assert!(matches!(
            table.get("K+"),
            Err(SaplingError::ParticleNotFound { .. })
        ));
        assert!(table.get_by_code(321).is_err());
        let rho = table.resonance("rho0", 3.0).unwrap();
        assert_eq!(rho.quantum_numbers(), QuantumNumbers::new(2, -1, 0));
        assert_eq!(rho.mass().value(), 0.7755);
        assert!(Arc::ptr_eq(rho.mass(), rho.mass_shape().unwrap().mass().unwrap()));
        let round_trip = ParticleTable::from_yaml_str(&table.to_yaml_string().unwrap()).unwrap();
        assert_eq!(round_trip.get("rho0").unwrap(), table.get("rho0").unwrap());
    }

    #[test]
    fn test_quantum_number_display() {
        assert_eq!(QuantumNumbers::new(2, -1, 0).to_string(), "1- (Q = 0)");
        assert_eq!(QuantumNumbers::new(1, 1, 1).to_string(), "1/2+ (Q = 1)");
    }
}
