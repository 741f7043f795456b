//! # sapling
//!
//! Partial-wave amplitudes built as trees of two-body decays. A [`Model`](crate::model::Model)
//! is declared from final-state particles and decay channels, locked, and then evaluated over
//! [`DataSet`](crate::data::DataSet)s whose per-event caches are only refreshed when a parameter
//! they depend on has changed.
#![warn(clippy::perf, clippy::style)]
#![allow(clippy::excessive_precision)]

use thiserror::Error;

/// Conversions between canonical, transversity and helicity amplitude bases.
pub mod amplitude_basis;
/// Cached data accessors: four-momenta, helicity angles and breakup momenta.
pub mod accessors;
/// Conversions between Cartesian and polar representations of complex numbers with covariances.
pub mod complex_basis;
/// Run configuration loaded from YAML.
pub mod config;
/// Data points, data sets and their partitions.
pub mod data;
/// Free amplitudes and the decay trees they multiply.
pub mod decay_tree;
/// Thread policies for partitioned evaluation.
pub mod execution;
/// Monte-Carlo integration of decay-tree amplitudes.
pub mod integral;
/// Negative log-likelihoods built on a [`Model`](crate::model::Model) and minimized with
/// [`ganesh`].
pub mod likelihoods;
/// `tracing` subscriber setup.
pub mod logging;
/// Resonance lineshapes and Blatt-Weisskopf barrier factors.
pub mod mass_shapes;
/// The decay model: particles, channels, locking and intensities.
pub mod model;
/// Fit parameters with change tracking.
pub mod parameters;
/// Particle combinations and the cache that uniques them.
pub mod particle_combination;
/// Quantum numbers, particles and the particle table.
pub mod particles;
/// Mass axes, kinematic ranges and the four-momentum solver.
pub mod phase_space;
/// Clebsch-Gordan coefficients, Wigner functions and spin amplitudes.
pub mod spin;
/// Calculation statuses of cached values.
pub mod status;
/// Vectors, Lorentz transformations and compensated sums.
pub mod utils;

#[cfg(test)]
pub(crate) mod test_models;

pub use crate::data::{DataPartition, DataPoint, DataSet};
pub use crate::decay_tree::{DecayTree, FreeAmplitude};
pub use crate::model::{Model, ModelComponent, ParticleId};
pub use crate::parameters::{ComplexParameter, RealParameter, VariableStatus};
pub use crate::particle_combination::{Equiv, ParticleCombination, ParticleCombinationCache};
pub use crate::particles::{DecayingParticle, FinalStateParticle, QuantumNumbers};
pub use crate::utils::enums::Formalism;
pub use crate::utils::vectors::{Vec3, Vec4};

/// Shorthand for results returned throughout `sapling`.
pub type SaplingResult<T> = Result<T, SaplingError>;

/// The error type used by all `sapling` methods
#[derive(Error, Debug)]
pub enum SaplingError {
    /// An alias for [`std::io::Error`].
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
    /// An alias for [`shellexpand::LookupError`].
    #[error("Failed to expand path: {0}")]
    LookupError(#[from] shellexpand::LookupError<std::env::VarError>),
    /// An alias for [`serde_yaml::Error`].
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
    /// An alias for [`bincode::Error`].
    #[error("Bincode error: {0}")]
    BincodeError(#[from] bincode::Error),
    /// An error type for [`rayon`] thread pools
    #[cfg(feature = "rayon")]
    #[error("Error building thread pool: {0}")]
    ThreadPoolError(#[from] rayon::ThreadPoolBuildError),
    /// An [`ExecutionContext`](crate::execution::ExecutionContext) cannot honor its thread
    /// policy.
    #[error("Execution context error: {reason}")]
    ExecutionContextError {
        /// Why the context could not be built
        reason: String,
    },
    /// A requested total spin lies outside the triangle of the coupled spins.
    #[error("angular momentum not conserved: {two_j1}/2 + {two_j2}/2 cannot couple to {two_j}/2")]
    AngularMomentumNotConserved {
        /// Twice the first spin
        two_j1: u32,
        /// Twice the second spin
        two_j2: u32,
        /// Twice the requested total spin
        two_j: u32,
    },
    /// A requested total projection differs from the sum of the coupled projections.
    #[error("inconsistent spin projection: {two_m1}/2 + {two_m2}/2 != {two_m}/2")]
    InconsistentSpinProjection {
        /// Twice the first projection
        two_m1: i32,
        /// Twice the second projection
        two_m2: i32,
        /// Twice the requested total projection
        two_m: i32,
    },
    /// A spin projection does not have the parity of its spin.
    #[error("spin projection {two_m}/2 is incompatible with spin {two_j}/2")]
    InvalidSpinProjection {
        /// Twice the spin
        two_j: u32,
        /// Twice the projection
        two_m: i32,
    },
    /// A strong decay channel violates parity conservation for every allowed L.
    #[error("parity not conserved in {channel}")]
    ParityNotConserved {
        /// Printable channel description
        channel: String,
    },
    /// The daughters' total charge differs from the parent's.
    #[error("charge not conserved in {channel} ({found} != {expected})")]
    ChargeNotConserved {
        /// Printable channel description
        channel: String,
        /// Parent charge
        expected: i32,
        /// Summed daughter charge
        found: i32,
    },
    /// Particle combinations cannot be built as requested.
    #[error("inconsistent particle combination: {0}")]
    InconsistentParticleCombination(String),
    /// An equivalence policy is not defined for the combinations given.
    #[error("equivalence undefined: {0}")]
    EquivalenceUndefined(String),
    /// A particle combination is not registered with a data accessor.
    #[error("no symmetrization index for particle combination {pc}")]
    SymmetrizationIndexNotFound {
        /// Printable particle combination
        pc: String,
    },
    /// A vertex with other than two daughters was given where a two-body vertex is needed.
    #[error("expected a two-body vertex, found {0} daughters")]
    NotTwoBody(usize),
    /// No four-momenta were supplied for a data point.
    #[error("empty four-momenta vector")]
    EmptyFourMomentaVector,
    /// The number of final-state objects does not match the model.
    #[error("final-state count mismatch (expected {expected}, found {found})")]
    FinalStateCountMismatch {
        /// Size of the model's final state
        expected: usize,
        /// Size supplied
        found: usize,
    },
    /// A structural change was requested after the model was locked.
    #[error("model is locked and cannot be modified")]
    ModelLocked,
    /// An operation that requires a locked model was requested before locking.
    #[error("model is not locked")]
    ModelNotLocked,
    /// Data created for one model was handed to another.
    #[error("data set belongs to model {found}, not model {expected}")]
    ModelMismatch {
        /// Id of the model asked to evaluate
        expected: u64,
        /// Id of the model the data was created for
        found: u64,
    },
    /// Two data sets with different layouts cannot be combined.
    #[error("inconsistent data sets: {0}")]
    InconsistentDataSets(String),
    /// A fixed parameter was written to.
    #[error("parameter is fixed and cannot be modified")]
    ParameterIsFixed,
    /// A particle lookup failed.
    #[error("no particle named \"{name}\"")]
    ParticleNotFound {
        /// Name or code looked up
        name: String,
    },
    /// A requested feature lies outside what is implemented.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// A custom fallback error for errors too complex or too infrequent to warrant their own error
    /// category.
    #[error("{0}")]
    Custom(String),
}

impl Clone for SaplingError {
    // foreign error types are rarely cloneable, but minimizers need to box and clone errors
    fn clone(&self) -> Self {
        SaplingError::Custom(self.to_string())
    }
}
