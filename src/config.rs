use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    execution::{ExecutionContext, ThreadPolicy},
    model::Model,
    phase_space::PhspGenerator,
    SaplingError, SaplingResult,
};

/// Settings for evaluating, integrating and fitting a model.
///
/// Every field has a default, so a document only needs the fields it changes:
///
/// ```yaml
/// threads: !Dedicated 4
/// partitions: 8
/// seed: 1234
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SaplingConfig {
    /// Where partitions are evaluated.
    pub threads: ThreadPolicy,
    /// Partitions per data set.
    pub partitions: usize,
    /// Seed of the phase-space generator.
    pub seed: u64,
    /// Samples the phase-space generator may reject in a row before giving up.
    pub max_attempts: usize,
    /// Points per batch of generated integration points.
    pub integration_batch: usize,
    /// Subtracted from every log intensity in likelihood sums.
    pub pedestal: f64,
}

impl Default for SaplingConfig {
    fn default() -> Self {
        Self {
            threads: ThreadPolicy::Single,
            partitions: 1,
            seed: 0,
            max_attempts: 10_000,
            integration_batch: 10_000,
            pedestal: 0.0,
        }
    }
}

impl SaplingConfig {
    /// # Errors
    ///
    /// [`SaplingError::YamlError`] for malformed documents and [`SaplingError::Custom`] for
    /// invalid values.
    pub fn from_yaml_str(yaml: &str) -> SaplingResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a configuration file. The path may contain `~` and environment variables.
    pub fn from_file<P: AsRef<Path>>(path: P) -> SaplingResult<Self> {
        let path = shellexpand::full(&path.as_ref().to_string_lossy())?.into_owned();
        debug!("reading configuration from {}", path);
        Self::from_yaml_str(&std::fs::read_to_string(path)?)
    }

    pub fn to_yaml_string(&self) -> SaplingResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    fn validate(&self) -> SaplingResult<()> {
        if self.partitions == 0 {
            return Err(SaplingError::Custom("partitions must be at least 1".to_string()));
        }
        if self.max_attempts == 0 || self.integration_batch == 0 {
            return Err(SaplingError::Custom(
                "max_attempts and integration_batch must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// An [`ExecutionContext`] for the configured thread policy.
    pub fn execution_context(&self) -> SaplingResult<ExecutionContext> {
        ExecutionContext::new(self.threads)
    }

    /// A phase-space generator for the first initial state of `model` along its default mass
    /// axes.
    ///
    /// # Errors
    ///
    /// [`SaplingError::ModelNotLocked`] before locking, and the errors of
    /// [`Model::default_mass_axes`] and [`PhspGenerator::new`].
    pub fn phase_space_generator(&self, model: &Model) -> SaplingResult<PhspGenerator> {
        if !model.is_locked() {
            return Err(SaplingError::ModelNotLocked);
        }
        let isp = *model
            .initial_states()
            .first()
            .ok_or(SaplingError::ModelNotLocked)?;
        PhspGenerator::new(
            model.particle(isp)?.mass(),
            model.final_state_masses(),
            model.default_mass_axes()?,
            self.seed,
            self.max_attempts,
        )
    }
}
