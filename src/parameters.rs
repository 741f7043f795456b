use std::{fmt::Debug, sync::Arc};

use num::complex::Complex64;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{SaplingError, SaplingResult};

/// The change-tracking state of a parameter.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableStatus {
    /// Held constant; writes are rejected.
    Fixed,
    /// Written since the last sweep.
    Changed,
    /// Not written since the last sweep.
    Unchanged,
}

impl std::fmt::Display for VariableStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VariableStatus::Fixed => write!(f, "fixed"),
            VariableStatus::Changed => write!(f, "changed"),
            VariableStatus::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// A fit parameter whose value may be read from many threads during evaluation and written
/// between evaluations.
///
/// A new parameter starts out [`VariableStatus::Changed`] so that everything depending on it is
/// computed on first use.
#[derive(Debug)]
pub struct Parameter<T> {
    state: RwLock<(T, VariableStatus)>,
}

/// A real-valued [`Parameter`].
pub type RealParameter = Parameter<f64>;
/// A complex-valued [`Parameter`].
pub type ComplexParameter = Parameter<Complex64>;

impl<T: Copy + PartialEq> Parameter<T> {
    pub fn new(value: T) -> Self {
        Self {
            state: RwLock::new((value, VariableStatus::Changed)),
        }
    }
    pub fn value(&self) -> T {
        self.state.read().0
    }
    pub fn variable_status(&self) -> VariableStatus {
        self.state.read().1
    }
    pub fn is_fixed(&self) -> bool {
        self.variable_status() == VariableStatus::Fixed
    }

    /// Write a new value, flagging the parameter [`VariableStatus::Changed`] if it differs.
    ///
    /// # Errors
    ///
    /// [`SaplingError::ParameterIsFixed`] if the parameter is fixed.
    pub fn set_value(&self, value: T) -> SaplingResult<()> {
        let mut state = self.state.write();
        if state.1 == VariableStatus::Fixed {
            return Err(SaplingError::ParameterIsFixed);
        }
        if state.0 != value {
            state.0 = value;
            state.1 = VariableStatus::Changed;
        }
        Ok(())
    }

    /// Set the status of a free parameter. Fixed parameters keep their status; use
    /// [`Parameter::unfix`] to release them.
    pub fn set_variable_status(&self, status: VariableStatus) {
        let mut state = self.state.write();
        if state.1 != VariableStatus::Fixed {
            state.1 = status;
        }
    }
    pub fn fix(&self) {
        self.state.write().1 = VariableStatus::Fixed;
    }
    /// Release a fixed parameter; it is flagged [`VariableStatus::Changed`].
    pub fn unfix(&self) {
        let mut state = self.state.write();
        if state.1 == VariableStatus::Fixed {
            state.1 = VariableStatus::Changed;
        }
    }
}

/// Shorthand for a shared real parameter.
pub fn real(value: f64) -> Arc<RealParameter> {
    Arc::new(RealParameter::new(value))
}

/// Shorthand for a shared complex parameter.
pub fn complex(value: Complex64) -> Arc<ComplexParameter> {
    Arc::new(ComplexParameter::new(value))
}

/// Object-safe view of a parameter used for status sweeps.
pub trait ParameterBase: Send + Sync + Debug {
    fn variable_status(&self) -> VariableStatus;
    fn set_variable_status(&self, status: VariableStatus);
    /// Number of real degrees of freedom.
    fn size(&self) -> usize;
}

impl ParameterBase for RealParameter {
    fn variable_status(&self) -> VariableStatus {
        Parameter::variable_status(self)
    }
    fn set_variable_status(&self, status: VariableStatus) {
        Parameter::set_variable_status(self, status)
    }
    fn size(&self) -> usize {
        1
    }
}

impl ParameterBase for ComplexParameter {
    fn variable_status(&self) -> VariableStatus {
        Parameter::variable_status(self)
    }
    fn set_variable_status(&self, status: VariableStatus) {
        Parameter::set_variable_status(self, status)
    }
    fn size(&self) -> usize {
        2
    }
}

/// [`VariableStatus::Changed`] if any of `parameters` has changed.
pub fn combined_status<'a, I>(parameters: I) -> VariableStatus
where
    I: IntoIterator<Item = &'a dyn ParameterBase>,
{
    if parameters
        .into_iter()
        .any(|p| p.variable_status() == VariableStatus::Changed)
    {
        VariableStatus::Changed
    } else {
        VariableStatus::Unchanged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        let p = RealParameter::new(1.0);
        assert_eq!(p.variable_status(), VariableStatus::Changed);
        p.set_variable_status(VariableStatus::Unchanged);
        p.set_value(1.0).unwrap();
        assert_eq!(p.variable_status(), VariableStatus::Unchanged);
        p.set_value(2.0).unwrap();
        assert_eq!(p.variable_status(), VariableStatus::Changed);
        assert_eq!(p.value(), 2.0);
    }

    #[test]
    fn test_fixed_parameter() {
        let p = ComplexParameter::new(Complex64::new(1.0, 0.5));
        p.fix();
        assert!(p.is_fixed());
        assert!(matches!(
            p.set_value(Complex64::ONE),
            Err(SaplingError::ParameterIsFixed)
        ));
        p.set_variable_status(VariableStatus::Unchanged);
        assert!(p.is_fixed());
        p.unfix();
        assert_eq!(p.variable_status(), VariableStatus::Changed);
        assert_eq!(ParameterBase::size(&p), 2);
    }

    #[test]
    fn test_combined_status() {
        let a = real(1.0);
        let b = complex(Complex64::ZERO);
        a.set_variable_status(VariableStatus::Unchanged);
        b.set_variable_status(VariableStatus::Unchanged);
        let list: Vec<&dyn ParameterBase> = vec![a.as_ref(), b.as_ref()];
        assert_eq!(combined_status(list.iter().copied()), VariableStatus::Unchanged);
        a.set_value(3.0).unwrap();
        assert_eq!(combined_status(list.iter().copied()), VariableStatus::Changed);
    }
}
