use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

/// The spin formalism used to build spin amplitudes for every vertex of a model.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Formalism {
    /// Helicity amplitudes, built from Wigner $`D`$-functions of the helicity angles and the
    /// Clebsch-Gordan coefficients of the $`LS`$ coupling.
    Helicity,
    /// Zemach tensors, valid for integer spins up to 2 in three-body decays of a spinless
    /// particle.
    Zemach,
}

impl Display for Formalism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Formalism::Helicity => write!(f, "Helicity"),
            Formalism::Zemach => write!(f, "Zemach"),
        }
    }
}

impl FromStr for Formalism {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "helicity" | "hel" | "hx" => Ok(Self::Helicity),
            "zemach" | "zem" => Ok(Self::Zemach),
            _ => Err("Invalid formalism".to_string()),
        }
    }
}

/// Whether a decay channel conserves parity.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interaction {
    /// Parity is conserved: $`P = P_1 P_2 (-1)^L`$.
    Strong,
    /// Parity is not checked.
    Weak,
}

impl Display for Interaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Interaction::Strong => write!(f, "strong"),
            Interaction::Weak => write!(f, "weak"),
        }
    }
}
