/// Spin amplitudes in the helicity and Zemach formalisms.
pub mod amplitudes;
/// Clebsch-Gordan coefficients.
pub mod clebsch_gordan;
/// Wigner $`d`$- and $`D`$-functions.
pub mod wigner;

pub use amplitudes::SpinAmplitude;
pub use wigner::WignerCache;
