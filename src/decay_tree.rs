use std::{fmt::Display, sync::Arc};

use num::complex::Complex64;

use crate::{
    data::DataPoint,
    model::{ChannelId, Model},
    parameters::{ComplexParameter, ParameterBase, VariableStatus},
    particle_combination::ParticleCombination,
    utils::spin_to_string,
    SaplingResult,
};

/// The complex coefficient of one (channel, L, S) combination, shared by every
/// [`DecayTree`] built from it.
#[derive(Debug)]
pub struct FreeAmplitude {
    label: String,
    channel: ChannelId,
    spin_amplitude: usize,
    l: u32,
    two_s: u32,
    parameter: ComplexParameter,
}

impl FreeAmplitude {
    pub(crate) fn new(label: String, channel: ChannelId, spin_amplitude: usize, l: u32, two_s: u32) -> Self {
        Self {
            label,
            channel,
            spin_amplitude,
            l,
            two_s,
            parameter: ComplexParameter::new(Complex64::ONE),
        }
    }
    /// A name of the form `parent -> a + b (L = l, S = s)`.
    pub fn label(&self) -> &str {
        &self.label
    }
    pub fn channel(&self) -> ChannelId {
        self.channel
    }
    /// Index of the spin amplitude in [`Model::spin_amplitudes`].
    pub fn spin_amplitude(&self) -> usize {
        self.spin_amplitude
    }
    pub fn l(&self) -> u32 {
        self.l
    }
    pub fn two_s(&self) -> u32 {
        self.two_s
    }
    pub fn parameter(&self) -> &ComplexParameter {
        &self.parameter
    }
    pub fn value(&self) -> Complex64 {
        self.parameter.value()
    }
    pub fn set_value(&self, value: Complex64) -> SaplingResult<()> {
        self.parameter.set_value(value)
    }
}

impl Display for FreeAmplitude {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} = {}", self.label, self.value())
    }
}

/// One fully specified term of a decay amplitude.
///
/// A tree fixes the free amplitude of its top vertex, the parent spin projection, the daughter
/// helicities, and (for decaying daughters) the daughter trees they continue into. Its value
/// factorizes into a data-independent part (the product of all free amplitudes) and a
/// data-dependent part (spin amplitudes, lineshapes and barrier factors summed over the
/// symmetrizations of the top channel).
#[derive(Debug)]
pub struct DecayTree {
    free_amplitude: Arc<FreeAmplitude>,
    two_m: i32,
    two_daughter_helicities: [i32; 2],
    amplitude_index: usize,
    daughters: Vec<Option<Arc<DecayTree>>>,
    components: Vec<usize>,
}

impl DecayTree {
    pub(crate) fn new(
        free_amplitude: Arc<FreeAmplitude>,
        two_m: i32,
        two_daughter_helicities: [i32; 2],
        amplitude_index: usize,
        daughters: Vec<Option<Arc<DecayTree>>>,
        components: Vec<usize>,
    ) -> Self {
        Self {
            free_amplitude,
            two_m,
            two_daughter_helicities,
            amplitude_index,
            daughters,
            components,
        }
    }

    pub fn free_amplitude(&self) -> &Arc<FreeAmplitude> {
        &self.free_amplitude
    }
    pub fn channel(&self) -> ChannelId {
        self.free_amplitude.channel()
    }
    /// Twice the spin projection of the decaying particle.
    pub fn two_m(&self) -> i32 {
        self.two_m
    }
    pub fn two_daughter_helicities(&self) -> [i32; 2] {
        self.two_daughter_helicities
    }
    /// The tree continuing daughter `i`, if the daughter decays.
    pub fn daughter(&self, i: usize) -> Option<&Arc<DecayTree>> {
        self.daughters.get(i).and_then(|d| d.as_ref())
    }
    /// Indices of the lineshape and barrier-factor accessors at this vertex.
    pub fn components(&self) -> &[usize] {
        &self.components
    }
    /// Number of vertices along the deepest branch.
    pub fn depth(&self) -> usize {
        1 + self
            .daughters
            .iter()
            .flatten()
            .map(|d| d.depth())
            .max()
            .unwrap_or(0)
    }

    /// Every free amplitude of this tree, top vertex first.
    pub fn free_amplitudes(&self) -> Vec<Arc<FreeAmplitude>> {
        let mut out = vec![self.free_amplitude.clone()];
        for d in self.daughters.iter().flatten() {
            for fa in d.free_amplitudes() {
                if !out.iter().any(|o| Arc::ptr_eq(o, &fa)) {
                    out.push(fa);
                }
            }
        }
        out
    }

    /// Every recalculable accessor this tree reads, without duplicates.
    pub fn recalculables(&self) -> Vec<usize> {
        let mut out = self.components.clone();
        for d in self.daughters.iter().flatten() {
            for c in d.recalculables() {
                if !out.contains(&c) {
                    out.push(c);
                }
            }
        }
        out
    }

    /// Returns `true` if this tree contains `free_amplitude`.
    pub fn depends_on(&self, free_amplitude: &Arc<FreeAmplitude>) -> bool {
        Arc::ptr_eq(&self.free_amplitude, free_amplitude)
            || self.daughters.iter().flatten().any(|d| d.depends_on(free_amplitude))
    }

    /// The product of all free amplitudes.
    pub fn data_independent_amplitude(&self) -> Complex64 {
        self.daughters
            .iter()
            .flatten()
            .fold(self.free_amplitude.value(), |acc, d| acc * d.data_independent_amplitude())
    }

    /// The data-dependent factor for one particle combination, zero if the combination does not
    /// belong to this tree's channel.
    pub fn amplitude_at(&self, model: &Model, point: &DataPoint, pc: &Arc<ParticleCombination>) -> SaplingResult<Complex64> {
        if !model.channel(self.channel())?.contains(pc) {
            return Ok(Complex64::ZERO);
        }
        let spin_amplitude = model.spin_amplitude(self.free_amplitude.spin_amplitude())?;
        let mut a = spin_amplitude.value(point, pc, self.amplitude_index)?;
        for &c in &self.components {
            a *= model.recalculable(c).value(point, pc)?;
        }
        for (i, d) in self.daughters.iter().enumerate() {
            if let Some(d) = d {
                if a == Complex64::ZERO {
                    break;
                }
                a *= d.amplitude_at(model, point, &pc.daughters()[i])?;
            }
        }
        Ok(a)
    }

    /// The data-dependent factor summed over every combination of the top channel.
    pub fn data_dependent_amplitude(&self, model: &Model, point: &DataPoint) -> SaplingResult<Complex64> {
        let mut total = Complex64::ZERO;
        for pc in model.channel(self.channel())?.particle_combinations() {
            total += self.amplitude_at(model, point, pc)?;
        }
        Ok(total)
    }

    pub fn amplitude(&self, model: &Model, point: &DataPoint) -> SaplingResult<Complex64> {
        Ok(self.data_independent_amplitude() * self.data_dependent_amplitude(model, point)?)
    }

    /// [`VariableStatus::Changed`] if a lineshape or barrier-factor parameter anywhere in the
    /// tree has changed.
    pub fn data_dependent_status(&self, model: &Model) -> VariableStatus {
        if self
            .recalculables()
            .into_iter()
            .any(|c| model.recalculable(c).status() == VariableStatus::Changed)
        {
            VariableStatus::Changed
        } else {
            VariableStatus::Unchanged
        }
    }

    /// [`VariableStatus::Changed`] if any free amplitude of the tree has changed.
    pub fn data_independent_status(&self) -> VariableStatus {
        if self
            .free_amplitudes()
            .iter()
            .any(|fa| ParameterBase::variable_status(fa.parameter()) == VariableStatus::Changed)
        {
            VariableStatus::Changed
        } else {
            VariableStatus::Unchanged
        }
    }

    /// A multi-line description of the tree.
    pub fn to_string_indented(&self, indent: usize) -> String {
        let mut s = format!(
            "{:indent$}{} [M = {}, helicities = ({}, {})]",
            "",
            self.free_amplitude.label(),
            spin_to_string(self.two_m),
            spin_to_string(self.two_daughter_helicities[0]),
            spin_to_string(self.two_daughter_helicities[1]),
            indent = indent
        );
        for d in self.daughters.iter().flatten() {
            s.push('\n');
            s.push_str(&d.to_string_indented(indent + 2));
        }
        s
    }
}

impl Display for DecayTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_indented(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_tree(label: &str, two_m: i32) -> Arc<DecayTree> {
        let fa = Arc::new(FreeAmplitude::new(label.to_string(), ChannelId(1), 0, 1, 0));
        Arc::new(DecayTree::new(fa, two_m, [0, 0], 0, vec![None, None], vec![2]))
    }

    #[test]
    fn test_data_independent_amplitude() {
        let rho = leaf_tree("rho0 -> pi+ + pi- (L = 1, S = 0)", 0);
        rho.free_amplitude().set_value(Complex64::new(0.0, 2.0)).unwrap();
        let top_fa = Arc::new(FreeAmplitude::new("D+ -> rho0 + pi+ (L = 1, S = 1)".to_string(), ChannelId(0), 1, 1, 2));
        top_fa.set_value(Complex64::new(3.0, 0.0)).unwrap();
        let top = DecayTree::new(top_fa.clone(), 0, [0, 0], 0, vec![Some(rho.clone()), None], vec![3]);
        assert_eq!(top.data_independent_amplitude(), Complex64::new(0.0, 6.0));
        assert_eq!(top.depth(), 2);
        assert_eq!(top.free_amplitudes().len(), 2);
        assert_eq!(top.recalculables(), vec![3, 2]);
        assert!(top.depends_on(rho.free_amplitude()));
        assert!(top.daughter(0).is_some() && top.daughter(1).is_none());
        assert!(top.to_string().contains("\n  rho0"));
    }

    #[test]
    fn test_data_independent_status() {
        let tree = leaf_tree("X -> a + b (L = 1, S = 0)", 2);
        assert_eq!(tree.data_independent_status(), VariableStatus::Changed);
        tree.free_amplitude()
            .parameter()
            .set_variable_status(VariableStatus::Unchanged);
        assert_eq!(tree.data_independent_status(), VariableStatus::Unchanged);
        tree.free_amplitude().parameter().fix();
        assert_eq!(tree.data_independent_status(), VariableStatus::Unchanged);
        assert!(tree.free_amplitude().set_value(Complex64::ZERO).is_err());
    }
}
