use std::{
    fmt::Display,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use accurate::{sum::Klein, traits::*};
use indexmap::IndexMap;
use num::complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    accessors::{FourMomenta, HelicityAngles, MeasuredBreakupMomenta, RecalculableAccessor},
    data::{DataPartition, DataPoint, DataSet},
    decay_tree::{DecayTree, FreeAmplitude},
    execution::ExecutionContext,
    mass_shapes::{BlattWeisskopf, MassShapeAccessor},
    parameters::{ParameterBase, RealParameter, VariableStatus},
    particle_combination::{equal_down, ParticleCombination, ParticleCombinationCache},
    particles::{DecayingParticle, FinalStateParticle, Particle},
    phase_space::MassAxes,
    spin::{SpinAmplitude, WignerCache},
    utils::{
        enums::{Formalism, Interaction},
        geometry::CoordinateSystem,
        pow_neg_one, spin_to_string,
        vectors::Vec4,
    },
    SaplingError, SaplingResult,
};

static NEXT_MODEL_ID: AtomicU64 = AtomicU64::new(1);

/// Index of a particle within its [`Model`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticleId(pub(crate) usize);

impl ParticleId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Index of a decay channel within its [`Model`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub(crate) usize);

impl ChannelId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A two-body decay of a parent particle and every particle combination it can be realized by.
#[derive(Debug)]
pub struct DecayChannel {
    parent: ParticleId,
    daughters: [ParticleId; 2],
    interaction: Interaction,
    particle_combinations: Vec<Arc<ParticleCombination>>,
    free_amplitudes: Vec<Arc<FreeAmplitude>>,
    label: String,
}

impl DecayChannel {
    pub fn parent(&self) -> ParticleId {
        self.parent
    }
    pub fn daughters(&self) -> [ParticleId; 2] {
        self.daughters
    }
    pub fn interaction(&self) -> Interaction {
        self.interaction
    }
    /// The parentless combinations of this channel.
    pub fn particle_combinations(&self) -> &[Arc<ParticleCombination>] {
        &self.particle_combinations
    }
    /// One free amplitude per allowed (L, S) pair.
    pub fn free_amplitudes(&self) -> &[Arc<FreeAmplitude>] {
        &self.free_amplitudes
    }
    /// `parent -> a + b`
    pub fn label(&self) -> &str {
        &self.label
    }
    /// Returns `true` if `pc` (parented or not) has the structure of one of this channel's
    /// combinations.
    pub fn contains(&self, pc: &ParticleCombination) -> bool {
        self.particle_combinations.iter().any(|c| equal_down(c, pc))
    }
}

impl Display for DecayChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.label, self.interaction)
    }
}

/// The decay trees of one initial state with one spin projection, weighted by an admixture.
///
/// Trees within a component interfere; components add incoherently.
#[derive(Debug)]
pub struct ModelComponent {
    particle: ParticleId,
    two_m: i32,
    trees: Vec<Arc<DecayTree>>,
    admixture: Arc<RealParameter>,
    label: String,
}

impl ModelComponent {
    pub fn particle(&self) -> ParticleId {
        self.particle
    }
    pub fn two_m(&self) -> i32 {
        self.two_m
    }
    pub fn decay_trees(&self) -> &[Arc<DecayTree>] {
        &self.trees
    }
    /// The non-negative weight of this component.
    pub fn admixture(&self) -> &Arc<RealParameter> {
        &self.admixture
    }
    pub fn label(&self) -> &str {
        &self.label
    }
    /// $`\sum_t A_t`$ over the trees of this component.
    pub fn amplitude(&self, model: &Model, point: &DataPoint) -> SaplingResult<Complex64> {
        let mut a = Complex64::ZERO;
        for tree in &self.trees {
            a += tree.amplitude(model, point)?;
        }
        Ok(a)
    }
    /// $`a |\sum_t A_t|^2`$
    pub fn intensity(&self, model: &Model, point: &DataPoint) -> SaplingResult<f64> {
        Ok(self.admixture.value() * self.amplitude(model, point)?.norm_sqr())
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    free_amplitudes: IndexMap<String, (f64, f64)>,
    admixtures: Vec<f64>,
}

/// A decay model.
///
/// Models are built in two phases. First the final state, decaying particles, their channels
/// and the initial states are declared. Then [`Model::lock`] registers every particle
/// combination with the data accessors, assembles the decay trees and freezes the structure.
/// Only a locked model creates data and evaluates intensities.
#[derive(Debug)]
pub struct Model {
    id: u64,
    formalism: Formalism,
    locked: bool,
    coordinate_system: CoordinateSystem,
    pc_cache: ParticleCombinationCache,
    wigner: WignerCache,
    particles: Vec<Particle>,
    final_state: Vec<ParticleId>,
    channels: Vec<DecayChannel>,
    spin_amplitudes: Vec<SpinAmplitude>,
    recalculables: Vec<Box<dyn RecalculableAccessor>>,
    mass_shape_components: IndexMap<ParticleId, usize>,
    barrier_components: IndexMap<(ParticleId, u32), usize>,
    four_momenta: FourMomenta,
    helicity_angles: HelicityAngles,
    breakup_momenta: MeasuredBreakupMomenta,
    trees: IndexMap<ParticleId, Vec<Arc<DecayTree>>>,
    initial_states: Vec<ParticleId>,
    components: Vec<ModelComponent>,
    origins: Vec<Arc<ParticleCombination>>,
    n_accessors: usize,
    layout: Vec<usize>,
    symmetrizations: Vec<usize>,
}

impl Model {
    pub fn new(formalism: Formalism) -> Self {
        Self {
            id: NEXT_MODEL_ID.fetch_add(1, Ordering::Relaxed),
            formalism,
            locked: false,
            coordinate_system: CoordinateSystem::default(),
            pc_cache: ParticleCombinationCache::default(),
            wigner: WignerCache::default(),
            particles: Vec::new(),
            final_state: Vec::new(),
            channels: Vec::new(),
            spin_amplitudes: Vec::new(),
            recalculables: Vec::new(),
            mass_shape_components: IndexMap::new(),
            barrier_components: IndexMap::new(),
            four_momenta: FourMomenta::new(0),
            helicity_angles: HelicityAngles::new(1),
            breakup_momenta: MeasuredBreakupMomenta::new(2),
            trees: IndexMap::new(),
            initial_states: Vec::new(),
            components: Vec::new(),
            origins: Vec::new(),
            n_accessors: 3,
            layout: Vec::new(),
            symmetrizations: Vec::new(),
        }
    }

    /// A process-unique id, carried by every [`DataSet`] this model creates.
    pub fn id(&self) -> u64 {
        self.id
    }
    pub fn formalism(&self) -> Formalism {
        self.formalism
    }
    pub fn is_locked(&self) -> bool {
        self.locked
    }
    pub fn coordinate_system(&self) -> &CoordinateSystem {
        &self.coordinate_system
    }
    /// Set the axes helicity angles of the initial states are measured in.
    pub fn set_coordinate_system(&mut self, coordinate_system: CoordinateSystem) -> SaplingResult<()> {
        self.check_unlocked()?;
        self.coordinate_system = coordinate_system;
        Ok(())
    }

    fn check_unlocked(&self) -> SaplingResult<()> {
        if self.locked {
            return Err(SaplingError::ModelLocked);
        }
        Ok(())
    }
    fn check_locked(&self) -> SaplingResult<()> {
        if !self.locked {
            return Err(SaplingError::ModelNotLocked);
        }
        Ok(())
    }

    pub fn particle(&self, id: ParticleId) -> SaplingResult<&Particle> {
        self.particles
            .get(id.0)
            .ok_or_else(|| SaplingError::ParticleNotFound {
                name: format!("#{}", id.0),
            })
    }
    pub fn particle_id(&self, name: &str) -> SaplingResult<ParticleId> {
        self.particles
            .iter()
            .position(|p| p.name() == name)
            .map(ParticleId)
            .ok_or_else(|| SaplingError::ParticleNotFound {
                name: name.to_string(),
            })
    }
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }
    /// The particle at each final-state position.
    pub fn final_state(&self) -> &[ParticleId] {
        &self.final_state
    }
    pub fn channels(&self) -> &[DecayChannel] {
        &self.channels
    }
    /// # Errors
    ///
    /// [`SaplingError::Custom`] for an id this model did not issue.
    pub fn channel(&self, id: ChannelId) -> SaplingResult<&DecayChannel> {
        self.channels
            .get(id.0)
            .ok_or_else(|| SaplingError::Custom(format!("no decay channel #{}", id.0)))
    }
    pub fn spin_amplitudes(&self) -> &[SpinAmplitude] {
        &self.spin_amplitudes
    }
    /// # Errors
    ///
    /// [`SaplingError::Custom`] if `index` is not in [`Model::spin_amplitudes`].
    pub fn spin_amplitude(&self, index: usize) -> SaplingResult<&SpinAmplitude> {
        self.spin_amplitudes
            .get(index)
            .ok_or_else(|| SaplingError::Custom(format!("no spin amplitude #{}", index)))
    }
    pub fn recalculables(&self) -> &[Box<dyn RecalculableAccessor>] {
        &self.recalculables
    }
    /// # Panics
    ///
    /// If `index` is not a component index of one of this model's decay trees.
    pub fn recalculable(&self, index: usize) -> &dyn RecalculableAccessor {
        self.recalculables[index].as_ref()
    }
    pub fn four_momenta(&self) -> &FourMomenta {
        &self.four_momenta
    }
    pub fn helicity_angles(&self) -> &HelicityAngles {
        &self.helicity_angles
    }
    pub fn breakup_momenta(&self) -> &MeasuredBreakupMomenta {
        &self.breakup_momenta
    }
    pub fn wigner(&self) -> &WignerCache {
        &self.wigner
    }
    pub fn particle_combination_cache(&self) -> &ParticleCombinationCache {
        &self.pc_cache
    }
    pub fn initial_states(&self) -> &[ParticleId] {
        &self.initial_states
    }
    /// Decay trees of every particle reachable from an initial state, available once locked.
    pub fn trees(&self, particle: ParticleId) -> &[Arc<DecayTree>] {
        self.trees.get(&particle).map_or(&[], |t| t.as_slice())
    }
    pub fn components(&self) -> &[ModelComponent] {
        &self.components
    }
    /// Number of reals stored per accessor in every [`DataPoint`].
    pub fn layout(&self) -> &[usize] {
        &self.layout
    }
    /// Number of symmetrization indices per accessor.
    pub fn symmetrizations(&self) -> &[usize] {
        &self.symmetrizations
    }

    /// Declare the final state. Particles sharing a name are one particle occupying several
    /// positions.
    ///
    /// # Errors
    ///
    /// [`SaplingError::ModelLocked`], or [`SaplingError::Custom`] if the final state was already
    /// set, a name is reused with other properties, or a name belongs to a decaying particle.
    pub fn set_final_state(&mut self, particles: Vec<FinalStateParticle>) -> SaplingResult<Vec<ParticleId>> {
        self.check_unlocked()?;
        if !self.final_state.is_empty() {
            return Err(SaplingError::Custom("final state already set".to_string()));
        }
        if particles.is_empty() {
            return Err(SaplingError::EmptyFourMomentaVector);
        }
        let mut ids = Vec::with_capacity(particles.len());
        for (i, fsp) in particles.into_iter().enumerate() {
            let pc = self.pc_cache.fsp(i);
            let id = match self.particles.iter().position(|p| p.name() == fsp.name()) {
                Some(j) => match &mut self.particles[j] {
                    Particle::Final(existing)
                        if existing.quantum_numbers() == fsp.quantum_numbers()
                            && existing.mass() == fsp.mass() =>
                    {
                        existing.particle_combinations.push(pc);
                        ParticleId(j)
                    }
                    _ => {
                        return Err(SaplingError::Custom(format!(
                            "particle name \"{}\" is already in use",
                            fsp.name()
                        )))
                    }
                },
                None => {
                    let mut fsp = fsp;
                    fsp.particle_combinations = vec![pc];
                    self.particles.push(fsp.into());
                    ParticleId(self.particles.len() - 1)
                }
            };
            ids.push(id);
        }
        self.final_state = ids.clone();
        Ok(ids)
    }

    /// Add a decaying particle. Its lineshape, if any, becomes a recalculable accessor.
    ///
    /// # Errors
    ///
    /// [`SaplingError::ModelLocked`], or [`SaplingError::Custom`] if the name is taken.
    pub fn add_decaying_particle(&mut self, particle: DecayingParticle) -> SaplingResult<ParticleId> {
        self.check_unlocked()?;
        if self.particles.iter().any(|p| p.name() == particle.name()) {
            return Err(SaplingError::Custom(format!(
                "particle name \"{}\" is already in use",
                particle.name()
            )));
        }
        let id = ParticleId(self.particles.len());
        if let Some(shape) = particle.mass_shape() {
            let accessor = MassShapeAccessor::new(
                self.n_accessors,
                particle.name(),
                shape.clone(),
                particle.quantum_numbers().two_j / 2,
                particle.radial_size().clone(),
            );
            self.n_accessors += 1;
            self.recalculables.push(Box::new(accessor));
            self.mass_shape_components
                .insert(id, self.recalculables.len() - 1);
        }
        self.particles.push(particle.into());
        Ok(id)
    }

    /// Every combination a particle is realized by: its final-state leaves, or the combinations
    /// of all its channels.
    ///
    /// # Errors
    ///
    /// [`SaplingError::ParticleNotFound`] for an id this model did not issue.
    pub fn particle_combinations(&self, id: ParticleId) -> SaplingResult<Vec<Arc<ParticleCombination>>> {
        Ok(match self.particle(id)? {
            Particle::Final(p) => p.particle_combinations().to_vec(),
            Particle::Decaying(p) => {
                let mut out: Vec<Arc<ParticleCombination>> = Vec::new();
                for c in p.channels() {
                    for pc in &self.channels[c.0].particle_combinations {
                        if !out.iter().any(|o| equal_down(o, pc)) {
                            out.push(pc.clone());
                        }
                    }
                }
                out
            }
        })
    }

    pub fn add_strong_decay(&mut self, parent: ParticleId, daughters: &[ParticleId]) -> SaplingResult<ChannelId> {
        self.add_decay_channel(parent, daughters, Interaction::Strong)
    }
    pub fn add_weak_decay(&mut self, parent: ParticleId, daughters: &[ParticleId]) -> SaplingResult<ChannelId> {
        self.add_decay_channel(parent, daughters, Interaction::Weak)
    }

    /// Add a two-body decay channel with one free amplitude per allowed (L, S) pair.
    ///
    /// Decaying daughters must have all their own channels declared first.
    ///
    /// # Errors
    ///
    /// [`SaplingError::ModelLocked`], [`SaplingError::NotTwoBody`],
    /// [`SaplingError::ChargeNotConserved`], [`SaplingError::ParityNotConserved`] (strong decays
    /// where only parity forbids every L), [`SaplingError::AngularMomentumNotConserved`] if no
    /// (L, S) pair is allowed, and [`SaplingError::Custom`] for an unknown or stable parent, a
    /// duplicate channel or a daughter without combinations.
    pub fn add_decay_channel(
        &mut self,
        parent: ParticleId,
        daughters: &[ParticleId],
        interaction: Interaction,
    ) -> SaplingResult<ChannelId> {
        self.check_unlocked()?;
        if daughters.len() != 2 {
            return Err(SaplingError::NotTwoBody(daughters.len()));
        }
        let daughters = [daughters[0], daughters[1]];
        let parent_particle = match self.particle(parent)? {
            Particle::Decaying(p) => p.clone(),
            Particle::Final(p) => {
                return Err(SaplingError::Custom(format!(
                    "final-state particle {} cannot decay",
                    p.name()
                )))
            }
        };
        let d_qn = [
            self.particle(daughters[0])?.quantum_numbers(),
            self.particle(daughters[1])?.quantum_numbers(),
        ];
        let label = format!(
            "{} -> {} + {}",
            parent_particle.name(),
            self.particles[daughters[0].0].name(),
            self.particles[daughters[1].0].name()
        );
        let qn = parent_particle.quantum_numbers();
        if d_qn[0].charge + d_qn[1].charge != qn.charge {
            return Err(SaplingError::ChargeNotConserved {
                channel: label,
                expected: qn.charge,
                found: d_qn[0].charge + d_qn[1].charge,
            });
        }
        if parent_particle
            .channels()
            .iter()
            .any(|c| self.channels[c.0].daughters == daughters)
        {
            return Err(SaplingError::Custom(format!("duplicate channel {}", label)));
        }

        let pcs = [
            self.particle_combinations(daughters[0])?,
            self.particle_combinations(daughters[1])?,
        ];
        for (d, pc) in daughters.iter().zip(&pcs) {
            if pc.is_empty() {
                return Err(SaplingError::Custom(format!(
                    "daughter {} of {} has no particle combinations; declare its channels first",
                    self.particles[d.0].name(),
                    label
                )));
            }
        }
        let mut particle_combinations: Vec<Arc<ParticleCombination>> = Vec::new();
        for a in &pcs[0] {
            for b in &pcs[1] {
                if a.indices().iter().any(|i| b.indices().contains(i)) {
                    continue;
                }
                if daughters[0] == daughters[1]
                    && particle_combinations.iter().any(|pc| {
                        equal_down(&pc.daughters()[0], b) && equal_down(&pc.daughters()[1], a)
                    })
                {
                    continue;
                }
                let pc = self.pc_cache.composite(&[a.clone(), b.clone()])?;
                if !particle_combinations.iter().any(|p| Arc::ptr_eq(p, &pc)) {
                    particle_combinations.push(pc);
                }
            }
        }
        if particle_combinations.is_empty() {
            return Err(SaplingError::InconsistentParticleCombination(format!(
                "no non-overlapping combinations for {}",
                label
            )));
        }

        let channel_id = ChannelId(self.channels.len());
        let [two_j1, two_j2] = [d_qn[0].two_j, d_qn[1].two_j];
        let mut free_amplitudes = Vec::new();
        let mut parity_violated = false;
        let mut two_s = two_j1.abs_diff(two_j2);
        while two_s <= two_j1 + two_j2 {
            let l_min = qn.two_j.abs_diff(two_s) / 2;
            let l_max = (qn.two_j + two_s) / 2;
            for l in l_min..=l_max {
                if interaction == Interaction::Strong
                    && f64::from(qn.parity) != f64::from(d_qn[0].parity * d_qn[1].parity) * pow_neg_one(l as i32)
                {
                    parity_violated = true;
                    continue;
                }
                let sa = match self.spin_amplitudes.iter().position(|sa| {
                    sa.same_quantum_numbers(self.formalism, qn.two_j, two_j1, two_j2, l, two_s)
                }) {
                    Some(sa) => sa,
                    None => {
                        match SpinAmplitude::new(
                            self.n_accessors,
                            self.formalism,
                            qn.two_j,
                            two_j1,
                            two_j2,
                            l,
                            two_s,
                        ) {
                            Ok(sa) => {
                                self.n_accessors += 1;
                                self.spin_amplitudes.push(sa);
                                self.spin_amplitudes.len() - 1
                            }
                            Err(e) => {
                                debug!("skipping L = {}, S = {} in {}: {}", l, spin_to_string(two_s as i32), label, e);
                                continue;
                            }
                        }
                    }
                };
                if l > 0 && !self.barrier_components.contains_key(&(parent, l)) {
                    let barrier = BlattWeisskopf::new(
                        self.n_accessors,
                        parent_particle.name(),
                        l,
                        parent_particle.radial_size().clone(),
                    )?;
                    self.n_accessors += 1;
                    self.recalculables.push(Box::new(barrier));
                    self.barrier_components
                        .insert((parent, l), self.recalculables.len() - 1);
                }
                free_amplitudes.push(Arc::new(FreeAmplitude::new(
                    format!("{} (L = {}, S = {})", label, l, spin_to_string(two_s as i32)),
                    channel_id,
                    sa,
                    l,
                    two_s,
                )));
            }
            two_s += 2;
        }
        if free_amplitudes.is_empty() {
            if parity_violated {
                return Err(SaplingError::ParityNotConserved { channel: label });
            }
            return Err(SaplingError::AngularMomentumNotConserved {
                two_j1,
                two_j2,
                two_j: qn.two_j,
            });
        }
        debug!(
            "added channel {} with {} free amplitudes and {} particle combinations",
            label,
            free_amplitudes.len(),
            particle_combinations.len()
        );
        self.channels.push(DecayChannel {
            parent,
            daughters,
            interaction,
            particle_combinations,
            free_amplitudes,
            label,
        });
        if let Particle::Decaying(p) = &mut self.particles[parent.0] {
            p.channels.push(channel_id);
        }
        Ok(channel_id)
    }

    /// Mark a decaying particle as an initial state.
    pub fn add_initial_state(&mut self, id: ParticleId) -> SaplingResult<()> {
        self.check_unlocked()?;
        match self.particle(id)? {
            Particle::Decaying(_) if !self.initial_states.contains(&id) => {
                self.initial_states.push(id);
                Ok(())
            }
            Particle::Decaying(p) => Err(SaplingError::Custom(format!(
                "{} is already an initial state",
                p.name()
            ))),
            Particle::Final(p) => Err(SaplingError::Custom(format!(
                "final-state particle {} cannot be an initial state",
                p.name()
            ))),
        }
    }

    /// Freeze the model structure.
    ///
    /// Registers the combinations reachable from every initial state with the data accessors,
    /// assembles the decay trees and model components, fixes free amplitudes that are alone for
    /// their particle and spin projection, fixes the admixture of a single component and checks
    /// every unit spin amplitude against its general computation.
    ///
    /// # Errors
    ///
    /// [`SaplingError::ModelLocked`] if already locked, [`SaplingError::Custom`] for a model
    /// without final state, initial states or decay trees, and the errors of registration or
    /// the unit check.
    pub fn lock(&mut self) -> SaplingResult<()> {
        self.check_unlocked()?;
        if self.final_state.is_empty() {
            return Err(SaplingError::Custom("model has no final state".to_string()));
        }
        if self.initial_states.is_empty() {
            return Err(SaplingError::Custom("model has no initial state".to_string()));
        }
        for isp in self.initial_states.clone() {
            for pc in self.particle_combinations(isp)? {
                if pc.indices().len() != self.final_state.len() {
                    return Err(SaplingError::FinalStateCountMismatch {
                        expected: self.final_state.len(),
                        found: pc.indices().len(),
                    });
                }
                self.register_combination(isp, &pc)?;
                self.origins.push(pc);
            }
        }

        let mut memo: IndexMap<ParticleId, Vec<Arc<DecayTree>>> = IndexMap::new();
        for &isp in &self.initial_states {
            self.build_trees(isp, &mut memo)?;
        }
        for &isp in &self.initial_states {
            let trees = memo.get(&isp).cloned().unwrap_or_default();
            if trees.is_empty() {
                return Err(SaplingError::Custom(format!(
                    "initial state {} has no decay trees",
                    self.particles[isp.0].name()
                )));
            }
            let mut by_m: IndexMap<i32, Vec<Arc<DecayTree>>> = IndexMap::new();
            for tree in trees {
                by_m.entry(tree.two_m()).or_default().push(tree);
            }
            for (two_m, trees) in by_m {
                self.components.push(ModelComponent {
                    particle: isp,
                    two_m,
                    trees,
                    admixture: Arc::new(RealParameter::new(1.0)),
                    label: format!("{} (M = {})", self.particles[isp.0].name(), spin_to_string(two_m)),
                });
            }
        }
        self.trees = memo;

        for (particle, trees) in &self.trees {
            let mut by_m: IndexMap<i32, Vec<&Arc<FreeAmplitude>>> = IndexMap::new();
            for tree in trees {
                let fas = by_m.entry(tree.two_m()).or_default();
                if !fas.iter().any(|fa| Arc::ptr_eq(fa, tree.free_amplitude())) {
                    fas.push(tree.free_amplitude());
                }
            }
            for (two_m, fas) in by_m {
                if let [fa] = fas.as_slice() {
                    debug!(
                        "fixing solitary free amplitude {} of {} (M = {})",
                        fa.label(),
                        self.particles[particle.0].name(),
                        spin_to_string(two_m)
                    );
                    fa.parameter().fix();
                }
            }
        }
        if let [component] = self.components.as_slice() {
            component.admixture().fix();
        }

        let mut rng = fastrand::Rng::with_seed(self.id);
        for sa in &self.spin_amplitudes {
            sa.check_unit(&self.wigner, &mut rng)?;
        }
        let n_unit = self.spin_amplitudes.iter().filter(|sa| sa.is_unit()).count();
        debug!("{} of {} spin amplitudes are unit", n_unit, self.spin_amplitudes.len());

        let mut layout = vec![0; self.n_accessors];
        let mut symmetrizations = vec![0; self.n_accessors];
        let mut record = |accessor: &crate::accessors::DataAccessor| {
            layout[accessor.index()] = accessor.size();
            symmetrizations[accessor.index()] = accessor.n_symmetrizations();
        };
        record(self.four_momenta.accessor());
        record(self.helicity_angles.accessor());
        record(self.breakup_momenta.accessor());
        for sa in &self.spin_amplitudes {
            if !sa.is_unit() {
                record(sa.accessor());
            }
        }
        for r in &self.recalculables {
            record(r.accessor());
        }
        self.layout = layout;
        self.symmetrizations = symmetrizations;
        self.locked = true;
        info!(
            model = self.id,
            trees = self.trees.values().map(|t| t.len()).sum::<usize>(),
            components = self.components.len(),
            combinations = self.pc_cache.len(),
            accessors = self.n_accessors,
            "locked model"
        );
        for component in &self.components {
            for tree in component.decay_trees() {
                debug!("{}\n{}", component.label(), tree);
            }
        }
        Ok(())
    }

    fn register_combination(&mut self, particle: ParticleId, pc: &Arc<ParticleCombination>) -> SaplingResult<()> {
        self.four_momenta.accessor_mut().register(pc)?;
        let channels = match &self.particles[particle.0] {
            Particle::Final(_) => return Ok(()),
            Particle::Decaying(p) => p.channels().to_vec(),
        };
        if let Some(&ms) = self.mass_shape_components.get(&particle) {
            self.recalculables[ms].accessor_mut().register(pc)?;
        }
        for c in channels {
            if !self.channels[c.0].contains(pc) {
                continue;
            }
            self.helicity_angles.accessor_mut().register(pc)?;
            self.breakup_momenta.accessor_mut().register(pc)?;
            let (free_amplitudes, daughters) = {
                let channel = &self.channels[c.0];
                (channel.free_amplitudes.clone(), channel.daughters)
            };
            for fa in free_amplitudes {
                self.spin_amplitudes[fa.spin_amplitude()]
                    .accessor_mut()
                    .register(pc)?;
                if let Some(&bw) = self.barrier_components.get(&(particle, fa.l())) {
                    self.recalculables[bw].accessor_mut().register(pc)?;
                }
            }
            for (i, d) in daughters.iter().enumerate() {
                self.register_combination(*d, &pc.daughters()[i])?;
            }
        }
        Ok(())
    }

    fn build_trees(
        &self,
        particle: ParticleId,
        memo: &mut IndexMap<ParticleId, Vec<Arc<DecayTree>>>,
    ) -> SaplingResult<()> {
        if memo.contains_key(&particle) {
            return Ok(());
        }
        let p = match &self.particles[particle.0] {
            Particle::Final(_) => return Ok(()),
            Particle::Decaying(p) => p,
        };
        let mut trees = Vec::new();
        for c in p.channels() {
            let channel = &self.channels[c.0];
            for d in channel.daughters {
                self.build_trees(d, memo)?;
            }
            for fa in &channel.free_amplitudes {
                let sa = &self.spin_amplitudes[fa.spin_amplitude()];
                let mut components: Vec<usize> = self.mass_shape_components.get(&particle).copied().into_iter().collect();
                if let Some(&bw) = self.barrier_components.get(&(particle, fa.l())) {
                    components.push(bw);
                }
                for (k, &(two_m, two_lambdas)) in sa.amplitudes().iter().enumerate() {
                    let options: Vec<Vec<Option<Arc<DecayTree>>>> = channel
                        .daughters
                        .iter()
                        .zip(two_lambdas)
                        .map(|(d, two_lambda)| match memo.get(d) {
                            Some(daughter_trees) => daughter_trees
                                .iter()
                                .filter(|t| t.two_m() == two_lambda)
                                .cloned()
                                .map(Some)
                                .collect(),
                            None => vec![None],
                        })
                        .collect();
                    for d0 in &options[0] {
                        for d1 in &options[1] {
                            trees.push(Arc::new(DecayTree::new(
                                fa.clone(),
                                two_m,
                                two_lambdas,
                                k,
                                vec![d0.clone(), d1.clone()],
                                components.clone(),
                            )));
                        }
                    }
                }
            }
        }
        memo.insert(particle, trees);
        Ok(())
    }

    /// An empty data set for this model.
    pub fn create_data_set(&self) -> SaplingResult<DataSet> {
        self.check_locked()?;
        Ok(DataSet::new(
            self.id,
            self.final_state.len(),
            self.layout.clone(),
            self.symmetrizations.clone(),
        ))
    }

    /// A data point with every static accessor (four-momenta, breakup momenta, helicity angles
    /// and spin amplitudes) filled in. Recalculable accessors are filled by
    /// [`Model::calculate`].
    ///
    /// # Errors
    ///
    /// [`SaplingError::ModelNotLocked`], [`SaplingError::EmptyFourMomentaVector`] and
    /// [`SaplingError::FinalStateCountMismatch`].
    pub fn create_data_point(&self, momenta: Vec<Vec4>) -> SaplingResult<DataPoint> {
        self.check_locked()?;
        if momenta.is_empty() {
            return Err(SaplingError::EmptyFourMomentaVector);
        }
        if momenta.len() != self.final_state.len() {
            return Err(SaplingError::FinalStateCountMismatch {
                expected: self.final_state.len(),
                found: momenta.len(),
            });
        }
        let mut point = DataPoint::new(momenta, &self.layout);
        self.four_momenta.calculate(&mut point)?;
        self.breakup_momenta.calculate(&mut point, &self.four_momenta)?;
        self.helicity_angles.calculate(
            &mut point,
            &self.four_momenta,
            &self.origins,
            &self.coordinate_system,
        )?;
        for sa in &self.spin_amplitudes {
            sa.calculate(self, &mut point)?;
        }
        Ok(point)
    }

    /// Refresh every recalculable accessor of one partition whose parameters changed or whose
    /// values were never computed.
    pub fn calculate_partition(&self, partition: &mut DataPartition<'_>) -> SaplingResult<()> {
        if partition.model_id() != self.id {
            return Err(SaplingError::ModelMismatch {
                expected: self.id,
                found: partition.model_id(),
            });
        }
        for r in &self.recalculables {
            r.update_calculation_status(partition.status_mut());
            r.calculate(self, partition)?;
        }
        Ok(())
    }

    /// [`Model::calculate_partition`] over every partition of `data`.
    pub fn calculate(&self, data: &mut DataSet, ctx: &ExecutionContext) -> SaplingResult<()> {
        self.check_data(data)?;
        ctx.map_collect(data.partitions_mut(), |mut partition| {
            self.calculate_partition(&mut partition)
        })?;
        Ok(())
    }

    fn check_data(&self, data: &DataSet) -> SaplingResult<()> {
        self.check_locked()?;
        if data.model_id() != self.id {
            return Err(SaplingError::ModelMismatch {
                expected: self.id,
                found: data.model_id(),
            });
        }
        Ok(())
    }

    /// $`I = \sum_c a_c |\sum_{t \in c} A_t|^2`$ from the cached values of `point`.
    pub fn intensity(&self, point: &DataPoint) -> SaplingResult<f64> {
        let mut total = 0.0;
        for component in &self.components {
            total += component.intensity(self, point)?;
        }
        Ok(total)
    }

    /// Intensities of every point of a calculated data set.
    pub fn intensities(&self, data: &DataSet) -> SaplingResult<Vec<f64>> {
        self.check_data(data)?;
        data.iter().map(|point| self.intensity(point)).collect()
    }

    /// $`\sum_d (\ln I(d) - \text{pedestal})`$ over one partition, refreshing it first.
    pub fn partition_sum_of_log_intensity(&self, partition: &mut DataPartition<'_>, pedestal: f64) -> SaplingResult<f64> {
        self.calculate_partition(partition)?;
        let logs = partition
            .points()
            .iter()
            .map(|point| Ok(self.intensity(point)?.ln() - pedestal))
            .collect::<SaplingResult<Vec<f64>>>()?;
        Ok(logs.into_iter().sum_with_accumulator::<Klein<f64>>())
    }

    /// Every free amplitude of the model's decay trees, in first-use order.
    pub fn free_amplitudes(&self) -> Vec<Arc<FreeAmplitude>> {
        let mut out: Vec<Arc<FreeAmplitude>> = Vec::new();
        for component in &self.components {
            for tree in component.decay_trees() {
                for fa in tree.free_amplitudes() {
                    if !out.iter().any(|o| Arc::ptr_eq(o, &fa)) {
                        out.push(fa);
                    }
                }
            }
        }
        out
    }

    /// Every parameter the model's values depend on: free amplitudes, admixtures and the
    /// parameters of every recalculable accessor.
    pub fn parameters(&self) -> Vec<&dyn ParameterBase> {
        let mut out: Vec<&dyn ParameterBase> = Vec::new();
        for r in &self.recalculables {
            out.extend(r.parameters());
        }
        for component in &self.components {
            out.push(component.admixture().as_ref());
        }
        out
    }

    /// Mark every parameter [`VariableStatus::Unchanged`] once all data has been refreshed.
    /// Fixed parameters are left alone.
    pub fn set_parameter_flags_to_unchanged(&self) {
        for p in self.parameters() {
            p.set_variable_status(VariableStatus::Unchanged);
        }
        for fa in self.free_amplitudes() {
            fa.parameter().set_variable_status(VariableStatus::Unchanged);
        }
    }

    /// Validate and build mass axes from pairs of final-state indices. An empty request gives
    /// the default axes $`(j, j+i)`$, first off-diagonal first.
    ///
    /// # Errors
    ///
    /// [`SaplingError::Unsupported`] for default axes of more than four particles or axes of
    /// other than two particles, [`SaplingError::Custom`] for a wrong number of axes, indices
    /// out of range, duplicate indices or repeated axes.
    pub fn mass_axes(&self, axes: &[Vec<usize>]) -> SaplingResult<MassAxes> {
        let n_fsp = self.final_state.len();
        let mut axes = axes.to_vec();
        if axes.is_empty() {
            if n_fsp > 4 {
                return Err(SaplingError::Unsupported(
                    "default mass axes for more than four final-state particles".to_string(),
                ));
            }
            for i in 1..n_fsp.saturating_sub(1) {
                for j in 0..n_fsp - i {
                    axes.push(vec![j, j + i]);
                }
            }
        }
        let n_axes = (3 * n_fsp).saturating_sub(7);
        if n_fsp < 3 || axes.len() != n_axes {
            return Err(SaplingError::Custom(format!(
                "{} mass axes requested for {} final-state particles ({} needed)",
                axes.len(),
                n_fsp,
                n_axes
            )));
        }
        let mut pairs: Vec<[usize; 2]> = Vec::with_capacity(axes.len());
        for axis in &axes {
            if axis.len() != 2 {
                return Err(SaplingError::Unsupported(
                    "mass axes of other than two particles".to_string(),
                ));
            }
            if let Some(i) = axis.iter().find(|&&i| i >= n_fsp) {
                return Err(SaplingError::Custom(format!(
                    "particle index out of range ({} >= {})",
                    i, n_fsp
                )));
            }
            if axis[0] == axis[1] {
                return Err(SaplingError::Custom(format!("duplicate index ({})", axis[0])));
            }
            let pair = [axis[0], axis[1]];
            if pairs
                .iter()
                .any(|p| p.contains(&pair[0]) && p.contains(&pair[1]))
            {
                return Err(SaplingError::Custom(format!(
                    "axis ({}, {}) requested twice",
                    pair[0], pair[1]
                )));
            }
            pairs.push(pair);
        }
        Ok(MassAxes::new(pairs))
    }

    /// The default [`MassAxes`].
    pub fn default_mass_axes(&self) -> SaplingResult<MassAxes> {
        self.mass_axes(&[])
    }

    /// The nominal masses of the final-state particles, in position order.
    pub fn final_state_masses(&self) -> Vec<f64> {
        self.final_state
            .iter()
            .map(|id| self.particles[id.0].mass())
            .collect()
    }

    /// A compact `bincode` blob of every free-amplitude value (keyed by label) and every
    /// admixture.
    pub fn snapshot(&self) -> SaplingResult<Vec<u8>> {
        let snapshot = Snapshot {
            free_amplitudes: self
                .free_amplitudes()
                .iter()
                .map(|fa| {
                    let v = fa.value();
                    (fa.label().to_string(), (v.re, v.im))
                })
                .collect(),
            admixtures: self
                .components
                .iter()
                .map(|c| c.admixture().value())
                .collect(),
        };
        Ok(bincode::serialize(&snapshot)?)
    }

    /// Restore values written by [`Model::snapshot`]. Fixed parameters are left alone.
    ///
    /// # Errors
    ///
    /// [`SaplingError::BincodeError`] for a malformed blob and [`SaplingError::Custom`] if the
    /// blob names a free amplitude this model lacks or holds a different number of admixtures.
    pub fn restore(&self, bytes: &[u8]) -> SaplingResult<()> {
        let snapshot: Snapshot = bincode::deserialize(bytes)?;
        if snapshot.admixtures.len() != self.components.len() {
            return Err(SaplingError::Custom(format!(
                "snapshot holds {} admixtures, model has {} components",
                snapshot.admixtures.len(),
                self.components.len()
            )));
        }
        let free_amplitudes = self.free_amplitudes();
        for (label, (re, im)) in &snapshot.free_amplitudes {
            let fa = free_amplitudes
                .iter()
                .find(|fa| fa.label() == label)
                .ok_or_else(|| SaplingError::Custom(format!("unknown free amplitude {}", label)))?;
            if !fa.parameter().is_fixed() {
                fa.set_value(Complex64::new(*re, *im))?;
            }
        }
        for (component, &a) in self.components.iter().zip(&snapshot.admixtures) {
            if !component.admixture().is_fixed() {
                component.admixture().set_value(a)?;
            }
        }
        Ok(())
    }
}

/// $`\sum_d (\ln I(d) - \text{pedestal})`$ over every partition of `data`, each partition
/// refreshed and summed under the policy of `ctx` and the partial sums combined once all have
/// finished.
///
/// # Errors
///
/// [`SaplingError::Custom`] for a model without components and
/// [`SaplingError::ModelMismatch`] for foreign data.
pub fn sum_of_log_intensity(
    model: &Model,
    data: &mut DataSet,
    pedestal: f64,
    ctx: &ExecutionContext,
) -> SaplingResult<f64> {
    if model.components().is_empty() {
        return Err(SaplingError::Custom("model has no components".to_string()));
    }
    model.check_data(data)?;
    let partials = ctx.map_collect(data.partitions_mut(), |mut partition| {
        model.partition_sum_of_log_intensity(&mut partition, pedestal)
    })?;
    Ok(partials.into_iter().sum_with_accumulator::<Klein<f64>>())
}
