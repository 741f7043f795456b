//! Small locked models shared by unit tests across the crate.

use crate::{
    mass_shapes::MassShape,
    model::Model,
    particles::{DecayingParticle, FinalStateParticle, QuantumNumbers},
    phase_space::PhspGenerator,
    utils::{enums::Formalism, vectors::Vec4},
};

pub(crate) const PI_MASS: f64 = 0.13957;
pub(crate) const K_MASS: f64 = 0.493677;
pub(crate) const D_PLUS_MASS: f64 = 1.86962;
pub(crate) const D0_MASS: f64 = 1.86484;

pub(crate) fn pi_plus() -> FinalStateParticle {
    FinalStateParticle::new("pi+", QuantumNumbers::new(0, -1, 1), PI_MASS)
}

pub(crate) fn pi_minus() -> FinalStateParticle {
    FinalStateParticle::new("pi-", QuantumNumbers::new(0, -1, -1), PI_MASS)
}

pub(crate) fn k_plus() -> FinalStateParticle {
    FinalStateParticle::new("K+", QuantumNumbers::new(0, -1, 1), K_MASS)
}

pub(crate) fn k_minus() -> FinalStateParticle {
    FinalStateParticle::new("K-", QuantumNumbers::new(0, -1, -1), K_MASS)
}

/// D+ -> (rho0 -> pi+ pi-) pi+ and D+ -> (f0 -> pi+ pi-) pi+.
pub(crate) fn d3pi(formalism: Formalism) -> Model {
    let mut model = Model::new(formalism);
    let fs = model
        .set_final_state(vec![pi_plus(), pi_minus(), pi_plus()])
        .unwrap();
    let (pi_p, pi_m) = (fs[0], fs[1]);
    let d = model
        .add_decaying_particle(DecayingParticle::new("D+", QuantumNumbers::new(0, -1, 1), D_PLUS_MASS, 5.0))
        .unwrap();
    let rho = model
        .add_decaying_particle(
            DecayingParticle::new("rho0", QuantumNumbers::new(2, -1, 0), 0.775, 5.0)
                .with_mass_shape(MassShape::breit_wigner(0.775, 0.149)),
        )
        .unwrap();
    let f0 = model
        .add_decaying_particle(
            DecayingParticle::new("f0", QuantumNumbers::new(0, 1, 0), 0.965, 5.0).with_mass_shape(
                MassShape::flatte(0.965)
                    .with_channel(0.406, PI_MASS)
                    .with_channel(0.406 * 2.0, K_MASS),
            ),
        )
        .unwrap();
    model.add_strong_decay(rho, &[pi_p, pi_m]).unwrap();
    model.add_strong_decay(f0, &[pi_p, pi_m]).unwrap();
    model.add_weak_decay(d, &[rho, pi_p]).unwrap();
    model.add_weak_decay(d, &[f0, pi_p]).unwrap();
    model.add_initial_state(d).unwrap();
    model.lock().unwrap();
    model
}

/// D0 -> rho0 rho0 and D0 -> a1+ pi- with a1+ -> sigma pi+ and a1+ -> rho0 pi+.
pub(crate) fn d4pi() -> Model {
    let mut model = Model::new(Formalism::Helicity);
    let fs = model
        .set_final_state(vec![pi_plus(), pi_minus(), pi_plus(), pi_minus()])
        .unwrap();
    let (pi_p, pi_m) = (fs[0], fs[1]);
    let d = model
        .add_decaying_particle(DecayingParticle::new("D0", QuantumNumbers::new(0, -1, 0), D0_MASS, 1.0))
        .unwrap();
    let rho = model
        .add_decaying_particle(
            DecayingParticle::new("rho0", QuantumNumbers::new(2, -1, 0), 0.775, 1.0)
                .with_mass_shape(MassShape::breit_wigner(0.775, 0.149)),
        )
        .unwrap();
    let sigma = model
        .add_decaying_particle(
            DecayingParticle::new("sigma", QuantumNumbers::new(0, 1, 0), 0.5, 1.0)
                .with_mass_shape(MassShape::pole_mass(num::complex::Complex64::new(0.47, -0.22))),
        )
        .unwrap();
    let a1 = model
        .add_decaying_particle(
            DecayingParticle::new("a1+", QuantumNumbers::new(2, 1, 1), 1.23, 1.0)
                .with_mass_shape(MassShape::constant_width_breit_wigner(1.23, 0.42)),
        )
        .unwrap();
    model.add_strong_decay(rho, &[pi_p, pi_m]).unwrap();
    model.add_strong_decay(sigma, &[pi_p, pi_m]).unwrap();
    model.add_strong_decay(a1, &[sigma, pi_p]).unwrap();
    model.add_strong_decay(a1, &[rho, pi_p]).unwrap();
    model.add_weak_decay(d, &[rho, rho]).unwrap();
    model.add_weak_decay(d, &[a1, pi_m]).unwrap();
    model.add_initial_state(d).unwrap();
    model.lock().unwrap();
    model
}

/// D+ -> R_j K+ with R_j -> pi+ K- for j = 0, 1, 2, declared in order of spin.
pub(crate) fn dkkp(formalism: Formalism) -> Model {
    let mut model = Model::new(formalism);
    let fs = model
        .set_final_state(vec![k_minus(), k_plus(), pi_plus()])
        .unwrap();
    let (k_m, k_p, pi_p) = (fs[0], fs[1], fs[2]);
    let d = model
        .add_decaying_particle(DecayingParticle::new("D+", QuantumNumbers::new(0, -1, 1), D_PLUS_MASS, 5.0))
        .unwrap();
    for (j, (mass, width)) in [(1.425, 0.27), (0.892, 0.05), (1.432, 0.109)].into_iter().enumerate() {
        let two_j = 2 * j as u32;
        let parity = if j % 2 == 0 { 1 } else { -1 };
        let r = model
            .add_decaying_particle(
                DecayingParticle::new(&format!("K*{}", j), QuantumNumbers::new(two_j, parity, 0), mass, 3.0)
                    .with_mass_shape(MassShape::breit_wigner(mass, width)),
            )
            .unwrap();
        model.add_strong_decay(r, &[pi_p, k_m]).unwrap();
        model.add_weak_decay(d, &[r, k_p]).unwrap();
    }
    model.add_initial_state(d).unwrap();
    model.lock().unwrap();
    model
}

/// `n` phase-space events for `model`, drawn along its default mass axes.
pub(crate) fn generate_events(model: &Model, n: usize, seed: u64) -> Vec<Vec<Vec4>> {
    let isp = model.initial_states()[0];
    let initial_mass = model.particle(isp).unwrap().mass();
    let mut generator = PhspGenerator::new(
        initial_mass,
        model.final_state_masses(),
        model.default_mass_axes().unwrap(),
        seed,
        10_000,
    )
    .unwrap();
    generator.generate_n(n).unwrap()
}
