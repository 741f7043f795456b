//! Monte-Carlo integration of decay-tree amplitudes.
//!
//! For the trees $`t_i`$ of one model component the integral of the component intensity over a
//! sample of $`N`$ points factorizes as
//!
//! ```math
//! \int I_c = a_c \sum_{i,j} f_i f_j^* M_{ij}, \qquad M_{ij} = \frac{1}{N}\sum_d D_i(d) D_j^*(d)
//! ```
//!
//! where $`f_i`$ are the data-independent (free-amplitude) factors and $`D_i`$ the
//! data-dependent ones. Only $`M`$ needs the data, so it is kept and recomputed only when a
//! lineshape or barrier factor of one of the component's trees changes.

use std::sync::Arc;

use auto_ops::impl_op_ex;
use nalgebra::DMatrix;
use num::complex::Complex64;
use tracing::{debug, trace};

use crate::{
    data::{DataPartition, DataSet},
    decay_tree::DecayTree,
    execution::ExecutionContext,
    model::Model,
    parameters::{RealParameter, VariableStatus},
    phase_space::PhspGenerator,
    utils::compensated::CompensatedSum,
    SaplingError, SaplingResult,
};

/// Position of the pair `i < j` in the packed upper triangle of an `n × n` matrix.
fn triangle_index(n: usize, i: usize, j: usize) -> usize {
    i * n - i * (i + 1) / 2 + (j - i - 1)
}

/// Running sums of $`D_i D_j^*`$ over some number of points.
#[derive(Clone, Debug, Default)]
struct TreeSums {
    n: usize,
    diagonal: Vec<CompensatedSum<f64>>,
    off_diagonal: Vec<CompensatedSum<Complex64>>,
}

impl TreeSums {
    fn new(n_trees: usize) -> Self {
        Self {
            n: 0,
            diagonal: vec![CompensatedSum::default(); n_trees],
            off_diagonal: vec![CompensatedSum::default(); n_trees * n_trees.saturating_sub(1) / 2],
        }
    }

    fn accumulate(&mut self, amplitudes: &[Complex64]) {
        self.n += 1;
        for (i, a_i) in amplitudes.iter().enumerate() {
            self.diagonal[i] += a_i.norm_sqr();
            for (j, a_j) in amplitudes.iter().enumerate().skip(i + 1) {
                self.off_diagonal[triangle_index(amplitudes.len(), i, j)] += a_i * a_j.conj();
            }
        }
    }
}

impl_op_ex!(+ |a: &TreeSums, b: &TreeSums| -> TreeSums {
    let mut out = a.clone();
    out.n += b.n;
    out.diagonal.iter_mut().zip(&b.diagonal).for_each(|(x, y)| *x += *y);
    out.off_diagonal.iter_mut().zip(&b.off_diagonal).for_each(|(x, y)| *x += *y);
    out
});

/// The integral matrix of the decay trees of one model component.
#[derive(Debug, Clone)]
pub struct DecayTreeVectorIntegral {
    trees: Vec<Arc<DecayTree>>,
    admixture: Arc<RealParameter>,
    diagonal: Vec<f64>,
    off_diagonal: Vec<Complex64>,
    n_points: usize,
    calculated: bool,
}

impl DecayTreeVectorIntegral {
    fn new(trees: Vec<Arc<DecayTree>>, admixture: Arc<RealParameter>) -> Self {
        let n = trees.len();
        Self {
            trees,
            admixture,
            diagonal: vec![0.0; n],
            off_diagonal: vec![Complex64::ZERO; n * n.saturating_sub(1) / 2],
            n_points: 0,
            calculated: false,
        }
    }

    pub fn decay_trees(&self) -> &[Arc<DecayTree>] {
        &self.trees
    }
    /// Number of points the current matrix was computed from.
    pub fn n_points(&self) -> usize {
        self.n_points
    }

    /// $`M_{ij}`$, the data-dependent part of the integral of $`A_i A_j^*`$.
    pub fn data_dependent(&self, i: usize, j: usize) -> Complex64 {
        match i.cmp(&j) {
            std::cmp::Ordering::Equal => Complex64::new(self.diagonal[i], 0.0),
            std::cmp::Ordering::Less => self.off_diagonal[triangle_index(self.trees.len(), i, j)],
            std::cmp::Ordering::Greater => self.off_diagonal[triangle_index(self.trees.len(), j, i)].conj(),
        }
    }

    /// The full Hermitian matrix $`a\, f_i f_j^* M_{ij}`$; its entries sum to
    /// [`DecayTreeVectorIntegral::integral`].
    pub fn integrals(&self) -> DMatrix<Complex64> {
        let a = self.admixture.value();
        let f: Vec<Complex64> = self
            .trees
            .iter()
            .map(|t| t.data_independent_amplitude())
            .collect();
        DMatrix::from_fn(self.trees.len(), self.trees.len(), |i, j| {
            a * f[i] * f[j].conj() * self.data_dependent(i, j)
        })
    }

    /// The integrated component intensity.
    pub fn integral(&self) -> f64 {
        let a = self.admixture.value();
        let f: Vec<Complex64> = self
            .trees
            .iter()
            .map(|t| t.data_independent_amplitude())
            .collect();
        let mut total = CompensatedSum::<f64>::default();
        for i in 0..self.trees.len() {
            total += f[i].norm_sqr() * self.diagonal[i];
            for j in i + 1..self.trees.len() {
                total += 2.0 * (f[i] * f[j].conj() * self.data_dependent(i, j)).re;
            }
        }
        a * total.value()
    }

    /// The diagonal terms $`a |f_i|^2 M_{ii}`$ of every tree.
    pub fn diagonal_integrals(&self) -> Vec<f64> {
        let a = self.admixture.value();
        self.trees
            .iter()
            .zip(&self.diagonal)
            .map(|(t, d)| a * t.data_independent_amplitude().norm_sqr() * d)
            .collect()
    }

    fn needs_update(&self, model: &Model) -> bool {
        !self.calculated
            || self
                .trees
                .iter()
                .any(|t| t.data_dependent_status(model) == VariableStatus::Changed)
    }

    fn set(&mut self, sums: &TreeSums) {
        let n = sums.n as f64;
        self.diagonal = sums.diagonal.iter().map(|s| s.value() / n).collect();
        self.off_diagonal = sums.off_diagonal.iter().map(|s| s.value() / n).collect();
        self.n_points = sums.n;
        self.calculated = true;
    }
}

/// Integrals of every component of a [`Model`].
#[derive(Debug, Clone)]
pub struct ModelIntegral {
    model_id: u64,
    components: Vec<DecayTreeVectorIntegral>,
}

impl ModelIntegral {
    /// An uncalculated integral over the components of a locked model.
    ///
    /// # Errors
    ///
    /// [`SaplingError::ModelNotLocked`] if the model is not locked.
    pub fn new(model: &Model) -> SaplingResult<Self> {
        if !model.is_locked() {
            return Err(SaplingError::ModelNotLocked);
        }
        Ok(Self {
            model_id: model.id(),
            components: model
                .components()
                .iter()
                .map(|c| DecayTreeVectorIntegral::new(c.decay_trees().to_vec(), c.admixture().clone()))
                .collect(),
        })
    }

    pub fn components(&self) -> &[DecayTreeVectorIntegral] {
        &self.components
    }

    /// The integrated model intensity, summed over components.
    pub fn integral(&self) -> f64 {
        self.components.iter().map(|c| c.integral()).sum()
    }

    /// The Hermitian integral matrix of every component.
    pub fn integrals(&self) -> Vec<DMatrix<Complex64>> {
        self.components.iter().map(|c| c.integrals()).collect()
    }

    /// Each tree's diagonal integral divided by the total integral, per component.
    ///
    /// With interference between trees the fractions do not sum to one.
    ///
    /// # Errors
    ///
    /// [`SaplingError::Custom`] if the total integral is not positive, for example before
    /// integrating or when every free amplitude is zero.
    pub fn fit_fractions(&self) -> SaplingResult<Vec<Vec<f64>>> {
        let total = self.integral();
        if !(total > 0.0) {
            return Err(SaplingError::Custom(format!(
                "fit fractions are undefined for a total integral of {}",
                total
            )));
        }
        Ok(self
            .components
            .iter()
            .map(|c| c.diagonal_integrals().into_iter().map(|d| d / total).collect())
            .collect())
    }

    /// Mark every component uncalculated, for example before integrating a different sample.
    pub fn reset(&mut self) {
        self.components.iter_mut().for_each(|c| c.calculated = false);
    }

    fn check_model(&self, model: &Model) -> SaplingResult<()> {
        if model.id() != self.model_id {
            return Err(SaplingError::ModelMismatch {
                expected: self.model_id,
                found: model.id(),
            });
        }
        Ok(())
    }

    fn stale_components(&self, model: &Model) -> Vec<usize> {
        let stale: Vec<usize> = self
            .components
            .iter()
            .enumerate()
            .filter(|(_, c)| c.needs_update(model))
            .map(|(i, _)| i)
            .collect();
        debug!(
            "recalculating {} of {} component integrals",
            stale.len(),
            self.components.len()
        );
        stale
    }

    /// Sums over every partition of a data set, combined after all partitions finish.
    fn data_set_sums(
        &self,
        model: &Model,
        data: &mut DataSet,
        stale: &[usize],
        ctx: &ExecutionContext,
    ) -> SaplingResult<Vec<TreeSums>> {
        let trees: Vec<Vec<Arc<DecayTree>>> = stale
            .iter()
            .map(|&c| self.components[c].trees.clone())
            .collect();
        let partials = ctx.map_collect(data.partitions_mut(), |mut partition| {
            partition_sums(model, &mut partition, &trees)
        })?;
        let mut totals: Vec<TreeSums> = trees.iter().map(|t| TreeSums::new(t.len())).collect();
        for partial in partials {
            for (total, sums) in totals.iter_mut().zip(partial) {
                *total = &*total + sums;
            }
        }
        Ok(totals)
    }

    /// Integrate over a data set (typically phase-space Monte Carlo), recomputing only the
    /// components that are uncalculated or whose trees depend on a changed parameter.
    ///
    /// The stored matrices belong to the sample they were computed from; call
    /// [`ModelIntegral::reset`] before switching samples.
    ///
    /// # Errors
    ///
    /// [`SaplingError::ModelMismatch`] for data or a model other than the one the integral was
    /// built for, [`SaplingError::Custom`] for an empty data set, and any evaluation error.
    pub fn integrate(&mut self, model: &Model, data: &mut DataSet, ctx: &ExecutionContext) -> SaplingResult<()> {
        self.check_model(model)?;
        if data.model_id() != self.model_id {
            return Err(SaplingError::ModelMismatch {
                expected: self.model_id,
                found: data.model_id(),
            });
        }
        if data.is_empty() {
            return Err(SaplingError::Custom("cannot integrate over an empty data set".to_string()));
        }
        let stale = self.stale_components(model);
        if stale.is_empty() {
            return Ok(());
        }
        let totals = self.data_set_sums(model, data, &stale, ctx)?;
        for (c, sums) in stale.into_iter().zip(totals) {
            self.components[c].set(&sums);
        }
        Ok(())
    }

    /// Integrate over `n_points` freshly generated phase-space points, in batches of at most
    /// `batch_size` points each split into one partition per thread of `ctx`.
    ///
    /// Points are drawn from `generator` on the caller thread, so the result depends only on
    /// the generator state and not on the thread policy.
    ///
    /// # Errors
    ///
    /// [`SaplingError::Custom`] for zero points or a zero batch size, and the errors of
    /// generation and evaluation.
    pub fn integrate_generated(
        &mut self,
        model: &Model,
        generator: &mut PhspGenerator,
        n_points: usize,
        batch_size: usize,
        ctx: &ExecutionContext,
    ) -> SaplingResult<()> {
        self.check_model(model)?;
        if n_points == 0 || batch_size == 0 {
            return Err(SaplingError::Custom(
                "generated integration needs a positive number of points and batch size".to_string(),
            ));
        }
        let stale = self.stale_components(model);
        if stale.is_empty() {
            return Ok(());
        }
        let mut totals: Vec<TreeSums> = stale
            .iter()
            .map(|&c| TreeSums::new(self.components[c].trees.len()))
            .collect();
        let mut remaining = n_points;
        while remaining > 0 {
            let n = remaining.min(batch_size);
            let mut batch = model.create_data_set()?;
            for event in generator.generate_n(n)? {
                batch.push(model, event)?;
            }
            batch.partition(ctx.n_threads());
            trace!("integrating batch of {} points in {} partitions", n, batch.n_partitions());
            let sums = self.data_set_sums(model, &mut batch, &stale, ctx)?;
            for (total, partial) in totals.iter_mut().zip(sums) {
                *total = &*total + partial;
            }
            remaining -= n;
        }
        for (c, sums) in stale.into_iter().zip(totals) {
            self.components[c].set(&sums);
        }
        Ok(())
    }
}

fn partition_sums(
    model: &Model,
    partition: &mut DataPartition<'_>,
    trees: &[Vec<Arc<DecayTree>>],
) -> SaplingResult<Vec<TreeSums>> {
    model.calculate_partition(partition)?;
    let mut sums: Vec<TreeSums> = trees.iter().map(|t| TreeSums::new(t.len())).collect();
    for point in partition.points() {
        for (component, sum) in trees.iter().zip(sums.iter_mut()) {
            let amplitudes = component
                .iter()
                .map(|t| t.data_dependent_amplitude(model, point))
                .collect::<SaplingResult<Vec<Complex64>>>()?;
            sum.accumulate(&amplitudes);
        }
    }
    Ok(sums)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::{
        execution::ThreadPolicy,
        test_models::{d3pi, d4pi, generate_events, D_PLUS_MASS},
        utils::enums::Formalism,
    };

    fn set_free_amplitudes(model: &Model) {
        for (k, fa) in model
            .free_amplitudes()
            .into_iter()
            .filter(|fa| !fa.parameter().is_fixed())
            .enumerate()
        {
            fa.set_value(Complex64::from_polar(1.0 + 0.3 * k as f64, 0.7 * k as f64))
                .unwrap();
        }
    }

    fn brute_force(model: &Model, data: &mut DataSet) -> f64 {
        model.calculate(data, &ExecutionContext::default()).unwrap();
        let intensities = model.intensities(data).unwrap();
        intensities.iter().sum::<f64>() / intensities.len() as f64
    }

    fn parallel_context() -> ExecutionContext {
        #[cfg(feature = "rayon")]
        return ExecutionContext::new(ThreadPolicy::Dedicated(3)).unwrap();
        #[cfg(not(feature = "rayon"))]
        return ExecutionContext::new(ThreadPolicy::Single).unwrap();
    }

    #[test]
    fn test_triangle_index() {
        let n = 4;
        let mut expected = 0;
        for i in 0..n {
            for j in i + 1..n {
                assert_eq!(triangle_index(n, i, j), expected);
                expected += 1;
            }
        }
    }

    #[test]
    fn test_three_body_integral_matches_brute_force() {
        let model = d3pi(Formalism::Helicity);
        set_free_amplitudes(&model);
        let mut data = model.create_data_set().unwrap();
        for event in generate_events(&model, 200, 21) {
            data.push(&model, event).unwrap();
        }
        let expected = brute_force(&model, &mut data);

        let mut serial = ModelIntegral::new(&model).unwrap();
        serial
            .integrate(&model, &mut data, &ExecutionContext::default())
            .unwrap();
        assert_relative_eq!(serial.integral(), expected, max_relative = 1e-10);
        assert_eq!(serial.components()[0].n_points(), 200);

        data.partition(5);
        let mut partitioned = ModelIntegral::new(&model).unwrap();
        partitioned
            .integrate(&model, &mut data, &parallel_context())
            .unwrap();
        assert_relative_eq!(partitioned.integral(), serial.integral(), max_relative = 1e-12);

        let total: Complex64 = serial.integrals()[0].iter().sum();
        assert_relative_eq!(total.re, expected, max_relative = 1e-10);
        assert_relative_eq!(total.im, 0.0, epsilon = 1e-10 * expected);
    }

    #[test]
    fn test_four_body_integral_matches_brute_force() {
        let model = d4pi();
        set_free_amplitudes(&model);
        let mut data = model.create_data_set().unwrap();
        for event in generate_events(&model, 100, 4) {
            data.push(&model, event).unwrap();
        }
        let expected = brute_force(&model, &mut data);
        data.partition(3);
        let mut integral = ModelIntegral::new(&model).unwrap();
        integral.integrate(&model, &mut data, &parallel_context()).unwrap();
        assert_relative_eq!(integral.integral(), expected, max_relative = 1e-10);
    }

    #[test]
    fn test_free_amplitude_changes_reuse_integrals() {
        let model = d3pi(Formalism::Helicity);
        let ctx = ExecutionContext::default();
        let mut data = model.create_data_set().unwrap();
        for event in generate_events(&model, 50, 8) {
            data.push(&model, event).unwrap();
        }
        let mut integral = ModelIntegral::new(&model).unwrap();
        integral.integrate(&model, &mut data, &ctx).unwrap();
        model.set_parameter_flags_to_unchanged();
        let matrix = integral.components()[0].data_dependent(0, 1);

        set_free_amplitudes(&model);
        let component = &integral.components()[0];
        assert!(!component.needs_update(&model));
        assert_eq!(component.data_dependent(0, 1), matrix);
        assert_eq!(component.data_dependent(1, 0), matrix.conj());
        assert_relative_eq!(integral.integral(), brute_force(&model, &mut data), max_relative = 1e-10);
    }

    #[test]
    fn test_fit_fractions() {
        let model = d3pi(Formalism::Zemach);
        let mut data = model.create_data_set().unwrap();
        for event in generate_events(&model, 100, 2) {
            data.push(&model, event).unwrap();
        }
        let mut integral = ModelIntegral::new(&model).unwrap();
        integral
            .integrate(&model, &mut data, &ExecutionContext::default())
            .unwrap();
        let fractions = integral.fit_fractions().unwrap();
        assert_eq!(fractions.len(), 1);
        assert_eq!(fractions[0].len(), 2);
        assert!(fractions[0].iter().all(|&f| f > 0.0));
        let matrix = &integral.integrals()[0];
        let interference = 2.0 * matrix[(0, 1)].re / integral.integral();
        assert_relative_eq!(fractions[0].iter().sum::<f64>() + interference, 1.0, max_relative = 1e-10);
    }

    #[test]
    fn test_fit_fractions_need_a_positive_integral() {
        let model = d3pi(Formalism::Zemach);
        let mut integral = ModelIntegral::new(&model).unwrap();
        assert!(matches!(integral.fit_fractions(), Err(SaplingError::Custom(_))));

        let mut data = model.create_data_set().unwrap();
        for event in generate_events(&model, 20, 4) {
            data.push(&model, event).unwrap();
        }
        for fa in model
            .free_amplitudes()
            .into_iter()
            .filter(|fa| !fa.parameter().is_fixed())
        {
            fa.set_value(Complex64::ZERO).unwrap();
        }
        integral
            .integrate(&model, &mut data, &ExecutionContext::default())
            .unwrap();
        assert_eq!(integral.integral(), 0.0);
        assert!(matches!(integral.fit_fractions(), Err(SaplingError::Custom(_))));
    }

    #[test]
    fn test_generated_integral_is_reproducible() {
        let model = d3pi(Formalism::Helicity);
        let axes = model.default_mass_axes().unwrap();
        let masses = model.final_state_masses();
        let mut integral = ModelIntegral::new(&model).unwrap();
        let mut generator = PhspGenerator::new(D_PLUS_MASS, masses.clone(), axes.clone(), 17, 1000).unwrap();
        integral
            .integrate_generated(&model, &mut generator, 90, 40, &parallel_context())
            .unwrap();
        assert_eq!(integral.components()[0].n_points(), 90);

        let mut data = model.create_data_set().unwrap();
        let mut generator = PhspGenerator::new(D_PLUS_MASS, masses, axes, 17, 1000).unwrap();
        for event in generator.generate_n(90).unwrap() {
            data.push(&model, event).unwrap();
        }
        assert_relative_eq!(integral.integral(), brute_force(&model, &mut data), max_relative = 1e-10);

        let mut generator = PhspGenerator::new(D_PLUS_MASS, model.final_state_masses(), model.default_mass_axes().unwrap(), 17, 1000).unwrap();
        assert!(integral
            .integrate_generated(&model, &mut generator, 0, 10, &ExecutionContext::default())
            .is_err());
    }

    #[test]
    fn test_integral_rejects_other_models() {
        let model = d3pi(Formalism::Helicity);
        let other = d3pi(Formalism::Helicity);
        let mut data = other.create_data_set().unwrap();
        for event in generate_events(&other, 3, 1) {
            data.push(&other, event).unwrap();
        }
        let mut integral = ModelIntegral::new(&model).unwrap();
        assert!(matches!(
            integral.integrate(&model, &mut data, &ExecutionContext::default()),
            Err(SaplingError::ModelMismatch { .. })
        ));
        assert!(matches!(
            integral.integrate(&other, &mut data, &ExecutionContext::default()),
            Err(SaplingError::ModelMismatch { .. })
        ));
    }
}
