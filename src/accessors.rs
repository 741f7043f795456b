use std::{fmt::Debug, sync::Arc};

use nalgebra::Matrix4;
use num::complex::Complex64;

use crate::{
    data::{DataPartition, DataPoint},
    mass_shapes::breakup_momentum_squared,
    model::Model,
    parameters::{combined_status, ParameterBase, VariableStatus},
    particle_combination::{Equiv, ParticleCombination},
    status::{CalculationStatus, StatusManager},
    utils::{
        geometry::{helicity_frame, rest_frame_boost, transform, CoordinateSystem},
        vectors::Vec4,
    },
    SaplingError, SaplingResult,
};

/// Bookkeeping for one cached quantity of a [`DataPoint`].
///
/// Every [`ParticleCombination`] the quantity is needed for is registered with the accessor and
/// assigned a symmetrization index. Combinations that are equivalent under the accessor's
/// [`Equiv`] policy share an index, so their value is computed and stored once. Each
/// symmetrization index holds `n_values` values of `width` reals.
#[derive(Debug, Clone)]
pub struct DataAccessor {
    index: usize,
    name: String,
    equiv: Equiv,
    n_values: usize,
    width: usize,
    symmetrizations: Vec<(Arc<ParticleCombination>, usize)>,
    representatives: Vec<Arc<ParticleCombination>>,
}

impl DataAccessor {
    /// Create an accessor occupying slot `index` of every [`DataPoint`].
    pub fn new(index: usize, name: &str, equiv: Equiv, n_values: usize, width: usize) -> Self {
        Self {
            index,
            name: name.to_string(),
            equiv,
            n_values,
            width,
            symmetrizations: Vec::new(),
            representatives: Vec::new(),
        }
    }
    pub fn index(&self) -> usize {
        self.index
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn equiv(&self) -> Equiv {
        self.equiv
    }
    pub fn n_values(&self) -> usize {
        self.n_values
    }
    pub fn width(&self) -> usize {
        self.width
    }
    /// Number of distinct symmetrization indices.
    pub fn n_symmetrizations(&self) -> usize {
        self.representatives.len()
    }
    /// Number of reals this accessor occupies in a [`DataPoint`].
    pub fn size(&self) -> usize {
        self.n_symmetrizations() * self.n_values * self.width
    }
    /// Position of value `k` of symmetrization index `sym` in this accessor's storage.
    pub fn offset(&self, sym: usize, k: usize) -> usize {
        (sym * self.n_values + k) * self.width
    }

    /// Register `pc` and return its symmetrization index.
    ///
    /// A combination equivalent to an already registered one reuses that one's index.
    pub fn register(&mut self, pc: &Arc<ParticleCombination>) -> SaplingResult<usize> {
        if let Some((_, sym)) = self.symmetrizations.iter().find(|(p, _)| Arc::ptr_eq(p, pc)) {
            return Ok(*sym);
        }
        let mut found = None;
        for (sym, rep) in self.representatives.iter().enumerate() {
            if self.equiv.equivalent(rep, pc)? {
                found = Some(sym);
                break;
            }
        }
        let sym = match found {
            Some(sym) => sym,
            None => {
                self.representatives.push(pc.clone());
                self.representatives.len() - 1
            }
        };
        self.symmetrizations.push((pc.clone(), sym));
        Ok(sym)
    }

    /// Returns `true` if `pc` itself has been registered.
    pub fn contains(&self, pc: &Arc<ParticleCombination>) -> bool {
        self.symmetrizations.iter().any(|(p, _)| Arc::ptr_eq(p, pc))
    }

    /// The symmetrization index of `pc`, looked up by reference first and by equivalence second.
    ///
    /// # Errors
    ///
    /// [`SaplingError::SymmetrizationIndexNotFound`] if no registered combination matches.
    pub fn symmetrization_index(&self, pc: &Arc<ParticleCombination>) -> SaplingResult<usize> {
        if let Some((_, sym)) = self.symmetrizations.iter().find(|(p, _)| Arc::ptr_eq(p, pc)) {
            return Ok(*sym);
        }
        for (p, sym) in &self.symmetrizations {
            if self.equiv.equivalent(p, pc)? {
                return Ok(*sym);
            }
        }
        Err(SaplingError::SymmetrizationIndexNotFound { pc: pc.to_string() })
    }

    /// One representative combination per symmetrization index.
    pub fn representatives(&self) -> impl Iterator<Item = (usize, &Arc<ParticleCombination>)> {
        self.representatives.iter().enumerate()
    }
    /// Every registered combination with its symmetrization index.
    pub fn symmetrizations(&self) -> &[(Arc<ParticleCombination>, usize)] {
        &self.symmetrizations
    }
}

/// Four-momenta of every registered particle combination.
#[derive(Debug, Clone)]
pub struct FourMomenta {
    accessor: DataAccessor,
}

impl FourMomenta {
    pub fn new(index: usize) -> Self {
        Self {
            accessor: DataAccessor::new(index, "four_momenta", Equiv::OrderlessContent, 1, 4),
        }
    }
    pub fn accessor(&self) -> &DataAccessor {
        &self.accessor
    }
    pub(crate) fn accessor_mut(&mut self) -> &mut DataAccessor {
        &mut self.accessor
    }

    /// Fill the cache of `point` from its final-state momenta.
    pub fn calculate(&self, point: &mut DataPoint) -> SaplingResult<()> {
        for (sym, pc) in self.accessor.representatives() {
            let mut p = Vec4::default();
            for &i in pc.indices() {
                let fs = point.final_state().get(i).ok_or(SaplingError::FinalStateCountMismatch {
                    expected: i + 1,
                    found: point.final_state().len(),
                })?;
                p += fs;
            }
            point.set_vec4(&self.accessor, sym, 0, &p);
        }
        Ok(())
    }

    pub fn p(&self, point: &DataPoint, pc: &Arc<ParticleCombination>) -> SaplingResult<Vec4> {
        let sym = self.accessor.symmetrization_index(pc)?;
        Ok(point.get_vec4(&self.accessor, sym, 0))
    }
    pub fn m2(&self, point: &DataPoint, pc: &Arc<ParticleCombination>) -> SaplingResult<f64> {
        Ok(self.p(point, pc)?.m2())
    }
    pub fn m(&self, point: &DataPoint, pc: &Arc<ParticleCombination>) -> SaplingResult<f64> {
        Ok(self.p(point, pc)?.m())
    }
}

/// Helicity angles $`(\phi, \theta)`$ of the first daughter of every registered two-body
/// combination, measured in the helicity frame of the combination.
#[derive(Debug, Clone)]
pub struct HelicityAngles {
    accessor: DataAccessor,
}

impl HelicityAngles {
    pub fn new(index: usize) -> Self {
        Self {
            accessor: DataAccessor::new(index, "helicity_angles", Equiv::UpAndDown, 1, 2),
        }
    }
    pub fn accessor(&self) -> &DataAccessor {
        &self.accessor
    }
    pub(crate) fn accessor_mut(&mut self) -> &mut DataAccessor {
        &mut self.accessor
    }

    /// Fill the cache of `point`, walking down from each initial-state combination in `origins`.
    pub fn calculate(
        &self,
        point: &mut DataPoint,
        four_momenta: &FourMomenta,
        origins: &[Arc<ParticleCombination>],
        frame: &CoordinateSystem,
    ) -> SaplingResult<()> {
        for pc in origins {
            self.calculate_from(point, four_momenta, pc, frame, &Matrix4::identity())?;
        }
        Ok(())
    }

    fn calculate_from(
        &self,
        point: &mut DataPoint,
        four_momenta: &FourMomenta,
        pc: &Arc<ParticleCombination>,
        frame: &CoordinateSystem,
        boosts: &Matrix4<f64>,
    ) -> SaplingResult<()> {
        let p = transform(boosts, &four_momenta.p(point, pc)?);
        let helicity = helicity_frame(&p.vec3(), frame);
        let boosts = rest_frame_boost(&p) * boosts;
        if pc.daughters().len() == 2 && self.accessor.contains(pc) {
            let first = transform(&boosts, &four_momenta.p(point, &pc.daughters()[0])?);
            let (phi, theta) = helicity.angles(&first.vec3());
            let sym = self.accessor.symmetrization_index(pc)?;
            point.set(&self.accessor, sym, 0, &[phi, theta]);
        }
        for d in pc.daughters() {
            if !d.is_final_state() {
                self.calculate_from(point, four_momenta, d, &helicity, &boosts)?;
            }
        }
        Ok(())
    }

    pub fn angles(&self, point: &DataPoint, pc: &Arc<ParticleCombination>) -> SaplingResult<(f64, f64)> {
        let sym = self.accessor.symmetrization_index(pc)?;
        let v = point.get(&self.accessor, sym, 0);
        Ok((v[0], v[1]))
    }
    pub fn phi(&self, point: &DataPoint, pc: &Arc<ParticleCombination>) -> SaplingResult<f64> {
        Ok(self.angles(point, pc)?.0)
    }
    pub fn theta(&self, point: &DataPoint, pc: &Arc<ParticleCombination>) -> SaplingResult<f64> {
        Ok(self.angles(point, pc)?.1)
    }
}

/// Squared breakup momenta of registered two-body combinations, computed from the measured
/// daughter masses.
#[derive(Debug, Clone)]
pub struct MeasuredBreakupMomenta {
    accessor: DataAccessor,
}

impl MeasuredBreakupMomenta {
    pub fn new(index: usize) -> Self {
        Self {
            accessor: DataAccessor::new(index, "breakup_momenta", Equiv::DownByOrderlessContent, 1, 1),
        }
    }
    pub fn accessor(&self) -> &DataAccessor {
        &self.accessor
    }
    pub(crate) fn accessor_mut(&mut self) -> &mut DataAccessor {
        &mut self.accessor
    }

    pub fn calculate(&self, point: &mut DataPoint, four_momenta: &FourMomenta) -> SaplingResult<()> {
        for (sym, pc) in self.accessor.representatives() {
            if pc.daughters().len() != 2 {
                return Err(SaplingError::NotTwoBody(pc.daughters().len()));
            }
            let s = four_momenta.m2(point, pc)?;
            let ma = four_momenta.m(point, &pc.daughters()[0])?;
            let mb = four_momenta.m(point, &pc.daughters()[1])?;
            point.set_scalar(&self.accessor, sym, 0, breakup_momentum_squared(s, ma, mb));
        }
        Ok(())
    }

    pub fn q2(&self, point: &DataPoint, pc: &Arc<ParticleCombination>) -> SaplingResult<f64> {
        let sym = self.accessor.symmetrization_index(pc)?;
        Ok(point.get_scalar(&self.accessor, sym, 0))
    }
    pub fn q(&self, point: &DataPoint, pc: &Arc<ParticleCombination>) -> SaplingResult<f64> {
        Ok(self.q2(point, pc)?.sqrt())
    }
}

/// A cached complex quantity that depends on fit parameters and is recomputed only when one of
/// them changes.
///
/// Implementors supply [`evaluate`](RecalculableAccessor::evaluate); the cache handling comes
/// from the provided methods.
pub trait RecalculableAccessor: Send + Sync + Debug {
    fn accessor(&self) -> &DataAccessor;
    fn accessor_mut(&mut self) -> &mut DataAccessor;
    /// Name used in logs and tree labels.
    fn label(&self) -> String;
    /// The fit parameters the cached values depend on.
    fn parameters(&self) -> Vec<&dyn ParameterBase>;
    /// Compute the value for one data point and one particle combination.
    fn evaluate(&self, model: &Model, point: &DataPoint, pc: &Arc<ParticleCombination>) -> SaplingResult<Complex64>;

    /// [`VariableStatus::Changed`] if any parameter has changed since the last sweep.
    fn status(&self) -> VariableStatus {
        combined_status(self.parameters())
    }

    /// Mark every symmetrization index uncalculated if a parameter changed.
    fn update_calculation_status(&self, status: &mut StatusManager) {
        if self.status() == VariableStatus::Changed {
            status.set_all(self.accessor().index(), CalculationStatus::Uncalculated);
        }
    }

    /// Recompute the uncalculated symmetrization indices over a whole partition.
    fn calculate(&self, model: &Model, partition: &mut DataPartition<'_>) -> SaplingResult<()> {
        let accessor = self.accessor();
        for (sym, pc) in accessor.representatives() {
            if partition.status().get(accessor.index(), sym) == CalculationStatus::Calculated {
                continue;
            }
            for point in partition.points_mut().iter_mut() {
                let value = self.evaluate(model, point, pc)?;
                point.set_cscalar(accessor, sym, 0, value);
            }
            partition
                .status_mut()
                .set(accessor.index(), sym, CalculationStatus::Calculated);
        }
        Ok(())
    }

    /// The cached value for `pc`.
    fn value(&self, point: &DataPoint, pc: &Arc<ParticleCombination>) -> SaplingResult<Complex64> {
        let accessor = self.accessor();
        let sym = accessor.symmetrization_index(pc)?;
        Ok(point.get_cscalar(accessor, sym, 0))
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::particle_combination::ParticleCombinationCache;

    fn three_body() -> (ParticleCombinationCache, Arc<ParticleCombination>) {
        let mut cache = ParticleCombinationCache::default();
        let leaves: Vec<_> = (0..3).map(|i| cache.fsp(i)).collect();
        let pair = cache.composite(&leaves[..2]).unwrap();
        let top = cache.composite(&[pair, leaves[2].clone()]).unwrap();
        (cache, top)
    }

    fn register_all(accessor: &mut DataAccessor, pc: &Arc<ParticleCombination>) {
        accessor.register(pc).unwrap();
        for d in pc.daughters() {
            register_all(accessor, d);
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let (mut cache, top) = three_body();
        let mut accessor = DataAccessor::new(0, "test", Equiv::OrderlessContent, 2, 4);
        register_all(&mut accessor, &top);
        assert_eq!(accessor.n_symmetrizations(), 5);
        assert_eq!(accessor.size(), 5 * 2 * 4);
        assert_eq!(accessor.offset(1, 1), 12);
        let leaf = cache.fsp(2);
        assert!(!accessor.contains(&leaf));
        assert_eq!(
            accessor.symmetrization_index(&leaf).unwrap(),
            accessor.symmetrization_index(&top.daughters()[1]).unwrap()
        );
        let other = cache.fsp(7);
        assert!(matches!(
            accessor.symmetrization_index(&other),
            Err(SaplingError::SymmetrizationIndexNotFound { .. })
        ));
    }

    #[test]
    fn test_equivalent_combinations_share_an_index() {
        let mut cache = ParticleCombinationCache::default();
        let leaves: Vec<_> = (0..3).map(|i| cache.fsp(i)).collect();
        let ab = cache.composite(&leaves[..2]).unwrap();
        let ba = cache.composite(&[leaves[1].clone(), leaves[0].clone()]).unwrap();
        let mut accessor = DataAccessor::new(0, "test", Equiv::OrderlessContent, 1, 1);
        assert_eq!(accessor.register(&ab).unwrap(), 0);
        assert_eq!(accessor.register(&ba).unwrap(), 0);
        let mut ordered = DataAccessor::new(0, "test", Equiv::OrderedContent, 1, 1);
        assert_eq!(ordered.register(&ab).unwrap(), 0);
        assert_eq!(ordered.register(&ba).unwrap(), 1);
        assert_eq!(ordered.symmetrizations().len(), 2);
    }

    #[test]
    fn test_four_momenta_and_breakup() {
        let (_cache, top) = three_body();
        let mut fm = FourMomenta::new(0);
        register_all(fm.accessor_mut(), &top);
        let mut breakup = MeasuredBreakupMomenta::new(1);
        breakup.accessor_mut().register(&top.daughters()[0]).unwrap();
        let momenta = vec![
            Vec4::new(0.1, 0.2, 0.3, 0.5),
            Vec4::new(-0.3, 0.1, 0.0, 0.6),
            Vec4::new(0.2, -0.3, -0.3, 0.9),
        ];
        let mut point = DataPoint::new(momenta.clone(), &[fm.accessor().size(), breakup.accessor().size()]);
        fm.calculate(&mut point).unwrap();
        breakup.calculate(&mut point, &fm).unwrap();
        let total = fm.p(&point, &top).unwrap();
        assert_relative_eq!(total.e(), 2.0);
        assert_relative_eq!(total.vec3().mag(), 0.0, epsilon = 1e-15);
        let pair = &top.daughters()[0];
        let p01 = momenta[0] + momenta[1];
        assert_relative_eq!(fm.m2(&point, pair).unwrap(), p01.m2(), epsilon = 1e-14);
        let q2 = breakup.q2(&point, pair).unwrap();
        assert_relative_eq!(
            q2,
            breakup_momentum_squared(p01.m2(), momenta[0].m(), momenta[1].m()),
            epsilon = 1e-14
        );
        // the breakup momentum is the daughter momentum in the pair's rest frame
        let boosted = momenta[0].boost(&-p01.beta());
        assert_relative_eq!(q2, boosted.vec3().mag2(), epsilon = 1e-12);
    }

    #[test]
    fn test_helicity_angles_in_rest_frame() {
        let (_cache, top) = three_body();
        let mut fm = FourMomenta::new(0);
        register_all(fm.accessor_mut(), &top);
        let mut angles = HelicityAngles::new(1);
        angles.accessor_mut().register(&top).unwrap();
        angles.accessor_mut().register(&top.daughters()[0]).unwrap();
        let momenta = vec![
            Vec4::new(0.0, 0.0, 0.3, 0.5),
            Vec4::new(0.0, 0.0, 0.2, 0.6),
            Vec4::new(0.0, 0.0, -0.5, 0.9),
        ];
        let mut point = DataPoint::new(momenta, &[fm.accessor().size(), angles.accessor().size()]);
        fm.calculate(&mut point).unwrap();
        angles
            .calculate(&mut point, &fm, &[top.clone()], &CoordinateSystem::default())
            .unwrap();
        // the pair moves along +z, so its direction is the z axis
        let (phi, theta) = angles.angles(&point, &top).unwrap();
        assert_relative_eq!(theta, 0.0, epsilon = 1e-12);
        assert_relative_eq!(phi, theta, epsilon = 1e-12);
        assert!(angles.theta(&point, &top.daughters()[0]).unwrap().is_finite());
    }
}
