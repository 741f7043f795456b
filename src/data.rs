use std::{ops::Index, sync::Arc};

use num::complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::{
    accessors::DataAccessor,
    model::Model,
    status::StatusManager,
    utils::vectors::Vec4,
    SaplingError, SaplingResult,
};

/// One event: the final-state four-momenta and the cached values of every data accessor.
///
/// The cache is laid out as one flat `Vec<f64>` per accessor, sized when the owning
/// [`Model`] was locked.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    final_state: Vec<Vec4>,
    data: Vec<Vec<f64>>,
}

impl DataPoint {
    /// A point with zeroed storage for accessors of the given sizes.
    pub fn new(final_state: Vec<Vec4>, layout: &[usize]) -> Self {
        Self {
            final_state,
            data: layout.iter().map(|&n| vec![0.0; n]).collect(),
        }
    }
    /// The final-state four-momenta, in the model's final-state order.
    pub fn final_state(&self) -> &[Vec4] {
        &self.final_state
    }

    #[inline]
    pub fn get(&self, accessor: &DataAccessor, sym: usize, k: usize) -> &[f64] {
        let offset = accessor.offset(sym, k);
        &self.data[accessor.index()][offset..offset + accessor.width()]
    }
    #[inline]
    pub fn set(&mut self, accessor: &DataAccessor, sym: usize, k: usize, values: &[f64]) {
        let offset = accessor.offset(sym, k);
        self.data[accessor.index()][offset..offset + values.len()].copy_from_slice(values);
    }
    #[inline]
    pub fn get_scalar(&self, accessor: &DataAccessor, sym: usize, k: usize) -> f64 {
        self.get(accessor, sym, k)[0]
    }
    #[inline]
    pub fn set_scalar(&mut self, accessor: &DataAccessor, sym: usize, k: usize, value: f64) {
        self.set(accessor, sym, k, &[value]);
    }
    #[inline]
    pub fn get_cscalar(&self, accessor: &DataAccessor, sym: usize, k: usize) -> Complex64 {
        let v = self.get(accessor, sym, k);
        Complex64::new(v[0], v[1])
    }
    #[inline]
    pub fn set_cscalar(&mut self, accessor: &DataAccessor, sym: usize, k: usize, value: Complex64) {
        self.set(accessor, sym, k, &[value.re, value.im]);
    }
    #[inline]
    pub fn get_vec4(&self, accessor: &DataAccessor, sym: usize, k: usize) -> Vec4 {
        let v = self.get(accessor, sym, k);
        Vec4::new(v[0], v[1], v[2], v[3])
    }
    #[inline]
    pub fn set_vec4(&mut self, accessor: &DataAccessor, sym: usize, k: usize, value: &Vec4) {
        self.set(accessor, sym, k, &[value.x, value.y, value.z, value.t]);
    }

    /// Number of bytes held by the cache.
    pub fn data_size(&self) -> usize {
        self.data.iter().map(|d| d.len()).sum::<usize>() * std::mem::size_of::<f64>()
    }
}

#[derive(Clone, Debug)]
struct Block {
    len: usize,
    status: StatusManager,
}

/// A collection of [`DataPoint`]s created for one [`Model`], split into partitions that are
/// evaluated independently.
///
/// Each partition carries its own [`StatusManager`], so a worker only ever writes the points and
/// statuses of the partition it owns.
#[derive(Clone, Debug)]
pub struct DataSet {
    model_id: u64,
    n_final_state: usize,
    layout: Arc<[usize]>,
    symmetrizations: Arc<[usize]>,
    points: Vec<DataPoint>,
    blocks: Vec<Block>,
}

impl DataSet {
    pub(crate) fn new(model_id: u64, n_final_state: usize, layout: Vec<usize>, symmetrizations: Vec<usize>) -> Self {
        let status = StatusManager::new(&symmetrizations);
        Self {
            model_id,
            n_final_state,
            layout: layout.into(),
            symmetrizations: symmetrizations.into(),
            points: Vec::new(),
            blocks: vec![Block { len: 0, status }],
        }
    }

    /// Id of the [`Model`] this data set was created for.
    pub fn model_id(&self) -> u64 {
        self.model_id
    }
    pub(crate) fn layout(&self) -> &[usize] {
        &self.layout
    }
    pub fn len(&self) -> usize {
        self.points.len()
    }
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
    pub fn points(&self) -> &[DataPoint] {
        &self.points
    }
    pub fn iter(&self) -> std::slice::Iter<'_, DataPoint> {
        self.points.iter()
    }
    pub fn get(&self, index: usize) -> Option<&DataPoint> {
        self.points.get(index)
    }

    /// Compute the cached values of a new event with `model` and append it to the last
    /// partition.
    ///
    /// # Errors
    ///
    /// [`SaplingError::ModelMismatch`] if this data set belongs to another model, and the errors
    /// of [`Model::create_data_point`].
    pub fn push(&mut self, model: &Model, momenta: Vec<Vec4>) -> SaplingResult<()> {
        if model.id() != self.model_id {
            return Err(SaplingError::ModelMismatch {
                expected: model.id(),
                found: self.model_id,
            });
        }
        let point = model.create_data_point(momenta)?;
        self.push_point(point);
        Ok(())
    }

    pub(crate) fn push_point(&mut self, point: DataPoint) {
        self.points.push(point);
        if let Some(last) = self.blocks.last_mut() {
            last.len += 1;
            last.status.reset();
        }
    }

    /// Move every point of `other` into the last partition of this data set.
    ///
    /// # Errors
    ///
    /// [`SaplingError::InconsistentDataSets`] if the two sets belong to different models or
    /// have different layouts.
    pub fn append(&mut self, other: DataSet) -> SaplingResult<()> {
        if other.model_id != self.model_id
            || other.n_final_state != self.n_final_state
            || other.layout != self.layout
        {
            return Err(SaplingError::InconsistentDataSets(format!(
                "cannot append data of model {} ({} final-state particles) to data of model {} ({} final-state particles)",
                other.model_id, other.n_final_state, self.model_id, self.n_final_state
            )));
        }
        for point in other.points {
            self.push_point(point);
        }
        Ok(())
    }

    /// Redistribute the points over `n` partitions of near-equal size. Every cached
    /// recalculable value is flagged for recomputation.
    pub fn partition(&mut self, n: usize) {
        let n = n.max(1);
        let base = self.points.len() / n;
        let extra = self.points.len() % n;
        self.blocks = (0..n)
            .map(|i| Block {
                len: base + usize::from(i < extra),
                status: StatusManager::new(&self.symmetrizations),
            })
            .collect();
    }
    pub fn n_partitions(&self) -> usize {
        self.blocks.len()
    }

    /// Mutable views of every partition.
    pub fn partitions_mut(&mut self) -> Vec<DataPartition<'_>> {
        let model_id = self.model_id;
        let mut rest: &mut [DataPoint] = &mut self.points;
        let mut partitions = Vec::with_capacity(self.blocks.len());
        for (index, block) in self.blocks.iter_mut().enumerate() {
            let (points, tail) = std::mem::take(&mut rest).split_at_mut(block.len);
            rest = tail;
            partitions.push(DataPartition {
                index,
                model_id,
                points,
                status: &mut block.status,
            });
        }
        partitions
    }

    /// Remove all points.
    pub fn clear(&mut self) {
        self.points.clear();
        let status = StatusManager::new(&self.symmetrizations);
        self.blocks = vec![Block { len: 0, status }];
    }

    /// Number of bytes held by the cached values of all points.
    pub fn data_size(&self) -> usize {
        self.points.iter().map(|p| p.data_size()).sum()
    }
}

impl Index<usize> for DataSet {
    type Output = DataPoint;

    fn index(&self, index: usize) -> &Self::Output {
        &self.points[index]
    }
}

impl<'a> IntoIterator for &'a DataSet {
    type Item = &'a DataPoint;
    type IntoIter = std::slice::Iter<'a, DataPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

/// A contiguous slice of a [`DataSet`] with its own calculation statuses.
#[derive(Debug)]
pub struct DataPartition<'a> {
    index: usize,
    model_id: u64,
    points: &'a mut [DataPoint],
    status: &'a mut StatusManager,
}

impl<'a> DataPartition<'a> {
    pub fn index(&self) -> usize {
        self.index
    }
    pub fn model_id(&self) -> u64 {
        self.model_id
    }
    pub fn len(&self) -> usize {
        self.points.len()
    }
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
    pub fn points(&self) -> &[DataPoint] {
        self.points
    }
    pub fn points_mut(&mut self) -> &mut [DataPoint] {
        self.points
    }
    pub fn status(&self) -> &StatusManager {
        self.status
    }
    pub fn status_mut(&mut self) -> &mut StatusManager {
        self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{particle_combination::Equiv, status::CalculationStatus};

    fn empty_set(n: usize) -> DataSet {
        let mut data = DataSet::new(3, 2, vec![4, 2], vec![1, 1]);
        for i in 0..n {
            data.push_point(DataPoint::new(
                vec![Vec4::new(0.0, 0.0, i as f64, 1.0 + i as f64); 2],
                &[4, 2],
            ));
        }
        data
    }

    #[test]
    fn test_point_storage() {
        let vec4 = DataAccessor::new(0, "p", Equiv::OrderlessContent, 1, 4);
        let complex = DataAccessor::new(1, "c", Equiv::OrderlessContent, 1, 2);
        let mut point = DataPoint::new(vec![Vec4::default()], &[8, 2]);
        point.set_vec4(&vec4, 1, 0, &Vec4::new(1.0, 2.0, 3.0, 4.0));
        point.set_cscalar(&complex, 0, 0, Complex64::new(0.5, -0.5));
        assert_eq!(point.get_vec4(&vec4, 1, 0), Vec4::new(1.0, 2.0, 3.0, 4.0));
        assert_eq!(point.get_vec4(&vec4, 0, 0), Vec4::default());
        assert_eq!(point.get_cscalar(&complex, 0, 0), Complex64::new(0.5, -0.5));
        assert_eq!(point.get_scalar(&complex, 0, 0), 0.5);
        assert_eq!(point.data_size(), 10 * 8);
    }

    #[test]
    fn test_partitioning() {
        let mut data = empty_set(10);
        assert_eq!(data.n_partitions(), 1);
        data.partition(3);
        let sizes: Vec<usize> = data.partitions_mut().iter().map(|p| p.len()).collect();
        assert_eq!(sizes, vec![4, 3, 3]);
        let first: Vec<f64> = data.partitions_mut()[1]
            .points()
            .iter()
            .map(|p| p.final_state()[0].z)
            .collect();
        assert_eq!(first, vec![4.0, 5.0, 6.0]);
        data.push_point(DataPoint::new(vec![Vec4::default(); 2], &[4, 2]));
        assert_eq!(data.partitions_mut()[2].len(), 4);
        data.partition(20);
        assert_eq!(data.partitions_mut().iter().map(|p| p.len()).sum::<usize>(), 11);
    }

    #[test]
    fn test_partition_statuses_are_independent() {
        let mut data = empty_set(4);
        data.partition(2);
        {
            let mut partitions = data.partitions_mut();
            partitions[0]
                .status_mut()
                .set(1, 0, CalculationStatus::Calculated);
        }
        let partitions = data.partitions_mut();
        assert_eq!(partitions[0].status().get(1, 0), CalculationStatus::Calculated);
        assert_eq!(partitions[1].status().get(1, 0), CalculationStatus::Uncalculated);
    }

    #[test]
    fn test_append_checks_consistency() {
        let mut a = empty_set(2);
        let b = empty_set(3);
        a.append(b).unwrap();
        assert_eq!(a.len(), 5);
        let c = DataSet::new(4, 2, vec![4, 2], vec![1, 1]);
        assert!(matches!(a.append(c), Err(SaplingError::InconsistentDataSets(_))));
        a.clear();
        assert!(a.is_empty());
    }
}
