use serde::{Deserialize, Serialize};

/// Whether a cached value is current.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalculationStatus {
    Calculated,
    #[default]
    Uncalculated,
}

impl std::fmt::Display for CalculationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalculationStatus::Calculated => write!(f, "calculated"),
            CalculationStatus::Uncalculated => write!(f, "uncalculated"),
        }
    }
}

/// Per-partition calculation statuses, indexed by accessor and symmetrization index.
///
/// Each [`DataPartition`](crate::data::DataPartition) owns one manager, so statuses of
/// independent partitions can be updated concurrently.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusManager {
    statuses: Vec<Vec<CalculationStatus>>,
}

impl StatusManager {
    /// A manager with every entry [`CalculationStatus::Uncalculated`], sized by the number of
    /// symmetrization indices of each accessor.
    pub fn new(symmetrizations: &[usize]) -> Self {
        Self {
            statuses: symmetrizations
                .iter()
                .map(|&n| vec![CalculationStatus::Uncalculated; n])
                .collect(),
        }
    }
    pub fn get(&self, accessor: usize, sym: usize) -> CalculationStatus {
        self.statuses[accessor][sym]
    }
    pub fn set(&mut self, accessor: usize, sym: usize, status: CalculationStatus) {
        self.statuses[accessor][sym] = status;
    }
    /// Set every symmetrization index of one accessor.
    pub fn set_all(&mut self, accessor: usize, status: CalculationStatus) {
        self.statuses[accessor].fill(status);
    }
    /// Mark everything uncalculated.
    pub fn reset(&mut self) {
        self.statuses
            .iter_mut()
            .for_each(|s| s.fill(CalculationStatus::Uncalculated));
    }
    pub fn n_accessors(&self) -> usize {
        self.statuses.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_manager() {
        let mut manager = StatusManager::new(&[1, 3]);
        assert_eq!(manager.n_accessors(), 2);
        assert_eq!(manager.get(1, 2), CalculationStatus::Uncalculated);
        manager.set_all(1, CalculationStatus::Calculated);
        manager.set(1, 0, CalculationStatus::Uncalculated);
        assert_eq!(manager.get(1, 0), CalculationStatus::Uncalculated);
        assert_eq!(manager.get(1, 1), CalculationStatus::Calculated);
        manager.reset();
        assert_eq!(manager.get(1, 1), CalculationStatus::Uncalculated);
        assert_eq!(CalculationStatus::Calculated.to_string(), "calculated");
    }
}
