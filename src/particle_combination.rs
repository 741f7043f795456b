use std::{
    fmt::Display,
    sync::{Arc, Weak},
};

use crate::{SaplingError, SaplingResult};

/// A node of a decay tree identifying which final-state particles it contains.
///
/// Leaves hold a single final-state index and no daughters. Composite nodes hold two or more
/// daughters whose indices, concatenated in order, make up the node's own indices. Every node
/// may have a parent, which is held weakly: ownership always points from parent to daughter and
/// from the [`ParticleCombinationCache`] to every node, never upwards.
#[derive(Debug)]
pub struct ParticleCombination {
    indices: Vec<usize>,
    daughters: Vec<Arc<ParticleCombination>>,
    parent: Weak<ParticleCombination>,
}

impl ParticleCombination {
    fn leaf(index: usize) -> Arc<Self> {
        Arc::new(Self {
            indices: vec![index],
            daughters: Vec::new(),
            parent: Weak::new(),
        })
    }

    // deep copy of `source` hanging from `parent`
    fn attached(source: &ParticleCombination, parent: Weak<ParticleCombination>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            indices: source.indices.clone(),
            daughters: source
                .daughters
                .iter()
                .map(|d| Self::attached(d, me.clone()))
                .collect(),
            parent,
        })
    }

    /// The final-state indices in daughter order.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }
    pub fn daughters(&self) -> &[Arc<ParticleCombination>] {
        &self.daughters
    }
    /// The parent node, if this node is part of a larger combination.
    pub fn parent(&self) -> Option<Arc<ParticleCombination>> {
        self.parent.upgrade()
    }
    pub fn has_parent(&self) -> bool {
        self.parent.strong_count() > 0
    }
    /// Returns `true` for single final-state particles.
    pub fn is_final_state(&self) -> bool {
        self.daughters.is_empty()
    }
    /// The top-most ancestor (or the node itself).
    pub fn origin(self: &Arc<Self>) -> Arc<Self> {
        let mut node = self.clone();
        while let Some(parent) = node.parent() {
            node = parent;
        }
        node
    }
    /// The index set sorted, for order-independent comparisons.
    pub fn sorted_indices(&self) -> Vec<usize> {
        let mut indices = self.indices.clone();
        indices.sort_unstable();
        indices
    }
    /// Checks the structural invariants of this node and all of its daughters.
    pub fn consistent(self: &Arc<Self>) -> bool {
        if self.indices.is_empty() || self.daughters.len() == 1 {
            return false;
        }
        if self.daughters.is_empty() {
            return self.indices.len() == 1;
        }
        let mut sorted = self.sorted_indices();
        sorted.dedup();
        if sorted.len() != self.indices.len() {
            return false;
        }
        let concatenated: Vec<usize> = self
            .daughters
            .iter()
            .flat_map(|d| d.indices.iter().copied())
            .collect();
        if concatenated != self.indices {
            return false;
        }
        self.daughters.iter().all(|d| {
            d.parent()
                .is_some_and(|p| Arc::ptr_eq(&p, self))
                && d.consistent()
        })
    }
}

impl Display for ParticleCombination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.daughters.is_empty() {
            return write!(f, "{}", self.indices[0]);
        }
        write!(f, "(")?;
        for (i, d) in self.daughters.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, ")")
    }
}

fn overlap(a: &[usize], b: &[usize]) -> bool {
    a.iter().any(|i| b.contains(i))
}

/// Policies for deciding whether two [`ParticleCombination`]s describe the same quantity.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Equiv {
    /// The same node.
    ByReference,
    /// Equal indices in equal order.
    OrderedContent,
    /// Equal index sets in any order.
    OrderlessContent,
    /// Equal ordered indices, recursively through the daughters.
    Down,
    /// Equal ordered indices, recursively through the parents.
    Up,
    /// [`Equiv::Down`] on the nodes and [`Equiv::Up`] on their parents.
    UpAndDown,
    /// Equal index sets, with daughters matching by index set.
    DownByOrderlessContent,
    /// Equal index sets measured in the same reference frame: every ancestor has the same index
    /// set as well.
    ByReferenceFrame,
    /// All two-body (and single-particle) states of equal size are equal, three-body states are
    /// compared with [`Equiv::Down`], larger states are undefined.
    Zemach,
}

impl Equiv {
    /// Compare two combinations under this policy.
    ///
    /// # Errors
    ///
    /// [`SaplingError::EquivalenceUndefined`] for [`Equiv::Zemach`] given four or more
    /// particles.
    pub fn equivalent(&self, a: &Arc<ParticleCombination>, b: &Arc<ParticleCombination>) -> SaplingResult<bool> {
        Ok(match self {
            Equiv::ByReference => Arc::ptr_eq(a, b),
            Equiv::OrderedContent => a.indices == b.indices,
            Equiv::OrderlessContent => orderless(a, b),
            Equiv::Down => down(a, b),
            Equiv::Up => up(a, b),
            Equiv::UpAndDown => {
                down(a, b)
                    && match (a.parent(), b.parent()) {
                        (None, None) => true,
                        (Some(pa), Some(pb)) => up(&pa, &pb),
                        _ => false,
                    }
            }
            Equiv::DownByOrderlessContent => {
                orderless(a, b)
                    && a.daughters.len() == b.daughters.len()
                    && a
                        .daughters
                        .iter()
                        .all(|da| b.daughters.iter().any(|db| orderless(da, db)))
            }
            Equiv::ByReferenceFrame => orderless(a, b) && same_frame(a.parent(), b.parent()),
            Equiv::Zemach => {
                if a.indices.len() > 3 || b.indices.len() > 3 {
                    return Err(SaplingError::EquivalenceUndefined(format!(
                        "Zemach equivalence of {} and {}",
                        a, b
                    )));
                }
                if a.indices.len() != b.indices.len() {
                    false
                } else if a.indices.len() < 3 {
                    true
                } else {
                    down(a, b)
                }
            }
        })
    }
}

fn orderless(a: &ParticleCombination, b: &ParticleCombination) -> bool {
    a.indices.len() == b.indices.len() && a.sorted_indices() == b.sorted_indices()
}

/// Structural equality of two combinations and all of their daughters, ignoring parents.
pub fn equal_down(a: &ParticleCombination, b: &ParticleCombination) -> bool {
    down(a, b)
}

fn down(a: &ParticleCombination, b: &ParticleCombination) -> bool {
    a.indices == b.indices
        && a.daughters.len() == b.daughters.len()
        && a.daughters.iter().zip(&b.daughters).all(|(da, db)| down(da, db))
}

fn up(a: &ParticleCombination, b: &ParticleCombination) -> bool {
    if a.indices != b.indices {
        return false;
    }
    match (a.parent(), b.parent()) {
        (None, None) => true,
        (Some(pa), Some(pb)) => up(&pa, &pb),
        _ => false,
    }
}

fn same_frame(a: Option<Arc<ParticleCombination>>, b: Option<Arc<ParticleCombination>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(pa), Some(pb)) => orderless(&pa, &pb) && same_frame(pa.parent(), pb.parent()),
        _ => false,
    }
}

/// Creates and uniques [`ParticleCombination`]s.
///
/// The cache owns every node it hands out, including the parented copies of daughters made when
/// a composite is created. Nodes are never removed.
#[derive(Debug, Default)]
pub struct ParticleCombinationCache {
    combinations: Vec<Arc<ParticleCombination>>,
}

impl ParticleCombinationCache {
    /// The parentless leaf for final-state index `index`.
    pub fn fsp(&mut self, index: usize) -> Arc<ParticleCombination> {
        if let Some(pc) = self
            .combinations
            .iter()
            .find(|pc| pc.is_final_state() && !pc.has_parent() && pc.indices[0] == index)
        {
            return pc.clone();
        }
        let pc = ParticleCombination::leaf(index);
        self.combinations.push(pc.clone());
        pc
    }

    /// The parentless composite of `daughters`, in the given order.
    ///
    /// The new node receives its own copies of the daughters (parented to it), so the nodes
    /// passed in stay parentless and may be reused in other composites.
    ///
    /// # Errors
    ///
    /// [`SaplingError::InconsistentParticleCombination`] if fewer than two daughters are given,
    /// if daughters share indices or if a daughter already has a parent.
    pub fn composite(&mut self, daughters: &[Arc<ParticleCombination>]) -> SaplingResult<Arc<ParticleCombination>> {
        if daughters.len() < 2 {
            return Err(SaplingError::InconsistentParticleCombination(format!(
                "a composite needs at least two daughters, {} given",
                daughters.len()
            )));
        }
        let mut indices: Vec<usize> = Vec::new();
        for d in daughters {
            if d.indices.is_empty() {
                return Err(SaplingError::InconsistentParticleCombination(
                    "daughter contains no indices".to_string(),
                ));
            }
            if overlap(&indices, &d.indices) {
                return Err(SaplingError::InconsistentParticleCombination(format!(
                    "daughter {} overlaps with other daughters",
                    d
                )));
            }
            if d.has_parent() {
                return Err(SaplingError::InconsistentParticleCombination(format!(
                    "daughter {} already has a parent",
                    d
                )));
            }
            indices.extend_from_slice(&d.indices);
        }
        if let Some(pc) = self.combinations.iter().find(|pc| {
            !pc.has_parent()
                && pc.daughters.len() == daughters.len()
                && pc.daughters.iter().zip(daughters).all(|(a, b)| down(a, b))
        }) {
            return Ok(pc.clone());
        }
        let pc = Arc::new_cyclic(|me| ParticleCombination {
            indices,
            daughters: daughters
                .iter()
                .map(|d| ParticleCombination::attached(d, me.clone()))
                .collect(),
            parent: Weak::new(),
        });
        self.insert_tree(&pc);
        Ok(pc)
    }

    fn insert_tree(&mut self, pc: &Arc<ParticleCombination>) {
        self.combinations.push(pc.clone());
        for d in &pc.daughters {
            self.insert_tree(d);
        }
    }

    /// Find a node equivalent to `pc` under `equiv`.
    pub fn find(&self, pc: &Arc<ParticleCombination>, equiv: Equiv) -> SaplingResult<Option<Arc<ParticleCombination>>> {
        for candidate in &self.combinations {
            if equiv.equivalent(candidate, pc)? {
                return Ok(Some(candidate.clone()));
            }
        }
        Ok(None)
    }

    pub fn len(&self) -> usize {
        self.combinations.len()
    }
    pub fn is_empty(&self) -> bool {
        self.combinations.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ParticleCombination>> {
        self.combinations.iter()
    }
    /// Checks every cached node.
    pub fn consistent(&self) -> bool {
        self.combinations.iter().all(|pc| pc.consistent())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(cache: &mut ParticleCombinationCache, n: usize) -> Vec<Arc<ParticleCombination>> {
        (0..n).map(|i| cache.fsp(i)).collect()
    }

    // pi+ at 0 and 2, pi- at 1
    fn rho_pi(cache: &mut ParticleCombinationCache) -> (Arc<ParticleCombination>, Arc<ParticleCombination>) {
        let fsp = leaves(cache, 3);
        let rho_a = cache.composite(&[fsp[0].clone(), fsp[1].clone()]).unwrap();
        let rho_b = cache.composite(&[fsp[2].clone(), fsp[1].clone()]).unwrap();
        let d_a = cache.composite(&[rho_a, fsp[2].clone()]).unwrap();
        let d_b = cache.composite(&[rho_b, fsp[0].clone()]).unwrap();
        (d_a, d_b)
    }

    #[test]
    fn test_leaves_are_unique() {
        let mut cache = ParticleCombinationCache::default();
        let a = cache.fsp(0);
        let b = cache.fsp(0);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.is_final_state());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_composites_are_unique_and_parented() {
        let mut cache = ParticleCombinationCache::default();
        let (d_a, _) = rho_pi(&mut cache);
        let fsp = leaves(&mut cache, 2);
        let again = cache.composite(&fsp).unwrap();
        let rho = d_a.daughters()[0].clone();
        assert_eq!(rho.indices(), &[0, 1]);
        assert!(Arc::ptr_eq(&rho.parent().unwrap(), &d_a));
        assert!(!again.has_parent());
        assert!(Arc::ptr_eq(&rho.daughters()[0].origin(), &d_a));
        assert_eq!(d_a.indices(), &[0, 1, 2]);
        assert_eq!(d_a.to_string(), "((0, 1), 2)");
        assert!(cache.consistent());
    }

    #[test]
    fn test_composite_errors() {
        let mut cache = ParticleCombinationCache::default();
        let a = cache.fsp(0);
        assert!(matches!(
            cache.composite(&[a.clone()]),
            Err(SaplingError::InconsistentParticleCombination(_))
        ));
        assert!(matches!(
            cache.composite(&[a.clone(), a.clone()]),
            Err(SaplingError::InconsistentParticleCombination(_))
        ));
        let b = cache.fsp(1);
        let ab = cache.composite(&[a, b]).unwrap();
        let parented = ab.daughters()[0].clone();
        let c = cache.fsp(2);
        assert!(matches!(
            cache.composite(&[parented, c]),
            Err(SaplingError::InconsistentParticleCombination(_))
        ));
    }

    #[test]
    fn test_equivalences() {
        let mut cache = ParticleCombinationCache::default();
        let (d_a, d_b) = rho_pi(&mut cache);
        let rho_a = d_a.daughters()[0].clone();
        let rho_b = d_b.daughters()[0].clone();
        let fsp = leaves(&mut cache, 2);
        let free_rho = cache.composite(&[fsp[0].clone(), fsp[1].clone()]).unwrap();
        let swapped = cache.composite(&[fsp[1].clone(), fsp[0].clone()]).unwrap();

        assert!(Equiv::Down.equivalent(&rho_a, &free_rho).unwrap());
        assert!(!Equiv::ByReference.equivalent(&rho_a, &free_rho).unwrap());
        assert!(!Equiv::UpAndDown.equivalent(&rho_a, &free_rho).unwrap());
        assert!(!Equiv::Down.equivalent(&free_rho, &swapped).unwrap());
        assert!(Equiv::OrderlessContent.equivalent(&free_rho, &swapped).unwrap());
        assert!(!Equiv::OrderedContent.equivalent(&free_rho, &swapped).unwrap());
        assert!(Equiv::DownByOrderlessContent.equivalent(&free_rho, &swapped).unwrap());
        assert!(!Equiv::OrderlessContent.equivalent(&rho_a, &rho_b).unwrap());
        assert!(Equiv::ByReferenceFrame.equivalent(&d_a, &d_b).unwrap());
        assert!(!Equiv::ByReferenceFrame.equivalent(&rho_a, &free_rho).unwrap());
        assert!(Equiv::Up.equivalent(&rho_a, &rho_a).unwrap());
        assert!(Equiv::Zemach.equivalent(&rho_a, &rho_b).unwrap());
        assert!(!Equiv::Zemach.equivalent(&d_a, &d_b).unwrap());
    }

    #[test]
    fn test_zemach_undefined_for_four_body() {
        let mut cache = ParticleCombinationCache::default();
        let fsp = leaves(&mut cache, 4);
        let ab = cache.composite(&fsp[..2]).unwrap();
        let cd = cache.composite(&fsp[2..]).unwrap();
        let abcd = cache.composite(&[ab, cd]).unwrap();
        assert!(matches!(
            Equiv::Zemach.equivalent(&abcd, &abcd),
            Err(SaplingError::EquivalenceUndefined(_))
        ));
    }
}
