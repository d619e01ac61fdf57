//! Cached attribute-filtered views of an index set.

use crate::index::GlobalIndex;
use crate::index::attribute::{Attribute, AttributePredicate};
use crate::index::index_set::{IndexSetState, ParallelIndexSet};
use crate::index_error::IndexSyncError;

/// Cached local slots of every pair whose attribute is admitted by a predicate,
/// in index-set order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Selection {
    indices: Vec<usize>,
}

impl Selection {
    pub fn new<G, A, P>(index_set: &ParallelIndexSet<G, A>, flags: &P) -> Result<Self, IndexSyncError>
    where
        G: GlobalIndex,
        A: Attribute,
        P: AttributePredicate<A>,
    {
        index_set.require("Selection::new", IndexSetState::Ground)?;
        let indices = index_set
            .iter()
            .filter(|p| flags.admits(p.attribute()))
            .map(|p| p.local().local())
            .collect();
        Ok(Self { indices })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, usize> {
        self.indices.iter()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::attribute::{AttributeSet, GridFlag};

    #[test]
    fn selects_by_attribute() {
        let mut s = ParallelIndexSet::new();
        s.begin_resize().unwrap();
        s.add(1u32, GridFlag::Owner, true).unwrap();
        s.add(2u32, GridFlag::Ghost, true).unwrap();
        s.add(3u32, GridFlag::Owner, false).unwrap();
        assert!(Selection::new(&s, &AttributeSet::<GridFlag>::all()).is_err());
        s.end_resize().unwrap();

        let owners = Selection::new(&s, &AttributeSet::of(&[GridFlag::Owner])).unwrap();
        assert_eq!(owners.as_slice(), &[0, 2]);
        let not_owner = Selection::new(&s, &|a: GridFlag| a != GridFlag::Owner).unwrap();
        assert_eq!(not_owner.len(), 1);
    }
}
