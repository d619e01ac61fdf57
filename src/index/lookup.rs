//! Read-only view that resolves local slots back to their index pairs.

use crate::index::attribute::Attribute;
use crate::index::index_set::{IndexPair, IndexSetState, ParallelIndexSet};
use crate::index::GlobalIndex;
use crate::index_error::IndexSyncError;

/// Borrowing lookup table over a GROUND [`ParallelIndexSet`].
///
/// `pair(local)` is O(1); `find(global)` is a binary search. The borrow keeps
/// the index set from being resized while the view exists.
#[derive(Debug)]
pub struct GlobalLookupIndexSet<'a, G, A> {
    index_set: &'a ParallelIndexSet<G, A>,
    by_local: Vec<Option<usize>>,
}

impl<'a, G: GlobalIndex, A: Attribute> GlobalLookupIndexSet<'a, G, A> {
    /// Slot range sized to the largest local slot in use.
    pub fn new(index_set: &'a ParallelIndexSet<G, A>) -> Result<Self, IndexSyncError> {
        let size = index_set
            .iter()
            .map(|p| p.local().local() + 1)
            .max()
            .unwrap_or(0);
        Self::with_size(index_set, size)
    }

    /// Slot range of exactly `size`; every local slot must be below it.
    pub fn with_size(index_set: &'a ParallelIndexSet<G, A>, size: usize) -> Result<Self, IndexSyncError> {
        index_set.require("GlobalLookupIndexSet::new", IndexSetState::Ground)?;
        let mut by_local = vec![None; size];
        for (pos, pair) in index_set.iter().enumerate() {
            let local = pair.local().local();
            let slot = by_local
                .get_mut(local)
                .ok_or(IndexSyncError::InvalidPosition { position: local, len: size })?;
            *slot = Some(pos);
        }
        Ok(Self { index_set, by_local })
    }

    /// Pair stored at local slot `local`.
    pub fn pair(&self, local: usize) -> Option<&'a IndexPair<G, A>> {
        let pos = (*self.by_local.get(local)?)?;
        self.index_set.pairs().get(pos)
    }

    pub fn find(&self, global: G) -> Option<&'a IndexPair<G, A>> {
        let pairs = self.index_set.pairs();
        let at = pairs.partition_point(|p| p.global() < global);
        pairs.get(at).filter(|p| p.global() == global)
    }

    /// Size of the local slot range.
    pub fn size(&self) -> usize {
        self.by_local.len()
    }

    pub fn index_set(&self) -> &'a ParallelIndexSet<G, A> {
        self.index_set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::attribute::GridFlag;
    use crate::index::local_index::ParallelLocalIndex;

    #[test]
    fn resolves_slots_and_globals() {
        let mut s = ParallelIndexSet::new();
        s.begin_resize().unwrap();
        s.add_with_local(30u64, ParallelLocalIndex::new(2, GridFlag::Owner, true)).unwrap();
        s.add_with_local(10u64, ParallelLocalIndex::new(0, GridFlag::Ghost, false)).unwrap();
        s.end_resize().unwrap();

        let lookup = GlobalLookupIndexSet::new(&s).unwrap();
        assert_eq!(lookup.size(), 3);
        assert_eq!(lookup.pair(2).unwrap().global(), 30);
        assert!(lookup.pair(1).is_none());
        assert_eq!(lookup.find(10).unwrap().attribute(), GridFlag::Ghost);
        assert!(lookup.find(20).is_none());
        assert!(GlobalLookupIndexSet::with_size(&s, 2).is_err());
    }
}
