//! In-place editing of one neighbour's remote index list.

use crate::index::GlobalIndex;
use crate::index::attribute::Attribute;
use crate::index::index_set::{IndexSetState, ParallelIndexSet};
use crate::index_error::IndexSyncError;
use crate::remote::remote_index::{RemoteIndex, RemoteIndexLists};
use crate::remote::table::RemoteIndexTable;

impl<G: GlobalIndex, A: Attribute> RemoteIndexTable<G, A> {
    /// Edit the shared list of `rank`, creating it if needed.
    ///
    /// The table is considered synced with `index_set` from here on: this is
    /// how an application records what it learned locally before calling
    /// [`IndicesSyncer::sync`](crate::sync::IndicesSyncer::sync).
    pub fn modifier<'t>(
        &'t mut self,
        rank: usize,
        index_set: &'t ParallelIndexSet<G, A>,
    ) -> Result<RemoteIndexListModifier<'t, G, A>, IndexSyncError> {
        index_set.require("modifier", IndexSetState::Ground)?;
        let is_split = self.iter().any(|(_, lists)| !lists.is_shared());
        if is_split {
            return Err(IndexSyncError::SharedListsRequired);
        }
        self.mark_synced(index_set.seq_no(), index_set.seq_no(), true);
        let list = self
            .lists_mut()
            .entry(rank)
            .or_insert_with(|| RemoteIndexLists::shared(Vec::new()))
            .send_mut();
        Ok(RemoteIndexListModifier {
            rank,
            list,
            index_set,
            cursor: 0,
            last: None,
        })
    }
}

/// Inserts and removes entries of one neighbour list in ascending order.
///
/// Successive inserts must be strictly increasing; each one starts its
/// search where the previous one stopped.
pub struct RemoteIndexListModifier<'t, G, A> {
    rank: usize,
    list: &'t mut Vec<RemoteIndex<G, A>>,
    index_set: &'t ParallelIndexSet<G, A>,
    cursor: usize,
    last: Option<RemoteIndex<G, A>>,
}

impl<G: GlobalIndex, A: Attribute> RemoteIndexListModifier<'_, G, A> {
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Insert `index`; returns `false` if the exact entry was already present.
    pub fn insert(&mut self, index: RemoteIndex<G, A>) -> Result<bool, IndexSyncError> {
        if self.last.is_some_and(|last| index <= last) {
            return Err(IndexSyncError::NonAscendingInsert {
                neighbor: self.rank,
                global: format!("{:?}", index.global()),
            });
        }
        index.local_pair(self.index_set)?;
        self.last = Some(index);

        let at = self.cursor + self.list[self.cursor..].partition_point(|e| *e < index);
        self.cursor = at;
        if self.list.get(at) == Some(&index) {
            return Ok(false);
        }
        self.list.insert(at, index);
        self.cursor = at + 1;
        Ok(true)
    }

    /// Remove every entry for `global`; returns how many were removed.
    pub fn remove(&mut self, global: G) -> usize {
        let before = self.list.len();
        self.list.retain(|e| e.global() != global);
        let removed = before - self.list.len();
        self.cursor = self.list.partition_point(|e| e.global() < global);
        removed
    }

    pub fn entries(&self) -> &[RemoteIndex<G, A>] {
        self.list
    }
}
