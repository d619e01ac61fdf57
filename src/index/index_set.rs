//! Parallel index set: the ordered (global → attributed local) mapping of one process.
//!
//! # Resize protocol
//! 1. [`begin_resize`](ParallelIndexSet::begin_resize) opens a mutation window (GROUND → RESIZE).
//! 2. [`add`](ParallelIndexSet::add) buffers new pairs; deletions are only flagged.
//! 3. [`end_resize`](ParallelIndexSet::end_resize) sorts the buffer, merges it with the
//!    surviving stable pairs in one pass, purges deleted pairs, assigns fresh local
//!    slots to pairs added without one and bumps the sequence number.
//!
//! Lookups are only allowed in GROUND state.

use std::fmt;

use hashbrown::HashSet;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::debug_invariants::DebugInvariants;
use crate::index::GlobalIndex;
use crate::index::attribute::Attribute;
use crate::index::local_index::{LocalIndexState, ParallelLocalIndex};
use crate::index_error::IndexSyncError;

/// Resize state of a [`ParallelIndexSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexSetState {
    /// Stable and queryable.
    Ground,
    /// Inside a mutation window.
    Resize,
}

/// A global index together with its attributed local index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexPair<G, A> {
    global: G,
    local: ParallelLocalIndex<A>,
}

impl<G: Copy, A: Copy> IndexPair<G, A> {
    pub fn new(global: G, local: ParallelLocalIndex<A>) -> Self {
        Self { global, local }
    }

    #[inline]
    pub fn global(&self) -> G {
        self.global
    }

    #[inline]
    pub fn local(&self) -> &ParallelLocalIndex<A> {
        &self.local
    }

    #[inline]
    pub fn attribute(&self) -> A {
        self.local.attribute()
    }

    /// Sort key: global first, attribute breaks ties.
    #[inline]
    pub fn key(&self) -> (G, A) {
        (self.global, self.local.attribute())
    }
}

impl<G: fmt::Debug, A: fmt::Debug> fmt::Display for IndexPair<G, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{global={:?}, local={}}}", self.global, self.local)
    }
}

#[derive(Debug, Clone)]
struct PendingPair<G, A> {
    global: G,
    local: Option<usize>,
    attribute: A,
    public: bool,
}

/// Ordered collection of index pairs of the calling process.
///
/// Sorted by `(global, attribute)`; a global index may appear once per attribute.
#[derive(Debug, Clone)]
pub struct ParallelIndexSet<G, A> {
    pairs: Vec<IndexPair<G, A>>,
    pending: Vec<PendingPair<G, A>>,
    pending_keys: HashSet<(G, A)>,
    state: IndexSetState,
    seq_no: u64,
}

impl<G: GlobalIndex, A: Attribute> Default for ParallelIndexSet<G, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: GlobalIndex, A: Attribute> ParallelIndexSet<G, A> {
    pub fn new() -> Self {
        Self {
            pairs: Vec::new(),
            pending: Vec::new(),
            pending_keys: HashSet::new(),
            state: IndexSetState::Ground,
            seq_no: 0,
        }
    }

    #[inline]
    pub fn state(&self) -> IndexSetState {
        self.state
    }

    /// Incremented by every successful [`end_resize`](Self::end_resize).
    #[inline]
    pub fn seq_no(&self) -> u64 {
        self.seq_no
    }

    /// Number of stable pairs (pending additions are not counted).
    #[inline]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Stable pairs in `(global, attribute)` order.
    #[inline]
    pub fn pairs(&self) -> &[IndexPair<G, A>] {
        &self.pairs
    }

    pub fn iter(&self) -> std::slice::Iter<'_, IndexPair<G, A>> {
        self.pairs.iter()
    }

    pub(crate) fn require(&self, operation: &'static str, expected: IndexSetState) -> Result<(), IndexSyncError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(IndexSyncError::InvalidState {
                operation,
                expected,
                found: self.state,
            })
        }
    }

    /// Open a mutation window.
    pub fn begin_resize(&mut self) -> Result<(), IndexSyncError> {
        self.require("begin_resize", IndexSetState::Ground)?;
        self.state = IndexSetState::Resize;
        Ok(())
    }

    /// Queue `global` with a fresh local slot assigned at commit time.
    pub fn add(&mut self, global: G, attribute: A, public: bool) -> Result<(), IndexSyncError> {
        self.push_pending(PendingPair {
            global,
            local: None,
            attribute,
            public,
        })
    }

    /// Queue `global` with a caller-chosen local index.
    pub fn add_with_local(
        &mut self,
        global: G,
        local: ParallelLocalIndex<A>,
    ) -> Result<(), IndexSyncError> {
        self.push_pending(PendingPair {
            global,
            local: Some(local.local()),
            attribute: local.attribute(),
            public: local.is_public(),
        })
    }

    fn push_pending(&mut self, pair: PendingPair<G, A>) -> Result<(), IndexSyncError> {
        self.require("add", IndexSetState::Resize)?;
        let key = (pair.global, pair.attribute);
        if self.live_key_exists(key) || self.pending_keys.contains(&key) {
            return Err(IndexSyncError::DuplicateIndex(format!("{key:?}")));
        }
        self.pending_keys.insert(key);
        self.pending.push(pair);
        Ok(())
    }

    /// Flag the stable pair at `position` for removal at the next commit.
    pub fn mark_as_deleted(&mut self, position: usize) -> Result<(), IndexSyncError> {
        self.require("mark_as_deleted", IndexSetState::Resize)?;
        let len = self.pairs.len();
        let pair = self
            .pairs
            .get_mut(position)
            .ok_or(IndexSyncError::InvalidPosition { position, len })?;
        pair.local.set_state(LocalIndexState::Deleted);
        Ok(())
    }

    /// Flag every attribute of `global`; returns how many pairs were newly flagged.
    pub fn mark_global_deleted(&mut self, global: G) -> Result<usize, IndexSyncError> {
        self.require("mark_global_deleted", IndexSetState::Resize)?;
        let range = self.global_range(global);
        let mut flagged = 0;
        for pair in &mut self.pairs[range] {
            if !pair.local.is_deleted() {
                pair.local.set_state(LocalIndexState::Deleted);
                flagged += 1;
            }
        }
        Ok(flagged)
    }

    /// Position of the stable pair with exactly this key, in any state.
    pub fn position_of(&self, global: G, attribute: A) -> Option<usize> {
        self.pairs
            .binary_search_by(|p| p.key().cmp(&(global, attribute)))
            .ok()
    }

    /// Commit the mutation window.
    pub fn end_resize(&mut self) -> Result<(), IndexSyncError> {
        self.require("end_resize", IndexSetState::Resize)?;

        let mut pending = std::mem::take(&mut self.pending);
        pending.sort_unstable_by(|a, b| (a.global, a.attribute).cmp(&(b.global, b.attribute)));

        let mut next_slot = self
            .pairs
            .iter()
            .filter(|p| !p.local.is_deleted())
            .map(|p| p.local.local())
            .chain(pending.iter().filter_map(|p| p.local))
            .max()
            .map_or(0, |m| m + 1);

        let added: Vec<IndexPair<G, A>> = pending
            .into_iter()
            .map(|p| {
                let slot = p.local.unwrap_or_else(|| {
                    let s = next_slot;
                    next_slot += 1;
                    s
                });
                IndexPair::new(p.global, ParallelLocalIndex::new(slot, p.attribute, p.public))
            })
            .collect();

        let stable = std::mem::take(&mut self.pairs);
        self.pairs = stable
            .into_iter()
            .filter(|p| !p.local.is_deleted())
            .merge_by(added, |a, b| a.key() <= b.key())
            .collect();

        self.pending_keys.clear();
        self.state = IndexSetState::Ground;
        self.seq_no += 1;
        crate::debug_invariants!(self.validate_invariants(), "ParallelIndexSet::end_resize");
        Ok(())
    }

    /// Discard the open mutation window: pending additions are dropped,
    /// deletion flags cleared and the sequence number left unchanged.
    pub(crate) fn abort_resize(&mut self) {
        if self.state != IndexSetState::Resize {
            return;
        }
        self.pending.clear();
        self.pending_keys.clear();
        for pair in &mut self.pairs {
            pair.local.set_state(LocalIndexState::Valid);
        }
        self.state = IndexSetState::Ground;
    }

    /// Most authoritative pair of `global` (lowest attribute), if any.
    pub fn find(&self, global: G) -> Result<Option<&IndexPair<G, A>>, IndexSyncError> {
        self.require("find", IndexSetState::Ground)?;
        let at = self.pairs.partition_point(|p| p.global < global);
        Ok(self.pairs.get(at).filter(|p| p.global == global))
    }

    /// Like [`find`](Self::find), but a missing global is an error.
    pub fn at(&self, global: G) -> Result<&IndexPair<G, A>, IndexSyncError> {
        self.find(global)?
            .ok_or_else(|| IndexSyncError::UnknownGlobal(format!("{global:?}")))
    }

    pub fn exists(&self, global: G) -> Result<bool, IndexSyncError> {
        Ok(self.find(global)?.is_some())
    }

    /// Exact `(global, attribute)` lookup.
    pub fn find_pair(&self, global: G, attribute: A) -> Result<Option<&IndexPair<G, A>>, IndexSyncError> {
        self.require("find_pair", IndexSetState::Ground)?;
        Ok(self.position_of(global, attribute).map(|i| &self.pairs[i]))
    }

    /// Every attribute under which `global` is held.
    pub fn roles_of(&self, global: G) -> Result<&[IndexPair<G, A>], IndexSyncError> {
        self.require("roles_of", IndexSetState::Ground)?;
        Ok(&self.pairs[self.global_range(global)])
    }

    /// Renumber local slots densely in iteration order.
    pub fn renumber_local(&mut self) -> Result<(), IndexSyncError> {
        self.require("renumber_local", IndexSetState::Ground)?;
        for (i, pair) in self.pairs.iter_mut().enumerate() {
            pair.local.set_local(i);
        }
        Ok(())
    }

    /// Whether `key` is held, counting pending additions and ignoring
    /// flagged deletions. Usable in both states.
    pub(crate) fn holds_key(&self, key: (G, A)) -> bool {
        self.live_key_exists(key) || self.pending_keys.contains(&key)
    }

    fn live_key_exists(&self, key: (G, A)) -> bool {
        self.position_of(key.0, key.1)
            .is_some_and(|i| !self.pairs[i].local.is_deleted())
    }

    fn global_range(&self, global: G) -> std::ops::Range<usize> {
        let start = self.pairs.partition_point(|p| p.global < global);
        let end = start + self.pairs[start..].partition_point(|p| p.global == global);
        start..end
    }
}

/// Equal length and pointwise equal `(global, attribute)`; local slots are ignored.
impl<G: GlobalIndex, A: Attribute> PartialEq for ParallelIndexSet<G, A> {
    fn eq(&self, other: &Self) -> bool {
        self.pairs.len() == other.pairs.len()
            && self
                .pairs
                .iter()
                .zip(&other.pairs)
                .all(|(a, b)| a.key() == b.key())
    }
}

impl<G: GlobalIndex, A: Attribute> Eq for ParallelIndexSet<G, A> {}

impl<G: GlobalIndex, A: Attribute> fmt::Display for ParallelIndexSet<G, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, pair) in self.pairs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{pair}")?;
        }
        write!(f, "}}")
    }
}

impl<G: GlobalIndex, A: Attribute> DebugInvariants for ParallelIndexSet<G, A> {
    fn validate_invariants(&self) -> Result<(), IndexSyncError> {
        for (a, b) in self.pairs.iter().tuple_windows() {
            if a.key() >= b.key() {
                return Err(IndexSyncError::InvariantViolation(format!(
                    "index pairs out of order: {a} before {b}"
                )));
            }
        }
        if self.state == IndexSetState::Ground {
            if let Some(p) = self.pairs.iter().find(|p| p.local.is_deleted()) {
                return Err(IndexSyncError::InvariantViolation(format!(
                    "deleted pair {p} survived a commit"
                )));
            }
        }
        Ok(())
    }
}
