//! Process-local slot numbers and their parallel decoration.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Lifecycle of a local index. Deleted indices survive until the next commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum LocalIndexState {
    #[default]
    Valid,
    Deleted,
}

/// A local slot number plus its lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalIndex {
    local: usize,
    state: LocalIndexState,
}

impl LocalIndex {
    pub const fn new(local: usize) -> Self {
        Self {
            local,
            state: LocalIndexState::Valid,
        }
    }

    #[inline]
    pub fn local(&self) -> usize {
        self.local
    }

    #[inline]
    pub fn set_local(&mut self, local: usize) {
        self.local = local;
    }

    #[inline]
    pub fn state(&self) -> LocalIndexState {
        self.state
    }

    #[inline]
    pub fn set_state(&mut self, state: LocalIndexState) {
        self.state = state;
    }

    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.state == LocalIndexState::Deleted
    }
}

/// Local index decorated with an attribute and a "may be known elsewhere" flag.
///
/// Only public indices are published during a rebuild unless the caller asks
/// to treat every index as public.
///
/// Equality and hashing look at the slot, attribute and public flag only; the
/// lifecycle state is bookkeeping of the owning index set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ParallelLocalIndex<A> {
    index: LocalIndex,
    attribute: A,
    public: bool,
}

impl<A: Copy> ParallelLocalIndex<A> {
    pub const fn new(local: usize, attribute: A, public: bool) -> Self {
        Self {
            index: LocalIndex::new(local),
            attribute,
            public,
        }
    }

    #[inline]
    pub fn local(&self) -> usize {
        self.index.local()
    }

    #[inline]
    pub fn set_local(&mut self, local: usize) {
        self.index.set_local(local);
    }

    #[inline]
    pub fn attribute(&self) -> A {
        self.attribute
    }

    #[inline]
    pub fn set_attribute(&mut self, attribute: A) {
        self.attribute = attribute;
    }

    #[inline]
    pub fn is_public(&self) -> bool {
        self.public
    }

    #[inline]
    pub fn set_public(&mut self, public: bool) {
        self.public = public;
    }

    #[inline]
    pub fn state(&self) -> LocalIndexState {
        self.index.state()
    }

    #[inline]
    pub fn set_state(&mut self, state: LocalIndexState) {
        self.index.set_state(state);
    }

    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.index.is_deleted()
    }

    pub fn as_local_index(&self) -> &LocalIndex {
        &self.index
    }
}

impl<A: PartialEq> PartialEq for ParallelLocalIndex<A> {
    fn eq(&self, other: &Self) -> bool {
        self.index.local == other.index.local
            && self.attribute == other.attribute
            && self.public == other.public
    }
}

impl<A: Eq> Eq for ParallelLocalIndex<A> {}

impl<A: Hash> Hash for ParallelLocalIndex<A> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.local.hash(state);
        self.attribute.hash(state);
        self.public.hash(state);
    }
}

impl<A: fmt::Debug> fmt::Display for ParallelLocalIndex<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{local={}, attr={:?}, public={}}}",
            self.index.local, self.attribute, self.public
        )
    }
}
