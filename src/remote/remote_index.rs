use std::fmt;

use crate::index::GlobalIndex;
use crate::index::attribute::Attribute;
use crate::index::index_set::{IndexPair, ParallelIndexSet};
use crate::index_error::IndexSyncError;

/// Knowledge that a neighbour holds one of our index pairs.
///
/// The entry is keyed by the local `(global, local_attribute)` pair rather
/// than pointing into the index set, so it stays meaningful across resizes.
/// Resolve it with [`local_pair`](Self::local_pair) at the point of use.
///
/// Field order gives the canonical list order: global, local attribute,
/// attribute on the remote process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RemoteIndex<G, A> {
    global: G,
    local_attribute: A,
    attribute: A,
}

impl<G: GlobalIndex, A: Attribute> RemoteIndex<G, A> {
    pub fn new(global: G, local_attribute: A, remote_attribute: A) -> Self {
        Self {
            global,
            local_attribute,
            attribute: remote_attribute,
        }
    }

    #[inline]
    pub fn global(&self) -> G {
        self.global
    }

    /// Attribute of the pair on the remote process.
    #[inline]
    pub fn attribute(&self) -> A {
        self.attribute
    }

    /// Attribute of the matching pair in our own index set.
    #[inline]
    pub fn local_attribute(&self) -> A {
        self.local_attribute
    }

    #[inline]
    pub fn local_key(&self) -> (G, A) {
        (self.global, self.local_attribute)
    }

    /// Resolve to our own index pair.
    pub fn local_pair<'s>(
        &self,
        index_set: &'s ParallelIndexSet<G, A>,
    ) -> Result<&'s IndexPair<G, A>, IndexSyncError> {
        index_set
            .find_pair(self.global, self.local_attribute)?
            .ok_or_else(|| IndexSyncError::UnknownGlobal(format!("{:?}", self.local_key())))
    }
}

impl<G: fmt::Debug, A: fmt::Debug> fmt::Display for RemoteIndex<G, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[global={:?}, local attr={:?}, remote attr={:?}]",
            self.global, self.local_attribute, self.attribute
        )
    }
}

/// Send and receive lists for one neighbour.
///
/// When the table was built from a single index set both directions share
/// one list and `receive` is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteIndexLists<G, A> {
    send: Vec<RemoteIndex<G, A>>,
    receive: Option<Vec<RemoteIndex<G, A>>>,
}

impl<G, A> RemoteIndexLists<G, A> {
    pub fn shared(list: Vec<RemoteIndex<G, A>>) -> Self {
        Self {
            send: list,
            receive: None,
        }
    }

    pub fn split(send: Vec<RemoteIndex<G, A>>, receive: Vec<RemoteIndex<G, A>>) -> Self {
        Self {
            send,
            receive: Some(receive),
        }
    }

    /// Indices whose data we send to the neighbour.
    pub fn send(&self) -> &[RemoteIndex<G, A>] {
        &self.send
    }

    /// Indices whose data we receive from the neighbour.
    pub fn receive(&self) -> &[RemoteIndex<G, A>] {
        self.receive.as_deref().unwrap_or(&self.send)
    }

    pub fn list(&self, send: bool) -> &[RemoteIndex<G, A>] {
        if send { self.send() } else { self.receive() }
    }

    pub fn is_shared(&self) -> bool {
        self.receive.is_none()
    }

    pub fn is_empty(&self) -> bool {
        self.send.is_empty() && self.receive.as_ref().is_none_or(Vec::is_empty)
    }

    pub(crate) fn send_mut(&mut self) -> &mut Vec<RemoteIndex<G, A>> {
        &mut self.send
    }

    pub(crate) fn receive_mut(&mut self) -> &mut Vec<RemoteIndex<G, A>> {
        match self.receive {
            Some(ref mut r) => r,
            None => &mut self.send,
        }
    }
}
