//! Remote index knowledge: which neighbours hold copies of our indices.

pub mod collective;
pub mod modifier;
pub(crate) mod rebuild;
pub mod remote_index;
pub mod table;

use crate::algs::communicator::Communicator;
use crate::algs::wire::WireRegistry;

pub use collective::CollectiveIterator;
pub use modifier::RemoteIndexListModifier;
pub use remote_index::{RemoteIndex, RemoteIndexLists};
pub use table::RemoteIndexTable;

/// Transport plus wire-type registry, passed to every collective operation.
#[derive(Debug, Clone, Copy)]
pub struct CommContext<'a, C> {
    comm: &'a C,
    wire: &'a WireRegistry,
}

impl<'a, C: Communicator> CommContext<'a, C> {
    pub fn new(comm: &'a C, wire: &'a WireRegistry) -> Self {
        Self { comm, wire }
    }

    #[inline]
    pub fn comm(&self) -> &'a C {
        self.comm
    }

    #[inline]
    pub fn wire(&self) -> &'a WireRegistry {
        self.wire
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.comm.size()
    }
}
