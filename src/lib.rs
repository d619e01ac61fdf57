#![cfg_attr(docsrs, feature(doc_cfg))]
//! # parindex
//!
//! parindex keeps track of a distributed index space for domain-decomposition
//! codes. Every process owns a [`ParallelIndexSet`](index::ParallelIndexSet)
//! mapping global indices to local slots; a
//! [`RemoteIndexTable`](remote::RemoteIndexTable) records which neighbours
//! hold copies of which indices and under which attribute; an
//! [`Interface`](interface::Interface) turns that knowledge into per-neighbour
//! send and receive slot lists for halo exchange.
//!
//! ## Features
//! - Two-phase resize of index sets with sequence numbers for staleness checks
//! - Full rebuild of remote knowledge, around a ring or over declared neighbours
//! - Incremental, neighbour-local sync after local discovery or deletion
//! - Pluggable communication backends (serial, threaded in-process, MPI)
//! - Explicit wire-type registry, no global datatype caches
//!
//! ## Usage
//! ```toml
//! [dependencies]
//! parindex = "0.3"
//! # Optional features:
//! # features = ["mpi-support"]
//! ```
//!
//! A typical cycle: fill the index set between `begin_resize`/`end_resize`,
//! call [`RemoteIndexTable::rebuild`](remote::RemoteIndexTable::rebuild) on
//! every process, then build an [`Interface`](interface::Interface) for the
//! attribute pair you exchange. After local changes, use
//! [`IndicesSyncer`](sync::IndicesSyncer) instead of a full rebuild.
//!
//! ## Determinism
//!
//! Remote lists are kept in `(global, local attribute, remote attribute)`
//! order, so results do not depend on message arrival order.

pub mod algs;
pub mod config;
pub mod debug_invariants;
pub mod index;
pub mod index_error;
pub mod interface;
pub mod remote;
pub mod sync;

pub use debug_invariants::DebugInvariants;
pub use index_error::IndexSyncError;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{CommTag, Communicator, NoComm, ThreadComm};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::wire::{WireRegistry, WireScalar};
    pub use crate::config::{ExchangeStrategy, RemoteIndexConfig, SyncConfig};
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::index::{
        Attribute, AttributePredicate, AttributeSet, GlobalIndex, GlobalLookupIndexSet, GridFlag,
        IndexPair, IndexSetState, LocalIndex, LocalIndexState, ParallelIndexSet,
        ParallelLocalIndex, Selection,
    };
    pub use crate::index_error::IndexSyncError;
    pub use crate::interface::{Interface, InterfaceBuilder, InterfaceInformation, InterfaceSink};
    pub use crate::remote::{
        CollectiveIterator, CommContext, RemoteIndex, RemoteIndexListModifier, RemoteIndexLists,
        RemoteIndexTable,
    };
    pub use crate::sync::{FreshSlots, IndicesSyncer, Numberer};
}
