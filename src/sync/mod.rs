//! Incremental, neighbour-local repair of index sets and remote index tables.

pub mod indices_syncer;
pub(crate) mod message;

pub use indices_syncer::{FreshSlots, IndicesSyncer, Numberer};
