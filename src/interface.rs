//! Per-neighbour send/receive slot lists for halo exchange.
//!
//! # Algorithm
//! [`InterfaceBuilder`] walks the remote index table twice. The first pass
//! counts the matching entries per neighbour and direction so the sink can
//! reserve; the second resolves every match to its local slot and hands it
//! over. An entry goes to the send side when our attribute is in the source
//! flags and the remote attribute is in the destination flags, and to the
//! receive side for the mirrored condition.

use std::collections::BTreeMap;
use std::fmt;

use crate::index::GlobalIndex;
use crate::index::attribute::{Attribute, AttributePredicate};
use crate::index::index_set::ParallelIndexSet;
use crate::index_error::IndexSyncError;
use crate::remote::remote_index::RemoteIndex;
use crate::remote::table::RemoteIndexTable;

/// Receives the output of an [`InterfaceBuilder`].
pub trait InterfaceSink {
    /// Called once per neighbour and direction before any `add`.
    fn reserve(&mut self, rank: usize, send: bool, count: usize);
    fn add(&mut self, rank: usize, send: bool, local: usize);
}

/// Drives the two-pass interface construction over a synced table.
#[derive(Debug, Clone, Copy)]
pub struct InterfaceBuilder<'t, G, A> {
    table: &'t RemoteIndexTable<G, A>,
    source: &'t ParallelIndexSet<G, A>,
    dest: &'t ParallelIndexSet<G, A>,
}

impl<'t, G: GlobalIndex, A: Attribute> InterfaceBuilder<'t, G, A> {
    /// Fails with [`IndexSyncError::StaleTable`] unless the table matches both sets.
    pub fn new(
        table: &'t RemoteIndexTable<G, A>,
        source: &'t ParallelIndexSet<G, A>,
        dest: &'t ParallelIndexSet<G, A>,
    ) -> Result<Self, IndexSyncError> {
        table.check_synced(source, dest)?;
        Ok(Self { table, source, dest })
    }

    pub fn build<S, D, K>(&self, source_flags: &S, dest_flags: &D, sink: &mut K) -> Result<(), IndexSyncError>
    where
        S: AttributePredicate<A>,
        D: AttributePredicate<A>,
        K: InterfaceSink,
    {
        let sends = |r: &RemoteIndex<G, A>| dest_flags.admits(r.attribute()) && source_flags.admits(r.local_attribute());
        let receives =
            |r: &RemoteIndex<G, A>| source_flags.admits(r.attribute()) && dest_flags.admits(r.local_attribute());

        for (&rank, lists) in self.table.iter() {
            sink.reserve(rank, true, lists.send().iter().filter(|r| sends(*r)).count());
            sink.reserve(rank, false, lists.receive().iter().filter(|r| receives(*r)).count());
        }
        for (&rank, lists) in self.table.iter() {
            for r in lists.send().iter().filter(|r| sends(*r)) {
                sink.add(rank, true, self.local_slot(rank, r, self.source)?);
            }
            for r in lists.receive().iter().filter(|r| receives(*r)) {
                sink.add(rank, false, self.local_slot(rank, r, self.dest)?);
            }
        }
        Ok(())
    }

    fn local_slot(
        &self,
        rank: usize,
        r: &RemoteIndex<G, A>,
        set: &ParallelIndexSet<G, A>,
    ) -> Result<usize, IndexSyncError> {
        match set.find_pair(r.global(), r.local_attribute())? {
            Some(pair) => Ok(pair.local().local()),
            None => Err(IndexSyncError::DanglingRemoteIndex {
                neighbor: rank,
                global: format!("{:?}", r.global()),
            }),
        }
    }
}

/// Local slots exchanged with one neighbour in one direction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceInformation {
    indices: Vec<usize>,
}

impl InterfaceInformation {
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, usize> {
        self.indices.iter()
    }
}

/// Communication interface: `(send, receive)` slot lists per neighbour.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Interface {
    interfaces: BTreeMap<usize, (InterfaceInformation, InterfaceInformation)>,
}

impl Interface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from `table`, keeping only neighbours with something to exchange.
    pub fn build<G, A, S, D>(
        &mut self,
        table: &RemoteIndexTable<G, A>,
        source: &ParallelIndexSet<G, A>,
        dest: &ParallelIndexSet<G, A>,
        source_flags: &S,
        dest_flags: &D,
    ) -> Result<(), IndexSyncError>
    where
        G: GlobalIndex,
        A: Attribute,
        S: AttributePredicate<A>,
        D: AttributePredicate<A>,
    {
        let builder = InterfaceBuilder::new(table, source, dest)?;
        self.free();
        if let Err(e) = builder.build(source_flags, dest_flags, self) {
            self.free();
            return Err(e);
        }
        self.strip();
        Ok(())
    }

    pub fn interfaces(&self) -> &BTreeMap<usize, (InterfaceInformation, InterfaceInformation)> {
        &self.interfaces
    }

    pub fn get(&self, rank: usize) -> Option<&(InterfaceInformation, InterfaceInformation)> {
        self.interfaces.get(&rank)
    }

    pub fn send_indices(&self, rank: usize) -> Option<&[usize]> {
        self.get(rank).map(|(send, _)| send.indices())
    }

    pub fn receive_indices(&self, rank: usize) -> Option<&[usize]> {
        self.get(rank).map(|(_, recv)| recv.indices())
    }

    /// Drop neighbours with neither send nor receive slots.
    pub fn strip(&mut self) {
        self.interfaces
            .retain(|_, (send, recv)| !(send.is_empty() && recv.is_empty()));
    }

    pub fn free(&mut self) {
        self.interfaces.clear();
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }
}

impl InterfaceSink for Interface {
    fn reserve(&mut self, rank: usize, send: bool, count: usize) {
        let (s, r) = self.interfaces.entry(rank).or_default();
        let info = if send { s } else { r };
        info.indices.reserve_exact(count);
    }

    fn add(&mut self, rank: usize, send: bool, local: usize) {
        let (s, r) = self.interfaces.entry(rank).or_default();
        let info = if send { s } else { r };
        info.indices.push(local);
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (rank, (send, recv)) in &self.interfaces {
            writeln!(f, "{rank}: send {:?} receive {:?}", send.indices(), recv.indices())?;
        }
        Ok(())
    }
}
