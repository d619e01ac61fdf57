//! Per-neighbour remote index lists and their staleness bookkeeping.

use std::collections::{BTreeMap, BTreeSet, btree_map};
use std::fmt;

use itertools::Itertools;

use crate::algs::communicator::Communicator;
use crate::config::{ExchangeStrategy, RemoteIndexConfig};
use crate::debug_invariants::DebugInvariants;
use crate::index::GlobalIndex;
use crate::index::attribute::Attribute;
use crate::index::index_set::{IndexSetState, ParallelIndexSet};
use crate::index_error::IndexSyncError;
use crate::remote::CommContext;
use crate::remote::collective::CollectiveIterator;
use crate::remote::rebuild::{self, Exchange, ExchangeParams};
use crate::remote::remote_index::{RemoteIndex, RemoteIndexLists};

/// For every neighbour, the indices we send to it and receive from it.
///
/// The table remembers the sequence numbers of the source and destination
/// index sets it was last built or synced against. Once either index set is
/// resized the table is stale until it is rebuilt, synced, or revalidated.
#[derive(Debug, Clone)]
pub struct RemoteIndexTable<G, A> {
    remote: BTreeMap<usize, RemoteIndexLists<G, A>>,
    neighbours: BTreeSet<usize>,
    config: RemoteIndexConfig,
    source_seq: Option<u64>,
    dest_seq: Option<u64>,
    public_ignored: bool,
    shared: bool,
}

impl<G: GlobalIndex, A: Attribute> Default for RemoteIndexTable<G, A> {
    fn default() -> Self {
        Self::new(RemoteIndexConfig::default())
    }
}

impl<G: GlobalIndex, A: Attribute> RemoteIndexTable<G, A> {
    pub fn new(config: RemoteIndexConfig) -> Self {
        Self {
            remote: BTreeMap::new(),
            neighbours: BTreeSet::new(),
            config,
            source_seq: None,
            dest_seq: None,
            public_ignored: false,
            shared: false,
        }
    }

    pub fn with_neighbours<I: IntoIterator<Item = usize>>(config: RemoteIndexConfig, neighbours: I) -> Self {
        let mut table = Self::new(config);
        table.set_neighbours(neighbours);
        table
    }

    pub fn config(&self) -> &RemoteIndexConfig {
        &self.config
    }

    pub fn set_include_self(&mut self, include_self: bool) {
        self.config.include_self = include_self;
    }

    /// Declare the processes we share indices with; enables the neighbour strategy.
    ///
    /// Either every process supplies a neighbour set or none does.
    pub fn set_neighbours<I: IntoIterator<Item = usize>>(&mut self, neighbours: I) {
        self.neighbours = neighbours.into_iter().collect();
    }

    pub fn neighbours(&self) -> &BTreeSet<usize> {
        &self.neighbours
    }

    /// Recompute all lists from scratch. Collective: every process must call it.
    ///
    /// When `source` and `dest` are the same object, each neighbour gets a
    /// single shared list.
    pub fn rebuild<C: Communicator>(
        &mut self,
        source: &ParallelIndexSet<G, A>,
        dest: &ParallelIndexSet<G, A>,
        ctx: &CommContext<'_, C>,
        ignore_public: bool,
    ) -> Result<(), IndexSyncError> {
        source.require("rebuild", IndexSetState::Ground)?;
        dest.require("rebuild", IndexSetState::Ground)?;
        let rank = ctx.rank();
        self.neighbours.remove(&rank);
        let params = ExchangeParams {
            exchange: self.resolve_exchange(ctx.size())?,
            include_self: self.config.include_self,
            ignore_public,
            tag: self.config.rebuild_tag,
            ring_warn_threshold: self.config.ring_warn_threshold,
        };

        self.free();
        self.remote = rebuild::build_remote(source, dest, ctx, &self.neighbours, params)?;
        self.shared = std::ptr::eq(source, dest);
        self.public_ignored = ignore_public;
        self.source_seq = Some(source.seq_no());
        self.dest_seq = Some(dest.seq_no());
        log::debug!(
            "rank {rank}: rebuilt remote indices with {} neighbour lists ({:?})",
            self.remote.len(),
            params.exchange
        );
        crate::debug_invariants!(self.validate_invariants(), "RemoteIndexTable::rebuild");
        Ok(())
    }

    /// [`rebuild`](Self::rebuild) with one index set as source and destination.
    pub fn rebuild_single<C: Communicator>(
        &mut self,
        index_set: &ParallelIndexSet<G, A>,
        ctx: &CommContext<'_, C>,
        ignore_public: bool,
    ) -> Result<(), IndexSyncError> {
        self.rebuild(index_set, index_set, ctx, ignore_public)
    }

    /// Rebuild unless every process already holds an up-to-date table.
    ///
    /// Collective. Returns whether a rebuild took place.
    pub fn ensure_synced<C: Communicator>(
        &mut self,
        source: &ParallelIndexSet<G, A>,
        dest: &ParallelIndexSet<G, A>,
        ctx: &CommContext<'_, C>,
        ignore_public: bool,
    ) -> Result<bool, IndexSyncError> {
        let fresh = self.public_ignored == ignore_public && self.is_synced(source, dest);
        if ctx.comm().all_reduce_and(fresh)? {
            return Ok(false);
        }
        self.rebuild(source, dest, ctx, ignore_public)?;
        Ok(true)
    }

    fn resolve_exchange(&self, procs: usize) -> Result<Exchange, IndexSyncError> {
        if procs <= 1 {
            return Ok(Exchange::Neighbours);
        }
        match self.config.strategy {
            ExchangeStrategy::Ring => Ok(Exchange::Ring),
            ExchangeStrategy::Neighbours if self.neighbours.is_empty() => Err(IndexSyncError::InvalidConfig(
                "neighbour exchange requested without a neighbour set".into(),
            )),
            ExchangeStrategy::Neighbours => Ok(Exchange::Neighbours),
            ExchangeStrategy::Auto if !self.neighbours.is_empty() => Ok(Exchange::Neighbours),
            ExchangeStrategy::Auto if self.config.allow_ring => Ok(Exchange::Ring),
            ExchangeStrategy::Auto => Err(IndexSyncError::InvalidConfig(
                "no neighbour set supplied and the ring fallback is disabled".into(),
            )),
        }
    }

    /// Whether the table matches the current sequence numbers of both sets.
    pub fn is_synced(&self, source: &ParallelIndexSet<G, A>, dest: &ParallelIndexSet<G, A>) -> bool {
        self.source_seq == Some(source.seq_no()) && self.dest_seq == Some(dest.seq_no())
    }

    pub fn check_synced(
        &self,
        source: &ParallelIndexSet<G, A>,
        dest: &ParallelIndexSet<G, A>,
    ) -> Result<(), IndexSyncError> {
        if self.is_synced(source, dest) {
            Ok(())
        } else {
            Err(IndexSyncError::StaleTable {
                expected_source: source.seq_no(),
                found_source: self.source_seq,
                expected_dest: dest.seq_no(),
                found_dest: self.dest_seq,
            })
        }
    }

    /// Drop entries whose local pair no longer exists and adopt the current
    /// sequence numbers. Returns how many entries were dropped.
    ///
    /// Neighbour lists are kept even when they become empty, so the
    /// neighbour relation seen by a later sync stays symmetric.
    pub fn revalidate(
        &mut self,
        source: &ParallelIndexSet<G, A>,
        dest: &ParallelIndexSet<G, A>,
    ) -> Result<usize, IndexSyncError> {
        source.require("revalidate", IndexSetState::Ground)?;
        dest.require("revalidate", IndexSetState::Ground)?;
        let mut dropped = 0;
        for lists in self.remote.values_mut() {
            let shared = lists.is_shared();
            let send = lists.send_mut();
            let before = send.len();
            send.retain(|r| source.position_of(r.global(), r.local_attribute()).is_some());
            dropped += before - send.len();
            if !shared {
                let receive = lists.receive_mut();
                let before = receive.len();
                receive.retain(|r| dest.position_of(r.global(), r.local_attribute()).is_some());
                dropped += before - receive.len();
            }
        }
        self.source_seq = Some(source.seq_no());
        self.dest_seq = Some(dest.seq_no());
        Ok(dropped)
    }

    /// Lock-step iterator over the send (or receive) lists of every neighbour.
    pub fn collective_iter(
        &self,
        send: bool,
        source: &ParallelIndexSet<G, A>,
        dest: &ParallelIndexSet<G, A>,
    ) -> Result<CollectiveIterator<'_, G, A>, IndexSyncError> {
        self.check_synced(source, dest)?;
        Ok(CollectiveIterator::new(
            self.remote.iter().map(|(&rank, lists)| (rank, lists.list(send))),
        ))
    }

    /// Whether the lists were built from a single index set.
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    pub fn public_ignored(&self) -> bool {
        self.public_ignored
    }

    pub fn find(&self, rank: usize) -> Option<&RemoteIndexLists<G, A>> {
        self.remote.get(&rank)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, usize, RemoteIndexLists<G, A>> {
        self.remote.iter()
    }

    /// Number of neighbours with a list.
    pub fn len(&self) -> usize {
        self.remote.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remote.is_empty()
    }

    /// Forget all lists; the table is stale afterwards.
    pub fn free(&mut self) {
        self.remote.clear();
        self.source_seq = None;
        self.dest_seq = None;
    }

    pub(crate) fn lists_mut(&mut self) -> &mut BTreeMap<usize, RemoteIndexLists<G, A>> {
        &mut self.remote
    }

    pub(crate) fn mark_synced(&mut self, source_seq: u64, dest_seq: u64, shared: bool) {
        self.source_seq = Some(source_seq);
        self.dest_seq = Some(dest_seq);
        self.shared = shared;
    }
}

/// Content equality of the per-neighbour lists.
impl<G: GlobalIndex, A: Attribute> PartialEq for RemoteIndexTable<G, A> {
    fn eq(&self, other: &Self) -> bool {
        self.remote == other.remote
    }
}

impl<G: GlobalIndex, A: Attribute> fmt::Display for RemoteIndexTable<G, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (rank, lists) in &self.remote {
            writeln!(f, "process {rank}:")?;
            writeln!(f, "  send: {}", lists.send().iter().format(" "))?;
            if !lists.is_shared() {
                writeln!(f, "  receive: {}", lists.receive().iter().format(" "))?;
            }
        }
        Ok(())
    }
}

fn check_list<G: GlobalIndex, A: Attribute>(
    rank: usize,
    list: &[RemoteIndex<G, A>],
) -> Result<(), IndexSyncError> {
    match list.iter().tuple_windows().find(|(a, b)| a >= b) {
        Some((a, b)) => Err(IndexSyncError::InvariantViolation(format!(
            "list for process {rank} not strictly ascending: {a} before {b}"
        ))),
        None => Ok(()),
    }
}

impl<G: GlobalIndex, A: Attribute> DebugInvariants for RemoteIndexTable<G, A> {
    fn validate_invariants(&self) -> Result<(), IndexSyncError> {
        for (&rank, lists) in &self.remote {
            check_list(rank, lists.send())?;
            if !lists.is_shared() {
                check_list(rank, lists.receive())?;
            }
        }
        Ok(())
    }
}
