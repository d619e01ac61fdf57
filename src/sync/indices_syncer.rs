//! Incremental synchronisation after local index discovery or deletion.
//!
//! # Protocol
//! 1. Snapshot every neighbour list as value entries flagged *old*.
//! 2. For every local pair, collect the `(rank, attribute)` of every
//!    neighbour whose old entries say it holds the pair; each of those
//!    neighbours is told about the pair together with the full knower list.
//! 3. Send one message to every neighbour (possibly empty), then receive
//!    exactly one message from each neighbour in turn, matched by source.
//! 4. For every announcement, add the pair to the index set if it is missing
//!    and record the sender and every other knower in the shadow lists
//!    unless that exact entry is already there. New neighbours may appear.
//! 5. Commit the index set and write the shadow lists back into the table.
//!
//! Because remote entries are keyed by `(global, attribute)` they survive the
//! commit unchanged and need no re-resolution.

use std::collections::BTreeMap;

use itertools::Itertools;

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::config::SyncConfig;
use crate::debug_invariants::DebugInvariants;
use crate::index::GlobalIndex;
use crate::index::attribute::Attribute;
use crate::index::index_set::{IndexSetState, ParallelIndexSet};
use crate::index::local_index::ParallelLocalIndex;
use crate::index_error::IndexSyncError;
use crate::remote::collective::CollectiveIterator;
use crate::remote::remote_index::{RemoteIndex, RemoteIndexLists};
use crate::remote::table::RemoteIndexTable;
use crate::remote::CommContext;
use crate::sync::message::{self, Announcement};

/// Chooses the local slot of an index discovered during sync.
///
/// `None` lets the index set assign a fresh slot at commit.
pub trait Numberer<G> {
    fn number(&mut self, global: &G) -> Option<usize>;
}

/// Always defer to the index set's fresh slot assignment.
#[derive(Debug, Clone, Copy, Default)]
pub struct FreshSlots;

impl<G> Numberer<G> for FreshSlots {
    fn number(&mut self, _global: &G) -> Option<usize> {
        None
    }
}

impl<G, F: FnMut(&G) -> usize> Numberer<G> for F {
    fn number(&mut self, global: &G) -> Option<usize> {
        Some(self(global))
    }
}

#[derive(Debug, Clone, Copy)]
struct ShadowEntry<G, A> {
    index: RemoteIndex<G, A>,
    old: bool,
}

type Shadow<G, A> = BTreeMap<usize, Vec<ShadowEntry<G, A>>>;

/// Brings an index set and its (single-set) remote index table back in line
/// with the neighbours' knowledge.
pub struct IndicesSyncer<'a, G, A> {
    index_set: &'a mut ParallelIndexSet<G, A>,
    table: &'a mut RemoteIndexTable<G, A>,
    config: SyncConfig,
}

impl<'a, G: GlobalIndex, A: Attribute> IndicesSyncer<'a, G, A> {
    pub fn new(index_set: &'a mut ParallelIndexSet<G, A>, table: &'a mut RemoteIndexTable<G, A>) -> Self {
        Self::with_config(index_set, table, SyncConfig::default())
    }

    pub fn with_config(
        index_set: &'a mut ParallelIndexSet<G, A>,
        table: &'a mut RemoteIndexTable<G, A>,
        config: SyncConfig,
    ) -> Self {
        Self {
            index_set,
            table,
            config,
        }
    }

    /// Sync, giving newly discovered indices fresh local slots.
    pub fn sync<C: Communicator>(&mut self, ctx: &CommContext<'_, C>) -> Result<(), IndexSyncError> {
        self.sync_with(ctx, &mut FreshSlots)
    }

    /// Sync, numbering newly discovered indices with `numberer`. Collective
    /// among neighbours: every neighbour must call it too.
    pub fn sync_with<C, N>(&mut self, ctx: &CommContext<'_, C>, numberer: &mut N) -> Result<(), IndexSyncError>
    where
        C: Communicator,
        N: Numberer<G>,
    {
        let rank = ctx.rank();
        self.check_preconditions()?;

        let snapshot: BTreeMap<usize, Vec<RemoteIndex<G, A>>> = self
            .table
            .iter()
            .map(|(&r, lists)| (r, lists.send().to_vec()))
            .collect();
        let mut shadow: Shadow<G, A> = snapshot
            .iter()
            .map(|(&r, list)| {
                let entries = list.iter().map(|&index| ShadowEntry { index, old: true }).collect();
                (r, entries)
            })
            .collect();

        let outgoing = self.announcements(rank, &snapshot);

        self.index_set.begin_resize()?;
        let added = match self.exchange(ctx, &outgoing, &mut shadow, numberer) {
            Ok(added) => added,
            Err(e) => {
                // Leave the set committed and the table stale so a rebuild can recover.
                self.index_set.abort_resize();
                self.table.free();
                log::warn!("rank {rank}: sync failed, remote indices dropped: {e}");
                return Err(e);
            }
        };
        self.index_set.end_resize()?;

        let discovered: usize = shadow.values().flatten().filter(|e| !e.old).count();
        let lists = self.table.lists_mut();
        lists.clear();
        for (r, entries) in shadow {
            lists.insert(
                r,
                RemoteIndexLists::shared(entries.into_iter().map(|e| e.index).collect()),
            );
        }
        let seq = self.index_set.seq_no();
        self.table.mark_synced(seq, seq, true);
        log::debug!("rank {rank}: sync added {added} indices and {discovered} remote entries");
        crate::debug_invariants!(self.table.validate_invariants(), "IndicesSyncer::sync");
        Ok(())
    }

    fn check_preconditions(&self) -> Result<(), IndexSyncError> {
        self.index_set.require("sync", IndexSetState::Ground)?;
        if !self.table.is_shared() {
            return Err(IndexSyncError::SharedListsRequired);
        }
        self.table.check_synced(self.index_set, self.index_set)?;
        for (&neighbor, lists) in self.table.iter() {
            if let Some(r) = lists
                .send()
                .iter()
                .find(|r| self.index_set.position_of(r.global(), r.local_attribute()).is_none())
            {
                return Err(IndexSyncError::DanglingRemoteIndex {
                    neighbor,
                    global: format!("{:?}", r.global()),
                });
            }
        }
        Ok(())
    }

    /// Per neighbour, every local pair it is known to hold plus the full knower list.
    fn announcements(
        &self,
        rank: usize,
        snapshot: &BTreeMap<usize, Vec<RemoteIndex<G, A>>>,
    ) -> BTreeMap<usize, Vec<Announcement<G, A>>> {
        let mut outgoing: BTreeMap<usize, Vec<Announcement<G, A>>> = snapshot
            .keys()
            .filter(|&&r| r != rank)
            .map(|&r| (r, Vec::new()))
            .collect();
        let mut cursors = CollectiveIterator::new(snapshot.iter().map(|(&r, l)| (r, l.as_slice())));

        for pair in self.index_set.iter() {
            if cursors.is_empty() {
                break;
            }
            cursors.advance_with_attribute(pair.global(), pair.attribute());
            let knowers: Vec<(usize, A)> = cursors.current().map(|(r, e)| (r, e.attribute())).collect();
            if knowers.is_empty() {
                continue;
            }
            for dest in knowers.iter().map(|&(r, _)| r).dedup() {
                if let Some(msgs) = outgoing.get_mut(&dest) {
                    msgs.push(Announcement {
                        global: pair.global(),
                        attribute: pair.attribute(),
                        knowers: knowers.clone(),
                    });
                }
            }
            cursors.bump();
        }
        outgoing
    }

    fn exchange<C, N>(
        &mut self,
        ctx: &CommContext<'_, C>,
        outgoing: &BTreeMap<usize, Vec<Announcement<G, A>>>,
        shadow: &mut Shadow<G, A>,
        numberer: &mut N,
    ) -> Result<usize, IndexSyncError>
    where
        C: Communicator,
        N: Numberer<G>,
    {
        let comm = ctx.comm();
        let tag = self.config.tag;
        let mut first_err: Option<IndexSyncError> = None;
        let mut added = 0;

        let mut pending = Vec::with_capacity(outgoing.len());
        for (&nbr, announcements) in outgoing {
            let sent = message::encode(ctx.wire(), announcements)
                .and_then(|buf| comm.isend(nbr, tag, &buf));
            match sent {
                Ok(h) => pending.push(h),
                Err(e) => {
                    first_err = Some(e);
                    break;
                }
            }
        }

        // Exactly one message from each neighbour, matched by source.
        if first_err.is_none() {
            for &nbr in outgoing.keys() {
                match self.receive_and_apply(ctx, nbr, tag, shadow, numberer) {
                    Ok(n) => added += n,
                    Err(e) => {
                        first_err = Some(e);
                        break;
                    }
                }
            }
        }

        // Always drain sends before returning.
        for h in pending {
            if let Err(e) = h.wait() {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(added), Err)
    }

    fn receive_and_apply<C, N>(
        &mut self,
        ctx: &CommContext<'_, C>,
        source: usize,
        tag: CommTag,
        shadow: &mut Shadow<G, A>,
        numberer: &mut N,
    ) -> Result<usize, IndexSyncError>
    where
        C: Communicator,
        N: Numberer<G>,
    {
        let rank = ctx.rank();
        let buf = ctx.comm().recv(source, tag)?;
        let announcements: Vec<Announcement<G, A>> = message::decode(ctx.wire(), &buf)?;
        log::trace!("rank {rank}: {} announcements from {source}", announcements.len());

        let mut added = 0;
        for ann in announcements {
            let mine: Vec<A> = ann
                .knowers
                .iter()
                .filter(|&&(r, _)| r == rank)
                .map(|&(_, a)| a)
                .collect();
            if mine.is_empty() {
                log::warn!(
                    "rank {rank}: process {source} announced {:?} without listing us as a holder",
                    ann.global
                );
                continue;
            }
            for my_attr in mine {
                if !self.index_set.holds_key((ann.global, my_attr)) {
                    match numberer.number(&ann.global) {
                        Some(slot) => self
                            .index_set
                            .add_with_local(ann.global, ParallelLocalIndex::new(slot, my_attr, true))?,
                        None => self.index_set.add(ann.global, my_attr, true)?,
                    }
                    added += 1;
                }
                insert_shadow(shadow, source, RemoteIndex::new(ann.global, my_attr, ann.attribute));
                for &(knower, attribute) in ann.knowers.iter().filter(|&&(r, _)| r != rank) {
                    insert_shadow(shadow, knower, RemoteIndex::new(ann.global, my_attr, attribute));
                }
            }
        }
        Ok(added)
    }
}

/// Insert into the sorted shadow list of `rank` unless already present.
fn insert_shadow<G: GlobalIndex, A: Attribute>(
    shadow: &mut Shadow<G, A>,
    rank: usize,
    index: RemoteIndex<G, A>,
) -> bool {
    let list = shadow.entry(rank).or_default();
    match list.binary_search_by(|e| e.index.cmp(&index)) {
        Ok(_) => false,
        Err(at) => {
            list.insert(at, ShadowEntry { index, old: false });
            true
        }
    }
}
