//! Full rebuild of remote index knowledge.
//!
//! # Algorithm
//! 1. Collect the published pairs of the source (and, if it is a different
//!    object, the destination) index set: public pairs only, or every pair
//!    when public flags are ignored.
//! 2. Pack them as `[bool two][i32 n_source][i32 n_dest][n_source × (global, attr)][n_dest × (global, attr)]`.
//! 3. Unpack our own buffer first when two sets are involved or loop-back
//!    entries were requested.
//! 4. Exchange the buffer, either around a ring of all processes (P−1
//!    rounds, each forwarding the buffer received in the previous round) or
//!    directly with each declared neighbour (non-blocking sends, then one
//!    probe + receive addressed to each neighbour in turn).
//! 5. For every received entry whose global index we also publish, record a
//!    [`RemoteIndex`] in the send and/or receive list of the sender. Empty
//!    lists are not kept.

use std::collections::{BTreeMap, BTreeSet};

use crate::algs::communicator::{CommTag, Communicator, Source, Wait};
use crate::algs::wire::{Unpacker, WireRegistry};
use crate::index::GlobalIndex;
use crate::index::attribute::Attribute;
use crate::index::index_set::{IndexPair, ParallelIndexSet};
use crate::index_error::IndexSyncError;
use crate::remote::CommContext;
use crate::remote::remote_index::{RemoteIndex, RemoteIndexLists};

/// Exchange strategy after resolving [`ExchangeStrategy::Auto`](crate::config::ExchangeStrategy::Auto).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Exchange {
    Ring,
    Neighbours,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ExchangeParams {
    pub exchange: Exchange,
    pub include_self: bool,
    pub ignore_public: bool,
    pub tag: CommTag,
    pub ring_warn_threshold: usize,
}

type Lists<G, A> = BTreeMap<usize, RemoteIndexLists<G, A>>;

pub(crate) fn build_remote<G, A, C>(
    source: &ParallelIndexSet<G, A>,
    dest: &ParallelIndexSet<G, A>,
    ctx: &CommContext<'_, C>,
    neighbours: &BTreeSet<usize>,
    params: ExchangeParams,
) -> Result<Lists<G, A>, IndexSyncError>
where
    G: GlobalIndex,
    A: Attribute,
    C: Communicator,
{
    let rank = ctx.rank();
    let procs = ctx.size();
    let send_two = !std::ptr::eq(source, dest);
    let mut remote = Lists::new();

    if procs == 1 && !(send_two || params.include_self) {
        return Ok(remote);
    }

    let source_pairs = published(source, params.ignore_public);
    let dest_pairs = if send_two {
        published(dest, params.ignore_public)
    } else {
        Vec::new()
    };
    let locals = LocalPublished {
        source: source_pairs.as_slice(),
        dest: if send_two { dest_pairs.as_slice() } else { source_pairs.as_slice() },
        send_two,
    };

    let buffer = pack_published(ctx.wire(), send_two, &source_pairs, &dest_pairs)?;
    log::debug!(
        "rank {rank}: publishing {} source / {} destination indices ({} bytes)",
        source_pairs.len(),
        dest_pairs.len(),
        buffer.len()
    );

    if send_two || params.include_self {
        if let Some(lists) = unpack_create_remote(ctx.wire(), &buffer, &locals, params.include_self)? {
            remote.insert(rank, lists);
        }
    }

    match params.exchange {
        Exchange::Ring => {
            if procs > params.ring_warn_threshold {
                log::warn!(
                    "rank {rank}: rebuilding remote indices around a ring of {procs} processes; \
                     supply a neighbour set to avoid O(P) rounds"
                );
            }
            ring_exchange(ctx, buffer, &locals, params.tag, &mut remote)?;
        }
        Exchange::Neighbours => {
            neighbour_exchange(ctx, &buffer, &locals, neighbours, params.tag, &mut remote)?;
        }
    }
    Ok(remote)
}

/// Published local pairs used to match incoming entries.
struct LocalPublished<'a, G, A> {
    source: &'a [&'a IndexPair<G, A>],
    dest: &'a [&'a IndexPair<G, A>],
    send_two: bool,
}

fn published<G: GlobalIndex, A: Attribute>(
    set: &ParallelIndexSet<G, A>,
    ignore_public: bool,
) -> Vec<&IndexPair<G, A>> {
    set.iter()
        .filter(|p| ignore_public || p.local().is_public())
        .collect()
}

pub(crate) fn pack_published<G: GlobalIndex, A: Attribute>(
    wire: &WireRegistry,
    send_two: bool,
    source: &[&IndexPair<G, A>],
    dest: &[&IndexPair<G, A>],
) -> Result<Vec<u8>, IndexSyncError> {
    let entry = wire.pack_size::<G>(1)? + wire.pack_size::<u8>(1)?;
    let capacity =
        wire.pack_size::<bool>(1)? + wire.pack_size::<i32>(2)? + entry * (source.len() + dest.len());
    let mut p = wire.packer(capacity);
    p.pack(send_two)?;
    p.pack_count(source.len())?;
    p.pack_count(if send_two { dest.len() } else { 0 })?;
    for pair in source.iter().chain(if send_two { dest } else { &[] }) {
        p.pack(pair.global())?;
        p.pack(pair.attribute().to_wire())?;
    }
    debug_assert_eq!(p.len(), capacity);
    Ok(p.finish())
}

fn decode_block<G: GlobalIndex, A: Attribute>(
    u: &mut Unpacker<'_, '_>,
    n: usize,
) -> Result<Vec<(G, A)>, IndexSyncError> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        let global: G = u.unpack()?;
        let code: u8 = u.unpack()?;
        let attribute = A::from_wire(code).ok_or(IndexSyncError::UnknownAttribute(code))?;
        out.push((global, attribute));
    }
    out.sort_unstable();
    Ok(out)
}

/// Pair every remote `(global, attr)` with each local published pair of the
/// same global. Entries from our own buffer only count when the attributes differ.
fn match_entries<G: GlobalIndex, A: Attribute>(
    remote: &[(G, A)],
    local: &[&IndexPair<G, A>],
    from_ourself: bool,
) -> Vec<RemoteIndex<G, A>> {
    let mut out = Vec::new();
    let mut start = 0;
    for &(global, remote_attr) in remote {
        start += local[start..].partition_point(|p| p.global() < global);
        for pair in local[start..].iter().take_while(|p| p.global() == global) {
            let local_attr = pair.attribute();
            if !from_ourself || local_attr != remote_attr {
                out.push(RemoteIndex::new(global, local_attr, remote_attr));
            }
        }
    }
    out.sort_unstable();
    out.dedup();
    out
}

fn unpack_create_remote<G: GlobalIndex, A: Attribute>(
    wire: &WireRegistry,
    buffer: &[u8],
    locals: &LocalPublished<'_, G, A>,
    from_ourself: bool,
) -> Result<Option<RemoteIndexLists<G, A>>, IndexSyncError> {
    let mut u = wire.unpacker(buffer);
    let two_sets: bool = u.unpack()?;
    let n_source = u.unpack_count()?;
    let n_dest = u.unpack_count()?;
    let remote_source: Vec<(G, A)> = decode_block(&mut u, n_source)?;
    let remote_dest: Vec<(G, A)> = if two_sets {
        decode_block(&mut u, n_dest)?
    } else {
        Vec::new()
    };
    u.finish()?;

    let lists = if !two_sets {
        if locals.send_two {
            RemoteIndexLists::split(
                match_entries(&remote_source, locals.source, from_ourself),
                match_entries(&remote_source, locals.dest, from_ourself),
            )
        } else {
            RemoteIndexLists::shared(match_entries(&remote_source, locals.source, from_ourself))
        }
    } else {
        // The sender's source feeds our destination and its destination is fed by our source.
        RemoteIndexLists::split(
            match_entries(&remote_dest, locals.source, from_ourself),
            match_entries(&remote_source, locals.dest, from_ourself),
        )
    };
    Ok((!lists.is_empty()).then_some(lists))
}

fn ring_exchange<G, A, C>(
    ctx: &CommContext<'_, C>,
    mut outgoing: Vec<u8>,
    locals: &LocalPublished<'_, G, A>,
    tag: CommTag,
    remote: &mut Lists<G, A>,
) -> Result<(), IndexSyncError>
where
    G: GlobalIndex,
    A: Attribute,
    C: Communicator,
{
    let comm = ctx.comm();
    let (rank, procs) = (ctx.rank(), ctx.size());
    let right = (rank + 1) % procs;
    let left = (rank + procs - 1) % procs;

    for round in 1..procs {
        // Even ranks send first so that blocking sends cannot deadlock.
        let incoming = if rank % 2 == 0 {
            comm.send(right, tag, &outgoing)?;
            comm.recv(left, tag)?
        } else {
            let incoming = comm.recv(left, tag)?;
            comm.send(right, tag, &outgoing)?;
            incoming
        };
        let origin = (rank + procs - round) % procs;
        if let Some(lists) = unpack_create_remote(ctx.wire(), &incoming, locals, false)? {
            remote.insert(origin, lists);
        }
        outgoing = incoming;
    }
    Ok(())
}

fn neighbour_exchange<G, A, C>(
    ctx: &CommContext<'_, C>,
    buffer: &[u8],
    locals: &LocalPublished<'_, G, A>,
    neighbours: &BTreeSet<usize>,
    tag: CommTag,
    remote: &mut Lists<G, A>,
) -> Result<(), IndexSyncError>
where
    G: GlobalIndex,
    A: Attribute,
    C: Communicator,
{
    let comm = ctx.comm();
    let mut first_err: Option<IndexSyncError> = None;

    let mut pending = Vec::with_capacity(neighbours.len());
    for &nbr in neighbours {
        match comm.isend(nbr, tag, buffer) {
            Ok(h) => pending.push(h),
            Err(e) => {
                first_err = Some(e);
                break;
            }
        }
    }

    // One message per neighbour, matched by source: a neighbour that already
    // entered the next exchange on this tag cannot stand in for a slow one.
    if first_err.is_none() {
        for &nbr in neighbours {
            match receive_one(ctx, locals, nbr, tag) {
                Ok(Some(lists)) => {
                    remote.insert(nbr, lists);
                }
                Ok(None) => {}
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
    first_err.map_or(Ok(()), Err)
}

fn receive_one<G, A, C>(
    ctx: &CommContext<'_, C>,
    locals: &LocalPublished<'_, G, A>,
    source: usize,
    tag: CommTag,
) -> Result<Option<RemoteIndexLists<G, A>>, IndexSyncError>
where
    G: GlobalIndex,
    A: Attribute,
    C: Communicator,
{
    let status = ctx.comm().probe(Source::Rank(source), tag)?;
    let buf = ctx.comm().recv(source, tag)?;
    if buf.len() != status.len {
        return Err(IndexSyncError::CommError {
            neighbor: source,
            message: format!("probed {} bytes but received {}", status.len, buf.len()),
        });
    }
    log::trace!("rank {}: rebuild message of {} bytes from {source}", ctx.rank(), buf.len());
    unpack_create_remote(ctx.wire(), &buf, locals, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::attribute::GridFlag::{self, *};

    fn set_of(entries: &[(u64, GridFlag, bool)]) -> ParallelIndexSet<u64, GridFlag> {
        let mut s = ParallelIndexSet::new();
        s.begin_resize().unwrap();
        for &(g, a, public) in entries {
            s.add(g, a, public).unwrap();
        }
        s.end_resize().unwrap();
        s
    }

    #[test]
    fn packed_layout_matches_header() {
        let wire = WireRegistry::new();
        let s = set_of(&[(4, Owner, true), (9, Ghost, true)]);
        let pairs = published(&s, false);
        let buf = pack_published(&wire, false, &pairs, &[]).unwrap();
        // bool + 2 × i32 + 2 × (u64 + u8)
        assert_eq!(buf.len(), 1 + 8 + 2 * 9);
        assert_eq!(buf[0], 0);
        assert_eq!(&buf[1..5], &2i32.to_le_bytes());
        assert_eq!(&buf[5..9], &0i32.to_le_bytes());
        assert_eq!(buf[17], Owner as u8);
    }

    #[test]
    fn private_pairs_are_not_published() {
        let s = set_of(&[(1, Owner, true), (2, Owner, false)]);
        assert_eq!(published(&s, false).len(), 1);
        assert_eq!(published(&s, true).len(), 2);
    }

    #[test]
    fn matching_skips_identical_self_entries() {
        let s = set_of(&[(1, Owner, true), (1, Overlap, true), (3, Border, true)]);
        let local = published(&s, false);
        let remote = vec![(1, Owner), (1, Overlap), (2, Owner)];
        let all = match_entries(&remote, &local, false);
        assert_eq!(all.len(), 4);
        let own = match_entries(&remote, &local, true);
        assert_eq!(
            own,
            vec![RemoteIndex::new(1, Owner, Overlap), RemoteIndex::new(1, Overlap, Owner)]
        );
    }

    #[test]
    fn unknown_attribute_byte_is_rejected() {
        let wire = WireRegistry::new();
        let mut p = wire.packer(0);
        p.pack(false).unwrap();
        p.pack_count(1).unwrap();
        p.pack_count(0).unwrap();
        p.pack(7u64).unwrap();
        p.pack(42u8).unwrap();
        let buf = p.finish();
        let s = set_of(&[(7, Owner, true)]);
        let pairs = published(&s, false);
        let locals = LocalPublished { source: &pairs, dest: &pairs, send_two: false };
        assert_eq!(
            unpack_create_remote::<u64, GridFlag>(&wire, &buf, &locals, false),
            Err(IndexSyncError::UnknownAttribute(42))
        );
    }
}
