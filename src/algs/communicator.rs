//! Thin façade over in-process (threaded) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees). The trait
//! exposes exactly what the rebuild and sync protocols need: non-blocking
//! sends returning a waitable handle, probe for the next message (from one
//! rank or from anyone), receive sized exactly to the probed message, and two
//! small all-reduce collectives.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::index_error::IndexSyncError;

/// Message tag. Distinct protocols use distinct tags so their traffic never mixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommTag(u16);

impl CommTag {
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

/// Reserved by the default collective implementations.
pub const COLLECTIVE_TAG: CommTag = CommTag::new(0x7FF0);

/// Which sender a probe should match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Any,
    Rank(usize),
}

impl Source {
    fn matches(self, rank: usize) -> bool {
        match self {
            Source::Any => true,
            Source::Rank(r) => r == rank,
        }
    }
}

/// Envelope of a probed, not yet received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeStatus {
    pub source: usize,
    pub len: usize,
}

/// Anything that can be waited on.
pub trait Wait {
    /// Block until the operation has completed.
    fn wait(self) -> Result<(), IndexSyncError>;
}

impl Wait for () {
    fn wait(self) -> Result<(), IndexSyncError> {
        Ok(())
    }
}

/// Point-to-point + minimal collective communication interface.
pub trait Communicator {
    /// Handle returned by `isend`.
    type SendHandle: Wait;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: CommTag, buf: &[u8])
    -> Result<Self::SendHandle, IndexSyncError>;

    /// Blocking send.
    fn send(&self, peer: usize, tag: CommTag, buf: &[u8]) -> Result<(), IndexSyncError> {
        self.isend(peer, tag, buf)?.wait()
    }

    /// Block until a message with `tag` from `source` is available, without receiving it.
    fn probe(&self, source: Source, tag: CommTag) -> Result<ProbeStatus, IndexSyncError>;

    /// Receive the next message with `tag` from `source`.
    fn recv(&self, source: usize, tag: CommTag) -> Result<Vec<u8>, IndexSyncError>;

    fn barrier(&self) -> Result<(), IndexSyncError> {
        self.all_reduce_max(0).map(|_| ())
    }

    fn all_reduce_max(&self, value: u64) -> Result<u64, IndexSyncError> {
        reduce_at_root(self, value, u64::max)
    }

    /// Group-wide logical AND.
    fn all_reduce_and(&self, value: bool) -> Result<bool, IndexSyncError> {
        reduce_at_root(self, u64::from(value), u64::min).map(|v| v != 0)
    }
}

/// Gather to rank 0, fold, broadcast back.
fn reduce_at_root<C: Communicator + ?Sized>(
    comm: &C,
    value: u64,
    op: fn(u64, u64) -> u64,
) -> Result<u64, IndexSyncError> {
    let size = comm.size();
    if size <= 1 {
        return Ok(value);
    }
    if comm.rank() == 0 {
        let mut acc = value;
        for src in 1..size {
            let buf = comm.recv(src, COLLECTIVE_TAG)?;
            acc = op(acc, decode_u64(&buf, src)?);
        }
        for dst in 1..size {
            comm.send(dst, COLLECTIVE_TAG, &acc.to_le_bytes())?;
        }
        Ok(acc)
    } else {
        comm.send(0, COLLECTIVE_TAG, &value.to_le_bytes())?;
        let buf = comm.recv(0, COLLECTIVE_TAG)?;
        decode_u64(&buf, 0)
    }
}

fn decode_u64(buf: &[u8], from: usize) -> Result<u64, IndexSyncError> {
    let raw: [u8; 8] = buf.try_into().map_err(|_| IndexSyncError::CommError {
        neighbor: from,
        message: format!("collective payload of {} bytes, expected 8", buf.len()),
    })?;
    Ok(u64::from_le_bytes(raw))
}

/// Single-process communicator. Every collective is the identity; any
/// point-to-point traffic is an error because there is no peer.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn isend(&self, peer: usize, _tag: CommTag, _buf: &[u8]) -> Result<(), IndexSyncError> {
        Err(no_peer(peer))
    }
    fn probe(&self, _source: Source, _tag: CommTag) -> Result<ProbeStatus, IndexSyncError> {
        Err(no_peer(0))
    }
    fn recv(&self, source: usize, _tag: CommTag) -> Result<Vec<u8>, IndexSyncError> {
        Err(no_peer(source))
    }
}

fn no_peer(neighbor: usize) -> IndexSyncError {
    IndexSyncError::CommError {
        neighbor,
        message: "single-process communicator has no peers".into(),
    }
}

// --- ThreadComm: one thread per rank inside a single process ---

struct Envelope {
    source: usize,
    tag: CommTag,
    payload: Bytes,
}

#[derive(Default)]
struct Mailbox {
    queue: Mutex<VecDeque<Envelope>>,
    arrived: Condvar,
}

struct Fabric {
    mailboxes: Vec<Mailbox>,
    timeout: Option<Duration>,
}

/// In-process communicator: rank `r` of a universe created by
/// [`ThreadComm::universe`]. Delivery is FIFO per (source, destination)
/// pair and sends never block.
#[derive(Clone)]
pub struct ThreadComm {
    rank: usize,
    fabric: Arc<Fabric>,
}

impl std::fmt::Debug for ThreadComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadComm")
            .field("rank", &self.rank)
            .field("size", &self.fabric.mailboxes.len())
            .finish()
    }
}

impl ThreadComm {
    /// One communicator per rank; hand each to its own thread.
    pub fn universe(size: usize) -> Vec<ThreadComm> {
        Self::build(size, None)
    }

    /// Like [`universe`](Self::universe), but a probe or receive that waits
    /// longer than `timeout` fails with [`IndexSyncError::Timeout`].
    pub fn universe_with_timeout(size: usize, timeout: Duration) -> Vec<ThreadComm> {
        Self::build(size, Some(timeout))
    }

    fn build(size: usize, timeout: Option<Duration>) -> Vec<ThreadComm> {
        let fabric = Arc::new(Fabric {
            mailboxes: (0..size).map(|_| Mailbox::default()).collect(),
            timeout,
        });
        (0..size)
            .map(|rank| ThreadComm {
                rank,
                fabric: Arc::clone(&fabric),
            })
            .collect()
    }

    /// Messages queued for this rank and not yet received.
    pub fn pending(&self) -> usize {
        self.fabric.mailboxes[self.rank].queue.lock().len()
    }

    fn await_message<T>(
        &self,
        mut pick: impl FnMut(&mut VecDeque<Envelope>) -> Option<T>,
    ) -> Result<T, IndexSyncError> {
        let mailbox = &self.fabric.mailboxes[self.rank];
        let start = Instant::now();
        let mut queue = mailbox.queue.lock();
        loop {
            if let Some(found) = pick(&mut queue) {
                return Ok(found);
            }
            match self.fabric.timeout {
                None => mailbox.arrived.wait(&mut queue),
                Some(limit) => {
                    let elapsed = start.elapsed();
                    if elapsed >= limit {
                        return Err(IndexSyncError::Timeout {
                            waited_ms: elapsed.as_millis() as u64,
                        });
                    }
                    let _ = mailbox.arrived.wait_for(&mut queue, limit - elapsed);
                }
            }
        }
    }
}

impl Communicator for ThreadComm {
    type SendHandle = ();

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.fabric.mailboxes.len()
    }

    fn isend(&self, peer: usize, tag: CommTag, buf: &[u8]) -> Result<(), IndexSyncError> {
        let mailbox = self
            .fabric
            .mailboxes
            .get(peer)
            .ok_or_else(|| IndexSyncError::CommError {
                neighbor: peer,
                message: format!("rank out of range for a universe of {}", self.size()),
            })?;
        mailbox.queue.lock().push_back(Envelope {
            source: self.rank,
            tag,
            payload: Bytes::copy_from_slice(buf),
        });
        mailbox.arrived.notify_all();
        Ok(())
    }

    fn probe(&self, source: Source, tag: CommTag) -> Result<ProbeStatus, IndexSyncError> {
        self.await_message(|queue| {
            queue
                .iter()
                .find(|e| e.tag == tag && source.matches(e.source))
                .map(|e| ProbeStatus {
                    source: e.source,
                    len: e.payload.len(),
                })
        })
    }

    fn recv(&self, source: usize, tag: CommTag) -> Result<Vec<u8>, IndexSyncError> {
        self.await_message(|queue| {
            let at = queue
                .iter()
                .position(|e| e.tag == tag && e.source == source)?;
            queue.remove(at).map(|e| e.payload.to_vec())
        })
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::collective::SystemOperation;
    use mpi::environment::Universe;
    use mpi::request::StaticScope;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    /// MPI world communicator. Owns the MPI environment; dropping it finalizes MPI.
    pub struct MpiComm {
        _universe: Universe,
        world: SimpleCommunicator,
        rank: usize,
        size: usize,
    }

    impl MpiComm {
        pub fn new() -> Result<Self, IndexSyncError> {
            let universe = mpi::initialize().ok_or_else(|| IndexSyncError::CommError {
                neighbor: 0,
                message: "MPI was already initialized".into(),
            })?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                _universe: universe,
                world,
                rank,
                size,
            })
        }

        pub fn world(&self) -> &SimpleCommunicator {
            &self.world
        }
    }

    /// Owns the send buffer until the request has completed.
    pub struct MpiSendHandle {
        complete: Option<Box<dyn FnOnce()>>,
        buffer: *mut [u8],
    }

    impl Wait for MpiSendHandle {
        fn wait(mut self) -> Result<(), IndexSyncError> {
            if let Some(complete) = self.complete.take() {
                complete();
            }
            Ok(())
        }
    }

    impl Drop for MpiSendHandle {
        fn drop(&mut self) {
            if let Some(complete) = self.complete.take() {
                complete();
            }
            // SAFETY: `buffer` came from `Box::into_raw` in `isend` and the
            // request reading it has completed above.
            unsafe { drop(Box::from_raw(self.buffer)) };
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn isend(
            &self,
            peer: usize,
            tag: CommTag,
            buf: &[u8],
        ) -> Result<MpiSendHandle, IndexSyncError> {
            if peer >= self.size {
                return Err(IndexSyncError::CommError {
                    neighbor: peer,
                    message: format!("rank out of range for a world of {}", self.size),
                });
            }
            let buffer = Box::into_raw(buf.to_vec().into_boxed_slice());
            // SAFETY: freed only in `MpiSendHandle::drop`, after the request completed.
            let data: &'static [u8] = unsafe { &*buffer };
            let request = self.world.process_at_rank(peer as i32).immediate_send_with_tag(
                StaticScope,
                data,
                i32::from(tag.as_u16()),
            );
            Ok(MpiSendHandle {
                complete: Some(Box::new(move || {
                    let _ = request.wait();
                })),
                buffer,
            })
        }

        fn probe(&self, source: Source, tag: CommTag) -> Result<ProbeStatus, IndexSyncError> {
            let tag = i32::from(tag.as_u16());
            let status = match source {
                Source::Any => self.world.any_process().probe_with_tag(tag),
                Source::Rank(r) => self.world.process_at_rank(r as i32).probe_with_tag(tag),
            };
            Ok(ProbeStatus {
                source: status.source_rank() as usize,
                len: status.count(u8::equivalent_datatype()) as usize,
            })
        }

        fn recv(&self, source: usize, tag: CommTag) -> Result<Vec<u8>, IndexSyncError> {
            let (data, _status) = self
                .world
                .process_at_rank(source as i32)
                .receive_vec_with_tag::<u8>(i32::from(tag.as_u16()));
            Ok(data)
        }

        fn barrier(&self) -> Result<(), IndexSyncError> {
            self.world.barrier();
            Ok(())
        }

        fn all_reduce_max(&self, value: u64) -> Result<u64, IndexSyncError> {
            let mut out = 0u64;
            self.world
                .all_reduce_into(&value, &mut out, SystemOperation::max());
            Ok(out)
        }

        fn all_reduce_and(&self, value: bool) -> Result<bool, IndexSyncError> {
            let mut out = 0u8;
            self.world
                .all_reduce_into(&u8::from(value), &mut out, SystemOperation::min());
            Ok(out != 0)
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::{MpiComm, MpiSendHandle};

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn nocomm_collectives_are_identity() {
        let c = NoComm;
        assert_eq!(c.all_reduce_max(7).unwrap(), 7);
        assert!(!c.all_reduce_and(false).unwrap());
        c.barrier().unwrap();
        assert!(c.isend(1, CommTag::new(1), &[0]).is_err());
    }

    #[test]
    fn thread_roundtrip_two_ranks() {
        let comms = ThreadComm::universe(2);
        comms[0].send(1, CommTag::new(7), &[1, 2, 3, 4]).unwrap();
        let st = comms[1].probe(Source::Any, CommTag::new(7)).unwrap();
        assert_eq!(st, ProbeStatus { source: 0, len: 4 });
        assert_eq!(comms[1].recv(0, CommTag::new(7)).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(comms[1].pending(), 0);
    }

    #[test]
    fn fifo_per_pair_and_tags_do_not_mix() {
        let comms = ThreadComm::universe(2);
        let (a, b) = (CommTag::new(1), CommTag::new(2));
        comms[0].send(1, b, &[9]).unwrap();
        comms[0].send(1, a, &[1]).unwrap();
        comms[0].send(1, a, &[2]).unwrap();
        assert_eq!(comms[1].recv(0, a).unwrap(), vec![1]);
        assert_eq!(comms[1].recv(0, a).unwrap(), vec![2]);
        assert_eq!(comms[1].recv(0, b).unwrap(), vec![9]);
    }

    #[test]
    fn probe_times_out_instead_of_hanging() {
        let comms = ThreadComm::universe_with_timeout(2, Duration::from_millis(20));
        let err = comms[0].probe(Source::Rank(1), CommTag::new(3)).unwrap_err();
        assert!(matches!(err, IndexSyncError::Timeout { .. }));
    }

    #[test]
    fn send_to_missing_rank_fails() {
        let comms = ThreadComm::universe(1);
        assert!(matches!(
            comms[0].isend(4, CommTag::new(1), &[]),
            Err(IndexSyncError::CommError { neighbor: 4, .. })
        ));
    }

    #[test]
    fn default_all_reduce_across_threads() {
        let comms = ThreadComm::universe_with_timeout(4, Duration::from_secs(10));
        let results: Vec<(u64, bool)> = thread::scope(|s| {
            let handles: Vec<_> = comms
                .iter()
                .map(|c| {
                    s.spawn(move || {
                        let max = c.all_reduce_max(c.rank() as u64 * 3).unwrap();
                        let and = c.all_reduce_and(c.rank() != 2).unwrap();
                        c.barrier().unwrap();
                        (max, and)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(results.iter().all(|&r| r == (9, false)));
    }
}
