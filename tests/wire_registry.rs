mod util;
use util::*;

use parindex::algs::wire::WireScalar;
use parindex::prelude::*;
use static_assertions::const_assert_eq;
use GridFlag::*;

/// Application-specific global id carried as 4 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct CellId(u32);

impl WireScalar for CellId {
    const WIRE_SIZE: usize = 4;
    const NAME: &'static str = "CellId";

    fn write_le(self, out: &mut Vec<u8>) {
        self.0.write_le(out);
    }

    fn read_le(bytes: &[u8]) -> Self {
        CellId(u32::read_le(bytes))
    }
}

const_assert_eq!(<CellId as WireScalar>::WIRE_SIZE, std::mem::size_of::<u32>());

fn cells(entries: &[(u32, GridFlag)]) -> ParallelIndexSet<CellId, GridFlag> {
    let mut s = ParallelIndexSet::new();
    s.begin_resize().unwrap();
    for &(g, a) in entries {
        s.add(CellId(g), a, true).unwrap();
    }
    s.end_resize().unwrap();
    s
}

#[test]
fn unregistered_global_type_is_reported() {
    let wire = WireRegistry::new();
    assert!(!wire.is_registered::<CellId>());
    let comm = NoComm;
    let ctx = CommContext::new(&comm, &wire);
    let set = cells(&[(1, Owner), (1, Overlap)]);
    let mut table = RemoteIndexTable::new(RemoteIndexConfig {
        include_self: true,
        ..RemoteIndexConfig::default()
    });
    let err = table.rebuild_single(&set, &ctx, false).unwrap_err();
    assert_eq!(err, IndexSyncError::TypeNotRegistered("CellId"));
}

#[test]
fn registered_global_type_rebuilds_across_ranks() {
    let mut wire = WireRegistry::new();
    wire.register::<CellId>();
    assert_eq!(wire.pack_size::<CellId>(3).unwrap(), 12);
    let out = run_ranks(2, |comm| {
        let set = match comm.rank() {
            0 => cells(&[(10, Owner), (11, Owner)]),
            _ => cells(&[(11, Overlap), (12, Owner)]),
        };
        let ctx = CommContext::new(comm, &wire);
        let mut table = RemoteIndexTable::new(RemoteIndexConfig::default());
        table.rebuild_single(&set, &ctx, false).unwrap();
        table
            .find(1 - comm.rank())
            .map(|l| l.send().iter().map(|r| (r.global(), r.attribute())).collect::<Vec<_>>())
    });
    assert_eq!(out[0], Some(vec![(CellId(11), Overlap)]));
    assert_eq!(out[1], Some(vec![(CellId(11), Owner)]));
}

#[test]
fn packer_round_trips_headers_and_rejects_trailing_bytes() {
    let wire = WireRegistry::new();
    let mut p = wire.packer(16);
    p.pack(true).unwrap();
    p.pack_count(3).unwrap();
    p.pack(9u64).unwrap();
    let mut buf = p.finish();
    assert_eq!(buf.len(), 1 + 4 + 8);

    let mut u = wire.unpacker(&buf);
    assert!(u.unpack::<bool>().unwrap());
    assert_eq!(u.unpack_count().unwrap(), 3);
    assert_eq!(u.unpack::<u64>().unwrap(), 9);
    u.finish().unwrap();

    buf.push(0);
    let mut u = wire.unpacker(&buf);
    u.unpack::<bool>().unwrap();
    u.unpack_count().unwrap();
    u.unpack::<u64>().unwrap();
    assert!(matches!(u.finish(), Err(IndexSyncError::WireDecode(_))));
}

#[test]
fn negative_counts_are_rejected() {
    let wire = WireRegistry::new();
    let mut p = wire.packer(4);
    p.pack(-1i32).unwrap();
    let buf = p.finish();
    let mut u = wire.unpacker(&buf);
    assert!(matches!(u.unpack_count(), Err(IndexSyncError::WireDecode(_))));
}
