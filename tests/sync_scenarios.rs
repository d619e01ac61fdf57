mod util;
use util::*;

use std::time::Duration;

use parindex::prelude::*;
use GridFlag::*;

fn rebuilt(
    comm: &ThreadComm,
    wire: &WireRegistry,
) -> (ParallelIndexSet<u64, GridFlag>, RemoteIndexTable<u64, GridFlag>) {
    let rank = comm.rank();
    let set = ring_partition(rank);
    let mut table = RemoteIndexTable::with_neighbours(RemoteIndexConfig::default(), ring_neighbours(rank));
    table
        .rebuild_single(&set, &CommContext::new(comm, wire), false)
        .unwrap();
    (set, table)
}

#[test]
fn sync_after_rebuild_changes_nothing() {
    let wire = WireRegistry::new();
    let out = run_ranks(3, |comm| {
        let (mut set, mut table) = rebuilt(comm, &wire);
        let before_set = set.clone();
        let before_table = table.clone();
        IndicesSyncer::new(&mut set, &mut table)
            .sync(&CommContext::new(comm, &wire))
            .unwrap();
        (set == before_set, table == before_table, table.is_synced(&set, &set))
    });
    assert!(out.into_iter().all(|t| t == (true, true, true)));
}

#[test]
fn new_index_reaches_every_listed_holder() {
    let wire = WireRegistry::new();
    let out = run_ranks(3, |comm| {
        let rank = comm.rank();
        let (mut set, mut table) = rebuilt(comm, &wire);
        if rank == 1 {
            // Rank 1 learns that id 10 is overlapped by both neighbours.
            set.begin_resize().unwrap();
            set.add(10, Owner, true).unwrap();
            set.end_resize().unwrap();
            for nbr in [0, 2] {
                let mut m = table.modifier(nbr, &set).unwrap();
                assert!(m.insert(RemoteIndex::new(10, Owner, Overlap)).unwrap());
            }
        }
        IndicesSyncer::new(&mut set, &mut table)
            .sync(&CommContext::new(comm, &wire))
            .unwrap();

        let lists: Vec<_> = table
            .iter()
            .map(|(&r, l)| (r, triples(l.send()).into_iter().filter(|t| t.0 == 10).collect::<Vec<_>>()))
            .collect();
        (set.find_pair(10, Overlap).unwrap().is_some(), set.exists(10).unwrap(), lists)
    });

    assert!(out[0].0 && out[2].0);
    assert!(out[1].1);
    assert_eq!(
        out[0].2,
        vec![(1, vec![(10, Overlap, Owner)]), (2, vec![(10, Overlap, Overlap)])]
    );
    assert_eq!(
        out[1].2,
        vec![(0, vec![(10, Owner, Overlap)]), (2, vec![(10, Owner, Overlap)])]
    );
    assert_eq!(
        out[2].2,
        vec![(0, vec![(10, Overlap, Overlap)]), (1, vec![(10, Overlap, Owner)])]
    );
}

#[test]
fn deleted_overlap_is_restored_by_its_owner() {
    let wire = WireRegistry::new();
    let out = run_ranks(3, |comm| {
        let rank = comm.rank();
        let (mut set, mut table) = rebuilt(comm, &wire);
        let reference = table.clone();
        if rank == 0 {
            set.begin_resize().unwrap();
            set.mark_global_deleted(3).unwrap();
            set.end_resize().unwrap();
            assert!(!set.exists(3).unwrap());
            assert_eq!(table.revalidate(&set, &set).unwrap(), 1);
        }
        IndicesSyncer::new(&mut set, &mut table)
            .sync(&CommContext::new(comm, &wire))
            .unwrap();
        (set.find_pair(3, if rank == 1 { Owner } else { Overlap }).unwrap().is_some(), table == reference)
    });
    assert!(out[0].0 && out[1].0);
    assert!(out.iter().all(|(_, same)| *same));
}

#[test]
fn numberer_picks_slots_for_discovered_indices() {
    let wire = WireRegistry::new();
    let out = run_ranks(2, |comm| {
        let rank = comm.rank();
        let mut set = match rank {
            0 => index_set(&[(1, Owner, true)]),
            _ => index_set(&[(1, Overlap, true)]),
        };
        let mut table = RemoteIndexTable::with_neighbours(RemoteIndexConfig::default(), [1 - rank]);
        table
            .rebuild_single(&set, &CommContext::new(comm, &wire), false)
            .unwrap();
        if rank == 0 {
            set.begin_resize().unwrap();
            set.add(7, Owner, true).unwrap();
            set.end_resize().unwrap();
            let mut m = table.modifier(1, &set).unwrap();
            m.insert(RemoteIndex::new(7, Owner, Ghost)).unwrap();
        }
        let mut numberer = |g: &u64| 100 + *g as usize;
        IndicesSyncer::new(&mut set, &mut table)
            .sync_with(&CommContext::new(comm, &wire), &mut numberer)
            .unwrap();
        set.find_pair(7, Ghost).unwrap().map(|p| p.local().local())
    });
    assert_eq!(out[0], None);
    assert_eq!(out[1], Some(107));
}

#[test]
fn sync_refuses_stale_tables() {
    let wire = WireRegistry::new();
    let comm = NoComm;
    let ctx = CommContext::new(&comm, &wire);
    let mut set = index_set(&[(1, Owner, true)]);
    let mut table = RemoteIndexTable::new(RemoteIndexConfig::default());
    table.rebuild_single(&set, &ctx, false).unwrap();
    set.begin_resize().unwrap();
    set.add(2, Owner, true).unwrap();
    set.end_resize().unwrap();
    let err = IndicesSyncer::new(&mut set, &mut table).sync(&ctx).unwrap_err();
    assert!(matches!(err, IndexSyncError::StaleTable { .. }));
}

#[test]
fn sync_refuses_dangling_entries() {
    let wire = WireRegistry::new();
    let comm = NoComm;
    let mut set = index_set(&[(1, Owner, true), (2, Owner, true)]);
    let mut table = RemoteIndexTable::new(RemoteIndexConfig::default());
    table.modifier(3, &set).unwrap().insert(RemoteIndex::new(2, Owner, Ghost)).unwrap();
    set.begin_resize().unwrap();
    set.mark_global_deleted(2).unwrap();
    set.end_resize().unwrap();
    // Adopt the new sequence number without pruning.
    table.modifier(3, &set).unwrap();
    let err = IndicesSyncer::new(&mut set, &mut table)
        .sync(&CommContext::new(&comm, &wire))
        .unwrap_err();
    assert!(matches!(err, IndexSyncError::DanglingRemoteIndex { neighbor: 3, .. }));
    assert!(set.exists(1).unwrap());
}

#[test]
fn failed_sync_leaves_set_committed_and_table_stale() {
    let wire = WireRegistry::new();
    let out = run_ranks_with_timeout(3, Duration::from_millis(300), |comm| {
        let ctx = CommContext::new(comm, &wire);
        match comm.rank() {
            0 => {
                // Rank 2 never answers.
                let mut set = index_set(&[(1, Owner, true)]);
                let mut table = RemoteIndexTable::new(RemoteIndexConfig::default());
                table.modifier(1, &set).unwrap().insert(RemoteIndex::new(1, Owner, Overlap)).unwrap();
                table.modifier(2, &set).unwrap().insert(RemoteIndex::new(1, Owner, Ghost)).unwrap();
                let seq = set.seq_no();
                let err = IndicesSyncer::new(&mut set, &mut table).sync(&ctx).unwrap_err();
                assert!(matches!(err, IndexSyncError::Timeout { .. }), "{err:?}");
                assert_eq!(set.state(), IndexSetState::Ground);
                assert_eq!(set.seq_no(), seq);
                // Rank 1's announcement of id 5 was not half-applied.
                assert!(!set.exists(5).unwrap());
                assert!(table.is_empty());
                assert!(!table.is_synced(&set, &set));

                let serial = NoComm;
                table
                    .rebuild_single(&set, &CommContext::new(&serial, &wire), false)
                    .unwrap();
                table.is_synced(&set, &set)
            }
            1 => {
                let mut set = index_set(&[(5, Owner, true)]);
                let mut table = RemoteIndexTable::new(RemoteIndexConfig::default());
                table.modifier(0, &set).unwrap().insert(RemoteIndex::new(5, Owner, Overlap)).unwrap();
                IndicesSyncer::new(&mut set, &mut table).sync(&ctx).unwrap();
                set.find_pair(1, Overlap).unwrap().is_some()
            }
            _ => true,
        }
    });
    assert_eq!(out, vec![true, true, true]);
}

#[test]
fn back_to_back_syncs_with_a_late_rank() {
    let wire = WireRegistry::new();
    let out = run_ranks(3, |comm| {
        let rank = comm.rank();
        let (mut set, mut table) = rebuilt(comm, &wire);
        let ctx = CommContext::new(comm, &wire);
        if rank == 2 {
            std::thread::sleep(Duration::from_millis(300));
        }
        if rank == 0 {
            set.begin_resize().unwrap();
            set.add(20, Owner, true).unwrap();
            set.end_resize().unwrap();
            table.modifier(1, &set).unwrap().insert(RemoteIndex::new(20, Owner, Overlap)).unwrap();
        }
        IndicesSyncer::new(&mut set, &mut table).sync(&ctx).unwrap();
        let first: Vec<usize> = table.iter().map(|(&r, _)| r).collect();
        IndicesSyncer::new(&mut set, &mut table).sync(&ctx).unwrap();
        let second: Vec<usize> = table.iter().map(|(&r, _)| r).collect();
        (first, second, set.exists(20).unwrap())
    });
    assert_eq!(out[0], (vec![1], vec![1], true));
    assert_eq!(out[1], (vec![0, 2], vec![0, 2], true));
    assert_eq!(out[2], (vec![1], vec![1], false));
}
