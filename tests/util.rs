#![allow(dead_code)]
use std::time::Duration;

use parindex::prelude::*;

/// Run `f` once per rank on its own thread over a fresh in-process universe.
pub fn run_ranks<T, F>(size: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(&ThreadComm) -> T + Sync,
{
    run_ranks_with_timeout(size, Duration::from_secs(20), f)
}

/// [`run_ranks`] where every blocking wait gives up after `timeout`.
pub fn run_ranks_with_timeout<T, F>(size: usize, timeout: Duration, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(&ThreadComm) -> T + Sync,
{
    let comms = ThreadComm::universe_with_timeout(size, timeout);
    let f = &f;
    std::thread::scope(|s| {
        let handles: Vec<_> = comms.iter().map(|c| s.spawn(move || f(c))).collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank thread panicked"))
            .collect()
    })
}

/// Index set holding `(global, attribute, public)` entries with fresh slots.
pub fn index_set(entries: &[(u64, GridFlag, bool)]) -> ParallelIndexSet<u64, GridFlag> {
    let mut s = ParallelIndexSet::new();
    s.begin_resize().unwrap();
    for &(g, a, public) in entries {
        s.add(g, a, public).unwrap();
    }
    s.end_resize().unwrap();
    s
}

/// Three processes, ids 0..8 split 0-2 / 3-5 / 6-8; ids 2,3 and 5,6 are held
/// by both adjacent processes, as owner on one side and overlap on the other.
pub fn ring_partition(rank: usize) -> ParallelIndexSet<u64, GridFlag> {
    use GridFlag::*;
    match rank {
        0 => index_set(&[(0, Owner, true), (1, Owner, true), (2, Owner, true), (3, Overlap, true)]),
        1 => index_set(&[
            (2, Overlap, true),
            (3, Owner, true),
            (4, Owner, true),
            (5, Owner, true),
            (6, Overlap, true),
        ]),
        2 => index_set(&[(5, Overlap, true), (6, Owner, true), (7, Owner, true), (8, Owner, true)]),
        _ => panic!("ring partition has three ranks"),
    }
}

/// Neighbours of `rank` in [`ring_partition`].
pub fn ring_neighbours(rank: usize) -> Vec<usize> {
    match rank {
        0 => vec![1],
        1 => vec![0, 2],
        _ => vec![1],
    }
}

/// Local slot of `(global, attribute)`.
pub fn slot(set: &ParallelIndexSet<u64, GridFlag>, global: u64, attribute: GridFlag) -> usize {
    set.find_pair(global, attribute)
        .unwrap()
        .unwrap_or_else(|| panic!("({global}, {attribute:?}) missing"))
        .local()
        .local()
}

/// `(global, local attr, remote attr)` triples of one list.
pub fn triples(list: &[RemoteIndex<u64, GridFlag>]) -> Vec<(u64, GridFlag, GridFlag)> {
    list.iter()
        .map(|r| (r.global(), r.local_attribute(), r.attribute()))
        .collect()
}
