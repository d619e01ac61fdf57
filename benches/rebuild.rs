use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use parindex::prelude::*;

/// Chain partition: each rank owns `per_rank` ids and overlaps `halo` ids of
/// its right neighbour.
fn chain_set(rank: usize, procs: usize, per_rank: u64, halo: u64) -> ParallelIndexSet<u64, GridFlag> {
    let start = rank as u64 * per_rank;
    let mut set = ParallelIndexSet::new();
    set.begin_resize().unwrap();
    for g in start..start + per_rank {
        set.add(g, GridFlag::Owner, true).unwrap();
    }
    if rank + 1 < procs {
        for g in start + per_rank..start + per_rank + halo {
            set.add(g, GridFlag::Overlap, true).unwrap();
        }
    }
    set.end_resize().unwrap();
    set
}

fn chain_neighbours(rank: usize, procs: usize) -> Vec<usize> {
    let mut n = Vec::new();
    if rank > 0 {
        n.push(rank - 1);
    }
    if rank + 1 < procs {
        n.push(rank + 1);
    }
    n
}

fn rebuild_all(procs: usize, strategy: ExchangeStrategy) {
    let wire = WireRegistry::new();
    let comms = ThreadComm::universe(procs);
    std::thread::scope(|s| {
        for comm in &comms {
            let wire = &wire;
            s.spawn(move || {
                let rank = comm.rank();
                let set = chain_set(rank, procs, 2_000, 200);
                let config = RemoteIndexConfig {
                    strategy,
                    ..RemoteIndexConfig::default()
                };
                let mut table = RemoteIndexTable::with_neighbours(config, chain_neighbours(rank, procs));
                table
                    .rebuild_single(&set, &CommContext::new(comm, wire), false)
                    .unwrap();
            });
        }
    });
}

fn bench_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("rebuild");
    for procs in [2usize, 4, 8] {
        group.bench_with_input(BenchmarkId::new("ring", procs), &procs, |b, &p| {
            b.iter(|| rebuild_all(p, ExchangeStrategy::Ring))
        });
        group.bench_with_input(BenchmarkId::new("neighbours", procs), &procs, |b, &p| {
            b.iter(|| rebuild_all(p, ExchangeStrategy::Neighbours))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_rebuild);
criterion_main!(benches);
