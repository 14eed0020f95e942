//! Benchmarks for the balancing engine and the partition-set bitset.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use tessera::partition::{
    MemberInfo, MockDistributionManager, PartitionAssignmentStrategy, PartitionSet,
    SimpleAssignmentStrategy, StrategyConfig,
};

fn fresh_cluster(members: u32, partitions: u32) -> Arc<MockDistributionManager> {
    let mut builder = MockDistributionManager::builder("bench", partitions, 1)
        .owned_by(1)
        .auto_enact(true);
    for id in 1..=members {
        builder = builder.member(MemberInfo::new(id, id));
    }
    Arc::new(builder.build())
}

fn bench_initial_distribution(c: &mut Criterion) {
    let mut group = c.benchmark_group("initial_distribution");

    for (members, partitions) in [(4u32, 257u32), (8, 1024), (16, 4096)] {
        group.bench_function(format!("{members}members_{partitions}parts"), |b| {
            b.iter_batched(
                || {
                    let manager = fresh_cluster(members, partitions);
                    let mut strategy = SimpleAssignmentStrategy::new(StrategyConfig::default());
                    strategy.init(manager.clone());
                    (manager, strategy)
                },
                |(_manager, mut strategy)| {
                    black_box(strategy.analyze_distribution());
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_steady_state_analysis(c: &mut Criterion) {
    c.bench_function("steady_state_noop_analysis", |b| {
        let manager = fresh_cluster(8, 1024);
        let mut strategy = SimpleAssignmentStrategy::new(StrategyConfig::default());
        strategy.init(manager.clone());
        // reach the fixed point once; subsequent passes are no-ops
        for _ in 0..5 {
            strategy.analyze_distribution();
        }

        b.iter(|| {
            black_box(strategy.analyze_distribution());
        });
    });
}

fn bench_partition_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("partition_set");

    group.bench_function("iterate_sparse_8k", |b| {
        let set = PartitionSet::with_partitions(8192, (0..256).map(|i| i * 32));
        b.iter(|| {
            let mut sum = 0u64;
            for pid in set.iter() {
                sum += pid as u64;
            }
            black_box(sum)
        });
    });

    group.bench_function("wire_round_trip_dense_8k", |b| {
        use tessera::encode::WireCodec;
        let set = PartitionSet::with_partitions(8192, 0..4096);
        b.iter(|| {
            let mut buf = bytes::BytesMut::new();
            set.write_to(&mut buf).unwrap();
            let decoded = PartitionSet::read_from(&mut buf.freeze()).unwrap();
            black_box(decoded)
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_initial_distribution,
    bench_steady_state_analysis,
    bench_partition_set
);
criterion_main!(benches);
