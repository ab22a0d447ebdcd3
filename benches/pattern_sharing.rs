//! Multi-pattern benchmarks.
//!
//! These benchmarks compare tree construction and evaluation of many patterns
//! with and without node sharing.

mod common;

use cep_tree_engine::{EngineConfig, Event, Pattern, SharingStrategy, TreeEngine};
use common::{generate_patterns, generate_stream, BenchmarkConfig};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const STRATEGIES: [(&str, SharingStrategy); 3] = [
    ("none", SharingStrategy::None),
    ("leaf", SharingStrategy::LeafSharing),
    ("subtree", SharingStrategy::SubtreeUnion),
];

fn engine_config(sharing: SharingStrategy) -> EngineConfig {
    EngineConfig::sorted().with_sharing(sharing)
}

fn evaluate(patterns: &[Pattern], sharing: SharingStrategy, events: &[Event]) -> anyhow::Result<usize> {
    let mut engine = TreeEngine::from_patterns(patterns, engine_config(sharing))?;
    Ok(engine.evaluate_all(events.iter().cloned())?.len())
}

fn bench_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("construction");
    for pattern_count in [10, 100, 500] {
        let patterns = generate_patterns(&BenchmarkConfig::new().with_pattern_count(pattern_count));
        for (name, sharing) in STRATEGIES {
            group.bench_with_input(BenchmarkId::new(name, pattern_count), &patterns, |b, patterns| {
                b.iter(|| {
                    black_box(
                        TreeEngine::from_patterns(patterns, engine_config(sharing))
                            .map(|engine| engine.statistics().total_nodes)
                            .unwrap_or(0),
                    )
                })
            });
        }
    }
    group.finish();
}

fn bench_evaluation(c: &mut Criterion) {
    let config = BenchmarkConfig::new().with_event_count(1_000);
    let events = generate_stream(&config);

    let mut group = c.benchmark_group("shared_evaluation");
    group.throughput(Throughput::Elements(events.len() as u64));
    for pattern_count in [5, 25] {
        let patterns = generate_patterns(&config.clone().with_pattern_count(pattern_count));
        for (name, sharing) in STRATEGIES {
            group.bench_with_input(BenchmarkId::new(name, pattern_count), &patterns, |b, patterns| {
                b.iter(|| black_box(evaluate(patterns, sharing, &events).unwrap_or(0)))
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_construction, bench_evaluation);
criterion_main!(benches);
