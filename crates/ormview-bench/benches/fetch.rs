//! End-to-end fetch benchmarks.
//!
//! Plans are cached after the first iteration, so these measure dispatch
//! against the memory store plus reconstitution.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ormview_bench::fixtures::{blog_store, nested_view, pets_view, wide_view, Scale};
use ormview_core::{
    DispatchConfig, FetchConfig, Fetcher, GraphFactory, PlanConfig, ResolutionMode, SplitStrategy,
};

fn bench_serial_vs_parallel(c: &mut Criterion) {
    let mut group = c.benchmark_group("fetch/dispatch");

    for &scale in &[Scale::Tiny, Scale::Small] {
        let store = blog_store(scale);
        let view = nested_view();
        let name = format!("{:?}", scale);

        group.bench_with_input(BenchmarkId::new("serial", &name), &view, |b, view| {
            let fetcher = Fetcher::new(store.schema(), &store, FetchConfig::default());
            b.iter(|| {
                black_box(fetcher.fetch(view, &GraphFactory).unwrap());
            });
        });

        for workers in [2, 4] {
            let config = FetchConfig::default().with_dispatch(DispatchConfig::parallel(workers));
            let id = BenchmarkId::new(format!("parallel_{workers}"), &name);
            group.bench_with_input(id, &view, |b, view| {
                let fetcher = Fetcher::new(store.schema(), &store, config.clone());
                b.iter(|| {
                    black_box(fetcher.fetch(view, &GraphFactory).unwrap());
                });
            });
        }
    }

    group.finish();
}

fn bench_split_vs_cross_product(c: &mut Criterion) {
    let mut group = c.benchmark_group("fetch/split");
    let store = blog_store(Scale::Small);
    let view = wide_view();

    for (name, split) in [
        ("none", SplitStrategy::None),
        ("to_root", SplitStrategy::ToRoot),
        ("to_anchor", SplitStrategy::ToAnchor),
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(name), &split, |b, &split| {
            let config = FetchConfig::default().with_plan(PlanConfig::default().with_split(split));
            let fetcher = Fetcher::new(store.schema(), &store, config);
            b.iter(|| {
                black_box(fetcher.fetch(&view, &GraphFactory).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_batch_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("fetch/batch_size");
    let store = blog_store(Scale::Small);
    let view = nested_view();

    for batch_size in [10, 100, 1_000] {
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            &batch_size,
            |b, &batch_size| {
                let dispatch = DispatchConfig::serial().with_batch_size(batch_size);
                let fetcher =
                    Fetcher::new(store.schema(), &store, FetchConfig::default().with_dispatch(dispatch));
                b.iter(|| {
                    black_box(fetcher.fetch(&view, &GraphFactory).unwrap());
                });
            },
        );
    }

    group.finish();
}

fn bench_resolution_mode(c: &mut Criterion) {
    let mut group = c.benchmark_group("fetch/resolution");
    let store = blog_store(Scale::Small);
    let view = pets_view();

    for (name, mode) in [("shared", ResolutionMode::Shared), ("distinct", ResolutionMode::Distinct)] {
        group.bench_function(name, |b| {
            let config = FetchConfig::default().with_plan(PlanConfig::default().with_resolution(mode));
            let fetcher = Fetcher::new(store.schema(), &store, config);
            b.iter(|| {
                black_box(fetcher.fetch(&view, &GraphFactory).unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_serial_vs_parallel,
    bench_split_vs_cross_product,
    bench_batch_size,
    bench_resolution_mode
);
criterion_main!(benches);
