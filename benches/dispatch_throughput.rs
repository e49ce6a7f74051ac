//! Benchmarks for pipeline construction and execution
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use crossbeam_channel::bounded;
use relay_dispatch::config::settings;
use relay_dispatch::{DispatchQueue, Settings};
use std::sync::Arc;
use std::time::Duration;

fn quiet() {
    settings::init(Settings {
        enable_log_warnings: false,
        ..Settings::default()
    });
}

fn bench_inline_chain(c: &mut Criterion) {
    quiet();
    let mut group = c.benchmark_group("inline_chain");

    for length in [1_usize, 10, 100].iter() {
        group.throughput(Throughput::Elements(*length as u64));
        group.bench_with_input(BenchmarkId::new("run", length), length, |b, &length| {
            b.iter(|| {
                let mut queue = DispatchQueue::test().unwrap().then(|()| 0_u64).unwrap();
                for _ in 1..length {
                    queue = queue.then(|n: u64| n + 1).unwrap();
                }
                black_box(queue.start().unwrap());
            });
        });
    }

    group.finish();
}

fn bench_zip(c: &mut Criterion) {
    quiet();
    let mut group = c.benchmark_group("zip");

    group.bench_function("zip2_inline", |b| {
        b.iter(|| {
            let other = DispatchQueue::test().unwrap().then(|()| "x".to_string()).unwrap();
            DispatchQueue::test()
                .unwrap()
                .then(|()| 1_u32)
                .unwrap()
                .zip(&other)
                .unwrap()
                .then(|(n, s): (u32, String)| black_box(format!("{}{}", n, s)))
                .unwrap()
                .start()
                .unwrap();
        });
    });

    group.finish();
}

fn bench_run_loop_round_trip(c: &mut Criterion) {
    quiet();
    let mut group = c.benchmark_group("run_loop");
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("background_round_trip", |b| {
        b.iter(|| {
            let (tx, rx) = bounded(1);
            DispatchQueue::background()
                .unwrap()
                .then(|()| 21_u32)
                .unwrap()
                .then(|n: u32| n * 2)
                .unwrap()
                .add_observer(Arc::new(move |n: &u32| {
                    let _ = tx.send(*n);
                }))
                .start()
                .unwrap();
            black_box(rx.recv_timeout(Duration::from_secs(1)).unwrap());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_inline_chain, bench_zip, bench_run_loop_round_trip);
criterion_main!(benches);
