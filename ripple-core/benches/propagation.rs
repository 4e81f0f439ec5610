//! Benchmark: write propagation through signals, computed chains and effects

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ripple_core::reactive::{Computed, Runtime};

fn benchmark_signal_write_read(c: &mut Criterion) {
    let rt = Runtime::new();
    let signal = rt.signal(0u64);

    c.bench_function("signal_write_read", |b| {
        let mut next = 0u64;
        b.iter(|| {
            next += 1;
            signal.set(black_box(next));
            black_box(signal.get())
        })
    });
}

fn benchmark_computed_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("computed_chain");

    for depth in [1usize, 10, 100] {
        let rt = Runtime::new();
        let base = rt.signal(0u64);
        let mut top: Computed<u64> = {
            let base = base.clone();
            rt.computed(move || base.get() + 1)
        };
        for _ in 1..depth {
            let below = top.clone();
            top = rt.computed(move || below.get() + 1);
        }

        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            let mut next = 0u64;
            b.iter(|| {
                next += 1;
                base.set(next);
                black_box(top.get())
            })
        });
    }

    group.finish();
}

fn benchmark_batched_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("batched_flush");

    for fan_out in [1usize, 16, 256] {
        let rt = Runtime::new();
        let source = rt.signal(0u64);
        let effects: Vec<_> = (0..fan_out)
            .map(|_| {
                let source = source.clone();
                rt.effect(move || {
                    black_box(source.get());
                })
            })
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(fan_out), &fan_out, |b, _| {
            let mut next = 0u64;
            b.iter(|| {
                // Ten writes, one flush
                for _ in 0..10 {
                    next += 1;
                    source.set(next);
                }
                black_box(rt.flush())
            })
        });

        for effect in effects {
            effect.dispose();
        }
    }

    group.finish();
}

fn benchmark_equal_writes(c: &mut Criterion) {
    let rt = Runtime::new();
    let signal = rt.signal(String::from("steady"));
    let _effect = rt.effect({
        let signal = signal.clone();
        move || {
            black_box(signal.get());
        }
    });

    c.bench_function("equal_write_short_circuit", |b| {
        b.iter(|| signal.set(black_box(String::from("steady"))))
    });
}

criterion_group!(
    benches,
    benchmark_signal_write_read,
    benchmark_computed_chain,
    benchmark_batched_flush,
    benchmark_equal_writes
);
criterion_main!(benches);
