//! # Micro Benchmarks
//!
//! Fine-grained benchmarks for the building blocks of the aggregates.
//!
//! Run with: `cargo bench --bench micro_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rollmetrics::{
    cpu_relax, Action, ActorStats, BufferedActor, CachingSupplier, HdrReservoir, Histogram,
    MockTicker, RetentionPolicy, SingleThreadedRanking, SystemTicker, Ticker, WriterReaderPhaser,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Default)]
struct AddAction(u64);

impl Action<u64> for AddAction {
    fn run(&mut self, state: &mut u64) {
        *state += self.0;
    }
}

/// Benchmark time sources
fn bench_tickers(c: &mut Criterion) {
    let mut group = c.benchmark_group("tickers");

    group.bench_function("system_ticker", |b| {
        let ticker = SystemTicker;
        b.iter(|| black_box(ticker.now_millis()));
    });

    group.bench_function("mock_ticker", |b| {
        let ticker = MockTicker::new(0);
        b.iter(|| black_box(ticker.now_millis()));
    });

    group.bench_function("std_instant_now", |b| {
        b.iter(|| black_box(std::time::Instant::now()));
    });

    group.finish();
}

/// Benchmark CPU relaxation primitives
fn bench_cpu_primitives(c: &mut Criterion) {
    let mut group = c.benchmark_group("cpu_primitives");

    group.bench_function("cpu_relax", |b| {
        b.iter(|| {
            cpu_relax();
        });
    });

    group.bench_function("spin_loop_hint", |b| {
        b.iter(|| {
            std::hint::spin_loop();
        });
    });

    group.bench_function("yield_now", |b| {
        b.iter(|| {
            thread::yield_now();
        });
    });

    group.finish();
}

/// Benchmark buffered actor submission
fn bench_buffered_actor(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffered_actor");

    group.bench_function("uncontended_submit", |b| {
        let actor = BufferedActor::<u64, AddAction>::new(0, 64, 256).unwrap();
        b.iter(|| {
            let mut action = actor.get_action_from_pool();
            action.0 = 1;
            actor.submit_or_run_exclusively(action);
        });
    });

    group.bench_function("run_exclusively", |b| {
        let actor = BufferedActor::<u64, AddAction>::new(0, 64, 256).unwrap();
        b.iter(|| black_box(actor.run_exclusively(|state| *state)));
    });

    for num_threads in [2, 4] {
        group.bench_with_input(
            BenchmarkId::new("contended_submit", num_threads),
            &num_threads,
            |b, &num_threads| {
                let actor = Arc::new(BufferedActor::<u64, AddAction>::new(0, 16, 64).unwrap());

                b.iter_custom(|iters| {
                    let start = std::time::Instant::now();
                    let handles: Vec<_> = (0..num_threads)
                        .map(|_| {
                            let actor = actor.clone();
                            thread::spawn(move || {
                                for _ in 0..iters {
                                    let mut action = actor.get_action_from_pool();
                                    action.0 = 1;
                                    actor.submit_or_run_exclusively(action);
                                }
                            })
                        })
                        .collect();

                    for handle in handles {
                        handle.join().unwrap();
                    }
                    start.elapsed()
                });
            },
        );
    }

    group.finish();
}

/// Benchmark the phaser's writer critical section
fn bench_phaser(c: &mut Criterion) {
    let mut group = c.benchmark_group("phaser");

    group.bench_function("writer_critical_section", |b| {
        let phaser = WriterReaderPhaser::new();
        b.iter(|| {
            let _section = phaser.writer_critical_section();
        });
    });

    group.bench_function("flip_without_writers", |b| {
        let phaser = WriterReaderPhaser::new();
        b.iter(|| {
            let reader = phaser.reader_lock();
            phaser.flip_phase(&reader);
        });
    });

    group.finish();
}

/// Benchmark single-threaded ranking updates
fn bench_single_threaded_ranking(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_threaded_ranking");

    for capacity in [10, 100, 1000] {
        group.bench_with_input(
            BenchmarkId::new("insert_evicting", capacity),
            &capacity,
            |b, &capacity| {
                let mut ranking = SingleThreadedRanking::new(capacity, 0);
                let mut i = 0u64;
                b.iter(|| {
                    i += 1;
                    black_box(ranking.update(i as i64, i))
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("rejected_too_small", capacity),
            &capacity,
            |b, &capacity| {
                let mut ranking = SingleThreadedRanking::new(capacity, 0);
                for i in 0..capacity as u64 {
                    ranking.update(1_000 + i as i64, i);
                }
                b.iter(|| black_box(ranking.update(1, u64::MAX)));
            },
        );
    }

    group.finish();
}

/// Benchmark actor stats calculation
fn bench_stats_calculation(c: &mut Criterion) {
    let mut group = c.benchmark_group("stats_calc");

    let scenarios = [
        ("no_activity", 0, 0),
        ("no_overflow", 1000, 0),
        ("light_overflow", 1000, 5),
        ("heavy_overflow", 1000, 500),
    ];

    for (name, submitted, overflow) in scenarios {
        group.bench_function(name, |b| {
            let stats = ActorStats {
                pool_size: 64,
                batch_size: 256,
                total_submitted: submitted,
                total_executed: submitted,
                overflow_allocations: overflow,
                batch_limit_hits: 0,
            };
            b.iter(|| black_box(stats.health_status()));
        });
    }

    group.finish();
}

/// Benchmark snapshot caching and histogram recording
fn bench_collaborators(c: &mut Criterion) {
    let mut group = c.benchmark_group("collaborators");

    group.bench_function("caching_supplier_hit", |b| {
        let cache = CachingSupplier::new(Duration::from_secs(3600), Arc::new(SystemTicker));
        b.iter(|| black_box(cache.get_or_compute(|| 42u64)));
    });

    group.bench_function("hdr_reservoir_update", |b| {
        let reservoir = HdrReservoir::new(3_600_000, 3).unwrap();
        let mut value = 0i64;
        b.iter(|| {
            value = (value + 7) % 10_000;
            reservoir.update(value);
        });
    });

    group.finish();
}

/// Benchmark configuration validation
fn bench_config_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("config_validation");

    group.bench_function("valid_policy", |b| {
        let policy = RetentionPolicy::reset_periodically_by_chunks(Duration::from_secs(60), 6);
        b.iter(|| black_box(policy.validate()));
    });

    group.bench_function("invalid_policy", |b| {
        let policy = RetentionPolicy::reset_periodically_by_chunks(Duration::from_millis(10), 6);
        b.iter(|| black_box(policy.validate()));
    });

    group.finish();
}

criterion_group!(
    micro_benches,
    bench_tickers,
    bench_cpu_primitives,
    bench_buffered_actor,
    bench_phaser,
    bench_single_threaded_ranking,
    bench_stats_calculation,
    bench_collaborators,
    bench_config_validation,
);

criterion_main!(micro_benches);
