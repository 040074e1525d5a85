use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;

use matchbook::{AdaptiveEngine, EngineConfig, MatchEngine, Order, ShardedEngine, Side};

fn random_orders(count: usize, seed: u64) -> Vec<Order> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let side = if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };
            let price = dec!(10000.0) + Decimal::from(rng.gen_range(0..50u32)) * dec!(0.5);
            let quantity = rng.gen_range(1..100u64);
            Order::limit(side, price, quantity).unwrap()
        })
        .collect()
}

fn bench_base_engine(c: &mut Criterion) {
    let mut group = c.benchmark_group("base_engine_process");
    group.measurement_time(Duration::from_secs(10));

    for size in [1_000usize, 10_000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let orders = random_orders(size, 1);
            b.iter(|| {
                let mut engine = MatchEngine::new();
                for order in &orders {
                    black_box(engine.process(order.clone()));
                }
            });
        });
    }
    group.finish();
}

fn bench_adaptive_overhead(c: &mut Criterion) {
    let mut group = c.benchmark_group("adaptive_vs_benchmark_mode");
    group.measurement_time(Duration::from_secs(10));
    let orders = random_orders(10_000, 2);

    group.throughput(Throughput::Elements(orders.len() as u64));
    group.bench_function("adaptive", |b| {
        b.iter(|| {
            let mut engine = AdaptiveEngine::new(EngineConfig::default());
            for order in &orders {
                black_box(engine.process(order.clone()));
            }
        });
    });
    group.bench_function("benchmark_mode", |b| {
        b.iter(|| {
            let mut engine = AdaptiveEngine::new(EngineConfig::default());
            engine.set_benchmark_mode(true);
            for order in &orders {
                black_box(engine.process(order.clone()));
            }
        });
    });
    group.finish();
}

fn bench_sharded_cancel(c: &mut Criterion) {
    let mut group = c.benchmark_group("sharded_mass_cancel");
    group.measurement_time(Duration::from_secs(10));

    for shards in [1usize, 8].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(shards), shards, |b, &shards| {
            b.iter_batched(
                || {
                    let mut engine = ShardedEngine::new(shards);
                    let mut ids = Vec::new();
                    for i in 0..5_000u64 {
                        let order =
                            Order::limit(Side::Buy, dec!(1.0) + Decimal::from(i), 10).unwrap();
                        ids.push(order.id);
                        engine.process(order);
                    }
                    (engine, ids)
                },
                |(engine, ids)| {
                    for id in ids {
                        black_box(engine.cancel(id));
                    }
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_base_engine, bench_adaptive_overhead, bench_sharded_cancel);
criterion_main!(benches);
