use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use herald_events::{DropPolicy, Event, EventBus, EventOptions};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

fn bus(rt: &tokio::runtime::Runtime, workers: usize) -> EventBus {
    rt.block_on(async { EventBus::builder().workers(workers).build().unwrap() })
}

// ============================================================================
// Benchmark: Synchronous Delivery
// ============================================================================

fn bench_sync_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync_publish");
    let rt = tokio::runtime::Runtime::new().unwrap();

    for subscribers in [1, 8, 64] {
        let bus = bus(&rt, 1);
        for priority in 0..subscribers {
            bus.subscribe_fn(
                "order.*",
                |event| {
                    black_box(event.payload().len());
                    std::future::ready(Ok(()))
                },
                EventOptions::synchronous().priority(priority),
            );
        }
        let event = Arc::new(Event::new("order.shipped", vec![0_u8; 64]));

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(subscribers), &event, |b, event| {
            b.to_async(&rt).iter(|| async {
                bus.publish(event.clone()).await.unwrap();
            });
        });

        rt.block_on(bus.close(Duration::from_secs(1))).unwrap();
    }

    group.finish();
}

// ============================================================================
// Benchmark: Pattern Resolution
// ============================================================================

fn bench_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolution");
    let rt = tokio::runtime::Runtime::new().unwrap();

    for patterns in [10, 100, 1000] {
        let bus = bus(&rt, 1);
        for i in 0..patterns {
            bus.subscribe_fn(
                format!("tenant{i}.*"),
                |_| std::future::ready(Ok(())),
                EventOptions::synchronous(),
            );
        }
        // Matches nothing, so the cost is the pattern scan alone.
        let event = Arc::new(Event::new("unrouted.key", Vec::new()));

        group.bench_with_input(BenchmarkId::new("miss", patterns), &event, |b, event| {
            b.to_async(&rt).iter(|| async {
                bus.publish(event.clone()).await.unwrap();
            });
        });

        rt.block_on(bus.close(Duration::from_secs(1))).unwrap();
    }

    group.finish();
}

// ============================================================================
// Benchmark: Asynchronous Enqueue
// ============================================================================

fn bench_async_enqueue(c: &mut Criterion) {
    let mut group = c.benchmark_group("async_enqueue");
    let rt = tokio::runtime::Runtime::new().unwrap();

    for workers in [1, 4] {
        let bus = bus(&rt, workers);
        for _ in 0..4 {
            bus.subscribe_fn(
                "metrics.*",
                |_| std::future::ready(Ok(())),
                EventOptions::asynchronous().buffer(1024).drop_policy(DropPolicy::DropNewest),
            );
        }
        let event = Arc::new(Event::new("metrics.tick", vec![0_u8; 256]));

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("workers", workers), &event, |b, event| {
            b.to_async(&rt).iter(|| async {
                bus.publish(event.clone()).await.unwrap();
            });
        });

        rt.block_on(bus.close(Duration::from_secs(5))).ok();
    }

    group.finish();
}

criterion_group!(benches, bench_sync_publish, bench_resolution, bench_async_enqueue);
criterion_main!(benches);
