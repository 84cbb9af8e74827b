use async_looper::{EventLoop, Task};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use tokio::sync::mpsc::unbounded_channel;

fn create_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .enable_all()
        .build()
        .unwrap()
}

// Benchmark 1: inline dispatch throughput
fn bench_inline_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("inline_dispatch");
    let rt = create_runtime();

    for size in [100usize, 1000, 10000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.to_async(&rt).iter(|| async move {
                let event_loop = EventLoop::new(1024, 1024);
                let handle = event_loop.start(4).unwrap();
                let (tx, mut rx) = unbounded_channel();
                for i in 0..size {
                    let tx = tx.clone();
                    event_loop
                        .submit(Task::new(move || {
                            let _ = tx.send(black_box(i));
                        }))
                        .await
                        .unwrap();
                }
                for _ in 0..size {
                    rx.recv().await.unwrap();
                }
                event_loop.request_stop().unwrap();
                handle.join().await.unwrap();
            });
        });
    }
    group.finish();
}

// Benchmark 2: blocking tasks with follow-ups through the gate
fn bench_blocking_with_follow_up(c: &mut Criterion) {
    let mut group = c.benchmark_group("blocking_with_follow_up");
    let rt = create_runtime();

    for capacity in [1usize, 4, 16] {
        group.throughput(Throughput::Elements(256));
        group.bench_with_input(
            BenchmarkId::new("gate_capacity", capacity),
            &capacity,
            |b, &capacity| {
                b.to_async(&rt).iter(|| async move {
                    let event_loop = EventLoop::new(256, 256);
                    let handle = event_loop.start(capacity).unwrap();
                    let (tx, mut rx) = unbounded_channel();
                    for i in 0..256u64 {
                        let tx = tx.clone();
                        event_loop
                            .submit(Task::blocking(move || {
                                black_box(i.wrapping_mul(31));
                            })
                            .with_follow_up(move || {
                                let _ = tx.send(());
                            }))
                            .await
                            .unwrap();
                    }
                    for _ in 0..256 {
                        rx.recv().await.unwrap();
                    }
                    event_loop.request_stop().unwrap();
                    handle.join().await.unwrap();
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_inline_dispatch, bench_blocking_with_follow_up);
criterion_main!(benches);
