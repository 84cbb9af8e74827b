#[cfg(test)]
mod tests {
    use async_looper::{
        event_loop::{Config, EventLoop},
        model::{ChannelPriority, Task},
    };
    use futures::future::join_all;
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::{Duration, Instant},
    };
    use tokio::sync::mpsc::unbounded_channel;

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn load_test_1_many_producers_mixed_tasks() {
        println!("\n=== LOAD TEST 1: 8 producers x 250 mixed tasks ===");
        let event_loop = EventLoop::with_config(Config {
            primary_capacity: 16,
            follow_up_capacity: 16,
            ..Config::default()
        });
        let handle = event_loop.start(4).unwrap();

        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = unbounded_channel::<()>();

        let start = Instant::now();
        let producers = (0..8).map(|_| {
            let event_loop = event_loop.clone();
            let running = running.clone();
            let peak = peak.clone();
            let tx = tx.clone();
            async move {
                for i in 0..250 {
                    let tx = tx.clone();
                    let task = if i % 5 == 0 {
                        let running = running.clone();
                        let peak = peak.clone();
                        Task::blocking(move || {
                            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(1));
                            running.fetch_sub(1, Ordering::SeqCst);
                        })
                        .with_follow_up(move || {
                            let _ = tx.send(());
                        })
                    } else {
                        Task::new(move || {
                            let _ = tx.send(());
                        })
                    };
                    event_loop.submit(task).await.unwrap();
                }
            }
        });
        join_all(producers).await;
        drop(tx);

        let mut signals = 0;
        while signals < 2_000 {
            tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("timed out waiting for tasks")
                .expect("signal channel closed");
            signals += 1;
        }
        println!("✓ 2000 tasks in {:?}", start.elapsed());

        event_loop.request_stop().unwrap();
        handle.join().await.unwrap();

        let metrics = event_loop.metrics();
        println!("  peak blocking: {}", peak.load(Ordering::SeqCst));
        println!("  success rate: {:.1}%", metrics.success_rate() * 100.0);
        assert!(peak.load(Ordering::SeqCst) <= 4);
        assert_eq!(metrics.blocking_spawned, 400);
        assert_eq!(metrics.inline_executed, 2_000);
        assert_eq!(metrics.completed, 2_400);
        assert_eq!(metrics.dropped_follow_ups, 0);
        assert_eq!(metrics.gate_occupancy, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn load_test_2_blocking_submit_from_threads() {
        println!("\n=== LOAD TEST 2: blocking_submit from OS threads ===");
        let event_loop = EventLoop::with_config(Config {
            priority: ChannelPriority::FollowUpFirst,
            ..Config::io_bound()
        });
        let handle = event_loop.start_from_config().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let event_loop = event_loop.clone();
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let counter = counter.clone();
                        event_loop
                            .blocking_submit(Task::new(move || {
                                counter.fetch_add(1, Ordering::SeqCst);
                            }))
                            .unwrap();
                    }
                })
            })
            .collect();

        tokio::task::spawn_blocking(move || {
            for t in threads {
                t.join().unwrap();
            }
        })
        .await
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while counter.load(Ordering::SeqCst) < 400 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(counter.load(Ordering::SeqCst), 400);

        event_loop.request_stop().unwrap();
        handle.join_timeout(Duration::from_secs(5)).await.unwrap();
    }
}
