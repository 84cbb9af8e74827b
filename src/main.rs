use async_looper::{EventLoop, Task};
use std::time::Duration;
use tokio::runtime::Builder;

fn main() {
    tracing_subscriber::fmt::init();

    let rt = Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");

    rt.block_on(async {
        let event_loop = EventLoop::new(10, 10);
        let handle = match event_loop.start(10) {
            Ok(handle) => handle,
            Err(e) => {
                eprintln!("failed to start event loop: {e}");
                return;
            }
        };

        let tasks = vec![
            Task::new(|| println!("Non-blocking task 1 executed.")),
            Task::new(|| println!("Non-blocking task 2 executed.")),
            Task::blocking(|| println!("Blocking task 3 executed."))
                .with_follow_up(|| println!("Callback to blocking task 3 executed.")),
            Task::blocking(|| {
                std::thread::sleep(Duration::from_secs(4));
                println!("Blocking task 4 executed.");
            })
            .with_follow_up(|| println!("Callback to blocking task 4 executed.")),
            Task::new(|| println!("Non-blocking task 5 executed.")),
        ];
        for task in tasks {
            if let Err(e) = event_loop.submit(task).await {
                eprintln!("submit failed: {e}");
            }
        }

        tokio::time::sleep(Duration::from_secs(5)).await;

        if let Err(e) = event_loop.request_stop() {
            eprintln!("stop failed: {e}");
        }
        if let Err(e) = handle.join().await {
            eprintln!("join failed: {e}");
        }
        println!("metrics: {:?}", event_loop.metrics());
    });
}
