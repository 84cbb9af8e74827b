use super::{
    errors::{Channel, DispatchError, DispatchResult},
    gate::{AdmissionGate, AdmissionPermit},
    handle::LifecycleHandle,
    model::{Action, ChannelPriority, DispatchMetrics, JoinPolicy, Task},
};
use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicU8, AtomicUsize, Ordering},
        Arc, Mutex, OnceLock, PoisonError,
    },
};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

/// Event loop configuration.
///
/// Zero capacities are clamped to 1 by the accessors.
#[derive(Debug, Clone)]
pub struct Config {
    pub primary_capacity: usize,
    pub follow_up_capacity: usize,
    pub worker_pool_capacity: usize,
    pub priority: ChannelPriority,
    pub join_policy: JoinPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            primary_capacity: 10,
            follow_up_capacity: 10,
            worker_pool_capacity: 10,
            priority: ChannelPriority::default(),
            join_policy: JoinPolicy::default(),
        }
    }
}

impl Config {
    pub fn cpu_bound() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            primary_capacity: num_cpus * 10,
            follow_up_capacity: num_cpus * 10,
            worker_pool_capacity: num_cpus,
            ..Default::default()
        }
    }

    pub fn io_bound() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            primary_capacity: num_cpus * 20,
            follow_up_capacity: num_cpus * 20,
            worker_pool_capacity: num_cpus * 2,
            ..Default::default()
        }
    }

    #[inline]
    pub fn primary_capacity_clamped(&self) -> usize {
        self.primary_capacity.max(1)
    }

    #[inline]
    pub fn follow_up_capacity_clamped(&self) -> usize {
        self.follow_up_capacity.max(1)
    }

    #[inline]
    pub fn worker_pool_capacity_clamped(&self) -> usize {
        self.worker_pool_capacity.max(1)
    }
}

const CREATED: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

#[derive(Default)]
struct Counters {
    inline_executed: AtomicUsize,
    blocking_spawned: AtomicUsize,
    awaiting_admission: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    dropped_primaries: AtomicUsize,
    dropped_follow_ups: AtomicUsize,
}

type Receivers = (mpsc::Receiver<Task>, mpsc::Receiver<Task>);

pub type EventLoopRef = Arc<EventLoop>;

/// Cooperative task dispatcher.
///
/// Non-blocking tasks and follow-ups run one at a time on the loop's own
/// task. Blocking tasks run on the blocking pool, at most
/// `worker_pool_capacity` at once.
///
/// Tasks are FIFO within a channel. With [`ChannelPriority::Unbiased`]
/// there is no ordering between a follow-up and a primary task submitted
/// after its blocking parent.
pub struct EventLoop {
    primary_tx: mpsc::Sender<Task>,
    follow_up_tx: mpsc::Sender<Task>,
    receivers: Mutex<Option<Receivers>>,
    stop: CancellationToken,
    state: AtomicU8,
    gate: OnceLock<AdmissionGate>,
    tracker: TaskTracker,
    counters: Arc<Counters>,
    config: Config,
}

impl EventLoop {
    pub fn new(primary_capacity: usize, follow_up_capacity: usize) -> EventLoopRef {
        let config = Config {
            primary_capacity,
            follow_up_capacity,
            ..Default::default()
        };
        Self::with_config(config)
    }

    pub fn with_config(config: Config) -> EventLoopRef {
        let (primary_tx, primary_rx) = mpsc::channel(config.primary_capacity_clamped());
        let (follow_up_tx, follow_up_rx) = mpsc::channel(config.follow_up_capacity_clamped());

        Arc::new(EventLoop {
            primary_tx,
            follow_up_tx,
            receivers: Mutex::new(Some((primary_rx, follow_up_rx))),
            stop: CancellationToken::new(),
            state: AtomicU8::new(CREATED),
            gate: OnceLock::new(),
            tracker: TaskTracker::new(),
            counters: Arc::new(Counters::default()),
            config,
        })
    }

    /// Spawns the dispatch loop onto the current tokio runtime.
    pub fn start(&self, worker_pool_capacity: usize) -> DispatchResult<LifecycleHandle> {
        self.state
            .compare_exchange(CREATED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| DispatchError::AlreadyStarted)?;

        let (primary_rx, follow_up_rx) = self
            .receivers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(DispatchError::AlreadyStarted)?;

        let gate = self
            .gate
            .get_or_init(|| AdmissionGate::new(worker_pool_capacity))
            .clone();
        let exited = CancellationToken::new();
        let (admit_tx, admit_rx) = mpsc::unbounded_channel();

        let admission = Admission {
            queue: admit_rx,
            gate: gate.clone(),
            tracker: self.tracker.clone(),
            follow_up_tx: self.follow_up_tx.clone(),
            stop: self.stop.clone(),
            counters: self.counters.clone(),
        };
        let dispatcher = Dispatcher {
            primary_rx,
            follow_up_rx,
            admit_tx,
            stop: self.stop.clone(),
            exited: exited.clone(),
            gate,
            counters: self.counters.clone(),
            priority: self.config.priority,
            seq: 0,
        };
        let admission_task = tokio::spawn(admission.run());
        let loop_task = tokio::spawn(dispatcher.run());

        Ok(LifecycleHandle::new(
            loop_task,
            admission_task,
            exited,
            self.tracker.clone(),
            self.config.join_policy,
        ))
    }

    pub fn start_from_config(&self) -> DispatchResult<LifecycleHandle> {
        self.start(self.config.worker_pool_capacity_clamped())
    }

    /// Enqueues a task, waiting for space while the primary channel is full.
    ///
    /// A submission racing with [`request_stop`](Self::request_stop) may be
    /// accepted and then discarded when the loop exits; such tasks are counted
    /// in [`DispatchMetrics::dropped_primaries`].
    pub async fn submit(&self, task: Task) -> DispatchResult<()> {
        self.ensure_accepting()?;
        self.primary_tx
            .send(task)
            .await
            .map_err(|_| DispatchError::Stopped)
    }

    /// Synchronous [`submit`](Self::submit). Must not be called from within
    /// an async execution context.
    pub fn blocking_submit(&self, task: Task) -> DispatchResult<()> {
        self.ensure_accepting()?;
        self.primary_tx
            .blocking_send(task)
            .map_err(|_| DispatchError::Stopped)
    }

    pub fn try_submit(&self, task: Task) -> DispatchResult<()> {
        self.ensure_accepting()?;
        self.primary_tx.try_send(task).map_err(|e| match e {
            TrySendError::Full(_) => DispatchError::QueueFull {
                channel: Channel::Primary,
            },
            TrySendError::Closed(_) => DispatchError::Stopped,
        })
    }

    /// Enqueues a task on the follow-up channel.
    ///
    /// Blocking executions use this channel to hand their follow-ups back to
    /// the loop; it is not meant for general submission.
    pub async fn submit_follow_up(&self, task: Task) -> DispatchResult<()> {
        self.ensure_accepting()?;
        self.follow_up_tx
            .send(task)
            .await
            .map_err(|_| DispatchError::Stopped)
    }

    /// Signals the loop to stop. Blocking executions already spawned are not
    /// interrupted.
    pub fn request_stop(&self) -> DispatchResult<()> {
        match self
            .state
            .compare_exchange(RUNNING, STOPPED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                info!("event loop stop requested");
                self.stop.cancel();
                Ok(())
            }
            Err(CREATED) => Err(DispatchError::NotStarted),
            Err(_) => Err(DispatchError::AlreadyStopped),
        }
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    /// The admission gate, once the loop has been started.
    #[inline]
    pub fn gate(&self) -> Option<&AdmissionGate> {
        self.gate.get()
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> DispatchMetrics {
        let (gate_capacity, gate_occupancy, gate_high_water_mark) = match self.gate.get() {
            Some(gate) => (gate.capacity(), gate.occupancy(), gate.high_water_mark()),
            None => (self.config.worker_pool_capacity_clamped(), 0, 0),
        };
        DispatchMetrics {
            gate_capacity,
            gate_occupancy,
            gate_high_water_mark,
            in_flight_blocking: self.tracker.len()
                + self.counters.awaiting_admission.load(Ordering::Relaxed),
            inline_executed: self.counters.inline_executed.load(Ordering::Relaxed),
            blocking_spawned: self.counters.blocking_spawned.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped_primaries: self.counters.dropped_primaries.load(Ordering::Relaxed),
            dropped_follow_ups: self.counters.dropped_follow_ups.load(Ordering::Relaxed),
        }
    }

    fn ensure_accepting(&self) -> DispatchResult<()> {
        if self.state.load(Ordering::Acquire) == STOPPED {
            return Err(DispatchError::Stopped);
        }
        Ok(())
    }
}

enum Event {
    Primary(Task),
    FollowUp(Task),
    Stop,
    Disconnected,
}

impl Event {
    fn from_primary(task: Option<Task>) -> Self {
        task.map_or(Event::Disconnected, Event::Primary)
    }
}

/// State owned by the running loop task.
struct Dispatcher {
    primary_rx: mpsc::Receiver<Task>,
    follow_up_rx: mpsc::Receiver<Task>,
    admit_tx: mpsc::UnboundedSender<Pending>,
    stop: CancellationToken,
    exited: CancellationToken,
    gate: AdmissionGate,
    counters: Arc<Counters>,
    priority: ChannelPriority,
    seq: u64,
}

impl Dispatcher {
    async fn run(mut self) {
        info!(
            gate_capacity = self.gate.capacity(),
            priority = ?self.priority,
            "event loop started"
        );

        loop {
            match self.next_event().await {
                Event::Primary(task) => self.dispatch(task),
                Event::FollowUp(task) => {
                    self.seq += 1;
                    self.run_inline(task, Channel::FollowUp);
                }
                Event::Stop => break,
                Event::Disconnected => {
                    info!("all submitters dropped; stopping event loop");
                    break;
                }
            }
        }

        self.shutdown();
    }

    async fn next_event(&mut self) -> Event {
        match self.priority {
            ChannelPriority::Unbiased => tokio::select! {
                _ = self.stop.cancelled() => Event::Stop,
                task = self.primary_rx.recv() => Event::from_primary(task),
                Some(task) = self.follow_up_rx.recv() => Event::FollowUp(task),
            },
            ChannelPriority::PrimaryFirst => tokio::select! {
                biased;
                _ = self.stop.cancelled() => Event::Stop,
                task = self.primary_rx.recv() => Event::from_primary(task),
                Some(task) = self.follow_up_rx.recv() => Event::FollowUp(task),
            },
            ChannelPriority::FollowUpFirst => tokio::select! {
                biased;
                _ = self.stop.cancelled() => Event::Stop,
                Some(task) = self.follow_up_rx.recv() => Event::FollowUp(task),
                task = self.primary_rx.recv() => Event::from_primary(task),
            },
        }
    }

    fn dispatch(&mut self, task: Task) {
        self.seq += 1;
        if task.is_blocking() {
            self.offload(task);
        } else {
            self.run_inline(task, Channel::Primary);
        }
    }

    /// Runs a task body on the loop itself. A panic is contained here so one
    /// faulty body cannot take the loop down.
    fn run_inline(&self, task: Task, channel: Channel) {
        let seq = self.seq;
        let (primary, follow_up) = task.into_parts();
        if follow_up.is_some() {
            debug!(seq, "follow-up on non-blocking task ignored");
        }

        self.counters.inline_executed.fetch_add(1, Ordering::Relaxed);
        match std::panic::catch_unwind(AssertUnwindSafe(primary)) {
            Ok(()) => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                debug!(seq, %channel, "inline task finished");
            }
            Err(panic) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(seq, %channel, panic = %panic_message(&*panic), "inline task panicked");
            }
        }
    }

    /// Queues a blocking task for admission. The loop never waits on the gate.
    fn offload(&self, task: Task) {
        let seq = self.seq;
        let (primary, follow_up) = task.into_parts();

        self.counters.blocking_spawned.fetch_add(1, Ordering::Relaxed);
        self.counters.awaiting_admission.fetch_add(1, Ordering::Relaxed);
        debug!(seq, "blocking task queued for admission");

        let pending = Pending {
            seq,
            primary,
            follow_up,
        };
        if self.admit_tx.send(pending).is_err() {
            self.counters.awaiting_admission.fetch_sub(1, Ordering::Relaxed);
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            error!(seq, "admission queue closed; blocking task dropped");
        }
    }

    fn shutdown(mut self) {
        self.primary_rx.close();
        self.follow_up_rx.close();

        let mut discarded = 0usize;
        while self.primary_rx.try_recv().is_ok() {
            discarded += 1;
        }
        let mut discarded_follow_ups = 0usize;
        while self.follow_up_rx.try_recv().is_ok() {
            discarded_follow_ups += 1;
        }
        self.counters
            .dropped_primaries
            .fetch_add(discarded, Ordering::Relaxed);
        self.counters
            .dropped_follow_ups
            .fetch_add(discarded_follow_ups, Ordering::Relaxed);
        if discarded + discarded_follow_ups > 0 {
            warn!(
                primary = discarded,
                follow_up = discarded_follow_ups,
                "event loop exited with queued tasks discarded"
            );
        }

        self.exited.cancel();
        info!(
            awaiting_admission = self.counters.awaiting_admission.load(Ordering::Relaxed),
            "event loop stopped"
        );
        // Dropping `admit_tx` lets the admission task drain and finish.
    }
}

/// Blocking task waiting for a gate slot.
struct Pending {
    seq: u64,
    primary: Action,
    follow_up: Option<Action>,
}

/// Admits blocking tasks one at a time, in the order the loop dispatched
/// them, and spawns each admitted body into the tracker.
struct Admission {
    queue: mpsc::UnboundedReceiver<Pending>,
    gate: AdmissionGate,
    tracker: TaskTracker,
    follow_up_tx: mpsc::Sender<Task>,
    stop: CancellationToken,
    counters: Arc<Counters>,
}

impl Admission {
    async fn run(mut self) {
        while let Some(pending) = self.queue.recv().await {
            let permit = self.gate.acquire().await;
            self.counters.awaiting_admission.fetch_sub(1, Ordering::Relaxed);
            let permit = match permit {
                Ok(permit) => permit,
                Err(e) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(seq = pending.seq, error = %e, "blocking task not admitted");
                    continue;
                }
            };
            debug!(
                seq = pending.seq,
                occupancy = self.gate.occupancy(),
                "blocking task admitted"
            );

            self.tracker.spawn(execute(
                pending,
                permit,
                self.follow_up_tx.clone(),
                self.stop.clone(),
                self.counters.clone(),
            ));
        }

        // The loop has exited and every dispatched task has been admitted.
        self.tracker.close();
        self.gate.close();
        debug!("admission queue drained; gate closed");
    }
}

async fn execute(
    pending: Pending,
    permit: AdmissionPermit,
    follow_up_tx: mpsc::Sender<Task>,
    stop: CancellationToken,
    counters: Arc<Counters>,
) {
    let Pending {
        seq,
        primary,
        follow_up,
    } = pending;
    // Held until the follow-up has been handed off; dropping it is the only
    // release path.
    let _permit = permit;

    match tokio::task::spawn_blocking(primary).await {
        Ok(()) => {
            counters.completed.fetch_add(1, Ordering::Relaxed);
            if let Some(follow_up) = follow_up {
                forward_follow_up(&follow_up_tx, &stop, &counters, seq, follow_up).await;
            }
        }
        Err(join_err) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            let reason = if join_err.is_panic() {
                panic_message(&*join_err.into_panic())
            } else {
                join_err.to_string()
            };
            error!(seq, panic = %reason, "blocking task failed; follow-up skipped");
        }
    }
}

async fn forward_follow_up(
    follow_up_tx: &mpsc::Sender<Task>,
    stop: &CancellationToken,
    counters: &Counters,
    seq: u64,
    follow_up: Action,
) {
    if stop.is_cancelled() {
        counters.dropped_follow_ups.fetch_add(1, Ordering::Relaxed);
        warn!(seq, "event loop stopping; follow-up dropped");
        return;
    }
    if follow_up_tx.send(Task::inline(follow_up)).await.is_err() {
        counters.dropped_follow_ups.fetch_add(1, Ordering::Relaxed);
        warn!(seq, "event loop exited; follow-up dropped");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
