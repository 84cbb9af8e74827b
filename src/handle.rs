use super::{
    errors::{DispatchError, DispatchResult},
    model::JoinPolicy,
};
use futures::future::{BoxFuture, FutureExt};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::{
    task::{JoinError, JoinHandle},
    time::Duration,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// Handle returned by [`EventLoop::start`](crate::EventLoop::start).
///
/// Awaiting it (directly or through [`join`](Self::join)) completes once
/// the loop has observed the stop signal. Under [`JoinPolicy::Drain`] it
/// additionally waits for every blocking execution the loop spawned,
/// including the hand-off of its follow-up. Under [`JoinPolicy::LoopOnly`]
/// blocking bodies may still be running when the join resolves.
pub struct LifecycleHandle {
    join: BoxFuture<'static, DispatchResult<()>>,
    exited: CancellationToken,
    tracker: TaskTracker,
    policy: JoinPolicy,
}

impl LifecycleHandle {
    pub(crate) fn new(
        loop_task: JoinHandle<()>,
        admission_task: JoinHandle<()>,
        exited: CancellationToken,
        tracker: TaskTracker,
        policy: JoinPolicy,
    ) -> Self {
        let spawned = tracker.clone();
        let join = async move {
            loop_task.await.map_err(join_failed)?;
            if policy == JoinPolicy::LoopOnly {
                return Ok(());
            }
            // Admission finishes once every dispatched blocking task has a
            // slot; after that nothing else is spawned into the tracker.
            let admitted = admission_task.await.map_err(join_failed);
            spawned.close();
            admitted?;
            spawned.wait().await;
            Ok(())
        }
        .boxed();

        Self {
            join,
            exited,
            tracker,
            policy,
        }
    }

    pub async fn join(self) -> DispatchResult<()> {
        self.await
    }

    pub async fn join_timeout(self, timeout: Duration) -> DispatchResult<()> {
        match tokio::time::timeout(timeout, self).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timeout),
        }
    }

    /// Whether the loop itself has left its selection loop.
    #[inline]
    pub fn loop_exited(&self) -> bool {
        self.exited.is_cancelled()
    }

    /// Admitted blocking executions that have not finished yet. Tasks still
    /// waiting for a gate slot are not included.
    #[inline]
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    #[inline]
    pub fn policy(&self) -> JoinPolicy {
        self.policy
    }
}

fn join_failed(join_err: JoinError) -> DispatchError {
    DispatchError::JoinFailed(join_err.to_string())
}

impl Future for LifecycleHandle {
    type Output = DispatchResult<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().join.as_mut().poll(cx)
    }
}
