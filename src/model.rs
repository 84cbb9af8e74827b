use std::fmt;

/// Zero-argument unit of work.
pub type Action = Box<dyn FnOnce() + Send + 'static>;

/// Immutable work descriptor.
///
/// A task is consumed on submission; nothing downstream can alter it.
/// The follow-up only matters for blocking tasks and is ignored otherwise.
pub struct Task {
    primary: Action,
    follow_up: Option<Action>,
    blocking: bool,
}

impl Task {
    /// Non-blocking task, run inline on the loop.
    pub fn new<F>(primary: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            primary: Box::new(primary),
            follow_up: None,
            blocking: false,
        }
    }

    /// Blocking task, run off the loop under admission control.
    pub fn blocking<F>(primary: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            primary: Box::new(primary),
            follow_up: None,
            blocking: true,
        }
    }

    pub fn with_follow_up<F>(self, follow_up: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            follow_up: Some(Box::new(follow_up)),
            ..self
        }
    }

    #[inline]
    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    #[inline]
    pub fn has_follow_up(&self) -> bool {
        self.follow_up.is_some()
    }

    pub(crate) fn inline(action: Action) -> Self {
        Self {
            primary: action,
            follow_up: None,
            blocking: false,
        }
    }

    pub(crate) fn into_parts(self) -> (Action, Option<Action>) {
        (self.primary, self.follow_up)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("blocking", &self.blocking)
            .field("has_follow_up", &self.has_follow_up())
            .finish()
    }
}

/// Order in which the loop services its two task channels.
///
/// The stop signal is always checked first by the biased variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelPriority {
    /// Any ready channel may be picked; no cross-channel ordering.
    #[default]
    Unbiased,
    /// Drain queued primary submissions before follow-ups.
    PrimaryFirst,
    /// Drain queued follow-ups before new primary submissions.
    FollowUpFirst,
}

/// What [`LifecycleHandle`](crate::handle::LifecycleHandle) waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinPolicy {
    /// Wait for the loop and for every blocking execution it spawned.
    #[default]
    Drain,
    /// Wait only for the loop to observe the stop signal. Blocking
    /// executions may still be running when the join completes.
    LoopOnly,
}

#[derive(Debug, Clone)]
pub struct DispatchMetrics {
    pub gate_capacity: usize,
    pub gate_occupancy: usize,
    pub gate_high_water_mark: usize,
    /// Blocking tasks dispatched but not yet finished, including those
    /// still waiting for a gate slot.
    pub in_flight_blocking: usize,
    pub inline_executed: usize,
    pub blocking_spawned: usize,
    pub completed: usize,
    pub failed: usize,
    /// Primary submissions still queued when the loop exited.
    pub dropped_primaries: usize,
    pub dropped_follow_ups: usize,
}

impl DispatchMetrics {
    pub fn utilization(&self) -> f64 {
        if self.gate_capacity == 0 {
            return 0.0;
        }
        self.gate_occupancy as f64 / self.gate_capacity as f64
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.completed + self.failed;
        if total == 0 {
            return 1.0;
        }
        self.completed as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follow_up_is_attached_without_changing_kind() {
        let task = Task::blocking(|| {}).with_follow_up(|| {});
        assert!(task.is_blocking());
        assert!(task.has_follow_up());

        let task = Task::new(|| {});
        assert!(!task.is_blocking());
        assert!(!task.has_follow_up());
    }

    #[test]
    fn empty_metrics_report_full_success() {
        let m = DispatchMetrics {
            gate_capacity: 0,
            gate_occupancy: 0,
            gate_high_water_mark: 0,
            in_flight_blocking: 0,
            inline_executed: 0,
            blocking_spawned: 0,
            completed: 0,
            failed: 0,
            dropped_primaries: 0,
            dropped_follow_ups: 0,
        };
        assert_eq!(m.success_rate(), 1.0);
        assert_eq!(m.utilization(), 0.0);
    }
}
