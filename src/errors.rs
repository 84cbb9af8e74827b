use std::fmt;
use thiserror::Error;

/// Inbound channel of the dispatch loop.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Channel {
    Primary,
    FollowUp,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Primary => f.write_str("primary"),
            Channel::FollowUp => f.write_str("follow_up"),
        }
    }
}

#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum DispatchError {
    /// The loop has been asked to stop or has already exited.
    #[error("event loop is stopped")]
    Stopped,

    #[error("{channel} channel is full")]
    QueueFull { channel: Channel },

    #[error("event loop has not been started")]
    NotStarted,

    #[error("event loop already started")]
    AlreadyStarted,

    #[error("stop already requested")]
    AlreadyStopped,

    #[error("admission gate closed")]
    SemaphoreClosed,

    #[error("timed out waiting for the event loop to drain")]
    Timeout,

    #[error("event loop task failed: {0}")]
    JoinFailed(String),
}

impl DispatchError {
    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            DispatchError::Stopped => "loop_stopped",
            DispatchError::QueueFull { .. } => "queue_full",
            DispatchError::NotStarted => "loop_not_started",
            DispatchError::AlreadyStarted => "loop_already_started",
            DispatchError::AlreadyStopped => "loop_already_stopped",
            DispatchError::SemaphoreClosed => "gate_closed",
            DispatchError::Timeout => "join_timeout",
            DispatchError::JoinFailed(_) => "loop_join_failed",
        }
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;
