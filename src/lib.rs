//! Cooperative task dispatcher with bounded offloading of blocking work.
//!
//! # Features
//! - Single dispatch loop; non-blocking tasks and follow-ups run inline, serialized
//! - Blocking tasks offloaded to the blocking pool behind an admission gate
//! - Follow-ups handed back to the loop once their blocking body returns
//! - Orderly stop with a lifecycle handle that can drain spawned work
//! - Panic isolation per task body; gate slots are always released

pub mod errors;
pub mod event_loop;
pub mod gate;
pub mod handle;
pub mod model;

pub use errors::{Channel, DispatchError, DispatchResult};
pub use event_loop::{Config, EventLoop, EventLoopRef};
pub use gate::{AdmissionGate, AdmissionPermit};
pub use handle::LifecycleHandle;
pub use model::{ChannelPriority, DispatchMetrics, JoinPolicy, Task};
