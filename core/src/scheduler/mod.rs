// stepchain/src/scheduler/mod.rs

//! The external timer/event-loop collaborator the engine defers work to.
//!
//! The engine never sleeps and never spawns threads. Every deferred
//! resumption (the next queued step, a loop re-iteration, a step timeout)
//! goes through a [`Scheduler`] injected at chain construction.

pub mod manual;

use std::time::Duration;

pub use manual::ManualScheduler;

/// Callback handed to a scheduler.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Opaque reference to a scheduled callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl TimerHandle {
  pub fn new(id: u64) -> Self {
    TimerHandle(id)
  }

  pub fn id(&self) -> u64 {
    self.0
  }
}

/// Delays and later invokes callbacks.
///
/// Contract:
/// - `schedule_after` must never run `callback` before returning.
/// - callbacks must be run one at a time, on the thread that drives the
///   chains (the engine is single-threaded and cooperative).
/// - `cancel` is idempotent: cancelling a fired or already cancelled
///   handle returns `false` and does nothing.
pub trait Scheduler: Send + Sync {
  fn schedule_after(&self, delay: Duration, callback: Callback) -> TimerHandle;

  fn cancel(&self, handle: TimerHandle) -> bool;
}
