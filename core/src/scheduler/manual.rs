// stepchain/src/scheduler/manual.rs

//! Deterministic scheduler for tests and for hosts without an event loop.

use super::{Callback, Scheduler, TimerHandle};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{event, Level};

struct Event {
  id: u64,
  fire_at: Duration,
  callback: Callback,
}

#[derive(Default)]
struct Queue {
  now: Duration,
  next_id: u64,
  // Sorted by fire_at; equal fire times keep insertion order.
  events: VecDeque<Event>,
}

/// A scheduler driven by hand, on a virtual clock.
///
/// Events fire in order of `now + delay` at scheduling time, FIFO among
/// equal fire times. [`ManualScheduler::next_event`] advances the virtual
/// clock to the next event and runs it; nothing ever sleeps, so a step
/// timeout of an hour costs nothing in a test.
#[derive(Default)]
pub struct ManualScheduler {
  queue: Mutex<Queue>,
}

impl ManualScheduler {
  pub fn new() -> Self {
    Self::default()
  }

  /// Convenience for the common `Arc<dyn Scheduler>` wiring.
  pub fn shared() -> Arc<Self> {
    Arc::new(Self::new())
  }

  /// Runs the next pending event, if any. Returns whether one ran.
  pub fn next_event(&self) -> bool {
    let next = {
      let mut queue = self.queue.lock();
      let next = queue.events.pop_front();
      if let Some(ev) = &next {
        if ev.fire_at > queue.now {
          queue.now = ev.fire_at;
        }
      }
      next
    };

    match next {
      Some(ev) => {
        event!(Level::TRACE, event_id = ev.id, fire_at_ms = ev.fire_at.as_millis() as u64, "Running scheduled event.");
        (ev.callback)();
        true
      }
      None => false,
    }
  }

  /// Runs events until none are left. Returns how many ran.
  pub fn run(&self) -> usize {
    let mut ran = 0;
    while self.next_event() {
      ran += 1;
    }
    ran
  }

  /// Runs at most `limit` events. Returns how many ran.
  pub fn run_limited(&self, limit: usize) -> usize {
    let mut ran = 0;
    while ran < limit && self.next_event() {
      ran += 1;
    }
    ran
  }

  pub fn has_events(&self) -> bool {
    !self.queue.lock().events.is_empty()
  }

  pub fn pending(&self) -> usize {
    self.queue.lock().events.len()
  }

  /// Delays (relative to the current virtual time) of all pending events, in firing order.
  pub fn pending_delays(&self) -> Vec<Duration> {
    let queue = self.queue.lock();
    queue.events.iter().map(|ev| ev.fire_at.saturating_sub(queue.now)).collect()
  }

  /// Current virtual time.
  pub fn now(&self) -> Duration {
    self.queue.lock().now
  }

  /// Drops every pending event and rewinds the clock.
  pub fn reset(&self) {
    let dropped = {
      let mut queue = self.queue.lock();
      queue.now = Duration::ZERO;
      std::mem::take(&mut queue.events)
    };
    event!(Level::DEBUG, dropped = dropped.len(), "Manual scheduler reset.");
    // Callbacks are dropped outside the lock; they may own chains.
    drop(dropped);
  }
}

impl Scheduler for ManualScheduler {
  fn schedule_after(&self, delay: Duration, callback: Callback) -> TimerHandle {
    let mut queue = self.queue.lock();
    queue.next_id += 1;
    let id = queue.next_id;
    let fire_at = queue.now.saturating_add(delay);
    let pos = queue
      .events
      .iter()
      .position(|ev| ev.fire_at > fire_at)
      .unwrap_or(queue.events.len());
    queue.events.insert(pos, Event { id, fire_at, callback });
    TimerHandle::new(id)
  }

  fn cancel(&self, handle: TimerHandle) -> bool {
    let removed = {
      let mut queue = self.queue.lock();
      match queue.events.iter().position(|ev| ev.id == handle.id()) {
        Some(pos) => queue.events.remove(pos),
        None => None,
      }
    };
    removed.is_some()
  }
}
