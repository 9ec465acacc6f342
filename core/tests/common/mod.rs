// tests/common/mod.rs
#![allow(dead_code)] // Allow unused code in this common test module

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{
  atomic::{AtomicU64, AtomicUsize, Ordering},
  Arc,
};
use std::time::Duration;
use stepchain::scheduler::Callback;
use stepchain::{ManualScheduler, Scheduler, StepChain, StepError, TimerHandle};
use tracing::Level;

// --- Execution trace shared between a test and its step closures ---
#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<String>>>);

impl Recorder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&self, entry: impl Into<String>) {
    let entry = entry.into();
    tracing::debug!(target: "test_steps", entry = %entry, "recorded");
    self.0.lock().push(entry);
  }

  pub fn entries(&self) -> Vec<String> {
    self.0.lock().clone()
  }

  pub fn len(&self) -> usize {
    self.0.lock().len()
  }

  pub fn clear(&self) {
    self.0.lock().clear();
  }
}

// --- Chain wiring ---
pub fn manual_chain() -> (StepChain, Arc<ManualScheduler>) {
  let scheduler = ManualScheduler::shared();
  let chain = StepChain::new(scheduler.clone());
  (chain, scheduler)
}

/// A chain whose unhandled errors are collected instead of only logged.
pub fn observed_chain() -> (StepChain, Arc<ManualScheduler>, Arc<Mutex<Vec<StepError>>>) {
  let scheduler = ManualScheduler::shared();
  let unhandled = Arc::new(Mutex::new(Vec::new()));
  let sink = Arc::clone(&unhandled);
  let chain = StepChain::builder()
    .scheduler(scheduler.clone())
    .on_unhandled(move |err| sink.lock().push(err.clone()))
    .build();
  (chain, scheduler, unhandled)
}

// --- Helper for Tracing Setup (call once per test run if needed) ---
static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::DEBUG)
    .with_test_writer() // Important for tests to capture output
    .try_init()
    .ok(); // Allow multiple initializations in tests (ok if fails)
});

pub fn setup_tracing() {
  Lazy::force(&TRACING_INIT);
}

// --- Atomic counters for checking execution counts ---
pub static PREPARED_FRAMES: Lazy<Arc<AtomicUsize>> = Lazy::new(|| Arc::new(AtomicUsize::new(0)));
pub static CANCEL_HOOK_CALLS: Lazy<Arc<AtomicUsize>> = Lazy::new(|| Arc::new(AtomicUsize::new(0)));

pub fn reset_counters() {
  PREPARED_FRAMES.store(0, Ordering::SeqCst);
  CANCEL_HOOK_CALLS.store(0, Ordering::SeqCst);
}

// --- A Scheduler backed by the tokio runtime the test runs on ---
pub struct TokioScheduler {
  next_id: AtomicU64,
  tasks: Arc<Mutex<HashMap<u64, tokio::task::JoinHandle<()>>>>,
}

impl TokioScheduler {
  pub fn shared() -> Arc<Self> {
    Arc::new(Self {
      next_id: AtomicU64::new(0),
      tasks: Arc::new(Mutex::new(HashMap::new())),
    })
  }
}

impl Scheduler for TokioScheduler {
  fn schedule_after(&self, delay: Duration, callback: Callback) -> TimerHandle {
    let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
    let registry = Arc::clone(&self.tasks);
    // Held across spawn so the task cannot look itself up before it is registered.
    let mut tasks = self.tasks.lock();
    let task = tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      let still_scheduled = registry.lock().remove(&id).is_some();
      if still_scheduled {
        callback();
      }
    });
    tasks.insert(id, task);
    TimerHandle::new(id)
  }

  fn cancel(&self, handle: TimerHandle) -> bool {
    match self.tasks.lock().remove(&handle.id()) {
      Some(task) => {
        task.abort();
        true
      }
      None => false,
    }
  }
}
