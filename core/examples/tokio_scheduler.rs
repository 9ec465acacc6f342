// stepchain/examples/tokio_scheduler.rs

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stepchain::prelude::*;
use stepchain::scheduler::Callback;
use stepchain::{Scheduler, TimerHandle};
use tracing::info;

/// Runs scheduled callbacks as tasks of the current tokio runtime.
///
/// Use it with a current-thread runtime so callbacks run one at a time.
struct TokioScheduler {
  next_id: AtomicU64,
  tasks: Arc<Mutex<HashMap<u64, tokio::task::JoinHandle<()>>>>,
}

impl TokioScheduler {
  fn new() -> Self {
    Self {
      next_id: AtomicU64::new(0),
      tasks: Arc::new(Mutex::new(HashMap::new())),
    }
  }
}

impl Scheduler for TokioScheduler {
  fn schedule_after(&self, delay: Duration, callback: Callback) -> TimerHandle {
    let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
    let registry = Arc::clone(&self.tasks);
    let mut tasks = self.tasks.lock();
    let task = tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      let scheduled = registry.lock().remove(&id).is_some();
      if scheduled {
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

#[tokio::main(flavor = "current_thread")]
async fn main() {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();
  info!("--- Tokio Scheduler Example ---");

  let chain = StepChain::builder()
    .scheduler(Arc::new(TokioScheduler::new()))
    .on_unhandled(|err| tracing::error!(error = %err, "Chain failed"))
    .build();

  // A step waiting on real I/O: a tokio task completes the frame later.
  chain
    .add(|f, _| {
      f.set_timeout(Duration::from_secs(1))?;
      let frame = f.clone();
      tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        info!("Lookup answered");
        let _ = frame.success_with(Args::one(String::from("10.0.0.7")));
      });
      Ok(())
    })
    .expect("chain is idle");

  chain
    .add(|f, args| {
      info!(address = ?args.get::<String>(0), "Connecting");
      let join = f.parallel()?;
      for shard in 0..3u64 {
        join.add_with_handler(
          move |f, _| f.set_timeout(Duration::from_millis(10 * (shard + 1))),
          move |f, _| {
            info!(shard, "Shard synced");
            f.success()
          },
        )?;
      }
      Ok(())
    })
    .expect("chain is idle");

  chain.execute();
  while chain.phase() != ChainPhase::Idle {
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
  info!("Chain finished");
}
