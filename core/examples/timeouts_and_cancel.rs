// stepchain/examples/timeouts_and_cancel.rs

use std::sync::Arc;
use std::time::Duration;
use stepchain::prelude::*;
use stepchain::Scheduler;
use tracing::info;

fn main() {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();
  info!("--- Timeouts and Cancellation Example ---");

  let scheduler = ManualScheduler::shared();

  // Scenario 1: an external event completes the step before its timeout.
  let chain = StepChain::new(scheduler.clone());
  let events = Arc::clone(&scheduler);
  chain
    .add(move |f, _| {
      f.set_timeout(Duration::from_secs(5))?;
      let frame = f.clone();
      events.schedule_after(
        Duration::from_millis(300),
        Box::new(move || {
          info!("Reply received");
          let _ = frame.success_with(Args::one("pong".to_string()));
        }),
      );
      Ok(())
    })
    .expect("chain is idle");
  chain
    .add(|f, args| {
      info!(reply = ?args.get::<String>(0), "Reply handled");
      f.success()
    })
    .expect("chain is idle");
  chain.execute();
  scheduler.run();
  info!(now = ?scheduler.now(), "Scenario 1 done");

  // Scenario 2: nothing answers, the timeout fires and a handler recovers.
  let chain = StepChain::new(scheduler.clone());
  chain
    .add_with_handler(
      |f, _| f.set_timeout(Duration::from_secs(2)),
      |f, err| {
        info!(error = %err, "Gave up waiting");
        f.success()
      },
    )
    .expect("chain is idle");
  chain.execute();
  scheduler.run();
  info!(now = ?scheduler.now(), "Scenario 2 done");

  // Scenario 3: the host cancels a suspended chain.
  let chain = StepChain::new(scheduler.clone());
  chain
    .add(|f, _| {
      f.set_timeout(Duration::from_secs(60))?;
      f.set_cancel(|frame| info!(frame = %frame.id(), "Releasing connection"))
    })
    .expect("chain is idle");
  chain.execute();
  info!(phase = ?chain.phase(), "Before cancel");
  chain.cancel();
  info!(phase = ?chain.phase(), pending_events = scheduler.pending(), "After cancel");
}
