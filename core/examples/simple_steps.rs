// stepchain/examples/simple_steps.rs

use stepchain::prelude::*;
use tracing::{info, warn};

fn main() {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();
  info!("--- Simple Steps Example ---");

  // 1. A chain that owns its scheduler; `run()` drives it to completion.
  let chain = ScopedChain::new();
  chain.state().set("log", Vec::<String>::new());

  // 2. A step with sub-steps. They run after the body returns, before the
  //    next root step.
  chain
    .add(|f, _| {
      info!("Loading order");
      f.add(|f, _| {
        append(f, "validated");
        f.success()
      })?;
      f.add(|f, _| {
        append(f, "priced");
        f.success_with(Args::one(89u32))
      })?;
      // Complete once the sub-steps are done, forwarding what the last one passed on.
      f.success_step()
    })
    .expect("chain is idle");

  // 3. Arguments of the previous success arrive with the next step.
  chain
    .add(|f, args| {
      let total = args.get::<u32>(0).copied().unwrap_or_default();
      info!(total, "Charging card");
      if total > 100 {
        return f.error_with_info("CardDeclined", format!("limit exceeded by {}", total - 100));
      }
      f.success()
    })
    .expect("chain is idle");

  // 4. A step with an error handler that recovers.
  chain
    .add_with_handler(
      |f, _| {
        f.add(|f, _| f.error("WarehouseOffline"))?;
        Ok(())
      },
      |f, err| {
        warn!(error = %err, "Shipping failed, queueing for later");
        append(f, "shipping deferred");
        f.success()
      },
    )
    .expect("chain is idle");

  let turns = chain.run();
  info!(turns, log = ?chain.state().get::<Vec<String>>("log"), "Chain finished");
}

fn append(f: &Frame, entry: &str) {
  f.state().upsert("log", Vec::<String>::new, |log| log.push(entry.to_string()));
}
