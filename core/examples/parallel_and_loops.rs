// stepchain/examples/parallel_and_loops.rs

use std::time::Duration;
use stepchain::prelude::*;
use tracing::info;

fn main() {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();
  info!("--- Parallel and Loops Example ---");

  let chain = ScopedChain::new();
  chain.state().set("fetched", 0u32);

  // 1. Fan out to three "downloads" with different latencies; the join
  //    completes when the slowest one is done.
  let join = chain
    .parallel_with_handler(|f, err| {
      info!(error = %err, "A download failed");
      f.success()
    })
    .expect("chain is idle");
  for (name, millis) in [("a.txt", 40u64), ("b.txt", 10), ("c.txt", 25)] {
    join
      .add_with_handler(
        move |f, _| {
          info!(name, "Download started");
          f.set_timeout(Duration::from_millis(millis))
        },
        move |f, _| {
          info!(name, "Download finished");
          f.state().update::<u32, _>("fetched", |n| *n += 1);
          f.success()
        },
      )
      .expect("join not started");
  }

  // 2. Retry with a bounded repeat loop; `break_loop` leaves it early.
  chain
    .repeat(
      5,
      |f, attempt| {
        info!(attempt, "Polling for results");
        if attempt == 2 {
          return f.break_loop(None);
        }
        f.success()
      },
      None,
    )
    .expect("chain is idle");

  // 3. Nested loops over data; the inner loop skips the rest of the outer
  //    iteration with a labelled continue.
  let rows = vec![vec![1, 2, -1, 4], vec![5, 6], vec![-7, 8]];
  chain
    .for_each(
      rows,
      |f, row_index, row: &Vec<i32>| {
        let row = row.clone();
        f.for_each(
          row,
          move |f, _, cell: &i32| {
            if *cell < 0 {
              info!(row_index, "Negative cell, skipping row");
              return f.continue_loop(Some("rows"));
            }
            f.state().upsert("sum", || 0i32, |sum| *sum += *cell);
            f.success()
          },
          None,
        )?;
        Ok(())
      },
      Some("rows"),
    )
    .expect("chain is idle");

  chain.run();
  info!(
    fetched = ?chain.state().get::<u32>("fetched"),
    sum = ?chain.state().get::<i32>("sum"),
    elapsed = ?chain.scheduler().now(),
    "All done"
  );
}
