// stepchain/src/scoped.rs

//! A chain bundled with a private [`ManualScheduler`], for running a step
//! tree to completion from synchronous code.

use crate::chain::definition::{StepChain, StepChainBuilder};
use crate::scheduler::ManualScheduler;
use std::ops::Deref;
use std::sync::Arc;

/// A [`StepChain`] that owns its scheduler.
///
/// ```
/// use stepchain::prelude::*;
///
/// let scoped = ScopedChain::new();
/// scoped
///   .add(|f, _| {
///     f.state().set("answer", 42u32);
///     f.success()
///   })
///   .unwrap();
/// scoped.run();
/// assert_eq!(scoped.state().get::<u32>("answer"), Some(42));
/// ```
pub struct ScopedChain {
  chain: StepChain,
  scheduler: Arc<ManualScheduler>,
}

impl ScopedChain {
  pub fn new() -> Self {
    Self::with_builder(StepChain::builder())
  }

  /// Uses `builder` for everything but the scheduler.
  pub fn with_builder(builder: StepChainBuilder) -> Self {
    let scheduler = ManualScheduler::shared();
    let chain = builder.scheduler(scheduler.clone()).build();
    Self { chain, scheduler }
  }

  /// Executes the chain and drains the scheduler. Returns the number of
  /// scheduler events that ran.
  pub fn run(&self) -> usize {
    self.chain.execute();
    self.scheduler.run()
  }

  pub fn chain(&self) -> &StepChain {
    &self.chain
  }

  pub fn scheduler(&self) -> &Arc<ManualScheduler> {
    &self.scheduler
  }
}

impl Default for ScopedChain {
  fn default() -> Self {
    Self::new()
  }
}

impl Deref for ScopedChain {
  type Target = StepChain;

  fn deref(&self) -> &StepChain {
    &self.chain
  }
}
