// stepchain/src/flow/parallel.rs

//! Parallel join: a step that runs several sub-chains concurrently on the
//! same scheduler and completes once all of them are done.

use crate::chain::definition::StepChain;
use crate::chain::frame::Frame;
use crate::core::control::Args;
use crate::core::step::{ErrorHandler, Step};
use crate::core::steps_trait::AsyncSteps;
use crate::error::{StepError, StepResult};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{event, Level};

#[derive(Default)]
struct JoinSetup {
  branches: Vec<Step>,
  activated: bool,
}

/// Handle for registering the branches of a queued parallel join.
///
/// Branches must be registered before the join step starts running.
/// Each branch runs in its own chain that shares the parent's state bag and
/// scheduler. The join completes when every branch has finished; if any
/// failed, the join raises the error of the branch that failed last.
#[derive(Clone)]
pub struct ParallelJoin {
  setup: Arc<Mutex<JoinSetup>>,
}

impl ParallelJoin {
  pub(crate) fn enqueue<S: AsyncSteps + ?Sized>(target: &S, on_error: Option<ErrorHandler>) -> StepResult<Self> {
    let setup = Arc::new(Mutex::new(JoinSetup::default()));
    let activator = Arc::clone(&setup);
    target.push_step(Step::from_parts(
      Arc::new(move |outer: &Frame, _args: Args| Activation::start(&activator, outer)),
      on_error,
    ))?;
    Ok(Self { setup })
  }

  /// Registers a branch.
  pub fn add(&self, body: impl Fn(&Frame, Args) -> StepResult + Send + Sync + 'static) -> StepResult<&Self> {
    self.register(Step::new(body))
  }

  /// Registers a branch with its own error handler. A branch whose handler
  /// recovers counts as a successful branch.
  pub fn add_with_handler(
    &self,
    body: impl Fn(&Frame, Args) -> StepResult + Send + Sync + 'static,
    on_error: impl Fn(&Frame, &StepError) -> StepResult + Send + Sync + 'static,
  ) -> StepResult<&Self> {
    self.register(Step::with_handler(body, on_error))
  }

  fn register(&self, step: Step) -> StepResult<&Self> {
    let mut setup = self.setup.lock();
    if setup.activated {
      event!(Level::ERROR, "Branch added to a parallel join that already started.");
      return Err(StepError::internal("parallel add() after the join started"));
    }
    setup.branches.push(step);
    Ok(self)
  }

  pub fn len(&self) -> usize {
    self.setup.lock().branches.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl fmt::Debug for ParallelJoin {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let setup = self.setup.lock();
    f.debug_struct("ParallelJoin")
      .field("branches", &setup.branches.len())
      .field("activated", &setup.activated)
      .finish()
  }
}

/// Bookkeeping of one run of a join step.
struct Activation {
  total: usize,
  completed: usize,
  last_error: Option<StepError>,
  branches: Vec<StepChain>,
  outer: Frame,
  done: bool,
}

impl Activation {
  fn start(setup: &Arc<Mutex<JoinSetup>>, outer: &Frame) -> StepResult {
    let steps = {
      let mut setup = setup.lock();
      setup.activated = true;
      setup.branches.clone()
    };
    let parent = outer.chain_shared()?;

    let activation = Arc::new(Mutex::new(Activation {
      total: steps.len(),
      completed: 0,
      last_error: None,
      branches: Vec::new(),
      outer: outer.clone(),
      done: false,
    }));
    let on_cancel = Arc::clone(&activation);
    outer.set_cancel(move |_| Activation::cancel_all(&on_cancel))?;

    if steps.is_empty() {
      event!(Level::DEBUG, frame = %outer.id(), "Parallel join with no branches completes at once.");
      return outer.success();
    }

    let mut branches = Vec::with_capacity(steps.len());
    for step in steps {
      let branch = StepChain::derive(&parent);
      branch.push_step(step)?;
      let weak = Arc::downgrade(&activation);
      branch.set_finish_hook(Box::new(move |result| {
        if let Some(activation) = weak.upgrade() {
          Activation::branch_done(&activation, result);
        }
      }));
      branches.push(branch);
    }
    activation.lock().branches = branches.clone();

    event!(Level::DEBUG, frame = %outer.id(), branches = branches.len(), "Parallel join started.");
    for branch in &branches {
      branch.execute();
    }
    Ok(())
  }

  fn branch_done(this: &Arc<Mutex<Self>>, result: StepResult<Args>) {
    let finished = {
      let mut activation = this.lock();
      if activation.done {
        return;
      }
      activation.completed += 1;
      if let Err(err) = result {
        event!(Level::DEBUG, error = %err, "Parallel branch failed.");
        activation.last_error = Some(err);
      }
      if activation.completed < activation.total {
        None
      } else {
        activation.done = true;
        Some((
          activation.outer.clone(),
          activation.last_error.take(),
          std::mem::take(&mut activation.branches),
        ))
      }
    };
    let Some((outer, last_error, branches)) = finished else {
      return;
    };
    drop(branches);

    let outcome = match last_error {
      Some(err) => outer.raise(err),
      None => outer.success(),
    };
    if let Err(err) = outcome {
      event!(Level::WARN, frame = %outer.id(), error = %err, "Parallel join could not report its outcome.");
    }
  }

  fn cancel_all(this: &Arc<Mutex<Self>>) {
    let branches = {
      let mut activation = this.lock();
      activation.done = true;
      std::mem::take(&mut activation.branches)
    };
    if !branches.is_empty() {
      event!(Level::DEBUG, branches = branches.len(), "Cancelling parallel branches.");
    }
    for branch in branches {
      branch.cancel();
    }
  }
}
