// stepchain/src/flow/loops.rs

//! Loop steps. Every iteration runs in a chain of its own, derived from the
//! loop's chain, so `break`/`continue` signals and errors reach the loop
//! through that chain's completion instead of through the outer stack.

use crate::chain::definition::StepChain;
use crate::chain::frame::Frame;
use crate::core::control::Args;
use crate::core::step::Step;
use crate::core::steps_trait::AsyncSteps;
use crate::error::{ErrorKind, StepError, StepResult};
use crate::scheduler::{Scheduler, TimerHandle};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{event, Level};

/// One iteration: the iteration frame and the zero-based iteration index.
pub type LoopBody = Arc<dyn Fn(&Frame, usize) -> StepResult + Send + Sync + 'static>;

pub(crate) fn enqueue_loop<S: AsyncSteps + ?Sized>(target: &S, body: LoopBody, label: Option<&str>) -> StepResult {
  let label = label.map(str::to_string);
  target.push_step(Step::new(move |outer, _args| {
    LoopRun::start(outer, Arc::clone(&body), label.clone())
  }))
}

enum Next {
  Iterate,
  Break,
  Fail(StepError),
}

struct LoopRun {
  body: LoopBody,
  label: Option<String>,
  outer: Frame,
  scheduler: Arc<dyn Scheduler>,
  index: usize,
  finished: bool,
  current: Option<StepChain>,
  next_event: Option<TimerHandle>,
}

impl LoopRun {
  fn start(outer: &Frame, body: LoopBody, label: Option<String>) -> StepResult {
    let scheduler = Arc::clone(&outer.chain_shared()?.scheduler);
    event!(Level::DEBUG, frame = %outer.id(), label = ?label, "Loop started.");
    let run = Arc::new(Mutex::new(LoopRun {
      body,
      label,
      outer: outer.clone(),
      scheduler,
      index: 0,
      finished: false,
      current: None,
      next_event: None,
    }));
    let on_cancel = Arc::clone(&run);
    outer.set_cancel(move |_| LoopRun::cancel(&on_cancel))?;
    LoopRun::run_iteration(&run)
  }

  fn run_iteration(this: &Arc<Mutex<Self>>) -> StepResult {
    let (outer, body, index) = {
      let mut run = this.lock();
      if run.finished {
        return Ok(());
      }
      run.next_event = None;
      let index = run.index;
      run.index += 1;
      (run.outer.clone(), Arc::clone(&run.body), index)
    };

    let iteration = StepChain::derive(&outer.chain_shared()?);
    iteration.push_step(Step::loop_iteration(Arc::new(move |frame: &Frame, _args: Args| {
      body(frame, index)
    })))?;
    let weak = Arc::downgrade(this);
    iteration.set_finish_hook(Box::new(move |result| {
      if let Some(run) = weak.upgrade() {
        LoopRun::iteration_finished(&run, result);
      }
    }));
    this.lock().current = Some(iteration.clone());

    event!(Level::TRACE, frame = %outer.id(), index, "Loop iteration.");
    iteration.execute();
    Ok(())
  }

  fn iteration_finished(this: &Arc<Mutex<Self>>, result: StepResult<Args>) {
    let (outer, next) = {
      let mut run = this.lock();
      if run.finished {
        return;
      }
      let next = match result {
        Ok(_) => Next::Iterate,
        Err(err) => match &err.kind {
          ErrorKind::LoopBreak(target) if Self::targets(target, &run.label) => Next::Break,
          ErrorKind::LoopContinue(target) if Self::targets(target, &run.label) => Next::Iterate,
          _ => Next::Fail(err),
        },
      };
      if !matches!(next, Next::Iterate) {
        run.finished = true;
        run.current = None;
      }
      (run.outer.clone(), next)
    };

    let outcome = match next {
      Next::Iterate => {
        Self::schedule_next(this);
        Ok(())
      }
      Next::Break => {
        event!(Level::DEBUG, frame = %outer.id(), "Loop finished.");
        outer.success()
      }
      Next::Fail(err) => {
        event!(Level::DEBUG, frame = %outer.id(), error = %err, "Loop left by error.");
        outer.raise(err)
      }
    };
    if let Err(err) = outcome {
      event!(Level::WARN, frame = %outer.id(), error = %err, "Loop could not report its outcome.");
    }
  }

  /// A signal without a label targets the innermost loop.
  fn targets(target: &Option<String>, label: &Option<String>) -> bool {
    target.is_none() || target == label
  }

  // Iterations run on separate turns so long loops do not grow the stack.
  fn schedule_next(this: &Arc<Mutex<Self>>) {
    let mut run = this.lock();
    let weak = Arc::downgrade(this);
    let handle = run.scheduler.schedule_after(
      Duration::ZERO,
      Box::new(move || {
        if let Some(run) = weak.upgrade() {
          if let Err(err) = LoopRun::run_iteration(&run) {
            event!(Level::WARN, error = %err, "Loop iteration could not start.");
          }
        }
      }),
    );
    run.next_event = Some(handle);
  }

  fn cancel(this: &Arc<Mutex<Self>>) {
    let (scheduler, pending, current) = {
      let mut run = this.lock();
      run.finished = true;
      (Arc::clone(&run.scheduler), run.next_event.take(), run.current.take())
    };
    if let Some(handle) = pending {
      scheduler.cancel(handle);
    }
    if let Some(iteration) = current {
      iteration.cancel();
    }
  }
}
