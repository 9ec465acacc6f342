// stepchain/src/chain/execution.rs

//! The scheduling loop: dispatching the next step, bubbling completion up
//! the frame stack, unwinding errors down through error handlers, and
//! cancellation.
//!
//! Locking discipline: the chain's `inner` mutex is never held while user
//! code runs (step bodies, error handlers, cancel hooks, finish hooks).
//! Scheduler calls are made under the lock; the `Scheduler` contract forbids
//! running callbacks from inside `schedule_after`.

use crate::chain::definition::{ChainInner, ChainShared, FrameId, FrameSlot, SlotState};
use crate::chain::frame::Frame;
use crate::core::control::Args;
use crate::core::step::{CancelHook, Step};
use crate::error::{StepError, StepResult};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{event, instrument, Level};

enum AfterBody {
  Nothing,
  Raise(StepError),
  Succeed,
  Violation,
}

fn violation(op: &str, id: FrameId, why: &str) -> StepError {
  event!(Level::ERROR, frame = %id, operation = op, "Protocol violation: {}", why);
  StepError::internal(format!("{op}() {why}"))
}

impl ChainShared {
  /// Runs one turn: pops the head of the active queue and dispatches it.
  #[instrument(name = "StepChain::execute", skip_all)]
  pub(crate) fn execute(self: &Arc<Self>) {
    let dispatched = {
      let mut guard = self.inner.lock();
      let inner = &mut *guard;
      if inner.dispatching {
        event!(Level::TRACE, "execute() from inside a running body; ignored.");
        return;
      }
      if let Some(ev) = inner.execute_event.take() {
        self.scheduler.cancel(ev);
      }
      if inner.unwinding {
        None
      } else {
        let step = match inner.stack.last_mut() {
          Some(top) => top.queue.as_mut().and_then(VecDeque::pop_front),
          None => inner.queue.pop_front(),
        };
        step.map(|step| {
          let args = std::mem::take(&mut inner.next_args);
          let id = inner.alloc_frame_id();
          inner.stack.push(FrameSlot::new(id, &step));
          inner.dispatching = true;
          event!(
            Level::DEBUG,
            frame = %id,
            depth = inner.stack.len(),
            sentinel = step.is_success_sentinel(),
            "Dispatching step."
          );
          (id, step, args)
        })
      }
    };

    let Some((id, step, args)) = dispatched else {
      return;
    };

    let frame = Frame::new(self, id);
    let outcome = match &step.body {
      None => frame.success_with(args),
      Some(body) => match self.factory.prepare_frame(&frame) {
        Ok(()) => body(&frame, args),
        Err(e) => Err(e),
      },
    };
    self.after_body(id, outcome);
  }

  /// Checks what the body left behind and decides how the chain proceeds.
  fn after_body(self: &Arc<Self>, id: FrameId, outcome: StepResult) {
    let next = {
      let mut guard = self.inner.lock();
      let inner = &mut *guard;
      inner.dispatching = false;
      match outcome {
        Err(err) if inner.position(id).is_some() => AfterBody::Raise(err),
        Err(err) => {
          event!(Level::WARN, frame = %id, error = %err, "Error returned by a completed frame; dropped.");
          AfterBody::Nothing
        }
        Ok(()) => {
          let verdict = inner.current_mut(id).map(|slot| {
            (
              slot.has_pending(),
              slot.timer.is_some() || slot.on_cancel.is_some(),
              slot.implicit_success,
            )
          });
          match verdict {
            None => AfterBody::Nothing,
            Some((true, _, _)) => {
              self.arm_turn(inner);
              AfterBody::Nothing
            }
            Some((false, true, _)) => {
              event!(Level::TRACE, frame = %id, "Step suspended.");
              AfterBody::Nothing
            }
            Some((false, false, true)) => AfterBody::Succeed,
            Some((false, false, false)) => AfterBody::Violation,
          }
        }
      }
    };

    match next {
      AfterBody::Nothing => {}
      AfterBody::Raise(err) => self.unwind(err),
      AfterBody::Succeed => {
        if let Err(err) = self.complete(id, Args::new()) {
          event!(Level::WARN, frame = %id, error = %err, "Implicit completion rejected.");
        }
      }
      AfterBody::Violation => {
        let err = violation(
          "execute",
          id,
          "step body returned without adding steps, completing, or arming a timeout/cancel hook",
        );
        self.unwind(err);
      }
    }
  }

  /// Schedules the next turn, replacing any turn already scheduled.
  pub(crate) fn arm_turn(self: &Arc<Self>, inner: &mut ChainInner) {
    if let Some(ev) = inner.execute_event.take() {
      self.scheduler.cancel(ev);
    }
    let weak = Arc::downgrade(self);
    let handle = self.scheduler.schedule_after(
      Duration::ZERO,
      Box::new(move || {
        if let Some(chain) = weak.upgrade() {
          chain.execute();
        }
      }),
    );
    inner.execute_event = Some(handle);
  }

  /// Success signal of frame `id`: pops it, and every frame below whose
  /// sub-steps are thereby exhausted, then schedules the next turn.
  pub(crate) fn complete(self: &Arc<Self>, id: FrameId, args: Args) -> StepResult {
    let (released, finished) = {
      let mut guard = self.inner.lock();
      let inner = &mut *guard;
      match inner.stack.last() {
        None => return Err(violation("success", id, "with no active frame")),
        Some(top) if top.id != id => return Err(violation("success", id, "on a frame that is not current")),
        Some(top) if top.state == SlotState::Cancelling => {
          return Err(violation("success", id, "on a frame that is being cancelled"))
        }
        Some(top) if top.has_pending() => return Err(violation("success", id, "while sub-steps are pending")),
        Some(_) => {}
      }

      let mut released = Vec::new();
      while let Some(slot) = inner.stack.pop() {
        if let Some(timer) = slot.timer {
          self.scheduler.cancel(timer);
        }
        released.push(slot);
        if inner.stack.last().map_or(true, FrameSlot::has_pending) {
          break;
        }
      }

      let finished = if inner.stack.is_empty() && inner.queue.is_empty() {
        match inner.on_finish.take() {
          Some(hook) => Some((hook, args)),
          None => {
            inner.next_args = args;
            None
          }
        }
      } else {
        inner.next_args = args;
        self.arm_turn(inner);
        None
      };
      event!(
        Level::DEBUG,
        frame = %id,
        popped = released.len(),
        depth = inner.stack.len(),
        "Step completed."
      );
      (released, finished)
    };
    drop(released);

    if let Some((hook, args)) = finished {
      hook(Ok(args));
    }
    Ok(())
  }

  /// Error signal of frame `id`.
  pub(crate) fn raise_from(self: &Arc<Self>, id: FrameId, err: StepError) -> StepResult {
    {
      let mut inner = self.inner.lock();
      let Some(top) = inner.current_mut(id) else {
        return Err(violation("error", id, "on a frame that is not current"));
      };
      match top.state {
        SlotState::Handling => {
          event!(Level::DEBUG, frame = %id, error = %err, "Error handler raised a replacement error.");
          top.replacement = Some(err);
          return Ok(());
        }
        SlotState::Cancelling => return Err(violation("error", id, "on a frame that is being cancelled")),
        SlotState::Running if top.has_pending() => {
          return Err(violation("error", id, "while sub-steps are pending"))
        }
        SlotState::Running => {}
      }
    }
    self.unwind(err);
    Ok(())
  }

  /// Walks the frame stack from the top: each frame has its timeout
  /// disarmed, its cancel hook invoked and its error handler consulted.
  /// A handler calling `success` stops the walk; a handler raising replaces
  /// the error and the walk continues below.
  #[instrument(name = "StepChain::unwind", skip_all, fields(error = %err))]
  pub(crate) fn unwind(self: &Arc<Self>, mut err: StepError) {
    let epoch = {
      let mut inner = self.inner.lock();
      if inner.unwinding {
        if let Some(slot) = inner.stack.iter_mut().rev().find(|s| s.state == SlotState::Handling) {
          slot.replacement = Some(err);
        } else {
          event!(Level::WARN, error = %err, "Error raised while unwinding; dropped.");
        }
        return;
      }
      inner.unwinding = true;
      inner.next_args = Args::new();
      if let Some(ev) = inner.execute_event.take() {
        self.scheduler.cancel(ev);
      }
      inner.epoch
    };
    event!(Level::DEBUG, "Unwinding started.");

    loop {
      let taken = {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.epoch != epoch {
          return;
        }
        inner.stack.last_mut().map(|slot| {
          slot.state = SlotState::Cancelling;
          let handler = slot.on_error.take().filter(|_| !err.kind.is_loop_control());
          (slot.id, slot.timer.take(), slot.on_cancel.take(), handler, slot.queue.take())
        })
      };
      let Some((id, timer, on_cancel, handler, dropped)) = taken else {
        self.finish_unhandled(err);
        return;
      };
      if let Some(timer) = timer {
        self.scheduler.cancel(timer);
      }
      drop(dropped);

      let frame = Frame::new(self, id);
      if let Some(hook) = on_cancel {
        event!(Level::TRACE, frame = %id, "Invoking cancel hook while unwinding.");
        hook(&frame);
      }

      if let Some(handler) = handler {
        {
          let mut inner = self.inner.lock();
          if inner.epoch != epoch {
            return;
          }
          match inner.current_mut(id) {
            Some(slot) => slot.state = SlotState::Handling,
            None => return,
          }
        }

        event!(Level::DEBUG, frame = %id, error = %err, "Invoking error handler.");
        let returned = handler(&frame, &err);

        let mut inner = self.inner.lock();
        if inner.epoch != epoch {
          return;
        }
        match inner.current_mut(id) {
          None => {
            inner.unwinding = false;
            if let Err(late) = returned {
              event!(Level::WARN, frame = %id, error = %late, "Handler recovered and raised; raise dropped.");
            }
            event!(Level::DEBUG, frame = %id, "Error consumed by handler.");
            return;
          }
          Some(slot) => {
            slot.state = SlotState::Cancelling;
            if let Some(replacement) = slot.replacement.take() {
              err = replacement;
            }
            if let Err(raised) = returned {
              err = raised;
            }
          }
        }
      }

      let released: Vec<FrameSlot> = {
        let mut inner = self.inner.lock();
        if inner.epoch != epoch {
          return;
        }
        match inner.position(id) {
          Some(pos) => inner.stack.drain(pos..).collect(),
          None => Vec::new(),
        }
      };
      drop(released);
    }
  }

  /// The error walked off the bottom of the stack.
  fn finish_unhandled(self: &Arc<Self>, err: StepError) {
    let (hook, dropped) = {
      let mut inner = self.inner.lock();
      inner.unwinding = false;
      inner.next_args = Args::new();
      (inner.on_finish.take(), std::mem::take(&mut inner.queue))
    };
    drop(dropped);

    match hook {
      Some(hook) => hook(Err(err)),
      None => {
        if err.kind.is_loop_control() {
          event!(Level::WARN, error = %err, "Loop control signal raised outside of any matching loop.");
        } else {
          event!(Level::WARN, error = %err, "Unhandled error terminated the chain.");
        }
        if let Some(on_unhandled) = &self.unhandled {
          on_unhandled(&err);
        }
      }
    }
  }

  /// Cancels every active frame, innermost first, and clears the root queue.
  #[instrument(name = "StepChain::cancel", skip_all)]
  pub(crate) fn cancel(self: &Arc<Self>) {
    let (turn, dropped, finish) = {
      let mut inner = self.inner.lock();
      inner.epoch += 1;
      inner.unwinding = false;
      inner.dispatching = false;
      inner.next_args = Args::new();
      (
        inner.execute_event.take(),
        std::mem::take(&mut inner.queue),
        inner.on_finish.take(),
      )
    };
    if let Some(ev) = turn {
      self.scheduler.cancel(ev);
    }
    drop(finish);

    let mut cancelled = 0usize;
    loop {
      let popped = self.inner.lock().stack.pop();
      let Some(slot) = popped else {
        break;
      };
      if let Some(timer) = slot.timer {
        self.scheduler.cancel(timer);
      }
      if let Some(hook) = slot.on_cancel {
        hook(&Frame::new(self, slot.id));
      }
      cancelled += 1;
    }

    if cancelled > 0 || !dropped.is_empty() {
      event!(
        Level::DEBUG,
        frames = cancelled,
        dropped_steps = dropped.len(),
        "Chain cancelled."
      );
    }
  }

  pub(crate) fn add_child(self: &Arc<Self>, id: FrameId, step: Step) -> StepResult {
    let mut inner = self.inner.lock();
    let Some(slot) = inner.current_mut(id) else {
      return Err(violation("add", id, "on a frame that is not current"));
    };
    if slot.state != SlotState::Running {
      return Err(violation("add", id, "from an error handler or cancel hook"));
    }
    slot.queue.get_or_insert_with(VecDeque::new).push_back(step);
    Ok(())
  }

  pub(crate) fn success_step(self: &Arc<Self>, id: FrameId) -> StepResult {
    {
      let mut inner = self.inner.lock();
      let Some(slot) = inner.current_mut(id) else {
        return Err(violation("success_step", id, "on a frame that is not current"));
      };
      if slot.state == SlotState::Cancelling {
        return Err(violation("success_step", id, "on a frame that is being cancelled"));
      }
      if let Some(queue) = slot.queue.as_mut().filter(|q| !q.is_empty()) {
        queue.push_back(Step::success_sentinel());
        return Ok(());
      }
    }
    self.complete(id, Args::new())
  }

  pub(crate) fn arm_timeout(self: &Arc<Self>, id: FrameId, timeout: Duration) -> StepResult {
    let mut inner = self.inner.lock();
    let Some(slot) = inner.current_mut(id) else {
      return Err(violation("set_timeout", id, "on a frame that is not current"));
    };
    if slot.state != SlotState::Running {
      return Err(violation("set_timeout", id, "from an error handler or cancel hook"));
    }
    if let Some(previous) = slot.timer.take() {
      self.scheduler.cancel(previous);
    }
    let weak = Arc::downgrade(self);
    let handle = self.scheduler.schedule_after(
      timeout,
      Box::new(move || {
        if let Some(chain) = weak.upgrade() {
          chain.on_timeout(id);
        }
      }),
    );
    slot.timer = Some(handle);
    event!(Level::TRACE, frame = %id, timeout_ms = timeout.as_millis() as u64, "Timeout armed.");
    Ok(())
  }

  fn on_timeout(self: &Arc<Self>, id: FrameId) {
    {
      let mut inner = self.inner.lock();
      match inner.position(id) {
        Some(pos) => inner.stack[pos].timer = None,
        None => return,
      }
    }
    event!(Level::DEBUG, frame = %id, "Step timeout expired.");
    self.unwind(StepError::timeout());
  }

  pub(crate) fn arm_cancel(self: &Arc<Self>, id: FrameId, hook: CancelHook) -> StepResult {
    let mut inner = self.inner.lock();
    let Some(slot) = inner.current_mut(id) else {
      return Err(violation("set_cancel", id, "on a frame that is not current"));
    };
    if slot.state != SlotState::Running {
      return Err(violation("set_cancel", id, "from an error handler or cancel hook"));
    }
    slot.on_cancel = Some(hook);
    Ok(())
  }
}
