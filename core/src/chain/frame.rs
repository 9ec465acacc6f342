// stepchain/src/chain/frame.rs

//! The handle a step body, error handler or cancel hook receives.

use crate::chain::definition::{ChainShared, FrameId};
use crate::core::control::Args;
use crate::core::state::StateBag;
use crate::core::step::Step;
use crate::core::steps_trait::AsyncSteps;
use crate::error::{ErrorKind, StepError, StepResult};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// One live activation of a step.
///
/// A frame is a cheap handle: it names a slot in its chain's frame stack and
/// shares the chain's state bag. Cloning it, storing it in a timer callback
/// or in a cancel hook is fine; once the frame completes, every control call
/// on it is rejected with an `InternalError`.
///
/// Only the innermost ("current") frame may add sub-steps, complete, or arm
/// timers and cancel hooks.
#[derive(Clone)]
pub struct Frame {
  chain: Weak<ChainShared>,
  state: StateBag,
  id: FrameId,
}

impl Frame {
  pub(crate) fn new(chain: &Arc<ChainShared>, id: FrameId) -> Self {
    Self {
      chain: Arc::downgrade(chain),
      state: chain.state.clone(),
      id,
    }
  }

  pub(crate) fn chain_shared(&self) -> StepResult<Arc<ChainShared>> {
    self
      .chain
      .upgrade()
      .ok_or_else(|| StepError::internal("frame used after its chain was dropped"))
  }

  pub fn id(&self) -> FrameId {
    self.id
  }

  /// Whether this frame is the innermost active frame of its chain.
  pub fn is_current(&self) -> bool {
    self.chain.upgrade().map_or(false, |chain| {
      let inner = chain.inner.lock();
      inner.is_current(self.id)
    })
  }

  /// Whether sub-steps added through this frame are still waiting to run.
  pub fn has_pending_steps(&self) -> bool {
    self.chain.upgrade().map_or(false, |chain| {
      let inner = chain.inner.lock();
      inner
        .position(self.id)
        .map_or(false, |pos| inner.stack[pos].has_pending())
    })
  }

  /// Completes the frame with no arguments for the next step.
  pub fn success(&self) -> StepResult {
    self.success_with(Args::new())
  }

  /// Completes the frame; `args` are handed to the body of the next step
  /// that runs.
  pub fn success_with(&self, args: Args) -> StepResult {
    self.chain_shared()?.complete(self.id, args)
  }

  /// Completes the frame after its pending sub-steps, or right away if
  /// there are none.
  pub fn success_step(&self) -> StepResult {
    self.chain_shared()?.success_step(self.id)
  }

  /// Raises an error through this frame.
  ///
  /// Inside an error handler this replaces the error being handled and the
  /// unwinding continues below.
  pub fn error(&self, kind: impl Into<ErrorKind>) -> StepResult {
    self.raise(StepError::new(kind))
  }

  pub fn error_with_info(&self, kind: impl Into<ErrorKind>, info: impl Into<String>) -> StepResult {
    self.raise(StepError::with_info(kind, info))
  }

  pub fn raise(&self, err: StepError) -> StepResult {
    self.chain_shared()?.raise_from(self.id, err)
  }

  /// Arms (or re-arms) the frame's timeout. When it expires a `Timeout`
  /// error is raised. Completing the frame disarms it.
  pub fn set_timeout(&self, timeout: Duration) -> StepResult {
    self.chain_shared()?.arm_timeout(self.id, timeout)
  }

  /// Registers the hook run once if this frame is cancelled or unwound
  /// before it completes. Replaces any hook set before.
  pub fn set_cancel(&self, hook: impl FnOnce(&Frame) + Send + 'static) -> StepResult {
    self.chain_shared()?.arm_cancel(self.id, Box::new(hook))
  }

  /// Breaks out of the innermost loop, or of the loop labelled `label`.
  ///
  /// Returns the signal as an `Err` so a body can `return f.break_loop(None);`.
  pub fn break_loop(&self, label: Option<&str>) -> StepResult {
    Err(StepError::loop_break(label))
  }

  /// Skips to the next iteration of the innermost loop, or of the loop
  /// labelled `label`.
  pub fn continue_loop(&self, label: Option<&str>) -> StepResult {
    Err(StepError::loop_continue(label))
  }
}

impl AsyncSteps for Frame {
  fn state(&self) -> StateBag {
    self.state.clone()
  }

  fn push_step(&self, step: Step) -> StepResult {
    self.chain_shared()?.add_child(self.id, step)
  }
}

impl fmt::Debug for Frame {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Frame")
      .field("id", &self.id)
      .field("attached", &(self.chain.strong_count() > 0))
      .finish()
  }
}
