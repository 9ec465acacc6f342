// stepchain/src/core/step.rs

//! Defines a single queued step and the callback types it is made of.

use crate::chain::frame::Frame;
use crate::core::control::Args;
use crate::error::{StepError, StepResult};
use std::sync::Arc;

/// Body of a step. Receives the step's own frame and the arguments of the
/// previous step's success signal.
///
/// Before returning, a body must do at least one of: add sub-steps through
/// the frame, complete the frame (`success`/`error`), or arm a timeout or a
/// cancel hook to complete it later. Returning `Err` raises that error
/// through the frame.
pub type StepBody = Arc<dyn Fn(&Frame, Args) -> StepResult + Send + Sync + 'static>;

/// Error handler of a step. Called with the step's frame while an error
/// unwinds through it. It may call `success` on the frame to recover, or
/// raise another error (via `frame.error(..)` or by returning `Err`).
pub type ErrorHandler = Arc<dyn Fn(&Frame, &StepError) -> StepResult + Send + Sync + 'static>;

/// Cancellation hook of a frame, invoked at most once.
pub type CancelHook = Box<dyn FnOnce(&Frame) + Send + 'static>;

/// An immutable `(body, error handler)` pair waiting in a queue.
///
/// A step without a body is the success sentinel: dispatching it completes
/// immediately and forwards the arguments it received.
#[derive(Clone)]
pub struct Step {
  pub(crate) body: Option<StepBody>,
  pub(crate) on_error: Option<ErrorHandler>,
  // Loop iterations: returning idle counts as success instead of a violation.
  pub(crate) implicit_success: bool,
}

impl Step {
  pub fn new(body: impl Fn(&Frame, Args) -> StepResult + Send + Sync + 'static) -> Self {
    Self {
      body: Some(Arc::new(body)),
      on_error: None,
      implicit_success: false,
    }
  }

  pub fn with_handler(
    body: impl Fn(&Frame, Args) -> StepResult + Send + Sync + 'static,
    on_error: impl Fn(&Frame, &StepError) -> StepResult + Send + Sync + 'static,
  ) -> Self {
    Self {
      body: Some(Arc::new(body)),
      on_error: Some(Arc::new(on_error)),
      implicit_success: false,
    }
  }

  pub(crate) fn from_parts(body: StepBody, on_error: Option<ErrorHandler>) -> Self {
    Self {
      body: Some(body),
      on_error,
      implicit_success: false,
    }
  }

  pub(crate) fn loop_iteration(body: StepBody) -> Self {
    Self {
      body: Some(body),
      on_error: None,
      implicit_success: true,
    }
  }

  pub(crate) fn success_sentinel() -> Self {
    Self {
      body: None,
      on_error: None,
      implicit_success: false,
    }
  }

  pub fn is_success_sentinel(&self) -> bool {
    self.body.is_none()
  }
}

impl std::fmt::Debug for Step {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Step")
      .field("sentinel", &self.body.is_none())
      .field("has_error_handler", &self.on_error.is_some())
      .finish()
  }
}
