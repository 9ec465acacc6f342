// stepchain/src/core/control.rs

//! Values that flow between steps, and the observable phase of a chain.

use crate::core::state::StateValue;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Arguments passed by `success_with` to the next step's body.
#[derive(Clone, Default)]
pub struct Args(Vec<StateValue>);

impl Args {
  pub fn new() -> Self {
    Self::default()
  }

  /// Single-argument shorthand.
  pub fn one<T: Any + Send + Sync>(value: T) -> Self {
    Self::new().with(value)
  }

  /// Appends an argument (builder style).
  pub fn with<T: Any + Send + Sync>(mut self, value: T) -> Self {
    self.0.push(Arc::new(value));
    self
  }

  pub fn push<T: Any + Send + Sync>(&mut self, value: T) {
    self.0.push(Arc::new(value));
  }

  /// Borrows argument `index` as a `T`; `None` if out of range or of another type.
  pub fn get<T: Any>(&self, index: usize) -> Option<&T> {
    self.0.get(index).and_then(|v| v.downcast_ref::<T>())
  }

  pub fn raw(&self, index: usize) -> Option<&StateValue> {
    self.0.get(index)
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl fmt::Debug for Args {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Args").field("len", &self.0.len()).finish()
  }
}

/// Where a root chain is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainPhase {
  /// Nothing on the frame stack and no turn scheduled.
  Idle,
  /// A step body is running, or the next turn is scheduled.
  Dispatching,
  /// The innermost frame waits on a timer or an external completion.
  Suspended,
  /// An error is walking down the frame stack.
  Unwinding,
}
