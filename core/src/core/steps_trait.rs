// stepchain/src/core/steps_trait.rs

//! Defines `AsyncSteps`, the step-building interface shared by root chains
//! and frames.

use crate::chain::frame::Frame;
use crate::core::control::Args;
use crate::core::state::StateBag;
use crate::core::step::Step;
use crate::error::{StepError, StepResult};
use crate::flow::loops::enqueue_loop;
use crate::flow::parallel::ParallelJoin;
use std::sync::Arc;

/// Anything steps can be queued on.
///
/// On a [`crate::StepChain`] steps go to the root queue, which is only
/// allowed while the chain is not executing. On a [`Frame`] they become
/// sub-steps of that frame, which is only allowed while the frame is the
/// current one and its body (not its error handler) is running.
///
/// Every builder returns `Err(InternalError)` when the protocol forbids the
/// call; the step is not queued in that case.
pub trait AsyncSteps {
  /// The shared state bag of the chain.
  fn state(&self) -> StateBag;

  /// Appends an already built step.
  fn push_step(&self, step: Step) -> StepResult;

  fn add(&self, body: impl Fn(&Frame, Args) -> StepResult + Send + Sync + 'static) -> StepResult<&Self>
  where
    Self: Sized,
  {
    self.push_step(Step::new(body))?;
    Ok(self)
  }

  fn add_with_handler(
    &self,
    body: impl Fn(&Frame, Args) -> StepResult + Send + Sync + 'static,
    on_error: impl Fn(&Frame, &StepError) -> StepResult + Send + Sync + 'static,
  ) -> StepResult<&Self>
  where
    Self: Sized,
  {
    self.push_step(Step::with_handler(body, on_error))?;
    Ok(self)
  }

  /// Queues a parallel join and returns it for registering branches.
  fn parallel(&self) -> StepResult<ParallelJoin>
  where
    Self: Sized,
  {
    ParallelJoin::enqueue(self, None)
  }

  /// Like [`AsyncSteps::parallel`], with an error handler covering the
  /// whole join.
  fn parallel_with_handler(
    &self,
    on_error: impl Fn(&Frame, &StepError) -> StepResult + Send + Sync + 'static,
  ) -> StepResult<ParallelJoin>
  where
    Self: Sized,
  {
    ParallelJoin::enqueue(self, Some(Arc::new(on_error)))
  }

  /// Queues an endless loop. Each iteration runs `body` in a fresh frame;
  /// the loop ends through `break_loop` or an error.
  fn loop_steps(
    &self,
    body: impl Fn(&Frame) -> StepResult + Send + Sync + 'static,
    label: Option<&str>,
  ) -> StepResult<&Self>
  where
    Self: Sized,
  {
    enqueue_loop(self, Arc::new(move |frame: &Frame, _index: usize| body(frame)), label)?;
    Ok(self)
  }

  /// Queues a loop running `body` with indices `0..count`.
  fn repeat(
    &self,
    count: usize,
    body: impl Fn(&Frame, usize) -> StepResult + Send + Sync + 'static,
    label: Option<&str>,
  ) -> StepResult<&Self>
  where
    Self: Sized,
  {
    enqueue_loop(
      self,
      Arc::new(move |frame: &Frame, index: usize| {
        if index >= count {
          frame.break_loop(None)
        } else {
          body(frame, index)
        }
      }),
      label,
    )?;
    Ok(self)
  }

  /// Queues a loop over `items`; `body` gets each index and element.
  fn for_each<T>(
    &self,
    items: Vec<T>,
    body: impl Fn(&Frame, usize, &T) -> StepResult + Send + Sync + 'static,
    label: Option<&str>,
  ) -> StepResult<&Self>
  where
    Self: Sized,
    T: Send + Sync + 'static,
  {
    self.for_each_entry(
      items.into_iter().enumerate(),
      move |frame, index: &usize, item: &T| body(frame, *index, item),
      label,
    )
  }

  /// Queues a loop over key/value entries, in iteration order of `entries`.
  fn for_each_entry<K, V, I>(
    &self,
    entries: I,
    body: impl Fn(&Frame, &K, &V) -> StepResult + Send + Sync + 'static,
    label: Option<&str>,
  ) -> StepResult<&Self>
  where
    Self: Sized,
    I: IntoIterator<Item = (K, V)>,
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
  {
    let entries: Vec<(K, V)> = entries.into_iter().collect();
    enqueue_loop(
      self,
      Arc::new(move |frame: &Frame, index: usize| match entries.get(index) {
        Some((key, value)) => body(frame, key, value),
        None => frame.break_loop(None),
      }),
      label,
    )?;
    Ok(self)
  }
}
