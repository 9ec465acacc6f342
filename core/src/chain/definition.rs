// stepchain/src/chain/definition.rs

//! Contains the `StepChain` root type, its builder, and the frame arena it
//! owns. Execution (dispatch, completion, unwinding, cancellation) lives in
//! `execution.rs`.

use crate::chain::frame::Frame;
use crate::core::control::{Args, ChainPhase};
use crate::core::state::StateBag;
use crate::core::step::{CancelHook, ErrorHandler, Step};
use crate::core::steps_trait::AsyncSteps;
use crate::error::{StepError, StepResult};
use crate::scheduler::{Scheduler, TimerHandle};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::{event, Level};

/// Identity of one frame within its chain. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub(crate) u64);

impl fmt::Display for FrameId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// Strategy consulted for every frame a chain instantiates, right before
/// the step body runs. Chains derived for parallel branches and loop
/// iterations inherit the factory of the chain that spawned them.
///
/// Returning `Err` raises that error through the new frame instead of
/// running the body.
pub trait FrameFactory: Send + Sync {
  fn prepare_frame(&self, frame: &Frame) -> StepResult {
    let _ = frame;
    Ok(())
  }
}

/// The default factory: frames are used as they are.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardFrameFactory;

impl FrameFactory for StandardFrameFactory {}

/// Host diagnostic hook for errors that unwind a whole root chain.
pub type UnhandledHook = Arc<dyn Fn(&StepError) + Send + Sync + 'static>;

/// Internal observer of a derived chain running dry (success) or being
/// unwound completely (error).
pub(crate) type FinishHook = Box<dyn FnOnce(StepResult<Args>) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotState {
  /// Body running, or suspended waiting for completion.
  Running,
  /// Being unwound; its cancel hook may be running.
  Cancelling,
  /// Its error handler is running.
  Handling,
}

/// Bookkeeping of one live frame. Lives in the chain's frame stack only.
pub(crate) struct FrameSlot {
  pub(crate) id: FrameId,
  pub(crate) state: SlotState,
  pub(crate) on_error: Option<ErrorHandler>,
  pub(crate) on_cancel: Option<CancelHook>,
  pub(crate) timer: Option<TimerHandle>,
  pub(crate) queue: Option<VecDeque<Step>>,
  pub(crate) replacement: Option<StepError>,
  pub(crate) implicit_success: bool,
}

impl FrameSlot {
  pub(crate) fn new(id: FrameId, step: &Step) -> Self {
    Self {
      id,
      state: SlotState::Running,
      on_error: step.on_error.clone(),
      on_cancel: None,
      timer: None,
      queue: None,
      replacement: None,
      implicit_success: step.implicit_success,
    }
  }

  pub(crate) fn has_pending(&self) -> bool {
    self.queue.as_ref().map_or(false, |q| !q.is_empty())
  }
}

pub(crate) struct ChainInner {
  pub(crate) queue: VecDeque<Step>,
  pub(crate) stack: Vec<FrameSlot>,
  pub(crate) next_args: Args,
  pub(crate) execute_event: Option<TimerHandle>,
  pub(crate) next_frame_id: u64,
  pub(crate) dispatching: bool,
  pub(crate) unwinding: bool,
  // Bumped by cancel(); an unwind started under an older epoch stops silently.
  pub(crate) epoch: u64,
  pub(crate) on_finish: Option<FinishHook>,
}

impl ChainInner {
  fn new() -> Self {
    Self {
      queue: VecDeque::new(),
      stack: Vec::new(),
      next_args: Args::new(),
      execute_event: None,
      next_frame_id: 0,
      dispatching: false,
      unwinding: false,
      epoch: 0,
      on_finish: None,
    }
  }

  pub(crate) fn alloc_frame_id(&mut self) -> FrameId {
    self.next_frame_id += 1;
    FrameId(self.next_frame_id)
  }

  pub(crate) fn position(&self, id: FrameId) -> Option<usize> {
    self.stack.iter().rposition(|slot| slot.id == id)
  }

  /// The top slot, if it is `id`.
  pub(crate) fn current_mut(&mut self, id: FrameId) -> Option<&mut FrameSlot> {
    self.stack.last_mut().filter(|slot| slot.id == id)
  }

  pub(crate) fn is_current(&self, id: FrameId) -> bool {
    self.stack.last().map_or(false, |slot| slot.id == id)
  }

  /// True from the first dispatch until the chain runs dry, is unwound
  /// completely, or is cancelled. Includes the gap between two turns.
  pub(crate) fn is_in_flight(&self) -> bool {
    !self.stack.is_empty() || self.execute_event.is_some() || self.dispatching || self.unwinding
  }
}

/// State shared by a root chain, its frames and its scheduled callbacks.
pub(crate) struct ChainShared {
  pub(crate) inner: Mutex<ChainInner>,
  pub(crate) state: StateBag,
  pub(crate) scheduler: Arc<dyn Scheduler>,
  pub(crate) factory: Arc<dyn FrameFactory>,
  pub(crate) unhandled: Option<UnhandledHook>,
}

/// The root of an execution tree: owns the top-level step queue and the
/// frame stack, and drives the scheduling loop.
///
/// Cloning a `StepChain` clones the handle.
#[derive(Clone)]
pub struct StepChain {
  pub(crate) shared: Arc<ChainShared>,
}

impl StepChain {
  /// A chain with a fresh state bag and the standard frame factory.
  pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
    Self::builder().scheduler(scheduler).build()
  }

  pub fn builder() -> StepChainBuilder {
    StepChainBuilder::default()
  }

  /// A fresh chain sharing scheduler, state bag, factory and diagnostics
  /// with `parent`. Used for parallel branches and loop iterations.
  pub(crate) fn derive(parent: &Arc<ChainShared>) -> Self {
    Self {
      shared: Arc::new(ChainShared {
        inner: Mutex::new(ChainInner::new()),
        state: parent.state.clone(),
        scheduler: Arc::clone(&parent.scheduler),
        factory: Arc::clone(&parent.factory),
        unhandled: parent.unhandled.clone(),
      }),
    }
  }

  pub(crate) fn set_finish_hook(&self, hook: FinishHook) {
    self.shared.inner.lock().on_finish = Some(hook);
  }

  /// Starts (or resumes) execution. Runs the next queued step synchronously
  /// if there is one; later steps run on scheduler turns. Called from inside
  /// a running step body it does nothing.
  ///
  /// Errors are never returned here: they are delivered to the error
  /// handlers registered along the stack, and an error nobody handles
  /// silently terminates the chain (see [`StepChainBuilder::on_unhandled`]).
  pub fn execute(&self) {
    self.shared.execute();
  }

  /// Cancels everything in flight: every active frame, innermost first,
  /// has its timeout disarmed and its cancel hook invoked once, then the
  /// root queue is cleared. Calling it again is a no-op.
  pub fn cancel(&self) {
    self.shared.cancel();
  }

  /// Merges `other`'s state into this chain's state without overwriting
  /// existing keys, and appends `other`'s queued steps after this chain's
  /// own pending steps. Only valid while this chain is not executing.
  pub fn copy_from(&self, other: &StepChain) -> StepResult<&Self> {
    if Arc::ptr_eq(&self.shared, &other.shared) {
      return Err(StepError::internal("copy_from() of a chain into itself"));
    }
    let steps: Vec<Step> = other.shared.inner.lock().queue.iter().cloned().collect();

    let mut inner = self.shared.inner.lock();
    if inner.is_in_flight() {
      event!(Level::ERROR, "copy_from() while the chain is executing.");
      return Err(StepError::internal("copy_from() while the chain is executing"));
    }
    let copied = self.shared.state.merge_missing(&other.shared.state);
    let appended = steps.len();
    inner.queue.extend(steps);
    event!(Level::DEBUG, copied_keys = copied, appended_steps = appended, "Chain merged.");
    Ok(self)
  }

  pub fn phase(&self) -> ChainPhase {
    let inner = self.shared.inner.lock();
    if inner.unwinding {
      ChainPhase::Unwinding
    } else if inner.dispatching || inner.execute_event.is_some() {
      ChainPhase::Dispatching
    } else if inner.stack.is_empty() {
      ChainPhase::Idle
    } else {
      ChainPhase::Suspended
    }
  }

  /// Steps waiting in the root queue.
  pub fn pending_steps(&self) -> usize {
    self.shared.inner.lock().queue.len()
  }

  /// Number of live frames.
  pub fn depth(&self) -> usize {
    self.shared.inner.lock().stack.len()
  }

  pub fn scheduler(&self) -> Arc<dyn Scheduler> {
    Arc::clone(&self.shared.scheduler)
  }
}

impl AsyncSteps for StepChain {
  fn state(&self) -> StateBag {
    self.shared.state.clone()
  }

  fn push_step(&self, step: Step) -> StepResult {
    let mut inner = self.shared.inner.lock();
    if inner.is_in_flight() {
      event!(Level::ERROR, "add() on the root chain while it is executing.");
      return Err(StepError::internal(
        "add() on the root chain while it is executing; add through the running frame",
      ));
    }
    inner.queue.push_back(step);
    event!(Level::TRACE, queued = inner.queue.len(), "Step added to root queue.");
    Ok(())
  }
}

impl fmt::Debug for StepChain {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let inner = self.shared.inner.lock();
    f.debug_struct("StepChain")
      .field("queued", &inner.queue.len())
      .field("depth", &inner.stack.len())
      .field("unwinding", &inner.unwinding)
      .finish()
  }
}

/// Configures a [`StepChain`].
#[derive(Default)]
pub struct StepChainBuilder {
  scheduler: Option<Arc<dyn Scheduler>>,
  state: Option<StateBag>,
  factory: Option<Arc<dyn FrameFactory>>,
  unhandled: Option<UnhandledHook>,
}

impl StepChainBuilder {
  /// The event-loop collaborator. Required.
  pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
    self.scheduler = Some(scheduler);
    self
  }

  /// Use an existing state bag instead of a fresh one.
  pub fn state(mut self, state: StateBag) -> Self {
    self.state = Some(state);
    self
  }

  pub fn frame_factory(mut self, factory: Arc<dyn FrameFactory>) -> Self {
    self.factory = Some(factory);
    self
  }

  /// Called with every error that unwinds the entire chain unhandled.
  pub fn on_unhandled(mut self, hook: impl Fn(&StepError) + Send + Sync + 'static) -> Self {
    self.unhandled = Some(Arc::new(hook));
    self
  }

  /// Fallible build: fails if no scheduler was configured.
  pub fn try_build(self) -> StepResult<StepChain> {
    let scheduler = self
      .scheduler
      .ok_or_else(|| StepError::internal("StepChainBuilder: no scheduler configured"))?;
    Ok(StepChain {
      shared: Arc::new(ChainShared {
        inner: Mutex::new(ChainInner::new()),
        state: self.state.unwrap_or_default(),
        scheduler,
        factory: self.factory.unwrap_or_else(|| Arc::new(StandardFrameFactory)),
        unhandled: self.unhandled,
      }),
    })
  }

  /// Builds the chain.
  ///
  /// # Panics
  /// If no scheduler was configured. This is a setup error, like a typo in a
  /// step name; use [`StepChainBuilder::try_build`] to handle it instead.
  pub fn build(self) -> StepChain {
    match self.try_build() {
      Ok(chain) => chain,
      Err(e) => panic!("stepchain setup error: {e}"),
    }
  }
}
