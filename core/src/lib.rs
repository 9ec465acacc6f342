// src/lib.rs

//! StepChain: a cooperative, single-threaded engine for asynchronous step
//! sequences.
//!
//! A program is a tree of *steps* built at runtime. A step body receives a
//! [`Frame`] and may:
//!  - Add sub-steps that run after it returns, before the next sibling.
//!  - Complete its frame with `success`, optionally passing arguments on.
//!  - Raise an error, which unwinds through the error handlers of the
//!    enclosing steps until one recovers.
//!  - Arm a timeout or a cancel hook and complete later from a callback.
//!  - Queue parallel joins and loops with labelled `break`/`continue`.
//!
//! Every frame of one root chain shares a single [`StateBag`].
//!
//! Nothing blocks: the next step always runs on a fresh turn of the
//! injected [`Scheduler`]. [`ManualScheduler`] drives a chain by hand on a
//! virtual clock; [`ScopedChain`] bundles one with a chain.

pub mod chain;
pub mod core;
pub mod error;
pub mod flow;
pub mod scheduler;
pub mod scoped;

// --- Re-exports for the Public API ---

pub use crate::chain::definition::{FrameFactory, FrameId, StandardFrameFactory, StepChain, StepChainBuilder};
pub use crate::chain::frame::Frame;
pub use crate::core::control::{Args, ChainPhase};
pub use crate::core::state::{StateBag, StateValue};
pub use crate::core::step::Step;
pub use crate::core::steps_trait::AsyncSteps;
pub use crate::error::{ErrorKind, StepError, StepResult};
pub use crate::flow::parallel::ParallelJoin;
pub use crate::scheduler::{ManualScheduler, Scheduler, TimerHandle};
pub use crate::scoped::ScopedChain;

/// Glob-import for step-building code.
pub mod prelude {
  pub use crate::{
    Args, AsyncSteps, ChainPhase, ErrorKind, Frame, ManualScheduler, ScopedChain, StateBag, StepChain, StepError,
    StepResult,
  };
}
