pub mod control;
pub mod state;
pub mod step;
pub mod steps_trait;

pub use control::{Args, ChainPhase};
pub use state::{StateBag, StateValue};
pub use step::{CancelHook, ErrorHandler, Step, StepBody};
pub use steps_trait::AsyncSteps;
