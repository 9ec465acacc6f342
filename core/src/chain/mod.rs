pub mod definition;
pub mod execution;
pub mod frame;

pub use definition::{FrameFactory, FrameId, StandardFrameFactory, StepChain, StepChainBuilder, UnhandledHook};
pub use frame::Frame;
