//! Control-flow constructs built on plain steps: parallel joins and loops.

pub mod loops;
pub mod parallel;

pub use loops::LoopBody;
pub use parallel::ParallelJoin;
