//! Per-task state machine and the bounded active-task pool.

pub mod fsm;
pub mod registry;

pub use fsm::{TaskFsm, TransitionOutcome};
pub use registry::{TaskHandle, TaskRegistry};
