//! Pipeline execution engine

pub mod engine;
pub mod scheduler;

pub use engine::{EventHandler, ExecutionEngine, ExecutionEvent, SYNTH_STAGE};
pub use scheduler::{ExecutionScheduler, SchedulingStrategy};
