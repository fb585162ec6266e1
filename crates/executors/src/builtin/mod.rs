//! Executors with no external side effects.

pub mod condition;
pub mod delay;

pub use condition::ConditionExecutor;
pub use delay::DelayExecutor;
