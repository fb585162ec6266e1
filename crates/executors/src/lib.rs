//! `executors` crate: the `TaskExecutor` trait, the per-type registry, and
//! the built-in task executors.
//!
//! The engine never runs task bodies itself. It resolves the task's type in a
//! [`TaskExecutorRegistry`] and dispatches through the [`TaskExecutor`] trait
//! object. HTTP and script executors are supplied by the embedding
//! application; `delay` and `condition` ship here because they are pure.

pub mod error;
pub mod traits;
pub mod registry;
pub mod builtin;
pub mod mock;

pub use error::{RegistryError, TaskError};
pub use registry::TaskExecutorRegistry;
pub use traits::{TaskContext, TaskExecutor, TaskInvocation};
