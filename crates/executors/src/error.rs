//! Executor-level error types.

use thiserror::Error;

/// Errors returned by an executor's `execute` method.
///
/// Both variants are retried while the task has retries left. An engine
/// configured to skip retries on `Fatal` fails the task on the first one.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Transient failure; the engine may re-run the task.
    #[error("{0}")]
    Retryable(String),

    /// Permanent failure; retrying is not expected to help.
    #[error("{0}")]
    Fatal(String),
}

impl TaskError {
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    /// Human-readable message without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(msg) | Self::Fatal(msg) => msg,
        }
    }
}

/// Anything an executor propagates with `?` is treated as transient.
impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        Self::Retryable(format!("{err:#}"))
    }
}

/// Errors from registering executors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("an executor is already registered for task type '{0}'")]
    AlreadyRegistered(String),
}
