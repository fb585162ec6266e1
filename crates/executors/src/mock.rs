//! `MockExecutor`: a test double for `TaskExecutor`.
//!
//! Useful in unit and integration tests where a real executor is either
//! unavailable or irrelevant.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::Notify;

use crate::{TaskContext, TaskError, TaskExecutor, TaskInvocation};

/// Behaviour injected into `MockExecutor` at construction time.
pub enum MockBehaviour {
    /// Return a specific JSON value.
    ReturnValue(Value),
    /// Fail with a `Retryable` error.
    FailRetryable(String),
    /// Fail with a `Fatal` error.
    FailFatal(String),
    /// Fail (retryably) the first `failures` calls, then return the value.
    FailThenReturn { failures: usize, value: Value },
    /// Signal `entered`, wait for `release`, then return the value.
    Gated {
        entered: Arc<Notify>,
        release: Arc<Notify>,
        value: Value,
    },
}

/// A mock executor that records every invocation it receives and returns a
/// programmer-specified result.
pub struct MockExecutor {
    pub behaviour: MockBehaviour,
    /// All invocations seen (in call order).
    pub calls: Arc<Mutex<Vec<TaskInvocation>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockExecutor {
    fn with_behaviour(behaviour: MockBehaviour) -> Self {
        Self {
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Always succeeds with the given value.
    pub fn returning(value: Value) -> Self {
        Self::with_behaviour(MockBehaviour::ReturnValue(value))
    }

    /// Always fails with a `Retryable` error.
    pub fn failing_retryable(msg: impl Into<String>) -> Self {
        Self::with_behaviour(MockBehaviour::FailRetryable(msg.into()))
    }

    /// Always fails with a `Fatal` error.
    pub fn failing_fatal(msg: impl Into<String>) -> Self {
        Self::with_behaviour(MockBehaviour::FailFatal(msg.into()))
    }

    /// Fails `failures` times, then succeeds with `value`.
    pub fn flaky(failures: usize, value: Value) -> Self {
        Self::with_behaviour(MockBehaviour::FailThenReturn { failures, value })
    }

    /// Blocks every call until `release` is notified. `entered` is notified
    /// as soon as a call starts.
    pub fn gated(entered: Arc<Notify>, release: Arc<Notify>, value: Value) -> Self {
        Self::with_behaviour(MockBehaviour::Gated { entered, release, value })
    }

    /// Number of times this executor has been invoked.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Task ids in invocation order.
    pub fn invoked_task_ids(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.task_id.clone()).collect()
    }

    /// Highest number of simultaneously running invocations observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn respond(&self, task: &TaskInvocation, call_index: usize) -> Result<Value, TaskError> {
        let tagged = |v: &Value| {
            let mut out = json!({ "task": task.task_id });
            if let (Some(out_obj), Some(v_obj)) = (out.as_object_mut(), v.as_object()) {
                for (k, val) in v_obj {
                    out_obj.insert(k.clone(), val.clone());
                }
            }
            out
        };

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => Ok(tagged(v)),
            MockBehaviour::FailRetryable(msg) => Err(TaskError::Retryable(msg.clone())),
            MockBehaviour::FailFatal(msg) => Err(TaskError::Fatal(msg.clone())),
            MockBehaviour::FailThenReturn { failures, value } => {
                if call_index < *failures {
                    Err(TaskError::Retryable(format!("attempt {} failed", call_index + 1)))
                } else {
                    Ok(tagged(value))
                }
            }
            MockBehaviour::Gated { entered, release, value } => {
                entered.notify_one();
                release.notified().await;
                Ok(tagged(value))
            }
        }
    }
}

#[async_trait]
impl TaskExecutor for MockExecutor {
    async fn execute(&self, task: &TaskInvocation, _ctx: &TaskContext) -> Result<Value, TaskError> {
        let call_index = {
            let mut calls = self.calls.lock();
            calls.push(task.clone());
            calls.len() - 1
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;

        let outcome = self.respond(task, call_index).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}
