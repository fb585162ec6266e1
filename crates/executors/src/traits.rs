//! The `TaskExecutor` trait: the contract every task type must fulfil.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::TaskError;

/// The task being invoked, as seen by an executor.
///
/// Defined here (in the executors crate) so the engine and individual
/// executor implementations share it without a circular dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInvocation {
    pub task_id: String,
    pub name: String,
    pub task_type: String,
    /// Type-specific configuration from the workflow definition.
    pub config: Value,
    /// Number of retries already consumed; 0 on the first attempt.
    pub retry_count: u32,
}

/// Shared context passed to every executor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskContext {
    /// ID of the parent workflow.
    pub workflow_id: uuid::Uuid,
    /// Parameters supplied when the workflow was started.
    pub params: Value,
    /// Results of the workflow's completed tasks, keyed by task id.
    pub results: Map<String, Value>,
}

impl TaskContext {
    /// JSON view of the accumulated state: `{"params": …, "results": …}`.
    pub fn state(&self) -> Value {
        serde_json::json!({
            "params": self.params,
            "results": self.results,
        })
    }
}

/// The core executor trait.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Run one attempt of the task and return its result payload.
    async fn execute(
        &self,
        task: &TaskInvocation,
        ctx: &TaskContext,
    ) -> Result<Value, TaskError>;
}
