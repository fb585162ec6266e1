//! Engine-level error types.

use thiserror::Error;
use uuid::Uuid;

use crate::models::WorkflowStatus;

/// Structural problems found while validating a workflow definition.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("workflow has no tasks")]
    NoTasks,

    #[error("task at position {0} has an empty id")]
    EmptyTaskId(usize),

    /// Two or more tasks share the same ID.
    #[error("duplicate task ID: '{0}'")]
    DuplicateTaskId(String),

    /// A dependency names a task that doesn't exist in the workflow.
    #[error("task '{task_id}' depends on unknown task '{dependency}'")]
    UnknownDependency { task_id: String, dependency: String },

    #[error("task '{0}' depends on itself")]
    SelfDependency(String),

    /// Topological sort detected a cycle.
    #[error("task dependencies contain a cycle")]
    CycleDetected,
}

/// Errors from a `StateStore` collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("workflow snapshot could not be serialised: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("state store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Errors produced by the workflow engine (validation, control, execution).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Creation / control-plane errors ------

    #[error("invalid workflow definition: {0}")]
    InvalidDefinition(#[from] DefinitionError),

    #[error("cannot {operation} workflow {workflow_id} in status '{status}'")]
    InvalidStateTransition {
        workflow_id: Uuid,
        status: WorkflowStatus,
        operation: &'static str,
    },

    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),

    // ------ Run-loop outcomes (recorded on the workflow) ------

    /// No task is eligible or running, yet incomplete tasks remain.
    #[error("dependency deadlock in workflow {workflow_id}: tasks {blocked:?} can never run")]
    DependencyDeadlock { workflow_id: Uuid, blocked: Vec<String> },

    #[error("task '{task_id}' failed: {message}")]
    TaskExecution { task_id: String, message: String },

    #[error("task '{task_id}' failed after {attempts} attempt(s): {message}")]
    RetryExhausted {
        task_id: String,
        attempts: u32,
        message: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Invalid values in the engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {var} has invalid value '{value}': {reason}")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: String,
    },
}
