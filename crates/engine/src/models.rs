//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a workflow looks like
//! in memory.  Every type round-trips through JSON so a `StateStore`
//! can persist snapshots however it likes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// TaskType
// ---------------------------------------------------------------------------

/// What kind of work a task performs; selects the executor at run time.
///
/// Serialised as a bare string so custom types stay open-ended.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskType {
    Http,
    Script,
    Delay,
    Condition,
    Custom(String),
}

impl TaskType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Http => "http",
            Self::Script => "script",
            Self::Delay => "delay",
            Self::Condition => "condition",
            Self::Custom(name) => name,
        }
    }
}

impl From<String> for TaskType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "http" => Self::Http,
            "script" => Self::Script,
            "delay" => Self::Delay,
            "condition" => Self::Condition,
            _ => Self::Custom(s),
        }
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        Self::from(s.to_owned())
    }
}

impl From<TaskType> for String {
    fn from(t: TaskType) -> Self {
        match t {
            TaskType::Custom(name) => name,
            other => other.as_str().to_owned(),
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Created,
    Running,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl WorkflowStatus {
    /// `completed`, `cancelled` and `failed` never execute another task.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Definitions (caller input to `create_workflow`)
// ---------------------------------------------------------------------------

/// A task as written by the caller, before the engine assigns state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Unique identifier within this workflow (referenced by dependencies).
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Arbitrary configuration passed to the executor.
    #[serde(default)]
    pub config: Value,
    /// Falls back to `EngineConfig::default_max_retries`.
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Falls back to `EngineConfig::default_retry_delay`.
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
}

impl TaskDefinition {
    /// Convenience constructor for testing.
    pub fn new(id: impl Into<String>, task_type: impl Into<TaskType>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            task_type: task_type.into(),
            dependencies: Vec::new(),
            config: Value::Null,
            max_retries: None,
            retry_delay_ms: None,
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay_ms: u64) -> Self {
        self.max_retries = Some(max_retries);
        self.retry_delay_ms = Some(retry_delay_ms);
        self
    }
}

/// A complete workflow definition as submitted to `create_workflow`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub tasks: Vec<TaskDefinition>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>, tasks: Vec<TaskDefinition>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            tasks,
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// One unit of work and its execution state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub dependencies: Vec<String>,
    pub config: Value,
    pub retry_count: u32,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Set only while the task waits out a retry delay.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Present only when `completed`.
    pub result: Option<Value>,
    /// Present only when `failed`.
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Materialise a definition, filling retry defaults from the engine.
    pub fn from_definition(def: TaskDefinition, default_max_retries: u32, default_delay_ms: u64) -> Self {
        let name = if def.name.is_empty() { def.id.clone() } else { def.name };
        Self {
            id: def.id,
            name,
            task_type: def.task_type,
            status: TaskStatus::Pending,
            dependencies: def.dependencies,
            config: def.config,
            retry_count: 0,
            max_retries: def.max_retries.unwrap_or(default_max_retries),
            retry_delay_ms: def.retry_delay_ms.unwrap_or(default_delay_ms),
            next_retry_at: None,
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
            failed_at: None,
        }
    }

    /// Waiting for its retry timer at `now`.
    pub fn awaiting_retry(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.next_retry_at.is_some_and(|at| at > now)
    }

    pub(crate) fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Running;
        self.started_at = Some(now);
        self.next_retry_at = None;
        self.error = None;
        self.failed_at = None;
    }

    pub(crate) fn mark_completed(&mut self, result: Value, now: DateTime<Utc>) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.error = None;
        self.completed_at = Some(now);
    }

    pub(crate) fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.failed_at = Some(now);
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A workflow instance: its tasks plus lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub status: WorkflowStatus,
    /// Definition order; execution order is dependency-driven.
    pub tasks: Vec<Task>,
    pub params: Value,
    /// Top-level failure reason when `failed`.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl Workflow {
    /// Build a `created` workflow from an already-validated definition.
    pub fn from_definition(def: WorkflowDefinition, default_max_retries: u32, default_delay_ms: u64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: def.name,
            description: def.description,
            status: WorkflowStatus::Created,
            tasks: def
                .tasks
                .into_iter()
                .map(|t| Task::from_definition(t, default_max_retries, default_delay_ms))
                .collect(),
            params: Value::Null,
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            failed_at: None,
        }
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == task_id)
    }

    pub fn running_task(&self) -> Option<&Task> {
        self.tasks.iter().find(|t| t.status == TaskStatus::Running)
    }

    pub fn all_completed(&self) -> bool {
        self.tasks.iter().all(|t| t.status == TaskStatus::Completed)
    }

    /// Earliest pending retry deadline still in the future.
    pub fn next_retry_due(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.tasks
            .iter()
            .filter(|t| t.awaiting_retry(now))
            .filter_map(|t| t.next_retry_at)
            .min()
    }

    /// Ids of tasks that are not completed and cannot make progress.
    pub fn pending_blocked(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|t| t.status != TaskStatus::Completed)
            .map(|t| t.id.clone())
            .collect()
    }

    /// Results of completed tasks, keyed by task id.
    pub fn results(&self) -> serde_json::Map<String, Value> {
        self.tasks
            .iter()
            .filter_map(|t| t.result.clone().map(|r| (t.id.clone(), r)))
            .collect()
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_type_round_trips_known_and_custom_names() {
        let known: TaskType = serde_json::from_value(json!("delay")).unwrap();
        assert_eq!(known, TaskType::Delay);

        let custom: TaskType = serde_json::from_value(json!("email")).unwrap();
        assert_eq!(custom, TaskType::Custom("email".into()));
        assert_eq!(serde_json::to_value(&custom).unwrap(), json!("email"));
    }

    #[test]
    fn definition_defaults_fill_retry_settings() {
        let def: WorkflowDefinition = serde_json::from_value(json!({
            "name": "nightly",
            "tasks": [
                { "id": "a", "type": "delay" },
                { "id": "b", "type": "http", "dependencies": ["a"], "max_retries": 0, "retry_delay_ms": 5 }
            ]
        }))
        .unwrap();

        let wf = Workflow::from_definition(def, 3, 1000);
        assert_eq!(wf.status, WorkflowStatus::Created);
        assert_eq!(wf.tasks[0].name, "a");
        assert_eq!((wf.tasks[0].max_retries, wf.tasks[0].retry_delay_ms), (3, 1000));
        assert_eq!((wf.tasks[1].max_retries, wf.tasks[1].retry_delay_ms), (0, 5));
        assert!(wf.tasks.iter().all(|t| t.status == TaskStatus::Pending));
    }

    #[test]
    fn completed_retry_drops_earlier_failure() {
        let mut task = Task::from_definition(TaskDefinition::new("a", "http").with_retries(1, 0), 0, 0);
        let now = Utc::now();

        task.mark_running(now);
        task.mark_failed("boom", now);
        crate::retry::schedule_retry(&mut task, std::time::Duration::ZERO, now);
        task.mark_running(now);
        task.mark_completed(json!({ "ok": true }), now);

        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed_at.is_some());
        assert!(task.failed_at.is_none());
        assert!(task.error.is_none());
    }

    #[test]
    fn terminal_statuses() {
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Cancelled.is_terminal());
        assert!(WorkflowStatus::Failed.is_terminal());
        assert!(!WorkflowStatus::Paused.is_terminal());
        assert!(!WorkflowStatus::Created.is_terminal());
    }
}
