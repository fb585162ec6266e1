//! `engine` crate: workflow/task models, dependency resolution, retry policy,
//! and the workflow engine that drives them.

pub mod models;
pub mod error;
pub mod config;
pub mod dag;
pub mod retry;
pub mod events;
pub mod store;
pub mod engine;
pub mod control;

pub use models::{
    Task, TaskDefinition, TaskStatus, TaskType, Workflow, WorkflowDefinition, WorkflowStatus,
};
pub use error::{ConfigError, DefinitionError, EngineError, StoreError};
pub use config::EngineConfig;
pub use dag::{select_next_task, validate_definition};
pub use retry::{compute_retry_delay, should_retry, RetryPolicy};
pub use events::{BroadcastPublisher, EventPublisher, NoopPublisher, WorkflowEvent};
pub use store::{InMemoryStateStore, StateStore};
pub use engine::WorkflowEngine;
pub use control::{spawn_control_listener, ControlCommand};
