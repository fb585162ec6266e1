//! Lifecycle events and the fire-and-forget publisher they go out through.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::Workflow;

/// Everything the engine announces. Serialised with a `topic` tag such as
/// `"workflow.started"` or `"task.failed"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic")]
pub enum WorkflowEvent {
    #[serde(rename = "workflow.created")]
    Created { workflow_id: Uuid, workflow: Box<Workflow> },
    #[serde(rename = "workflow.started")]
    Started { workflow_id: Uuid, workflow: Box<Workflow> },
    #[serde(rename = "workflow.paused")]
    Paused { workflow_id: Uuid, workflow: Box<Workflow> },
    #[serde(rename = "workflow.resumed")]
    Resumed { workflow_id: Uuid, workflow: Box<Workflow> },
    #[serde(rename = "workflow.cancelled")]
    Cancelled { workflow_id: Uuid, workflow: Box<Workflow> },
    #[serde(rename = "workflow.completed")]
    Completed { workflow_id: Uuid, workflow: Box<Workflow> },
    #[serde(rename = "workflow.failed")]
    Failed {
        workflow_id: Uuid,
        workflow: Box<Workflow>,
        error: String,
    },
    #[serde(rename = "task.completed")]
    TaskCompleted {
        workflow_id: Uuid,
        task_id: String,
        result: Value,
    },
    #[serde(rename = "task.failed")]
    TaskFailed {
        workflow_id: Uuid,
        task_id: String,
        error: String,
    },
}

impl WorkflowEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Created { .. } => "workflow.created",
            Self::Started { .. } => "workflow.started",
            Self::Paused { .. } => "workflow.paused",
            Self::Resumed { .. } => "workflow.resumed",
            Self::Cancelled { .. } => "workflow.cancelled",
            Self::Completed { .. } => "workflow.completed",
            Self::Failed { .. } => "workflow.failed",
            Self::TaskCompleted { .. } => "task.completed",
            Self::TaskFailed { .. } => "task.failed",
        }
    }

    pub fn workflow_id(&self) -> Uuid {
        match self {
            Self::Created { workflow_id, .. }
            | Self::Started { workflow_id, .. }
            | Self::Paused { workflow_id, .. }
            | Self::Resumed { workflow_id, .. }
            | Self::Cancelled { workflow_id, .. }
            | Self::Completed { workflow_id, .. }
            | Self::Failed { workflow_id, .. }
            | Self::TaskCompleted { workflow_id, .. }
            | Self::TaskFailed { workflow_id, .. } => *workflow_id,
        }
    }

    /// `workflow.completed`, `workflow.failed` or `workflow.cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled { .. }
        )
    }
}

/// Notification sink. Publishing must not block and cannot fail the caller.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: WorkflowEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, _event: WorkflowEvent) {}
}

/// In-process publisher built on `tokio::sync::broadcast`.
///
/// Publishing with no active subscribers is a no-op; slow subscribers see
/// `RecvError::Lagged` rather than blocking the engine.
#[derive(Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create a subscriber that will receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, event: WorkflowEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn topic_matches_serde_tag() {
        let event = WorkflowEvent::TaskFailed {
            workflow_id: Uuid::nil(),
            task_id: "a".into(),
            error: "boom".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["topic"], json!(event.topic()));
        assert_eq!(value["task_id"], "a");
        assert!(!event.is_terminal());
    }

    #[tokio::test]
    async fn broadcast_delivers_to_subscribers() {
        let publisher = BroadcastPublisher::new(8);
        let mut rx = publisher.subscribe();

        publisher.publish(WorkflowEvent::TaskCompleted {
            workflow_id: Uuid::nil(),
            task_id: "a".into(),
            result: json!(1),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic(), "task.completed");
    }

    #[test]
    fn noop_publisher_swallows_events() {
        NoopPublisher.publish(WorkflowEvent::TaskFailed {
            workflow_id: Uuid::nil(),
            task_id: "a".into(),
            error: "ignored".into(),
        });
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        BroadcastPublisher::new(1).publish(WorkflowEvent::TaskCompleted {
            workflow_id: Uuid::nil(),
            task_id: "a".into(),
            result: Value::Null,
        });
    }
}
