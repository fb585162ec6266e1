//! Control-plane consumer: turns `workflow.start` / `pause` / `resume` /
//! `cancel` messages into engine calls.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::WorkflowEngine;
use crate::error::EngineError;

/// A control message, tagged by topic on the wire:
/// `{"topic": "workflow.start", "workflow_id": "…", "params": {…}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic")]
pub enum ControlCommand {
    #[serde(rename = "workflow.start")]
    Start {
        workflow_id: Uuid,
        #[serde(default)]
        params: Option<Value>,
    },
    #[serde(rename = "workflow.pause")]
    Pause { workflow_id: Uuid },
    #[serde(rename = "workflow.resume")]
    Resume { workflow_id: Uuid },
    #[serde(rename = "workflow.cancel")]
    Cancel { workflow_id: Uuid },
}

impl ControlCommand {
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Start { .. } => "workflow.start",
            Self::Pause { .. } => "workflow.pause",
            Self::Resume { .. } => "workflow.resume",
            Self::Cancel { .. } => "workflow.cancel",
        }
    }

    pub fn workflow_id(&self) -> Uuid {
        match self {
            Self::Start { workflow_id, .. }
            | Self::Pause { workflow_id }
            | Self::Resume { workflow_id }
            | Self::Cancel { workflow_id } => *workflow_id,
        }
    }
}

impl WorkflowEngine {
    /// Dispatch a control message to the matching operation.
    pub async fn handle_control(&self, command: ControlCommand) -> Result<(), EngineError> {
        match command {
            ControlCommand::Start { workflow_id, params } => self.start_workflow(workflow_id, params).await,
            ControlCommand::Pause { workflow_id } => self.pause_workflow(workflow_id).await,
            ControlCommand::Resume { workflow_id } => self.resume_workflow(workflow_id).await,
            ControlCommand::Cancel { workflow_id } => self.cancel_workflow(workflow_id).await,
        }
    }
}

/// Drain `commands` until every sender is dropped. Rejected commands are
/// logged and skipped; there is nobody to return the error to.
pub fn spawn_control_listener(
    engine: WorkflowEngine,
    mut commands: mpsc::Receiver<ControlCommand>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(command) = commands.recv().await {
            let topic = command.topic();
            let workflow_id = command.workflow_id();
            if let Err(e) = engine.handle_control(command).await {
                warn!(%workflow_id, topic, error = %e, "control command rejected");
            }
        }
        info!("control channel closed, listener exiting");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_wire_format() {
        let id = Uuid::new_v4();
        let cmd: ControlCommand = serde_json::from_value(json!({
            "topic": "workflow.start",
            "workflow_id": id,
            "params": { "region": "eu" }
        }))
        .unwrap();
        assert_eq!(
            cmd,
            ControlCommand::Start {
                workflow_id: id,
                params: Some(json!({ "region": "eu" })),
            }
        );

        let cmd: ControlCommand =
            serde_json::from_value(json!({ "topic": "workflow.cancel", "workflow_id": id })).unwrap();
        assert_eq!(cmd.topic(), "workflow.cancel");
        assert_eq!(cmd.workflow_id(), id);
    }

    #[test]
    fn start_without_params() {
        let cmd: ControlCommand =
            serde_json::from_value(json!({ "topic": "workflow.start", "workflow_id": Uuid::nil() })).unwrap();
        assert!(matches!(cmd, ControlCommand::Start { params: None, .. }));
    }

    #[test]
    fn unknown_topic_is_rejected() {
        let res: Result<ControlCommand, _> =
            serde_json::from_value(json!({ "topic": "workflow.delete", "workflow_id": Uuid::nil() }));
        assert!(res.is_err());
    }
}
