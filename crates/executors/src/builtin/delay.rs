//! `delay`: waits for `config.duration_ms` milliseconds, then succeeds.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::{TaskContext, TaskError, TaskExecutor, TaskInvocation};

#[derive(Debug, Default, Deserialize)]
struct DelayConfig {
    #[serde(default)]
    duration_ms: u64,
}

pub struct DelayExecutor;

#[async_trait]
impl TaskExecutor for DelayExecutor {
    async fn execute(&self, task: &TaskInvocation, _ctx: &TaskContext) -> Result<Value, TaskError> {
        let config: DelayConfig = if task.config.is_null() {
            DelayConfig::default()
        } else {
            serde_json::from_value(task.config.clone())
                .map_err(|e| TaskError::fatal(format!("invalid delay config: {e}")))?
        };

        debug!(task_id = %task.task_id, duration_ms = config.duration_ms, "delaying");
        if config.duration_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.duration_ms)).await;
        }

        Ok(json!({ "delayed_ms": config.duration_ms }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(config: Value) -> TaskInvocation {
        TaskInvocation {
            task_id: "wait".into(),
            name: "wait".into(),
            task_type: "delay".into(),
            config,
            retry_count: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_configured_duration() {
        let start = tokio::time::Instant::now();
        let out = DelayExecutor
            .execute(&invocation(json!({ "duration_ms": 250 })), &TaskContext::default())
            .await
            .expect("delay succeeds");

        assert_eq!(out, json!({ "delayed_ms": 250 }));
        assert!(start.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn null_config_means_zero_delay() {
        let out = DelayExecutor
            .execute(&invocation(Value::Null), &TaskContext::default())
            .await
            .unwrap();
        assert_eq!(out["delayed_ms"], 0);
    }

    #[tokio::test]
    async fn malformed_config_is_fatal() {
        let err = DelayExecutor
            .execute(&invocation(json!({ "duration_ms": "soon" })), &TaskContext::default())
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }
}
