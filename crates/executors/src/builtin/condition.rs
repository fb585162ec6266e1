//! `condition`: evaluates a boolean over the workflow's accumulated state.
//!
//! Config:
//! ```json
//! { "path": "/results/fetch/status", "equals": 200, "fail_when_false": false }
//! ```
//! `path` is a JSON pointer into `{"params": …, "results": …}`. Without
//! `equals` the resolved value is tested for truthiness. A missing path is
//! `false`, not an error.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::{TaskContext, TaskError, TaskExecutor, TaskInvocation};

#[derive(Debug, Deserialize)]
struct ConditionConfig {
    path: String,
    #[serde(default)]
    equals: Option<Value>,
    #[serde(default)]
    fail_when_false: bool,
}

pub struct ConditionExecutor;

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[async_trait]
impl TaskExecutor for ConditionExecutor {
    async fn execute(&self, task: &TaskInvocation, ctx: &TaskContext) -> Result<Value, TaskError> {
        let config: ConditionConfig = serde_json::from_value(task.config.clone())
            .map_err(|e| TaskError::fatal(format!("invalid condition config: {e}")))?;

        let state = ctx.state();
        let outcome = match (state.pointer(&config.path), &config.equals) {
            (Some(actual), Some(expected)) => actual == expected,
            (Some(actual), None) => truthy(actual),
            (None, _) => false,
        };

        debug!(task_id = %task.task_id, path = %config.path, outcome, "condition evaluated");

        if !outcome && config.fail_when_false {
            return Err(TaskError::fatal(format!(
                "condition '{}' evaluated to false",
                config.path
            )));
        }

        Ok(json!({ "result": outcome }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn invocation(config: Value) -> TaskInvocation {
        TaskInvocation {
            task_id: "check".into(),
            name: "check".into(),
            task_type: "condition".into(),
            config,
            retry_count: 0,
        }
    }

    fn ctx() -> TaskContext {
        let mut results = Map::new();
        results.insert("fetch".into(), json!({ "status": 200, "items": [] }));
        TaskContext {
            workflow_id: uuid::Uuid::new_v4(),
            params: json!({ "env": "prod" }),
            results,
        }
    }

    async fn eval(config: Value) -> Result<Value, TaskError> {
        ConditionExecutor.execute(&invocation(config), &ctx()).await
    }

    #[tokio::test]
    async fn equals_against_previous_result() {
        let out = eval(json!({ "path": "/results/fetch/status", "equals": 200 })).await.unwrap();
        assert_eq!(out, json!({ "result": true }));

        let out = eval(json!({ "path": "/params/env", "equals": "dev" })).await.unwrap();
        assert_eq!(out["result"], false);
    }

    #[tokio::test]
    async fn truthiness_without_equals() {
        assert_eq!(eval(json!({ "path": "/params/env" })).await.unwrap()["result"], true);
        assert_eq!(eval(json!({ "path": "/results/fetch/items" })).await.unwrap()["result"], false);
    }

    #[tokio::test]
    async fn missing_path_is_false() {
        let out = eval(json!({ "path": "/results/nope" })).await.unwrap();
        assert_eq!(out["result"], false);
    }

    #[tokio::test]
    async fn fail_when_false_raises_fatal() {
        let err = eval(json!({ "path": "/results/nope", "fail_when_false": true }))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Fatal(_)));
    }

    #[tokio::test]
    async fn missing_path_config_is_fatal() {
        let err = eval(json!({ "equals": 1 })).await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
