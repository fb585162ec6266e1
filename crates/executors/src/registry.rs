//! Maps task type strings to executor implementations.

use std::collections::HashMap;
use std::sync::Arc;

use crate::builtin::{ConditionExecutor, DelayExecutor};
use crate::{RegistryError, TaskExecutor};

/// Per-type executor lookup consulted by the engine for every task attempt.
#[derive(Clone, Default)]
pub struct TaskExecutorRegistry {
    executors: HashMap<String, Arc<dyn TaskExecutor>>,
}

impl TaskExecutorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-loaded with the `delay` and `condition` executors.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .executors
            .insert("delay".into(), Arc::new(DelayExecutor));
        registry
            .executors
            .insert("condition".into(), Arc::new(ConditionExecutor));
        registry
    }

    /// Register an executor for `task_type`.
    ///
    /// # Errors
    /// [`RegistryError::AlreadyRegistered`] if the type is taken; use
    /// [`TaskExecutorRegistry::replace`] to override deliberately.
    pub fn register(
        &mut self,
        task_type: impl Into<String>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Result<(), RegistryError> {
        let task_type = task_type.into();
        if self.executors.contains_key(&task_type) {
            return Err(RegistryError::AlreadyRegistered(task_type));
        }
        self.executors.insert(task_type, executor);
        Ok(())
    }

    /// Register an executor, overriding any existing one for the same type.
    pub fn replace(&mut self, task_type: impl Into<String>, executor: Arc<dyn TaskExecutor>) {
        self.executors.insert(task_type.into(), executor);
    }

    pub fn resolve(&self, task_type: &str) -> Option<Arc<dyn TaskExecutor>> {
        self.executors.get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.executors.contains_key(task_type)
    }

    /// Registered task types, sorted.
    pub fn task_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl std::fmt::Debug for TaskExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutorRegistry")
            .field("task_types", &self.task_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockExecutor;
    use serde_json::json;

    #[test]
    fn builtins_are_registered() {
        let registry = TaskExecutorRegistry::with_builtins();
        assert_eq!(registry.task_types(), vec!["condition", "delay"]);
        assert!(registry.resolve("delay").is_some());
        assert!(registry.resolve("http").is_none());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = TaskExecutorRegistry::with_builtins();
        let err = registry
            .register("delay", Arc::new(MockExecutor::returning(json!(null))))
            .unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered(t) if t == "delay"));
    }

    #[test]
    fn replace_overrides_existing_executor() {
        let mut registry = TaskExecutorRegistry::with_builtins();
        registry.replace("delay", Arc::new(MockExecutor::returning(json!(1))));
        assert!(registry.contains("delay"));
        assert_eq!(registry.task_types().len(), 2);
    }
}
