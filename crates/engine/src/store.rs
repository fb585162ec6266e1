//! The `StateStore` collaborator contract and an in-memory implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::Workflow;

/// Durable snapshot storage used for crash recovery.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Every stored workflow, used once at startup by `WorkflowEngine::recover`.
    async fn load_all(&self) -> Result<Vec<Workflow>, StoreError>;

    /// Upsert a snapshot. Called after every mutating engine operation.
    async fn save(&self, workflow: &Workflow) -> Result<(), StoreError>;
}

/// Keeps snapshots in a map.
///
/// This is primarily for testing and single-process embedding; it has the
/// same semantics a durable backend must provide.
#[derive(Default)]
pub struct InMemoryStateStore {
    workflows: RwLock<HashMap<Uuid, Workflow>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate the store, e.g. to simulate a restart.
    pub fn with_workflows(workflows: impl IntoIterator<Item = Workflow>) -> Self {
        Self {
            workflows: RwLock::new(workflows.into_iter().map(|w| (w.id, w)).collect()),
        }
    }

    pub fn get(&self, id: Uuid) -> Option<Workflow> {
        self.workflows.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.workflows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.read().is_empty()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn load_all(&self) -> Result<Vec<Workflow>, StoreError> {
        let mut all: Vec<Workflow> = self.workflows.read().values().cloned().collect();
        all.sort_by_key(|w| w.created_at);
        Ok(all)
    }

    async fn save(&self, workflow: &Workflow) -> Result<(), StoreError> {
        self.workflows.write().insert(workflow.id, workflow.clone());
        Ok(())
    }
}
