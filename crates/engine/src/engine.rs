//! Workflow engine.
//!
//! `WorkflowEngine` is the central orchestrator:
//! 1. Validates definitions and owns the registry of live workflows.
//! 2. Applies control operations (start / pause / resume / cancel).
//! 3. Drives each running workflow's run loop: select the next eligible task,
//!    dispatch it through the `TaskExecutorRegistry`, apply the outcome.
//! 4. Persists a snapshot via the `StateStore` after every mutation and
//!    publishes lifecycle events.
//!
//! Every workflow has its own `tokio::sync::Mutex`; all mutations of that
//! workflow (control calls and task callbacks) go through it, and events are
//! published while it is held so they follow transition order. Executors run
//! *outside* the lock, so a slow task never blocks pause or cancel.
//!
//! Pause and cancel only stop *scheduling*. A task already running is not
//! interrupted; its outcome is still recorded on the workflow when it
//! finishes, but no further task is selected.
//!
//! No `task.started` event is emitted. Observers watch `updated_at` and the
//! task's `running` status instead.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use executors::{TaskContext, TaskError, TaskExecutorRegistry, TaskInvocation};

use crate::config::EngineConfig;
use crate::dag::{select_next_task, validate_definition};
use crate::error::EngineError;
use crate::events::{EventPublisher, WorkflowEvent};
use crate::models::{TaskStatus, Workflow, WorkflowDefinition, WorkflowStatus};
use crate::retry::{schedule_retry, should_retry};
use crate::store::StateStore;

type Slot = Arc<Mutex<Workflow>>;

struct EngineInner {
    config: EngineConfig,
    registry: TaskExecutorRegistry,
    store: Arc<dyn StateStore>,
    publisher: Arc<dyn EventPublisher>,
    workflows: DashMap<Uuid, Slot>,
    running: DashSet<Uuid>,
    /// At most one retry timer per workflow.
    wakeups: DashMap<Uuid, AbortHandle>,
}

/// Handle to a workflow engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

impl WorkflowEngine {
    /// Create a new engine with an empty registry.
    pub fn new(
        config: EngineConfig,
        registry: TaskExecutorRegistry,
        store: Arc<dyn StateStore>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                registry,
                store,
                publisher,
                workflows: DashMap::new(),
                running: DashSet::new(),
                wakeups: DashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // -----------------------------------------------------------------------
    // Creation and recovery
    // -----------------------------------------------------------------------

    /// Validate a definition and register it as a `created` workflow.
    ///
    /// # Errors
    /// [`EngineError::InvalidDefinition`] for structural problems (no tasks,
    /// duplicate ids, dangling or cyclic dependencies) and
    /// [`EngineError::Store`] if the initial snapshot can't be saved. Nothing
    /// is registered on error.
    #[instrument(skip(self, definition), fields(workflow_name = %definition.name))]
    pub async fn create_workflow(&self, definition: WorkflowDefinition) -> Result<Uuid, EngineError> {
        validate_definition(&definition)?;

        let config = &self.inner.config;
        let workflow = Workflow::from_definition(
            definition,
            config.default_max_retries,
            config.default_retry_delay_ms(),
        );
        let id = workflow.id;

        self.inner.store.save(&workflow).await?;
        let snapshot = Box::new(workflow.clone());
        self.inner.workflows.insert(id, Arc::new(Mutex::new(workflow)));

        info!(workflow_id = %id, tasks = snapshot.tasks.len(), "workflow created");
        self.publish(WorkflowEvent::Created { workflow_id: id, workflow: snapshot });
        Ok(id)
    }

    /// Load every snapshot from the state store into the registry and resume
    /// the run loop of workflows that were `running`.
    ///
    /// Tasks caught `running` by the crash go back to `pending`; their
    /// attempt was lost. No `workflow.created` events are emitted. Workflows
    /// already in the registry are left alone. Returns how many snapshots
    /// were loaded.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> Result<usize, EngineError> {
        let snapshots = self.inner.store.load_all().await?;
        let mut loaded = 0;
        let mut resume = Vec::new();

        for mut workflow in snapshots {
            if self.inner.workflows.contains_key(&workflow.id) {
                continue;
            }

            let now = Utc::now();
            let mut reset = false;
            for task in workflow.tasks.iter_mut().filter(|t| t.status == TaskStatus::Running) {
                warn!(workflow_id = %workflow.id, task_id = %task.id, "resetting interrupted task to pending");
                task.status = TaskStatus::Pending;
                task.started_at = None;
                reset = true;
            }
            if reset {
                workflow.touch(now);
                self.inner.store.save(&workflow).await?;
            }

            if workflow.status == WorkflowStatus::Running {
                self.inner.running.insert(workflow.id);
                resume.push(workflow.id);
            }
            self.inner
                .workflows
                .insert(workflow.id, Arc::new(Mutex::new(workflow)));
            loaded += 1;
        }

        info!(loaded, resumed = resume.len(), "recovered workflows from state store");
        for id in resume {
            self.schedule_step(id);
        }
        Ok(loaded)
    }

    // -----------------------------------------------------------------------
    // Control operations
    // -----------------------------------------------------------------------

    /// `created | paused → running`, attaching `params` when given.
    ///
    /// # Errors
    /// [`EngineError::InvalidStateTransition`] from any other status; the
    /// workflow is not modified.
    #[instrument(skip(self, params), fields(workflow_id = %id))]
    pub async fn start_workflow(&self, id: Uuid, params: Option<Value>) -> Result<(), EngineError> {
        let slot = self.slot(id)?;
        {
            let mut workflow = slot.lock().await;
            if !matches!(workflow.status, WorkflowStatus::Created | WorkflowStatus::Paused) {
                return Err(invalid_transition(&workflow, "start"));
            }

            let now = Utc::now();
            let mut next = workflow.clone();
            next.status = WorkflowStatus::Running;
            if next.started_at.is_none() {
                next.started_at = Some(now);
            }
            if let Some(params) = params {
                next.params = params;
            }
            next.touch(now);
            self.commit(&mut workflow, next).await?;

            self.inner.running.insert(id);
            info!("workflow started");
            self.publish(WorkflowEvent::Started {
                workflow_id: id,
                workflow: Box::new(workflow.clone()),
            });
        }
        self.schedule_step(id);
        Ok(())
    }

    /// `running → paused`; a no-op in any other status.
    ///
    /// Only scheduling is suspended. A task already running finishes and its
    /// outcome is recorded; the next task waits for `resume_workflow`.
    #[instrument(skip(self), fields(workflow_id = %id))]
    pub async fn pause_workflow(&self, id: Uuid) -> Result<(), EngineError> {
        let slot = self.slot(id)?;
        let mut workflow = slot.lock().await;
        if workflow.status != WorkflowStatus::Running {
            debug!(status = %workflow.status, "pause ignored");
            return Ok(());
        }

        let mut next = workflow.clone();
        next.status = WorkflowStatus::Paused;
        next.touch(Utc::now());
        self.commit(&mut workflow, next).await?;

        self.inner.running.remove(&id);
        self.clear_wakeup(id);
        info!("workflow paused");
        self.publish(WorkflowEvent::Paused {
            workflow_id: id,
            workflow: Box::new(workflow.clone()),
        });
        Ok(())
    }

    /// `paused → running`.
    #[instrument(skip(self), fields(workflow_id = %id))]
    pub async fn resume_workflow(&self, id: Uuid) -> Result<(), EngineError> {
        let slot = self.slot(id)?;
        {
            let mut workflow = slot.lock().await;
            if workflow.status != WorkflowStatus::Paused {
                return Err(invalid_transition(&workflow, "resume"));
            }

            let mut next = workflow.clone();
            next.status = WorkflowStatus::Running;
            next.touch(Utc::now());
            self.commit(&mut workflow, next).await?;

            self.inner.running.insert(id);
            info!("workflow resumed");
            self.publish(WorkflowEvent::Resumed {
                workflow_id: id,
                workflow: Box::new(workflow.clone()),
            });
        }
        self.schedule_step(id);
        Ok(())
    }

    /// Any non-terminal status `→ cancelled`.
    ///
    /// Completed tasks are kept as they are, and a task still running is
    /// allowed to finish for the record.
    #[instrument(skip(self), fields(workflow_id = %id))]
    pub async fn cancel_workflow(&self, id: Uuid) -> Result<(), EngineError> {
        let slot = self.slot(id)?;
        let mut workflow = slot.lock().await;
        if workflow.status.is_terminal() {
            return Err(invalid_transition(&workflow, "cancel"));
        }

        let now = Utc::now();
        let mut next = workflow.clone();
        next.status = WorkflowStatus::Cancelled;
        next.cancelled_at = Some(now);
        next.touch(now);
        self.commit(&mut workflow, next).await?;

        self.inner.running.remove(&id);
        self.clear_wakeup(id);
        info!("workflow cancelled");
        self.publish(WorkflowEvent::Cancelled {
            workflow_id: id,
            workflow: Box::new(workflow.clone()),
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Current snapshot of one workflow.
    pub async fn get_workflow(&self, id: Uuid) -> Result<Workflow, EngineError> {
        let slot = self.slot(id)?;
        let workflow = slot.lock().await;
        Ok(workflow.clone())
    }

    /// Snapshots of every registered workflow, oldest first.
    pub async fn list_workflows(&self) -> Vec<Workflow> {
        let slots: Vec<Slot> = self.inner.workflows.iter().map(|e| e.value().clone()).collect();
        let mut all = Vec::with_capacity(slots.len());
        for slot in slots {
            all.push(slot.lock().await.clone());
        }
        all.sort_by_key(|w| w.created_at);
        all
    }

    /// Ids of workflows whose run loop is active.
    pub fn running_workflows(&self) -> Vec<Uuid> {
        self.inner.running.iter().map(|id| *id).collect()
    }

    // -----------------------------------------------------------------------
    // Run loop
    // -----------------------------------------------------------------------

    /// Queue the next scheduling step for `id` on the runtime. Each task
    /// boundary goes through here, so stack depth stays flat and control
    /// calls get a chance to run between tasks.
    fn schedule_step(&self, id: Uuid) {
        let engine = self.clone();
        tokio::spawn(async move { engine.run_step(id).await });
    }

    /// Re-enter the run loop once `due` has passed, replacing any timer
    /// already armed for `id`. The timer only sleeps and then spawns the
    /// step; it never runs one itself.
    fn schedule_wakeup(&self, id: Uuid, due: DateTime<Utc>) {
        let wait = (due - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        debug!(workflow_id = %id, wait_ms = wait.as_millis() as u64, "waiting for retry delay");
        let engine = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            engine.schedule_step(id);
        });
        if let Some(previous) = self.inner.wakeups.insert(id, timer.abort_handle()) {
            previous.abort();
        }
    }

    /// Disarm the retry timer for `id`, if any.
    fn clear_wakeup(&self, id: Uuid) {
        if let Some((_, timer)) = self.inner.wakeups.remove(&id) {
            timer.abort();
        }
    }

    /// Retry timers still waiting to fire.
    #[cfg(test)]
    pub(crate) fn armed_wakeups(&self) -> usize {
        self.inner
            .wakeups
            .iter()
            .filter(|entry| !entry.value().is_finished())
            .count()
    }

    /// One scheduling step: pick the next eligible task and run it to an
    /// outcome, or settle the workflow when nothing is eligible.
    async fn run_step(&self, id: Uuid) {
        let Ok(slot) = self.slot(id) else {
            return;
        };

        let (invocation, ctx) = {
            let mut workflow = slot.lock().await;
            if workflow.status != WorkflowStatus::Running {
                debug!(workflow_id = %id, status = %workflow.status, "run loop idle");
                return;
            }
            if let Some(task) = workflow.running_task() {
                debug!(workflow_id = %id, task_id = %task.id, "task still in flight");
                return;
            }

            let now = Utc::now();
            let Some(task_id) = select_next_task(&workflow, now).map(|t| t.id.clone()) else {
                self.settle(&mut workflow, now).await;
                return;
            };

            let Some(task) = workflow.task_mut(&task_id) else {
                return;
            };
            task.mark_running(now);
            let invocation = TaskInvocation {
                task_id: task.id.clone(),
                name: task.name.clone(),
                task_type: task.task_type.as_str().to_owned(),
                config: task.config.clone(),
                retry_count: task.retry_count,
            };
            workflow.touch(now);
            let ctx = TaskContext {
                workflow_id: id,
                params: workflow.params.clone(),
                results: workflow.results(),
            };
            self.persist(&workflow).await;

            info!(
                workflow_id = %id,
                task_id = %invocation.task_id,
                task_type = %invocation.task_type,
                attempt = invocation.retry_count + 1,
                "running task"
            );
            (invocation, ctx)
        };

        match self.execute_task(&invocation, &ctx).await {
            Ok(result) => self.on_task_completed(id, &invocation.task_id, result).await,
            Err(err) => self.on_task_failed(id, &invocation.task_id, err).await,
        }

        self.schedule_step(id);
    }

    /// Nothing is eligible: complete, wait for a retry timer, or fail with a
    /// dependency deadlock.
    async fn settle(&self, workflow: &mut Workflow, now: DateTime<Utc>) {
        let id = workflow.id;

        if workflow.all_completed() {
            workflow.status = WorkflowStatus::Completed;
            workflow.completed_at = Some(now);
            workflow.touch(now);
            self.inner.running.remove(&id);
            self.clear_wakeup(id);
            self.persist(workflow).await;

            info!(workflow_id = %id, "workflow completed");
            self.publish(WorkflowEvent::Completed {
                workflow_id: id,
                workflow: Box::new(workflow.clone()),
            });
            return;
        }

        if let Some(due) = workflow.next_retry_due(now) {
            self.schedule_wakeup(id, due);
            return;
        }

        let deadlock = EngineError::DependencyDeadlock {
            workflow_id: id,
            blocked: workflow.pending_blocked(),
        };
        error!(workflow_id = %id, error = %deadlock, "workflow stalled");
        self.fail_workflow(workflow, deadlock.to_string(), now).await;
    }

    /// Invoke the task's executor. Errors, including a missing executor or a
    /// panicking one, come back as `TaskError` and never escape the loop.
    async fn execute_task(&self, invocation: &TaskInvocation, ctx: &TaskContext) -> Result<Value, TaskError> {
        let Some(executor) = self.inner.registry.resolve(&invocation.task_type) else {
            return Err(TaskError::fatal(format!(
                "no executor registered for task type '{}'",
                invocation.task_type
            )));
        };

        let invocation = invocation.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move { executor.execute(&invocation, &ctx).await })
            .await
            .unwrap_or_else(|join_err| Err(TaskError::fatal(format!("executor panicked: {join_err}"))))
    }

    async fn on_task_completed(&self, id: Uuid, task_id: &str, result: Value) {
        let Ok(slot) = self.slot(id) else {
            return;
        };
        let mut workflow = slot.lock().await;
        let now = Utc::now();
        let Some(task) = workflow.task_mut(task_id) else {
            return;
        };
        task.mark_completed(result.clone(), now);
        workflow.touch(now);
        self.persist(&workflow).await;

        info!(workflow_id = %id, task_id, status = %workflow.status, "task completed");
        self.publish(WorkflowEvent::TaskCompleted {
            workflow_id: id,
            task_id: task_id.to_owned(),
            result,
        });
    }

    async fn on_task_failed(&self, id: Uuid, task_id: &str, err: TaskError) {
        let Ok(slot) = self.slot(id) else {
            return;
        };
        let mut workflow = slot.lock().await;
        let now = Utc::now();
        let status = workflow.status;
        let policy = self.inner.config.retry_policy;
        let message = err.message().to_owned();
        let skip_retries = !err.is_retryable() && self.inner.config.fatal_errors_skip_retries;

        let Some(task) = workflow.task_mut(task_id) else {
            return;
        };
        task.mark_failed(message.clone(), now);
        let attempts = task.retry_count + 1;

        // A cancelled workflow only records the failure.
        let retry_delay = (!status.is_terminal() && !skip_retries && should_retry(task))
            .then(|| policy.compute_retry_delay(task));

        if let Some(delay) = retry_delay {
            schedule_retry(task, delay, now);
            warn!(
                workflow_id = %id,
                task_id,
                attempt = attempts,
                retry_in_ms = delay.as_millis() as u64,
                error = %message,
                "task failed, retry scheduled"
            );
        }
        workflow.touch(now);

        if retry_delay.is_some() || status.is_terminal() {
            self.persist(&workflow).await;
            self.publish(WorkflowEvent::TaskFailed {
                workflow_id: id,
                task_id: task_id.to_owned(),
                error: message,
            });
            return;
        }

        let cause = if skip_retries {
            EngineError::TaskExecution {
                task_id: task_id.to_owned(),
                message: message.clone(),
            }
        } else {
            EngineError::RetryExhausted {
                task_id: task_id.to_owned(),
                attempts,
                message: message.clone(),
            }
        };
        error!(workflow_id = %id, error = %cause, "task failed permanently");

        self.publish(WorkflowEvent::TaskFailed {
            workflow_id: id,
            task_id: task_id.to_owned(),
            error: message,
        });
        self.fail_workflow(&mut workflow, cause.to_string(), now).await;
    }

    /// Move a non-terminal workflow to `failed`, persist, and announce it.
    async fn fail_workflow(&self, workflow: &mut Workflow, error: String, now: DateTime<Utc>) {
        workflow.status = WorkflowStatus::Failed;
        workflow.error = Some(error.clone());
        workflow.failed_at = Some(now);
        workflow.touch(now);
        self.inner.running.remove(&workflow.id);
        self.clear_wakeup(workflow.id);
        self.persist(workflow).await;

        self.publish(WorkflowEvent::Failed {
            workflow_id: workflow.id,
            workflow: Box::new(workflow.clone()),
            error,
        });
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn slot(&self, id: Uuid) -> Result<Slot, EngineError> {
        self.inner
            .workflows
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(EngineError::WorkflowNotFound(id))
    }

    /// Persist `next` and, only if that succeeds, make it the live snapshot.
    async fn commit(&self, current: &mut Workflow, next: Workflow) -> Result<(), EngineError> {
        self.inner.store.save(&next).await?;
        *current = next;
        Ok(())
    }

    /// Run-loop persistence: failures are logged, the loop carries on.
    async fn persist(&self, workflow: &Workflow) {
        if let Err(e) = self.inner.store.save(workflow).await {
            error!(workflow_id = %workflow.id, error = %e, "failed to persist workflow snapshot");
        }
    }

    fn publish(&self, event: WorkflowEvent) {
        debug!(workflow_id = %event.workflow_id(), topic = event.topic(), "publishing event");
        self.inner.publisher.publish(event);
    }
}

fn invalid_transition(workflow: &Workflow, operation: &'static str) -> EngineError {
    EngineError::InvalidStateTransition {
        workflow_id: workflow.id,
        status: workflow.status,
        operation,
    }
}
