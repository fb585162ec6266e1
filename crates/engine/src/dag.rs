//! Dependency graph handling: definition validation and next-task selection.
//!
//! Validation rules enforced at creation:
//! 1. The workflow has at least one task and every task id is non-empty.
//! 2. Task IDs must be unique within the workflow.
//! 3. Every dependency must reference an existing task other than itself.
//! 4. The dependency graph must be acyclic (topological sort must succeed).

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};

use crate::error::DefinitionError;
use crate::models::{Task, TaskStatus, Workflow, WorkflowDefinition};

/// Validate the definition's dependency graph and return task ids in a
/// topological order.
///
/// # Errors
/// Any [`DefinitionError`] describing the first structural problem found.
pub fn validate_definition(def: &WorkflowDefinition) -> Result<Vec<String>, DefinitionError> {
    if def.tasks.is_empty() {
        return Err(DefinitionError::NoTasks);
    }

    // -----------------------------------------------------------------------
    // 1. Ids are present and unique
    // -----------------------------------------------------------------------
    let mut seen_ids: HashSet<&str> = HashSet::new();
    for (index, task) in def.tasks.iter().enumerate() {
        if task.id.trim().is_empty() {
            return Err(DefinitionError::EmptyTaskId(index));
        }
        if !seen_ids.insert(task.id.as_str()) {
            return Err(DefinitionError::DuplicateTaskId(task.id.clone()));
        }
    }

    // -----------------------------------------------------------------------
    // 2. Dependencies resolve
    // -----------------------------------------------------------------------
    for task in &def.tasks {
        for dep in &task.dependencies {
            if dep == &task.id {
                return Err(DefinitionError::SelfDependency(task.id.clone()));
            }
            if !seen_ids.contains(dep.as_str()) {
                return Err(DefinitionError::UnknownDependency {
                    task_id: task.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    // -----------------------------------------------------------------------
    // 3. Topological sort (Kahn's algorithm)
    // -----------------------------------------------------------------------
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();

    for task in &def.tasks {
        in_degree.insert(task.id.as_str(), task.dependencies.len());
        for dep in &task.dependencies {
            dependents.entry(dep.as_str()).or_default().push(task.id.as_str());
        }
    }

    // Seed in definition order so the result is deterministic.
    let mut queue: VecDeque<&str> = def
        .tasks
        .iter()
        .map(|t| t.id.as_str())
        .filter(|id| in_degree[id] == 0)
        .collect();

    let mut sorted: Vec<String> = Vec::with_capacity(def.tasks.len());

    while let Some(id) = queue.pop_front() {
        sorted.push(id.to_owned());

        for &dependent in dependents.get(id).into_iter().flatten() {
            if let Some(deg) = in_degree.get_mut(dependent) {
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(dependent);
                }
            }
        }
    }

    if sorted.len() != def.tasks.len() {
        return Err(DefinitionError::CycleDetected);
    }

    Ok(sorted)
}

/// A task is eligible iff it is `pending`, not waiting out a retry delay,
/// and every dependency is `completed`. Dependencies that don't resolve
/// keep the task ineligible.
pub fn is_eligible(workflow: &Workflow, task: &Task, now: DateTime<Utc>) -> bool {
    task.status == TaskStatus::Pending
        && !task.awaiting_retry(now)
        && task.dependencies.iter().all(|dep| {
            workflow
                .task(dep)
                .is_some_and(|d| d.status == TaskStatus::Completed)
        })
}

/// Select the next task to run: the first eligible task in stored order.
///
/// Pure; the stored-order tie-break makes scheduling reproducible across
/// workflows built from the same definition.
pub fn select_next_task(workflow: &Workflow, now: DateTime<Utc>) -> Option<&Task> {
    workflow.tasks.iter().find(|t| is_eligible(workflow, t, now))
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskDefinition;
    use chrono::Duration;

    fn def(tasks: Vec<TaskDefinition>) -> WorkflowDefinition {
        WorkflowDefinition::new("test", tasks)
    }

    fn task(id: &str) -> TaskDefinition {
        TaskDefinition::new(id, "delay")
    }

    fn workflow(tasks: Vec<TaskDefinition>) -> Workflow {
        Workflow::from_definition(def(tasks), 0, 0)
    }

    #[test]
    fn valid_linear_definition_returns_sorted_order() {
        // c → b → a, declared out of order
        let sorted = validate_definition(&def(vec![
            task("c").depends_on(["b"]),
            task("b").depends_on(["a"]),
            task("a"),
        ]))
        .expect("should be valid");
        assert_eq!(sorted, vec!["a", "b", "c"]);
    }

    #[test]
    fn valid_diamond_definition() {
        //   A
        //  / \
        // B   C
        //  \ /
        //   D
        let sorted = validate_definition(&def(vec![
            task("a"),
            task("b").depends_on(["a"]),
            task("c").depends_on(["a"]),
            task("d").depends_on(["b", "c"]),
        ]))
        .expect("should be valid");
        assert_eq!(sorted.first().map(String::as_str), Some("a"));
        assert_eq!(sorted.last().map(String::as_str), Some("d"));
    }

    #[test]
    fn empty_definition_is_rejected() {
        assert_eq!(validate_definition(&def(vec![])), Err(DefinitionError::NoTasks));
    }

    #[test]
    fn blank_task_id_is_rejected() {
        assert_eq!(
            validate_definition(&def(vec![task("a"), task(" ")])),
            Err(DefinitionError::EmptyTaskId(1))
        );
    }

    #[test]
    fn duplicate_task_id_is_rejected() {
        assert!(matches!(
            validate_definition(&def(vec![task("a"), task("a")])),
            Err(DefinitionError::DuplicateTaskId(id)) if id == "a"
        ));
    }

    #[test]
    fn dependency_on_missing_task_is_rejected() {
        assert_eq!(
            validate_definition(&def(vec![task("a"), task("b").depends_on(["X"])])),
            Err(DefinitionError::UnknownDependency {
                task_id: "b".into(),
                dependency: "X".into(),
            })
        );
    }

    #[test]
    fn self_dependency_is_rejected() {
        assert_eq!(
            validate_definition(&def(vec![task("a").depends_on(["a"])])),
            Err(DefinitionError::SelfDependency("a".into()))
        );
    }

    #[test]
    fn cycle_is_detected() {
        // A → B → C → A
        assert_eq!(
            validate_definition(&def(vec![
                task("a").depends_on(["c"]),
                task("b").depends_on(["a"]),
                task("c").depends_on(["b"]),
            ])),
            Err(DefinitionError::CycleDetected)
        );
    }

    #[test]
    fn selects_first_eligible_in_stored_order() {
        let mut wf = workflow(vec![
            task("b").depends_on(["a"]),
            task("a"),
            task("c"),
        ]);
        let now = Utc::now();

        // 'b' comes first in storage but is blocked on 'a'.
        assert_eq!(select_next_task(&wf, now).map(|t| t.id.as_str()), Some("a"));

        wf.task_mut("a").unwrap().mark_completed(serde_json::Value::Null, now);
        assert_eq!(select_next_task(&wf, now).map(|t| t.id.as_str()), Some("b"));
    }

    #[test]
    fn nothing_selected_when_all_completed() {
        let mut wf = workflow(vec![task("a")]);
        let now = Utc::now();
        wf.task_mut("a").unwrap().mark_completed(serde_json::Value::Null, now);
        assert!(select_next_task(&wf, now).is_none());
    }

    #[test]
    fn failed_dependency_blocks_dependents() {
        let mut wf = workflow(vec![task("a"), task("b").depends_on(["a"])]);
        let now = Utc::now();
        wf.task_mut("a").unwrap().mark_failed("boom", now);
        assert!(select_next_task(&wf, now).is_none());
    }

    #[test]
    fn unresolved_dependency_is_never_selected() {
        // Bypasses validation, as a recovered snapshot could.
        let mut wf = workflow(vec![task("b")]);
        wf.tasks[0].dependencies = vec!["X".into()];
        assert!(select_next_task(&wf, Utc::now()).is_none());
    }

    #[test]
    fn task_awaiting_retry_is_skipped_until_due() {
        let mut wf = workflow(vec![task("a"), task("z")]);
        let now = Utc::now();
        wf.tasks[0].retry_count = 1;
        wf.tasks[0].next_retry_at = Some(now + Duration::milliseconds(500));

        assert_eq!(select_next_task(&wf, now).map(|t| t.id.as_str()), Some("z"));

        let later = now + Duration::milliseconds(500);
        assert_eq!(select_next_task(&wf, later).map(|t| t.id.as_str()), Some("a"));
    }
}
