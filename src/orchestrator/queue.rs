//! Priority task queue
//!
//! In-memory, priority-ordered collection of queued workflow invocations.
//! The queue is the single authoritative source of truth; the store is a
//! best-effort durable mirror. Tasks are never deleted automatically;
//! removal is explicit.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::data::{WorkflowInput, WorkflowResult, WorkflowStatus};

/// Task status lifecycle:
/// pending → running → completed
///                   ↘ failed
///                   ↘ paused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Paused,
}

/// One queued workflow invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique task identifier
    pub id: String,
    /// Priority (higher = more urgent, range: 1-10)
    pub priority: u8,
    /// Current task status
    pub status: TaskStatus,
    /// Input for the workflow execution
    pub workflow_input: WorkflowInput,
    /// When the task was created
    pub created_at: DateTime<Utc>,
    /// When the task started executing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the task completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Error message if the task failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Workflow result once the task settles
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<WorkflowResult>,
}

/// Counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub paused: usize,
}

/// Priority-based task queue for managing multiple workflow executions.
#[derive(Default)]
pub struct TaskQueue {
    tasks: HashMap<String, Task>,
    /// Task ids ordered by (priority desc, created_at asc).
    order: Vec<String>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new task. Priority is clamped to [1, 10]; default is 5.
    pub fn add(&mut self, input: WorkflowInput, priority: u8) -> String {
        let task = Task {
            id: Uuid::new_v4().to_string(),
            priority: priority.clamp(1, 10),
            status: TaskStatus::Pending,
            workflow_input: input,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            result: None,
        };

        let id = task.id.clone();
        self.order.push(id.clone());
        self.tasks.insert(id.clone(), task);
        self.reorder();
        id
    }

    /// Remove a task. Returns false if it was not found.
    pub fn remove(&mut self, task_id: &str) -> bool {
        if self.tasks.remove(task_id).is_none() {
            return false;
        }
        self.order.retain(|id| id != task_id);
        true
    }

    pub fn get(&self, task_id: &str) -> Option<&Task> {
        self.tasks.get(task_id)
    }

    pub fn get_all(&self) -> Vec<Task> {
        self.order
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .cloned()
            .collect()
    }

    pub fn get_by_status(&self, status: TaskStatus) -> Vec<Task> {
        self.order
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .filter(|t| t.status == status)
            .cloned()
            .collect()
    }

    /// Highest-priority pending task, without touching it.
    pub fn peek(&self) -> Option<&Task> {
        self.order
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .find(|t| t.status == TaskStatus::Pending)
    }

    /// Identify the highest-priority pending task. The task stays in the
    /// queue's storage; the caller marks it `running` to make it
    /// ineligible for future peeks.
    pub fn dequeue(&mut self) -> Option<Task> {
        self.peek().cloned()
    }

    /// Update a task's status. `started_at`/`completed_at` are stamped on
    /// first transition into their status and never overwritten.
    pub fn update_status(&mut self, task_id: &str, status: TaskStatus) {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return;
        };

        task.status = status;

        if status == TaskStatus::Running && task.started_at.is_none() {
            task.started_at = Some(Utc::now());
        }
        if matches!(status, TaskStatus::Completed | TaskStatus::Failed)
            && task.completed_at.is_none()
        {
            task.completed_at = Some(Utc::now());
        }
    }

    /// Record a finished workflow's result on its task.
    pub fn update_result(&mut self, task_id: &str, result: WorkflowResult) {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return;
        };

        task.status = match result.status {
            WorkflowStatus::Completed => TaskStatus::Completed,
            _ => TaskStatus::Failed,
        };
        task.completed_at = Some(Utc::now());
        if let Some(error) = &result.error {
            task.error = Some(error.message.clone());
        }
        task.result = Some(result);
    }

    /// Attach an error message to a task (execution failed before a
    /// result could be produced).
    pub fn set_error(&mut self, task_id: &str, message: impl Into<String>) {
        if let Some(task) = self.tasks.get_mut(task_id) {
            task.error = Some(message.into());
        }
    }

    pub fn get_stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            total: self.tasks.len(),
            ..Default::default()
        };
        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Paused => stats.paused += 1,
            }
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
        self.order.clear();
    }

    /// Replace the queue contents with a persisted snapshot, preserving
    /// ids and timestamps. This is the crash-recovery entry point: an
    /// interface-level operation, not a backdoor into private state.
    pub fn restore(&mut self, tasks: Vec<Task>) {
        self.clear();
        for task in tasks {
            self.order.push(task.id.clone());
            self.tasks.insert(task.id.clone(), task);
        }
        self.reorder();
    }

    /// Re-sort: higher priority first, earlier `created_at` within a
    /// priority band. Stable, so insertion order breaks exact ties.
    fn reorder(&mut self) {
        let tasks = &self.tasks;
        self.order.sort_by(|a, b| {
            let (ta, tb) = (&tasks[a], &tasks[b]);
            tb.priority
                .cmp(&ta.priority)
                .then(ta.created_at.cmp(&tb.created_at))
        });
    }
}
