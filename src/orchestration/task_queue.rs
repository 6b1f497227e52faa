//! # Task Queue
//!
//! Delayed dispatches. The dispatcher enqueues a task when it wants the same
//! operation tried again later (a router scrub blocked by children, a failed
//! scrub); the poller drains whatever is due at the start of each cycle.
//!
//! Tasks are keyed by `(operation, kind, resource_id)`: enqueueing a key that
//! is already pending keeps the earlier eligibility time, so repeated
//! reschedules never pile up duplicates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::models::ResourceId;
use crate::state_machine::{LifecycleOperation, ResourceKind};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Task queue unavailable: {0}")]
    Unavailable(String),

    #[error("Task queue is full ({capacity} tasks)")]
    Full { capacity: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedTask {
    pub task_id: Uuid,
    pub operation: LifecycleOperation,
    pub kind: ResourceKind,
    pub resource_id: ResourceId,
    pub eligible_at: DateTime<Utc>,
    pub reason: String,
}

impl QueuedTask {
    pub fn new(
        operation: LifecycleOperation,
        kind: ResourceKind,
        resource_id: ResourceId,
        eligible_at: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            operation,
            kind,
            resource_id,
            eligible_at,
            reason: reason.into(),
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.eligible_at <= now
    }

    fn same_target(&self, other: &QueuedTask) -> bool {
        self.targets(other.operation, other.kind, other.resource_id)
    }

    fn targets(&self, operation: LifecycleOperation, kind: ResourceKind, resource_id: ResourceId) -> bool {
        self.operation == operation && self.kind == kind && self.resource_id == resource_id
    }
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: QueuedTask) -> Result<(), QueueError>;

    /// Remove and return up to `limit` tasks eligible at `now`, earliest first
    async fn take_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<QueuedTask>, QueueError>;

    /// Eligibility time of the pending task for this target, if one is queued
    async fn pending_for(
        &self,
        operation: LifecycleOperation,
        kind: ResourceKind,
        resource_id: ResourceId,
    ) -> Result<Option<DateTime<Utc>>, QueueError>;
}

/// Process-local queue; pending tasks are lost on restart, which is safe
/// because the poller rediscovers every request state from the inventory.
#[derive(Debug, Default)]
pub struct InMemoryTaskQueue {
    tasks: Mutex<Vec<QueuedTask>>,
    capacity: Option<usize>,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            capacity: Some(capacity),
        }
    }

    /// Snapshot of pending tasks, earliest first
    pub fn pending(&self) -> Vec<QueuedTask> {
        let mut tasks = self.tasks.lock().clone();
        tasks.sort_by_key(|t| t.eligible_at);
        tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(&self, task: QueuedTask) -> Result<(), QueueError> {
        let mut tasks = self.tasks.lock();

        if let Some(existing) = tasks.iter_mut().find(|t| t.same_target(&task)) {
            if task.eligible_at < existing.eligible_at {
                existing.eligible_at = task.eligible_at;
            }
            debug!(
                operation = %task.operation,
                resource_id = task.resource_id,
                eligible_at = %existing.eligible_at,
                "Task already queued"
            );
            return Ok(());
        }

        if let Some(capacity) = self.capacity {
            if tasks.len() >= capacity {
                return Err(QueueError::Full { capacity });
            }
        }

        debug!(
            operation = %task.operation,
            kind = %task.kind,
            resource_id = task.resource_id,
            eligible_at = %task.eligible_at,
            reason = %task.reason,
            "Queued delayed dispatch"
        );
        tasks.push(task);
        Ok(())
    }

    async fn take_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<QueuedTask>, QueueError> {
        let mut tasks = self.tasks.lock();
        let (mut due, waiting): (Vec<_>, Vec<_>) = tasks.drain(..).partition(|t| t.is_due(now));
        due.sort_by_key(|t| t.eligible_at);

        let overflow = due.split_off(limit.min(due.len()));
        *tasks = waiting;
        tasks.extend(overflow);
        Ok(due)
    }

    async fn pending_for(
        &self,
        operation: LifecycleOperation,
        kind: ResourceKind,
        resource_id: ResourceId,
    ) -> Result<Option<DateTime<Utc>>, QueueError> {
        Ok(self
            .tasks
            .lock()
            .iter()
            .find(|t| t.targets(operation, kind, resource_id))
            .map(|t| t.eligible_at))
    }
}
