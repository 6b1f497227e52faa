use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::resource::{RecordType, ResourceId};
use crate::state_machine::{LifecycleOperation, ResourceKind, ResourceState};

/// Flattened attribute map handed to executors
pub type ResourceAttributes = Map<String, Value>;

/// State of one dependency as seen by the dependency checker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySnapshot {
    pub record_type: RecordType,
    pub id: ResourceId,
    pub state: Option<ResourceState>,
}

/// Per-task working state.
///
/// Created when a dispatch starts, filled in by the dependency checker and the
/// attribute resolver, passed by reference to the executor, and dropped when
/// the dispatch returns.
#[derive(Debug, Clone, Serialize)]
pub struct TaskContext {
    pub resource_id: ResourceId,
    pub kind: ResourceKind,
    pub operation: LifecycleOperation,
    pub correlation_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub errors: Vec<String>,
    pub host_address: Option<String>,
    pub credentials_ref: Option<String>,
    pub dependencies: Vec<DependencySnapshot>,
    pub attributes: ResourceAttributes,
}

impl TaskContext {
    pub fn new(operation: LifecycleOperation, kind: ResourceKind, resource_id: ResourceId) -> Self {
        Self {
            resource_id,
            kind,
            operation,
            correlation_id: Uuid::new_v4(),
            started_at: Utc::now(),
            errors: Vec::new(),
            host_address: None,
            credentials_ref: None,
            dependencies: Vec::new(),
            attributes: Map::new(),
        }
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Accumulated errors as one diagnostic string for inventory and notifications
    pub fn error_summary(&self) -> String {
        self.errors.join("; ")
    }

    pub fn attribute_str(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(Value::as_str)
    }

    pub fn elapsed_ms(&self) -> f64 {
        (Utc::now() - self.started_at).num_milliseconds() as f64
    }
}
