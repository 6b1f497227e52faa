//! # Inventory Client
//!
//! Typed access to the inventory API, the source of truth for resource state.
//! Not-found is reported as `None`/`false`, never as an error, so callers can
//! tell "already gone" apart from "the API is failing".

pub mod http;
pub mod memory;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::credentials::CredentialError;
use crate::models::{fields, InventoryRecord, RecordType, ResourceId};
use crate::state_machine::ResourceState;

pub use http::HttpInventoryClient;
pub use memory::{InMemoryInventory, RecordedMutation};

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("Inventory API returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Inventory API unreachable: {0}")]
    Transport(String),

    #[error("Invalid {record_type} record {id}: {reason}")]
    InvalidRecord {
        record_type: RecordType,
        id: ResourceId,
        reason: String,
    },

    #[error("Inventory response could not be decoded: {0}")]
    Decode(String),

    #[error("Inventory authentication failed: {0}")]
    Credential(#[from] CredentialError),

    #[error("Inventory client configuration error: {0}")]
    Configuration(String),
}

impl InventoryError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn invalid_record(record_type: RecordType, id: ResourceId, reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            record_type,
            id,
            reason: reason.into(),
        }
    }

    /// Server-side and network failures may succeed on a later attempt
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status >= 500,
            Self::Transport(_) | Self::Credential(_) => true,
            Self::InvalidRecord { .. } | Self::Decode(_) | Self::Configuration(_) => false,
        }
    }
}

pub type InventoryResult<T> = Result<T, InventoryError>;

/// Equality filters for `list`, sent as query parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilters {
    pub filters: BTreeMap<String, String>,
    pub limit: Option<usize>,
}

impl ListFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: &str, value: impl ToString) -> Self {
        self.filters.insert(field.to_string(), value.to_string());
        self
    }

    pub fn state(self, state: ResourceState) -> Self {
        self.filter(fields::STATE, state.code())
    }

    pub fn project(self, project_id: ResourceId) -> Self {
        self.filter(fields::PROJECT_ID, project_id)
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a record satisfies every filter
    pub fn matches(&self, record: &InventoryRecord) -> bool {
        self.filters.iter().all(|(field, expected)| {
            if field == "id" {
                return record.id.to_string() == *expected;
            }
            match record.get(field) {
                Some(Value::String(s)) => s == expected,
                Some(Value::Number(n)) => n.to_string() == *expected,
                Some(Value::Bool(b)) => b.to_string() == *expected,
                _ => false,
            }
        })
    }
}

/// Fields to change on a record, optionally conditional on its current state
#[derive(Debug, Clone, PartialEq)]
pub struct PartialUpdate {
    pub fields: Map<String, Value>,
    /// Reject the update unless the record is still in this state
    pub expected_state: Option<ResourceState>,
}

impl PartialUpdate {
    pub fn new() -> Self {
        Self {
            fields: Map::new(),
            expected_state: None,
        }
    }

    /// Conditional state change `from -> to`
    pub fn transition(from: ResourceState, to: ResourceState) -> Self {
        Self::new().set_state(to).expecting(from)
    }

    pub fn set_state(self, state: ResourceState) -> Self {
        self.with_field(fields::STATE, state.code())
    }

    pub fn expecting(mut self, state: ResourceState) -> Self {
        self.expected_state = Some(state);
        self
    }

    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// State this update writes, if any
    pub fn new_state(&self) -> Option<ResourceState> {
        self.fields
            .get(fields::STATE)
            .and_then(Value::as_i64)
            .and_then(|code| i32::try_from(code).ok())
            .and_then(ResourceState::from_code)
    }
}

impl Default for PartialUpdate {
    fn default() -> Self {
        Self::new()
    }
}

/// Read/list/update/delete against the inventory
#[async_trait]
pub trait InventoryClient: Send + Sync {
    /// Fetch a record; `Ok(None)` when it does not exist
    async fn read(&self, record_type: RecordType, id: ResourceId)
        -> InventoryResult<Option<InventoryRecord>>;

    async fn list(
        &self,
        record_type: RecordType,
        filters: &ListFilters,
    ) -> InventoryResult<Vec<InventoryRecord>>;

    /// Apply a partial update.
    ///
    /// Returns `Ok(false)` when the record is gone or its state no longer
    /// matches `update.expected_state`.
    async fn partial_update(
        &self,
        record_type: RecordType,
        id: ResourceId,
        update: &PartialUpdate,
    ) -> InventoryResult<bool>;

    /// Delete a record; `Ok(false)` when it was already gone
    async fn delete(&self, record_type: RecordType, id: ResourceId) -> InventoryResult<bool>;
}
