//! Inventory records and the typed resource view built from them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::inventory::InventoryError;
use crate::state_machine::{ResourceKind, ResourceState};

pub type ResourceId = i64;

/// Inventory field names shared across record types
pub mod fields {
    pub const STATE: &str = "state";
    pub const PROJECT_ID: &str = "project_id";
    pub const SERVER_ID: &str = "server_id";
    pub const IMAGE_ID: &str = "image_id";
    pub const IP_ADDRESS: &str = "ip_address";
    pub const ERRORS: &str = "errors";
    pub const UPDATED: &str = "updated";
}

/// Collection a record lives in on the inventory API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    VirtualMachine,
    VirtualRouter,
    StorageVolume,
    Project,
    Server,
    Image,
}

impl RecordType {
    /// URL path segment for this collection
    pub fn path_segment(&self) -> &'static str {
        match self {
            Self::VirtualMachine => "vm",
            Self::VirtualRouter => "virtual_router",
            Self::StorageVolume => "storage",
            Self::Project => "project",
            Self::Server => "server",
            Self::Image => "image",
        }
    }
}

impl From<ResourceKind> for RecordType {
    fn from(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::VirtualMachine => Self::VirtualMachine,
            ResourceKind::VirtualRouter => Self::VirtualRouter,
            ResourceKind::StorageVolume => Self::StorageVolume,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path_segment())
    }
}

/// Raw inventory record: an id plus whatever fields the API returned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub id: ResourceId,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl InventoryRecord {
    pub fn new(id: ResourceId) -> Self {
        Self {
            id,
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Integer field, accepting numeric strings
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        match self.fields.get(name)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Non-empty string field; numbers are rendered as strings
    pub fn get_string(&self, name: &str) -> Option<String> {
        match self.fields.get(name)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn state(&self) -> Option<ResourceState> {
        self.get_i64(fields::STATE)
            .and_then(|code| i32::try_from(code).ok())
            .and_then(ResourceState::from_code)
    }

    pub fn project_id(&self) -> Option<ResourceId> {
        self.get_i64(fields::PROJECT_ID)
    }
}

/// Typed view over a VM, virtual router or storage volume record.
///
/// Built fresh from inventory for each task and dropped at the end of it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resource {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub state: ResourceState,
    pub project_id: Option<ResourceId>,
    pub platform: Option<String>,
    pub record: InventoryRecord,
}

impl Resource {
    pub fn from_record(kind: ResourceKind, record: InventoryRecord) -> Result<Self, InventoryError> {
        let state = record.state().ok_or_else(|| {
            InventoryError::invalid_record(
                RecordType::from(kind),
                record.id,
                "missing or unknown state code",
            )
        })?;

        Ok(Self {
            id: record.id,
            kind,
            state,
            project_id: record.project_id(),
            platform: record.get_string(kind.platform_field()),
            record,
        })
    }

    pub fn record_type(&self) -> RecordType {
        RecordType::from(self.kind)
    }
}
