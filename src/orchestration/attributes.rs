//! Attribute resolution.
//!
//! Collects everything an executor needs into the task context's flat
//! attribute map: the resource's own fields, its host address, the image to
//! build from, the network gateway and the storage layout. A required value
//! that cannot be found fails the whole task; executors never see partial
//! data.

use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::inventory::{InventoryClient, InventoryError, ListFilters};
use crate::models::{fields, RecordType, Resource, ResourceId, TaskContext};
use crate::state_machine::{LifecycleOperation, ResourceKind};

pub mod names {
    pub const ID: &str = "id";
    pub const KIND: &str = "kind";
    pub const HOST_ADDRESS: &str = "host_address";
    pub const IMAGE_NAME: &str = "image_name";
    pub const IMAGE_FILENAME: &str = "image_filename";
    pub const GATEWAY: &str = "gateway";
    pub const STORAGES: &str = "storages";
    pub const CREDENTIALS_REF: &str = "credentials_ref";
}

#[derive(Debug, Error)]
pub enum AttributeError {
    #[error("missing required attributes for {kind} {resource_id}: {}", .missing.join(", "))]
    Missing {
        kind: ResourceKind,
        resource_id: ResourceId,
        missing: Vec<String>,
    },

    #[error("inventory lookup failed: {0}")]
    Inventory(#[from] InventoryError),
}

pub struct AttributeResolver {
    inventory: Arc<dyn InventoryClient>,
    credentials_ref: Option<String>,
}

impl std::fmt::Debug for AttributeResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeResolver")
            .field("credentials_ref", &self.credentials_ref)
            .finish_non_exhaustive()
    }
}

impl AttributeResolver {
    pub fn new(inventory: Arc<dyn InventoryClient>, credentials_ref: Option<String>) -> Self {
        Self {
            inventory,
            credentials_ref,
        }
    }

    /// Fill `context.attributes`, `host_address` and `credentials_ref`
    pub async fn resolve(
        &self,
        resource: &Resource,
        context: &mut TaskContext,
    ) -> Result<(), AttributeError> {
        let mut missing = Vec::new();

        context.attributes = resource.record.fields.clone();
        context
            .attributes
            .insert(names::ID.to_string(), Value::from(resource.id));
        context
            .attributes
            .insert(names::KIND.to_string(), Value::from(resource.kind.to_string()));

        match self.host_address(resource).await? {
            Some(address) => {
                context
                    .attributes
                    .insert(names::HOST_ADDRESS.to_string(), Value::from(address.clone()));
                context.host_address = Some(address);
            }
            None => missing.push(names::HOST_ADDRESS.to_string()),
        }

        if resource.kind == ResourceKind::VirtualMachine
            && context.operation == LifecycleOperation::Build
        {
            self.resolve_vm_build(resource, context, &mut missing).await?;
        }

        if let Some(reference) = &self.credentials_ref {
            context
                .attributes
                .insert(names::CREDENTIALS_REF.to_string(), Value::from(reference.clone()));
            context.credentials_ref = Some(reference.clone());
        }

        if !missing.is_empty() {
            return Err(AttributeError::Missing {
                kind: resource.kind,
                resource_id: resource.id,
                missing,
            });
        }

        debug!(
            resource_id = resource.id,
            attributes = context.attributes.len(),
            "Resolved executor attributes"
        );
        Ok(())
    }

    /// Routers may carry their own management address; everything else runs
    /// on a server
    async fn host_address(&self, resource: &Resource) -> Result<Option<String>, AttributeError> {
        if resource.kind == ResourceKind::VirtualRouter {
            if let Some(address) = resource.record.get_string(fields::IP_ADDRESS) {
                return Ok(Some(address));
            }
        }

        let Some(server_id) = resource.record.get_i64(fields::SERVER_ID) else {
            return Ok(None);
        };
        let server = self.inventory.read(RecordType::Server, server_id).await?;
        Ok(server.and_then(|s| s.get_string(fields::IP_ADDRESS)))
    }

    async fn resolve_vm_build(
        &self,
        resource: &Resource,
        context: &mut TaskContext,
        missing: &mut Vec<String>,
    ) -> Result<(), AttributeError> {
        let image = match resource.record.get_i64(fields::IMAGE_ID) {
            Some(image_id) => self.inventory.read(RecordType::Image, image_id).await?,
            None => None,
        };
        for (attribute, field) in [
            (names::IMAGE_NAME, "name"),
            (names::IMAGE_FILENAME, "filename"),
        ] {
            match image.as_ref().and_then(|i| i.get_string(field)) {
                Some(value) => {
                    context
                        .attributes
                        .insert(attribute.to_string(), Value::from(value));
                }
                None => missing.push(attribute.to_string()),
            }
        }

        let gateway = match resource.project_id {
            Some(project_id) => self
                .inventory
                .list(RecordType::VirtualRouter, &ListFilters::new().project(project_id))
                .await?
                .iter()
                .find_map(|router| router.get_string(fields::IP_ADDRESS)),
            None => None,
        };
        match gateway {
            Some(gateway) => {
                context
                    .attributes
                    .insert(names::GATEWAY.to_string(), Value::from(gateway));
            }
            None => missing.push(names::GATEWAY.to_string()),
        }

        let has_storage = resource
            .record
            .get(names::STORAGES)
            .and_then(Value::as_array)
            .is_some_and(|storages| !storages.is_empty());
        if !has_storage {
            missing.push(names::STORAGES.to_string());
        }

        Ok(())
    }
}
