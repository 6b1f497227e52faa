//! # Dependency Checker
//!
//! Point-in-time check of the resources an operation depends on:
//!
//! - building a VM or volume needs every virtual router of its project
//!   `Running`; one `Unresourced` router fails the build outright
//! - scrubbing a virtual router needs its project to hold no VMs or volumes
//!
//! Other operations have no dependencies. The checker never waits or retries;
//! the dispatcher decides what each result means.

use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::inventory::{InventoryClient, InventoryResult, ListFilters};
use crate::models::{DependencySnapshot, RecordType, Resource};
use crate::state_machine::{LifecycleOperation, ResourceKind, ResourceState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum DependencyStatus {
    Ready,
    NotReady(String),
    HardFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyCheck {
    pub status: DependencyStatus,
    pub snapshot: Vec<DependencySnapshot>,
}

impl DependencyCheck {
    fn ready(snapshot: Vec<DependencySnapshot>) -> Self {
        Self {
            status: DependencyStatus::Ready,
            snapshot,
        }
    }
}

pub struct DependencyChecker {
    inventory: Arc<dyn InventoryClient>,
}

impl std::fmt::Debug for DependencyChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyChecker").finish_non_exhaustive()
    }
}

impl DependencyChecker {
    pub fn new(inventory: Arc<dyn InventoryClient>) -> Self {
        Self { inventory }
    }

    pub async fn check(
        &self,
        resource: &Resource,
        operation: LifecycleOperation,
    ) -> InventoryResult<DependencyCheck> {
        match (operation, resource.kind) {
            (LifecycleOperation::Build, ResourceKind::VirtualMachine)
            | (LifecycleOperation::Build, ResourceKind::StorageVolume) => {
                self.check_network_ready(resource).await
            }
            (LifecycleOperation::Scrub, ResourceKind::VirtualRouter) => {
                self.check_children_gone(resource).await
            }
            _ => Ok(DependencyCheck::ready(Vec::new())),
        }
    }

    async fn check_network_ready(&self, resource: &Resource) -> InventoryResult<DependencyCheck> {
        let Some(project_id) = resource.project_id else {
            return Ok(DependencyCheck {
                status: DependencyStatus::HardFailed(format!(
                    "{} {} has no project",
                    resource.kind, resource.id
                )),
                snapshot: Vec::new(),
            });
        };

        let routers = self
            .inventory
            .list(RecordType::VirtualRouter, &ListFilters::new().project(project_id))
            .await?;
        let snapshot: Vec<DependencySnapshot> = routers
            .iter()
            .map(|router| DependencySnapshot {
                record_type: RecordType::VirtualRouter,
                id: router.id,
                state: router.state(),
            })
            .collect();

        debug!(
            resource_id = resource.id,
            project_id = project_id,
            routers = snapshot.len(),
            "Checked project network"
        );

        if let Some(failed) = snapshot
            .iter()
            .find(|dep| dep.state == Some(ResourceState::Unresourced))
        {
            return Ok(DependencyCheck {
                status: DependencyStatus::HardFailed(format!(
                    "virtual router {} of project {} is unresourced",
                    failed.id, project_id
                )),
                snapshot,
            });
        }

        if snapshot.is_empty() {
            return Ok(DependencyCheck {
                status: DependencyStatus::NotReady(format!(
                    "project {project_id} has no virtual router yet"
                )),
                snapshot,
            });
        }

        if let Some(pending) = snapshot
            .iter()
            .find(|dep| dep.state != Some(ResourceState::Running))
        {
            let state = pending
                .state
                .map_or_else(|| "unknown".to_string(), |s| s.to_string());
            return Ok(DependencyCheck {
                status: DependencyStatus::NotReady(format!(
                    "virtual router {} is {state}, waiting for running",
                    pending.id
                )),
                snapshot,
            });
        }

        Ok(DependencyCheck::ready(snapshot))
    }

    async fn check_children_gone(&self, resource: &Resource) -> InventoryResult<DependencyCheck> {
        let Some(project_id) = resource.project_id else {
            return Ok(DependencyCheck::ready(Vec::new()));
        };

        let filters = ListFilters::new().project(project_id);
        let mut snapshot = Vec::new();
        for record_type in [RecordType::VirtualMachine, RecordType::StorageVolume] {
            let children = self.inventory.list(record_type, &filters).await?;
            snapshot.extend(children.iter().map(|child| DependencySnapshot {
                record_type,
                id: child.id,
                state: child.state(),
            }));
        }

        if snapshot.is_empty() {
            return Ok(DependencyCheck::ready(snapshot));
        }

        Ok(DependencyCheck {
            status: DependencyStatus::NotReady(format!(
                "{} resource(s) in project {} not yet scrubbed",
                snapshot.len(),
                project_id
            )),
            snapshot,
        })
    }
}
