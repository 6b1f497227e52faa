//! In-process inventory.
//!
//! Same conditional-update semantics as the HTTP API, plus a log of every
//! mutation attempt. Used for tests and local dry runs.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;

use super::{InventoryClient, InventoryError, InventoryResult, ListFilters, PartialUpdate};
use crate::models::{InventoryRecord, RecordType, ResourceId};
use crate::state_machine::ResourceState;

/// One mutation attempt, whether or not it was applied
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedMutation {
    Update {
        record_type: RecordType,
        id: ResourceId,
        fields: Map<String, Value>,
        expected_state: Option<ResourceState>,
        applied: bool,
    },
    Delete {
        record_type: RecordType,
        id: ResourceId,
        applied: bool,
    },
}

impl RecordedMutation {
    pub fn is_applied(&self) -> bool {
        match self {
            Self::Update { applied, .. } | Self::Delete { applied, .. } => *applied,
        }
    }

    pub fn target(&self) -> (RecordType, ResourceId) {
        match self {
            Self::Update { record_type, id, .. } | Self::Delete { record_type, id, .. } => {
                (*record_type, *id)
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryInventory {
    records: DashMap<(RecordType, ResourceId), InventoryRecord>,
    mutations: Mutex<Vec<RecordedMutation>>,
    unavailable: Mutex<bool>,
    /// Injected write failures per target state; `None` fails forever
    failing_states: Mutex<HashMap<ResourceState, Option<usize>>>,
}

impl InMemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record_type: RecordType, record: InventoryRecord) {
        self.records.insert((record_type, record.id), record);
    }

    /// Builder-style insert for test setup
    pub fn with_record(self, record_type: RecordType, record: InventoryRecord) -> Self {
        self.insert(record_type, record);
        self
    }

    pub fn get(&self, record_type: RecordType, id: ResourceId) -> Option<InventoryRecord> {
        self.records.get(&(record_type, id)).map(|r| r.value().clone())
    }

    pub fn state_of(&self, record_type: RecordType, id: ResourceId) -> Option<ResourceState> {
        self.get(record_type, id).and_then(|r| r.state())
    }

    pub fn contains(&self, record_type: RecordType, id: ResourceId) -> bool {
        self.records.contains_key(&(record_type, id))
    }

    pub fn mutations(&self) -> Vec<RecordedMutation> {
        self.mutations.lock().clone()
    }

    /// Mutations attempted against one record
    pub fn mutations_for(&self, record_type: RecordType, id: ResourceId) -> Vec<RecordedMutation> {
        self.mutations
            .lock()
            .iter()
            .filter(|m| m.target() == (record_type, id))
            .cloned()
            .collect()
    }

    /// States successfully written to one record, in order
    pub fn applied_states(&self, record_type: RecordType, id: ResourceId) -> Vec<ResourceState> {
        self.mutations_for(record_type, id)
            .into_iter()
            .filter_map(|m| match m {
                RecordedMutation::Update {
                    fields,
                    applied: true,
                    ..
                } => fields
                    .get("state")
                    .and_then(Value::as_i64)
                    .and_then(|c| i32::try_from(c).ok())
                    .and_then(ResourceState::from_code),
                _ => None,
            })
            .collect()
    }

    pub fn clear_mutations(&self) {
        self.mutations.lock().clear();
    }

    /// Make every call fail with a transport error
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock() = unavailable;
    }

    /// Make updates that write `state` fail with HTTP 500
    pub fn fail_updates_to(&self, state: ResourceState) {
        self.failing_states.lock().insert(state, None);
    }

    /// Make the next `times` updates that write `state` fail with HTTP 500
    pub fn fail_next_updates_to(&self, state: ResourceState, times: usize) {
        self.failing_states.lock().insert(state, Some(times));
    }

    /// Drop every injected failure and mark the inventory available again
    pub fn clear_failures(&self) {
        self.failing_states.lock().clear();
        *self.unavailable.lock() = false;
    }

    fn take_injected_failure(&self, state: ResourceState) -> bool {
        let mut failing = self.failing_states.lock();
        match failing.get_mut(&state) {
            Some(None) => true,
            Some(Some(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn check_available(&self) -> InventoryResult<()> {
        if *self.unavailable.lock() {
            return Err(InventoryError::transport("in-memory inventory marked unavailable"));
        }
        Ok(())
    }

    fn record(&self, mutation: RecordedMutation) {
        self.mutations.lock().push(mutation);
    }
}

#[async_trait]
impl InventoryClient for InMemoryInventory {
    async fn read(
        &self,
        record_type: RecordType,
        id: ResourceId,
    ) -> InventoryResult<Option<InventoryRecord>> {
        self.check_available()?;
        Ok(self.get(record_type, id))
    }

    async fn list(
        &self,
        record_type: RecordType,
        filters: &ListFilters,
    ) -> InventoryResult<Vec<InventoryRecord>> {
        self.check_available()?;
        let mut records: Vec<InventoryRecord> = self
            .records
            .iter()
            .filter(|entry| entry.key().0 == record_type && filters.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by_key(|r| r.id);
        if let Some(limit) = filters.limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    async fn partial_update(
        &self,
        record_type: RecordType,
        id: ResourceId,
        update: &PartialUpdate,
    ) -> InventoryResult<bool> {
        self.check_available()?;
        if let Some(state) = update.new_state() {
            if self.take_injected_failure(state) {
                return Err(InventoryError::http(500, format!("injected failure writing {state}")));
            }
        }

        // The entry guard holds the shard lock across check and write
        let applied = match self.records.get_mut(&(record_type, id)) {
            Some(mut entry) => {
                let current = entry.state();
                let precondition_holds = update
                    .expected_state
                    .map_or(true, |expected| current == Some(expected));
                if precondition_holds {
                    for (field, value) in &update.fields {
                        entry.fields.insert(field.clone(), value.clone());
                    }
                }
                precondition_holds
            }
            None => false,
        };

        self.record(RecordedMutation::Update {
            record_type,
            id,
            fields: update.fields.clone(),
            expected_state: update.expected_state,
            applied,
        });
        Ok(applied)
    }

    async fn delete(&self, record_type: RecordType, id: ResourceId) -> InventoryResult<bool> {
        self.check_available()?;
        let applied = self.records.remove(&(record_type, id)).is_some();
        self.record(RecordedMutation::Delete {
            record_type,
            id,
            applied,
        });
        Ok(applied)
    }
}
