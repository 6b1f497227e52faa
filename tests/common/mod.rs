//! Shared fixtures for integration tests: a scriptable executor, a recording
//! notifier and an in-memory inventory seeded with one project.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fleet_lifecycle::config::DispatchConfig;
use fleet_lifecycle::executor::{
    ExecutionOutcome, ExecutorAdapter, ExecutorError, ExecutorRegistry, ExecutorResult,
};
use fleet_lifecycle::inventory::{InMemoryInventory, InventoryClient};
use fleet_lifecycle::models::{InventoryRecord, RecordType, Resource, ResourceId, TaskContext};
use fleet_lifecycle::notifier::{Notifier, NotifierError, OperationOutcome};
use fleet_lifecycle::orchestration::{InMemoryTaskQueue, TaskDispatcher, TaskQueue};
use fleet_lifecycle::state_machine::{LifecycleOperation, ResourceKind, ResourceState};

pub const PROJECT_ID: ResourceId = 1;
pub const SERVER_ID: ResourceId = 11;
pub const IMAGE_ID: ResourceId = 3;

/// How the mock executor answers
#[derive(Debug, Clone)]
pub enum MockBehavior {
    Succeed,
    /// Succeed after holding the call open, so concurrent dispatches overlap
    SucceedAfter(Duration),
    Fail(Vec<String>),
    Error,
    Panic,
}

/// Executor that records every call and answers according to its behavior
pub struct MockExecutor {
    behavior: Mutex<MockBehavior>,
    calls: AtomicUsize,
    seen: Mutex<Vec<(LifecycleOperation, TaskContext)>>,
}

impl MockExecutor {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Operations and contexts the executor was called with, in order
    pub fn seen(&self) -> Vec<(LifecycleOperation, TaskContext)> {
        self.seen.lock().clone()
    }

    async fn respond(&self, operation: LifecycleOperation, context: &TaskContext) -> ExecutorResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push((operation, context.clone()));

        let behavior = self.behavior.lock().clone();
        match behavior {
            MockBehavior::Succeed => Ok(ExecutionOutcome::succeeded(format!("{operation} ok"))),
            MockBehavior::SucceedAfter(delay) => {
                tokio::time::sleep(delay).await;
                Ok(ExecutionOutcome::succeeded(format!("{operation} ok")))
            }
            MockBehavior::Fail(errors) => Ok(ExecutionOutcome::failed("remote failure", errors)),
            MockBehavior::Error => Err(ExecutorError::Internal("transport exploded".to_string())),
            MockBehavior::Panic => panic!("executor bug during {operation}"),
        }
    }
}

#[async_trait]
impl ExecutorAdapter for MockExecutor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn build(&self, context: &TaskContext) -> ExecutorResult {
        self.respond(LifecycleOperation::Build, context).await
    }

    async fn quiesce(&self, context: &TaskContext) -> ExecutorResult {
        self.respond(LifecycleOperation::Quiesce, context).await
    }

    async fn scrub(&self, context: &TaskContext) -> ExecutorResult {
        self.respond(LifecycleOperation::Scrub, context).await
    }

    async fn restart(&self, context: &TaskContext) -> ExecutorResult {
        self.respond(LifecycleOperation::Restart, context).await
    }

    async fn update(&self, context: &TaskContext) -> ExecutorResult {
        self.respond(LifecycleOperation::Update, context).await
    }
}

#[derive(Debug, Clone)]
pub struct RecordedNotification {
    pub event_kind: String,
    pub kind: ResourceKind,
    pub resource_id: ResourceId,
    pub outcome: OperationOutcome,
}

/// Notifier that keeps every call; optionally fails or panics after recording
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<RecordedNotification>>,
    fail: bool,
    panic: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn panicking() -> Self {
        Self {
            panic: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<RecordedNotification> {
        self.events.lock().clone()
    }

    pub fn successes(&self) -> usize {
        self.events.lock().iter().filter(|e| e.outcome.success).count()
    }

    pub fn failures(&self) -> usize {
        self.events.lock().iter().filter(|e| !e.outcome.success).count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        event_kind: &str,
        resource: &Resource,
        outcome: &OperationOutcome,
    ) -> Result<(), NotifierError> {
        self.events.lock().push(RecordedNotification {
            event_kind: event_kind.to_string(),
            kind: resource.kind,
            resource_id: resource.id,
            outcome: outcome.clone(),
        });
        if self.panic {
            panic!("notifier bug");
        }
        if self.fail {
            return Err(NotifierError::Delivery("mail relay down".to_string()));
        }
        Ok(())
    }
}

pub fn vm(id: ResourceId, state: ResourceState) -> InventoryRecord {
    InventoryRecord::new(id)
        .with_field("state", state.code())
        .with_field("project_id", PROJECT_ID)
        .with_field("server_id", SERVER_ID)
        .with_field("image_id", IMAGE_ID)
        .with_field("hypervisor", "kvm")
        .with_field("storages", json!([{"name": "root", "gb": 20, "primary": true}]))
}

pub fn router(id: ResourceId, state: ResourceState) -> InventoryRecord {
    InventoryRecord::new(id)
        .with_field("state", state.code())
        .with_field("project_id", PROJECT_ID)
        .with_field("ip_address", "192.168.0.1")
        .with_field("router_model", "vyos")
}

pub fn volume(id: ResourceId, state: ResourceState) -> InventoryRecord {
    InventoryRecord::new(id)
        .with_field("state", state.code())
        .with_field("project_id", PROJECT_ID)
        .with_field("server_id", SERVER_ID)
        .with_field("storage_backend", "ceph")
}

/// Inventory with the project, its server and an image
pub fn seeded_inventory() -> InMemoryInventory {
    InMemoryInventory::new()
        .with_record(RecordType::Project, InventoryRecord::new(PROJECT_ID).with_field("name", "acme"))
        .with_record(
            RecordType::Server,
            InventoryRecord::new(SERVER_ID).with_field("ip_address", "10.0.0.11"),
        )
        .with_record(
            RecordType::Image,
            InventoryRecord::new(IMAGE_ID)
                .with_field("name", "ubuntu-24.04")
                .with_field("filename", "noble.qcow2"),
        )
}

/// Dispatcher wired to in-memory collaborators, with the mock executor
/// registered for kvm VMs, vyos routers and ceph volumes
pub struct Harness {
    pub inventory: Arc<InMemoryInventory>,
    pub queue: Arc<InMemoryTaskQueue>,
    pub executor: Arc<MockExecutor>,
    pub notifier: Arc<RecordingNotifier>,
    pub dispatcher: Arc<TaskDispatcher>,
}

impl Harness {
    pub fn new(inventory: InMemoryInventory, behavior: MockBehavior) -> Self {
        Self::with_notifier(inventory, behavior, RecordingNotifier::new())
    }

    pub fn with_notifier(
        inventory: InMemoryInventory,
        behavior: MockBehavior,
        notifier: RecordingNotifier,
    ) -> Self {
        let inventory = Arc::new(inventory);
        let queue = Arc::new(InMemoryTaskQueue::new());
        let executor = Arc::new(MockExecutor::new(behavior));
        let notifier = Arc::new(notifier);

        let mut registry = ExecutorRegistry::new();
        for (kind, platform) in [
            (ResourceKind::VirtualMachine, "kvm"),
            (ResourceKind::VirtualRouter, "vyos"),
            (ResourceKind::StorageVolume, "ceph"),
        ] {
            registry
                .register(kind, platform, executor.clone())
                .expect("unique registration");
        }

        let inventory_client: Arc<dyn InventoryClient> = inventory.clone();
        let task_queue: Arc<dyn TaskQueue> = queue.clone();
        let dispatcher = Arc::new(TaskDispatcher::new(
            inventory_client,
            Arc::new(registry),
            notifier.clone(),
            task_queue,
            DispatchConfig {
                compensation_backoff_ms: 1,
                ..DispatchConfig::default()
            },
        ));

        Self {
            inventory,
            queue,
            executor,
            notifier,
            dispatcher,
        }
    }

    pub fn state_of(&self, record_type: RecordType, id: ResourceId) -> Option<ResourceState> {
        self.inventory.state_of(record_type, id)
    }
}
