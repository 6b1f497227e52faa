//! Poll cycles against the in-memory inventory.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{router, seeded_inventory, vm, volume, Harness, MockBehavior, PROJECT_ID};
use fleet_lifecycle::config::PollerConfig;
use fleet_lifecycle::models::RecordType;
use fleet_lifecycle::orchestration::{Poller, QueuedTask, TaskQueue};
use fleet_lifecycle::state_machine::{LifecycleOperation, ResourceKind, ResourceState};

fn poller_for(harness: &Harness, grace: Duration) -> Poller {
    Poller::new(
        harness.dispatcher.clone(),
        harness.inventory.clone(),
        harness.queue.clone(),
        PollerConfig {
            interval_seconds: 1,
            batch_size: 10,
            stale_claim_timeout_seconds: 0,
        },
        grace,
    )
}

#[tokio::test]
async fn test_build_cycle_brings_up_router_first() {
    let harness = Harness::new(
        seeded_inventory()
            .with_record(RecordType::VirtualMachine, vm(42, ResourceState::Requested))
            .with_record(RecordType::StorageVolume, volume(5, ResourceState::Requested))
            .with_record(RecordType::VirtualRouter, router(7, ResourceState::Requested)),
        MockBehavior::Succeed,
    );
    let poller = poller_for(&harness, Duration::ZERO);

    let summary = poller.run_cycle().await;

    assert_eq!(summary.dispatched, 3);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.errors, 0);

    let kinds: Vec<ResourceKind> = harness.executor.seen().iter().map(|(_, c)| c.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ResourceKind::VirtualRouter,
            ResourceKind::VirtualMachine,
            ResourceKind::StorageVolume
        ]
    );
    for (record_type, id) in [
        (RecordType::VirtualRouter, 7),
        (RecordType::VirtualMachine, 42),
        (RecordType::StorageVolume, 5),
    ] {
        assert_eq!(harness.state_of(record_type, id), Some(ResourceState::Running));
    }
}

#[tokio::test]
async fn test_scrub_cycle_removes_children_then_router_then_project() {
    let harness = Harness::new(
        seeded_inventory()
            .with_record(RecordType::VirtualRouter, router(7, ResourceState::ScrubQueue))
            .with_record(RecordType::VirtualMachine, vm(42, ResourceState::ScrubQueue))
            .with_record(RecordType::StorageVolume, volume(5, ResourceState::ScrubQueue)),
        MockBehavior::Succeed,
    );
    let poller = poller_for(&harness, Duration::ZERO);

    let summary = poller.run_cycle().await;

    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.deferred, 0);
    assert!(!harness.inventory.contains(RecordType::VirtualMachine, 42));
    assert!(!harness.inventory.contains(RecordType::StorageVolume, 5));
    assert!(!harness.inventory.contains(RecordType::VirtualRouter, 7));
    assert!(!harness.inventory.contains(RecordType::Project, PROJECT_ID));
    assert!(harness.queue.is_empty());
}

#[tokio::test]
async fn test_recent_scrub_queue_entries_wait_for_grace_period() {
    let harness = Harness::new(
        seeded_inventory().with_record(
            RecordType::VirtualMachine,
            vm(42, ResourceState::ScrubQueue).with_field("updated", Utc::now().to_rfc3339()),
        ),
        MockBehavior::Succeed,
    );
    let poller = poller_for(&harness, Duration::from_secs(3600));

    let summary = poller.run_cycle().await;

    assert_eq!(summary.in_grace_period, 1);
    assert_eq!(summary.dispatched, 0);
    assert!(harness.inventory.contains(RecordType::VirtualMachine, 42));
    assert_eq!(harness.executor.call_count(), 0);
}

#[tokio::test]
async fn test_due_queue_entries_are_dispatched() {
    let harness = Harness::new(
        seeded_inventory().with_record(RecordType::VirtualMachine, vm(42, ResourceState::Restart)),
        MockBehavior::Succeed,
    );
    harness
        .queue
        .enqueue(QueuedTask::new(
            LifecycleOperation::Restart,
            ResourceKind::VirtualMachine,
            42,
            Utc::now(),
            "operator retry",
        ))
        .await
        .unwrap();
    let poller = poller_for(&harness, Duration::ZERO);

    let summary = poller.run_cycle().await;

    // The queued restart runs first, so the listing pass finds nothing left
    assert_eq!(summary.dispatched, 1);
    assert_eq!(summary.succeeded, 1);
    assert!(harness.queue.is_empty());
    assert_eq!(
        harness.state_of(RecordType::VirtualMachine, 42),
        Some(ResourceState::Running)
    );
}

#[tokio::test]
async fn test_listing_errors_are_counted_and_survived() {
    let harness = Harness::new(
        seeded_inventory().with_record(RecordType::VirtualMachine, vm(42, ResourceState::Restart)),
        MockBehavior::Succeed,
    );
    harness.inventory.set_unavailable(true);
    let poller = poller_for(&harness, Duration::ZERO);

    let summary = poller.run_cycle().await;
    assert_eq!(summary.dispatched, 0);
    assert_eq!(summary.errors, 21);
    assert_eq!(poller.stats().errors.load(Ordering::Relaxed), 21);

    harness.inventory.set_unavailable(false);
    let summary = poller.run_cycle().await;
    assert_eq!(summary.errors, 0);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(poller.stats().cycles.load(Ordering::Relaxed), 2);
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let harness = Harness::new(
        seeded_inventory()
            .with_record(RecordType::VirtualRouter, router(7, ResourceState::Running))
            .with_record(RecordType::VirtualMachine, vm(42, ResourceState::Requested)),
        MockBehavior::Succeed,
    );
    let poller = Arc::new(poller_for(&harness, Duration::ZERO));

    poller
        .run(tokio::time::sleep(Duration::from_millis(200)))
        .await;

    assert!(poller.stats().cycles.load(Ordering::Relaxed) >= 1);
    assert_eq!(
        harness.state_of(RecordType::VirtualMachine, 42),
        Some(ResourceState::Running)
    );
}

#[tokio::test]
async fn test_failed_scrub_waits_for_its_queued_retry() {
    let harness = Harness::new(
        seeded_inventory().with_record(RecordType::StorageVolume, volume(5, ResourceState::ScrubQueue)),
        MockBehavior::Fail(vec!["volume busy".to_string()]),
    );
    let poller = poller_for(&harness, Duration::ZERO);

    let first = poller.run_cycle().await;
    assert_eq!(first.failed, 1);

    for _ in 0..2 {
        let summary = poller.run_cycle().await;
        assert_eq!(summary.dispatched, 0);
        assert_eq!(summary.retry_pending, 1);
    }

    assert_eq!(harness.executor.call_count(), 1);
    assert_eq!(harness.notifier.failures(), 1);
    assert_eq!(harness.queue.len(), 1);
    assert_eq!(
        harness.state_of(RecordType::StorageVolume, 5),
        Some(ResourceState::ScrubQueue)
    );
}

#[tokio::test]
async fn test_sweep_unresources_abandoned_claims() {
    let now = Utc::now();
    let harness = Harness::new(
        seeded_inventory()
            .with_record(
                RecordType::VirtualMachine,
                vm(42, ResourceState::Building)
                    .with_field("updated", (now - ChronoDuration::hours(2)).to_rfc3339()),
            )
            .with_record(
                RecordType::VirtualMachine,
                vm(43, ResourceState::Building).with_field("updated", now.to_rfc3339()),
            )
            .with_record(RecordType::VirtualMachine, vm(44, ResourceState::Restarting)),
        MockBehavior::Succeed,
    );
    let poller = Poller::new(
        harness.dispatcher.clone(),
        harness.inventory.clone(),
        harness.queue.clone(),
        PollerConfig {
            interval_seconds: 1,
            batch_size: 10,
            stale_claim_timeout_seconds: 3600,
        },
        Duration::ZERO,
    );

    let summary = poller.run_cycle().await;

    assert_eq!(summary.stale_claims, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(
        harness.state_of(RecordType::VirtualMachine, 42),
        Some(ResourceState::Unresourced)
    );
    assert_eq!(
        harness.state_of(RecordType::VirtualMachine, 43),
        Some(ResourceState::Building)
    );
    assert_eq!(
        harness.state_of(RecordType::VirtualMachine, 44),
        Some(ResourceState::Restarting)
    );
    assert_eq!(harness.executor.call_count(), 0);
    assert_eq!(harness.notifier.failures(), 1);
}
