//! # Poller
//!
//! Periodic driver for the dispatcher. Each cycle:
//!
//! 1. drains due tasks from the task queue (rescheduled router scrubs,
//!    failed scrubs)
//! 2. lists every resource sitting in a request state and dispatches the
//!    matching operation, unless a retry for it is already queued
//! 3. sweeps in-progress states for records nobody has touched within the
//!    stale claim timeout and unresources them
//!
//! Routers are dispatched before VMs and volumes for most requests so a
//! project's network can come up within the same cycle; for scrubs the order
//! flips so children go first. A resource in the scrub queue is only scrubbed
//! once its `updated` timestamp is older than the configured grace period.
//!
//! Errors listing one kind are logged and counted; the cycle carries on with
//! the rest, and the loop never exits on error.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::dispatcher::{DispatchOutcome, TaskDispatcher};
use super::task_queue::TaskQueue;
use crate::config::PollerConfig;
use crate::inventory::{InventoryClient, ListFilters};
use crate::logging::log_error;
use crate::metrics;
use crate::models::{fields, InventoryRecord, ResourceId};
use crate::state_machine::{operation_for_state, LifecycleOperation, ResourceKind, ResourceState};
use opentelemetry::KeyValue;

/// Request states the poller looks for, in dispatch order
const POLLED_STATES: [ResourceState; 7] = [
    ResourceState::Requested,
    ResourceState::Update,
    ResourceState::QuiescedUpdate,
    ResourceState::Restart,
    ResourceState::Quiesce,
    ResourceState::Scrub,
    ResourceState::ScrubQueue,
];

/// Outcome counts for one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub deferred: usize,
    pub in_grace_period: usize,
    /// Left alone because a retry is already queued for them
    pub retry_pending: usize,
    /// Abandoned in-progress records handed to the dispatcher for recovery
    pub stale_claims: usize,
    pub errors: usize,
}

impl CycleSummary {
    fn record(&mut self, outcome: &DispatchOutcome) {
        self.dispatched += 1;
        match outcome {
            DispatchOutcome::Completed { .. } | DispatchOutcome::Deleted { .. } => {
                self.succeeded += 1
            }
            DispatchOutcome::Unresourced { .. }
            | DispatchOutcome::Retained { .. }
            | DispatchOutcome::Stranded { .. } => self.failed += 1,
            DispatchOutcome::Skipped { .. } => self.skipped += 1,
            DispatchOutcome::Deferred { .. } => self.deferred += 1,
        }
    }
}

#[derive(Debug, Default)]
pub struct PollerStats {
    pub cycles: AtomicU64,
    pub dispatched: AtomicU64,
    pub errors: AtomicU64,
}

pub struct Poller {
    poller_id: Uuid,
    dispatcher: Arc<TaskDispatcher>,
    inventory: Arc<dyn InventoryClient>,
    queue: Arc<dyn TaskQueue>,
    config: PollerConfig,
    scrub_grace_period: ChronoDuration,
    stale_claim_timeout: Option<ChronoDuration>,
    stats: PollerStats,
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("poller_id", &self.poller_id)
            .field("config", &self.config)
            .field("scrub_grace_period", &self.scrub_grace_period)
            .field("stale_claim_timeout", &self.stale_claim_timeout)
            .field("stats", &self.stats)
            .finish()
    }
}

impl Poller {
    pub fn new(
        dispatcher: Arc<TaskDispatcher>,
        inventory: Arc<dyn InventoryClient>,
        queue: Arc<dyn TaskQueue>,
        config: PollerConfig,
        scrub_grace_period: Duration,
    ) -> Self {
        let poller_id = Uuid::new_v4();
        info!(
            poller_id = %poller_id,
            interval_seconds = config.interval_seconds,
            batch_size = config.batch_size,
            "Creating poller"
        );

        let stale_claim_timeout = (config.stale_claim_timeout_seconds > 0).then(|| {
            ChronoDuration::from_std(Duration::from_secs(config.stale_claim_timeout_seconds))
                .unwrap_or_else(|_| ChronoDuration::days(36_500))
        });

        Self {
            poller_id,
            dispatcher,
            inventory,
            queue,
            config,
            scrub_grace_period: ChronoDuration::from_std(scrub_grace_period)
                .unwrap_or_else(|_| ChronoDuration::days(36_500)),
            stale_claim_timeout,
            stats: PollerStats::default(),
        }
    }

    pub fn stats(&self) -> &PollerStats {
        &self.stats
    }

    /// Poll until `shutdown` resolves
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.interval_seconds));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(poller_id = %self.poller_id, "Poller started");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    let summary = self.run_cycle().await;
                    let result = if summary.errors == 0 { "ok" } else { "error" };
                    metrics::poller_cycles_total().add(1, &[KeyValue::new("result", result)]);
                }
            }
        }
        info!(poller_id = %self.poller_id, "Poller stopped");
    }

    /// One full cycle: due queue entries first, then every request state,
    /// then the stale claim sweep
    pub async fn run_cycle(&self) -> CycleSummary {
        let cycle_start = Instant::now();
        self.stats.cycles.fetch_add(1, Ordering::Relaxed);
        let mut summary = CycleSummary::default();

        self.drain_queue(&mut summary).await;

        for state in POLLED_STATES {
            let Some(operation) = operation_for_state(state) else {
                continue;
            };
            for kind in dispatch_order(state) {
                let filters = ListFilters::new().state(state).limit(self.config.batch_size);
                let records = match self.inventory.list(kind.into(), &filters).await {
                    Ok(records) => records,
                    Err(e) => {
                        error!(
                            poller_id = %self.poller_id,
                            kind = %kind,
                            state = %state,
                            error = %e,
                            "Failed to list resources"
                        );
                        summary.errors += 1;
                        self.stats.errors.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                };

                for record in records {
                    if state == ResourceState::ScrubQueue && !self.grace_elapsed(&record, Utc::now()) {
                        summary.in_grace_period += 1;
                        continue;
                    }
                    if self.retry_queued(operation, kind, record.id).await {
                        summary.retry_pending += 1;
                        continue;
                    }
                    let outcome = self.dispatcher.dispatch(operation, kind, record.id).await;
                    summary.record(&outcome);
                }
            }
        }

        self.sweep_stale_claims(&mut summary).await;

        self.stats
            .dispatched
            .fetch_add(summary.dispatched as u64, Ordering::Relaxed);
        debug!(
            poller_id = %self.poller_id,
            duration_ms = cycle_start.elapsed().as_millis() as u64,
            dispatched = summary.dispatched,
            succeeded = summary.succeeded,
            failed = summary.failed,
            deferred = summary.deferred,
            retry_pending = summary.retry_pending,
            stale_claims = summary.stale_claims,
            errors = summary.errors,
            "Completed poll cycle"
        );
        summary
    }

    async fn drain_queue(&self, summary: &mut CycleSummary) {
        let due = match self.queue.take_due(Utc::now(), self.config.batch_size).await {
            Ok(due) => due,
            Err(e) => {
                log_error("poller", "take_due", &e.to_string(), None);
                summary.errors += 1;
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        for task in due {
            debug!(
                task_id = %task.task_id,
                operation = %task.operation,
                resource_id = task.resource_id,
                reason = %task.reason,
                "Dispatching queued task"
            );
            let outcome = self
                .dispatcher
                .dispatch(task.operation, task.kind, task.resource_id)
                .await;
            summary.record(&outcome);
        }
    }

    /// A queued retry owns the next attempt; dispatching from the listing too
    /// would skip its backoff. Queue errors fall through to a dispatch, which
    /// the conditional claim keeps safe.
    async fn retry_queued(&self, operation: LifecycleOperation, kind: ResourceKind, id: ResourceId) -> bool {
        match self.queue.pending_for(operation, kind, id).await {
            Ok(Some(eligible_at)) => {
                debug!(
                    operation = %operation,
                    kind = %kind,
                    resource_id = id,
                    eligible_at = %eligible_at,
                    "Retry already queued, leaving resource for the queue"
                );
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, resource_id = id, "Could not check task queue");
                false
            }
        }
    }

    async fn sweep_stale_claims(&self, summary: &mut CycleSummary) {
        let Some(timeout) = self.stale_claim_timeout else {
            return;
        };

        let in_progress = ResourceState::ALL.into_iter().filter(|s| s.is_in_progress());
        for state in in_progress {
            for kind in ResourceKind::ALL {
                let filters = ListFilters::new().state(state).limit(self.config.batch_size);
                let records = match self.inventory.list(kind.into(), &filters).await {
                    Ok(records) => records,
                    Err(e) => {
                        error!(
                            poller_id = %self.poller_id,
                            kind = %kind,
                            state = %state,
                            error = %e,
                            "Failed to list in-progress resources"
                        );
                        summary.errors += 1;
                        self.stats.errors.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                };

                let now = Utc::now();
                for record in records {
                    if !is_older_than(&record, now, timeout) {
                        continue;
                    }
                    summary.stale_claims += 1;
                    let outcome = self.dispatcher.recover_stale(kind, record).await;
                    summary.record(&outcome);
                }
            }
        }
    }

    /// Records without a readable `updated` timestamp are never held back
    fn grace_elapsed(&self, record: &InventoryRecord, now: DateTime<Utc>) -> bool {
        if self.scrub_grace_period <= ChronoDuration::zero() {
            return true;
        }
        record
            .get_string(fields::UPDATED)
            .and_then(|updated| DateTime::parse_from_rfc3339(&updated).ok())
            .map_or(true, |updated| {
                now.signed_duration_since(updated.with_timezone(&Utc)) >= self.scrub_grace_period
            })
    }
}

/// Records without a readable `updated` timestamp have no known age and are
/// never considered stale
fn is_older_than(record: &InventoryRecord, now: DateTime<Utc>, age: ChronoDuration) -> bool {
    record
        .get_string(fields::UPDATED)
        .and_then(|updated| DateTime::parse_from_rfc3339(&updated).ok())
        .is_some_and(|updated| now.signed_duration_since(updated.with_timezone(&Utc)) >= age)
}

fn dispatch_order(state: ResourceState) -> [ResourceKind; 3] {
    match state {
        ResourceState::ScrubQueue => [
            ResourceKind::VirtualMachine,
            ResourceKind::StorageVolume,
            ResourceKind::VirtualRouter,
        ],
        _ => [
            ResourceKind::VirtualRouter,
            ResourceKind::VirtualMachine,
            ResourceKind::StorageVolume,
        ],
    }
}
