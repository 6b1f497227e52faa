//! # Task Dispatcher
//!
//! Runs one lifecycle operation against one resource:
//!
//! 1. read the record and check it is in a source state for the operation
//! 2. check dependencies (defer, reschedule or hard-fail)
//! 3. claim the resource with a conditional write to the in-progress state
//! 4. resolve attributes, pick the executor for the platform and run it
//! 5. write the success state (or delete, for scrub), or compensate to
//!    `Unresourced` with the collected errors (a failed scrub is released
//!    back to the scrub queue instead)
//! 6. notify
//!
//! Every path ends in a [`DispatchOutcome`]. Executor errors and panics are
//! contained here; nothing a dispatch does can take down the poller.
//! Compensating writes are retried with backoff; a record they still cannot
//! move is reported as [`DispatchOutcome::Stranded`] and left to the poller's
//! stale claim sweep.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let dispatcher = TaskDispatcher::new(inventory, executors, notifier, queue, config.dispatch);
//! let outcome = dispatcher
//!     .dispatch_build(ResourceKind::VirtualMachine, 42)
//!     .await;
//! ```

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::attributes::AttributeResolver;
use super::task_queue::{QueuedTask, TaskQueue};
use crate::config::DispatchConfig;
use crate::constants::{events, reasons};
use crate::dependency::{DependencyChecker, DependencyStatus};
use crate::executor::{ExecutorRegistry, RetryPolicy};
use crate::inventory::{InventoryClient, InventoryResult, ListFilters, PartialUpdate};
use crate::logging::log_dispatch_operation;
use crate::metrics;
use crate::models::{fields, InventoryRecord, RecordType, Resource, ResourceId, TaskContext};
use crate::notifier::{Notifier, OperationOutcome};
use crate::state_machine::{
    plan_for, plan_for_stale_claim, LifecycleOperation, ResourceKind, ResourceState,
    StateMachineError, SuccessTarget, TransitionPlan,
};

/// Why a dispatch returned without touching the resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "detail")]
pub enum SkipReason {
    NotFound,
    /// The resource is not in a source state for the operation
    StaleState(ResourceState),
    /// Another worker moved the resource first
    ClaimLost,
    InvalidRecord(String),
    InventoryUnavailable(String),
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::NotFound => reasons::NOT_FOUND,
            Self::StaleState(_) => reasons::STALE_STATE,
            Self::ClaimLost => reasons::CLAIM_LOST,
            Self::InvalidRecord(_) => reasons::INVALID_RECORD,
            Self::InventoryUnavailable(_) => reasons::INVENTORY_UNAVAILABLE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum DeferReason {
    /// Left in its request state; the next poll tries again
    DependencyNotReady { detail: String },
    /// Queued for another attempt at `eligible_at`
    Rescheduled { eligible_at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum DispatchOutcome {
    Completed {
        state: ResourceState,
    },
    /// Scrubbed and removed from the inventory
    Deleted {
        project_deleted: bool,
    },
    Unresourced {
        reason: String,
        errors: Vec<String>,
    },
    /// A failed scrub; the record stays in the scrub queue
    Retained {
        reason: String,
        errors: Vec<String>,
        retry_at: Option<DateTime<Utc>>,
    },
    /// Failed, and the compensating write could not be made; the record is
    /// still in `state`
    Stranded {
        state: ResourceState,
        reason: String,
        errors: Vec<String>,
    },
    Skipped {
        reason: SkipReason,
    },
    Deferred {
        reason: DeferReason,
    },
}

impl DispatchOutcome {
    fn skipped(reason: SkipReason) -> Self {
        Self::Skipped { reason }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Deleted { .. } => "deleted",
            Self::Unresourced { .. } => "unresourced",
            Self::Retained { .. } => "retained",
            Self::Stranded { .. } => "stranded",
            Self::Skipped { .. } => "skipped",
            Self::Deferred { .. } => "deferred",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Deleted { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::Unresourced { .. } | Self::Retained { .. } | Self::Stranded { .. }
        )
    }
}

pub struct TaskDispatcher {
    inventory: Arc<dyn InventoryClient>,
    executors: Arc<ExecutorRegistry>,
    notifier: Arc<dyn Notifier>,
    queue: Arc<dyn TaskQueue>,
    dependencies: DependencyChecker,
    attributes: AttributeResolver,
    compensation: RetryPolicy,
    config: DispatchConfig,
}

impl std::fmt::Debug for TaskDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDispatcher")
            .field("executors", &self.executors)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TaskDispatcher {
    pub fn new(
        inventory: Arc<dyn InventoryClient>,
        executors: Arc<ExecutorRegistry>,
        notifier: Arc<dyn Notifier>,
        queue: Arc<dyn TaskQueue>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            dependencies: DependencyChecker::new(inventory.clone()),
            attributes: AttributeResolver::new(inventory.clone(), config.credentials_ref.clone()),
            inventory,
            executors,
            notifier,
            queue,
            compensation: RetryPolicy {
                max_attempts: config.compensation_max_attempts.max(1),
                initial_backoff: Duration::from_millis(config.compensation_backoff_ms),
                max_backoff: Duration::from_secs(30),
            },
            config,
        }
    }

    pub async fn dispatch_build(&self, kind: ResourceKind, resource_id: ResourceId) -> DispatchOutcome {
        self.dispatch(LifecycleOperation::Build, kind, resource_id).await
    }

    pub async fn dispatch_quiesce(&self, kind: ResourceKind, resource_id: ResourceId) -> DispatchOutcome {
        self.dispatch(LifecycleOperation::Quiesce, kind, resource_id).await
    }

    pub async fn dispatch_scrub(&self, kind: ResourceKind, resource_id: ResourceId) -> DispatchOutcome {
        self.dispatch(LifecycleOperation::Scrub, kind, resource_id).await
    }

    pub async fn dispatch_restart(&self, kind: ResourceKind, resource_id: ResourceId) -> DispatchOutcome {
        self.dispatch(LifecycleOperation::Restart, kind, resource_id).await
    }

    pub async fn dispatch_update(&self, kind: ResourceKind, resource_id: ResourceId) -> DispatchOutcome {
        self.dispatch(LifecycleOperation::Update, kind, resource_id).await
    }

    pub async fn dispatch(
        &self,
        operation: LifecycleOperation,
        kind: ResourceKind,
        resource_id: ResourceId,
    ) -> DispatchOutcome {
        let mut context = TaskContext::new(operation, kind, resource_id);
        let span = info_span!(
            "dispatch",
            operation = %operation,
            kind = %kind,
            resource_id = resource_id,
            correlation_id = %context.correlation_id
        );

        let outcome = self.run(&mut context).instrument(span).await;

        metrics::dispatch_duration()
            .record(context.elapsed_ms(), &metrics::dispatch_labels(operation, kind));
        let details = serde_json::to_string(&outcome).ok();
        log_dispatch_operation(operation, kind, resource_id, outcome.status(), details.as_deref());
        outcome
    }

    /// Unresource a record left in an in-progress state by a worker that died
    /// or could not write its compensation. Conditional on that state, so a
    /// worker that is in fact still running wins any race by finishing first.
    pub async fn recover_stale(&self, kind: ResourceKind, record: InventoryRecord) -> DispatchOutcome {
        let resource = match Resource::from_record(kind, record) {
            Ok(resource) => resource,
            Err(e) => return DispatchOutcome::skipped(SkipReason::InvalidRecord(e.to_string())),
        };
        let Some(plan) = plan_for_stale_claim(resource.state) else {
            return DispatchOutcome::skipped(SkipReason::StaleState(resource.state));
        };

        let mut context = TaskContext::new(plan.operation, kind, resource.id);
        let span = info_span!(
            "recover_stale",
            operation = %plan.operation,
            kind = %kind,
            resource_id = resource.id,
            correlation_id = %context.correlation_id
        );

        let outcome = async {
            warn!(state = %resource.state, "Unresourcing abandoned in-progress resource");
            context.record_error(format!(
                "abandoned in {} by a worker that never finished",
                resource.state
            ));
            self.fail(&resource, &plan, resource.state, &mut context, reasons::STALE_CLAIM)
                .await
        }
        .instrument(span)
        .await;

        let details = serde_json::to_string(&outcome).ok();
        log_dispatch_operation(plan.operation, kind, resource.id, outcome.status(), details.as_deref());
        outcome
    }

    async fn run(&self, context: &mut TaskContext) -> DispatchOutcome {
        let (operation, kind) = (context.operation, context.kind);

        let record = match self.inventory.read(kind.into(), context.resource_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!("Resource not found in inventory");
                metrics::dispatch_failure_total()
                    .add(1, &metrics::labels_with_reason(operation, kind, reasons::NOT_FOUND));
                return DispatchOutcome::skipped(SkipReason::NotFound);
            }
            Err(e) => {
                error!(error = %e, "Failed to read resource from inventory");
                return self.skip(context, SkipReason::InventoryUnavailable(e.to_string()));
            }
        };

        let resource = match Resource::from_record(kind, record) {
            Ok(resource) => resource,
            Err(e) => {
                error!(error = %e, "Inventory record is not a valid resource");
                metrics::dispatch_failure_total()
                    .add(1, &metrics::labels_with_reason(operation, kind, reasons::INVALID_RECORD));
                return DispatchOutcome::skipped(SkipReason::InvalidRecord(e.to_string()));
            }
        };

        let plan = match plan_for(operation, resource.state) {
            Ok(plan) => plan,
            Err(e) => {
                info!(state = %resource.state, reason = %e, "Resource not in a source state, nothing to do");
                return self.skip(context, SkipReason::StaleState(resource.state));
            }
        };

        match self.dependencies.check(&resource, operation).await {
            Ok(check) => {
                context.dependencies = check.snapshot;
                match check.status {
                    DependencyStatus::Ready => {}
                    DependencyStatus::NotReady(detail) => {
                        return self.defer(&resource, context, detail).await;
                    }
                    DependencyStatus::HardFailed(detail) => {
                        error!(reason = %detail, "Dependency failed permanently");
                        context.record_error(detail);
                        return self
                            .fail(&resource, &plan, plan.source, context, reasons::DEPENDENCY_FAILED)
                            .await;
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Dependency check failed");
                return self.skip(context, SkipReason::InventoryUnavailable(e.to_string()));
            }
        }

        if let Some(in_progress) = plan.in_progress {
            let claim = PartialUpdate::transition(plan.source, in_progress);
            match self
                .inventory
                .partial_update(resource.record_type(), resource.id, &claim)
                .await
            {
                Ok(true) => debug!(from = %plan.source, to = %in_progress, "Claimed resource"),
                Ok(false) => {
                    let lost =
                        StateMachineError::precondition_lost(resource.kind, resource.id, plan.source);
                    info!(reason = %lost, "Resource claimed elsewhere");
                    return self.skip(context, SkipReason::ClaimLost);
                }
                Err(e) => {
                    error!(error = %e, "Claim write failed");
                    self.release_claim(&resource, &plan, in_progress).await;
                    return self.skip(context, SkipReason::InventoryUnavailable(e.to_string()));
                }
            }
        }

        let claimed = AssertUnwindSafe(self.execute_claimed(&resource, &plan, context))
            .catch_unwind()
            .await;
        match claimed {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(panic = %message, "Dispatch panicked after claim");
                context.record_error(format!("panic: {message}"));
                self.fail(&resource, &plan, plan.working_state(), context, reasons::DISPATCH_PANIC)
                    .await
            }
        }
    }

    async fn execute_claimed(
        &self,
        resource: &Resource,
        plan: &TransitionPlan,
        context: &mut TaskContext,
    ) -> DispatchOutcome {
        let working = plan.working_state();

        if let Err(e) = self.attributes.resolve(resource, context).await {
            error!(error = %e, "Attribute resolution failed");
            context.record_error(e.to_string());
            return self
                .fail(resource, plan, working, context, reasons::ATTRIBUTES_MISSING)
                .await;
        }

        let executor = match self
            .executors
            .resolve(resource.kind, resource.platform.as_deref())
        {
            Ok(executor) => executor,
            Err(e) => {
                error!(error = %e, "No executor for resource platform");
                context.record_error(e.to_string());
                return self
                    .fail(resource, plan, working, context, reasons::UNKNOWN_PLATFORM)
                    .await;
            }
        };

        info!(
            executor = executor.name(),
            host = ?context.host_address,
            "Running executor"
        );
        let result = AssertUnwindSafe(executor.execute(plan.operation, context))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(outcome)) if outcome.success => {
                debug!(output = %outcome.output, "Executor succeeded");
                self.succeed(resource, plan, context).await
            }
            Ok(Ok(outcome)) => {
                warn!(errors = ?outcome.errors, "Executor reported failure");
                if outcome.errors.is_empty() {
                    context.record_error(format!("{} executor reported failure", executor.name()));
                } else {
                    context.errors.extend(outcome.errors);
                }
                self.fail(resource, plan, working, context, reasons::EXECUTOR_FAILED)
                    .await
            }
            Ok(Err(e)) => {
                error!(error = %e, "Executor returned an error");
                context.record_error(e.to_string());
                self.fail(resource, plan, working, context, reasons::EXECUTOR_ERROR)
                    .await
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(panic = %message, "Executor panicked");
                context.record_error(format!("{} executor panicked: {message}", executor.name()));
                self.fail(resource, plan, working, context, reasons::EXECUTOR_PANIC)
                    .await
            }
        }
    }

    async fn succeed(
        &self,
        resource: &Resource,
        plan: &TransitionPlan,
        context: &mut TaskContext,
    ) -> DispatchOutcome {
        let (operation, kind) = (context.operation, context.kind);
        let working = plan.working_state();

        match plan.success {
            SuccessTarget::State(target) => {
                let update = PartialUpdate::transition(working, target);
                match self
                    .inventory
                    .partial_update(resource.record_type(), resource.id, &update)
                    .await
                {
                    Ok(true) => {
                        info!(state = %target, "Lifecycle operation succeeded");
                        metrics::dispatch_success_total()
                            .add(1, &metrics::dispatch_labels(operation, kind));
                        self.notify(events::OPERATION_SUCCEEDED, resource, context, true, Some(target))
                            .await;
                        DispatchOutcome::Completed { state: target }
                    }
                    Ok(false) => {
                        let lost =
                            StateMachineError::precondition_lost(resource.kind, resource.id, working);
                        error!(
                            reason = %lost,
                            "Resource left its in-progress state during the operation"
                        );
                        metrics::dispatch_failure_total().add(
                            1,
                            &metrics::labels_with_reason(operation, kind, reasons::FINALIZE_FAILED),
                        );
                        DispatchOutcome::skipped(SkipReason::ClaimLost)
                    }
                    Err(e) => {
                        error!(error = %e, state = %target, "Failed to record success state");
                        context.record_error(format!("failed to record {target}: {e}"));
                        self.fail(resource, plan, working, context, reasons::FINALIZE_FAILED)
                            .await
                    }
                }
            }
            SuccessTarget::Delete => {
                match self.inventory.delete(resource.record_type(), resource.id).await {
                    Ok(deleted) => {
                        if !deleted {
                            warn!("Record was already gone when scrub finished");
                        }
                        let project_deleted = self.cleanup_project(resource).await;
                        info!(project_deleted, "Resource scrubbed");
                        metrics::dispatch_success_total()
                            .add(1, &metrics::dispatch_labels(operation, kind));
                        self.notify(events::OPERATION_SUCCEEDED, resource, context, true, None)
                            .await;
                        DispatchOutcome::Deleted { project_deleted }
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to delete scrubbed record");
                        context.record_error(format!("failed to delete record: {e}"));
                        self.fail(resource, plan, working, context, reasons::FINALIZE_FAILED)
                            .await
                    }
                }
            }
        }
    }

    /// Compensate a failed operation: unresource from `from`, or keep a failed
    /// scrub queued for another attempt
    async fn fail(
        &self,
        resource: &Resource,
        plan: &TransitionPlan,
        from: ResourceState,
        context: &mut TaskContext,
        reason: &'static str,
    ) -> DispatchOutcome {
        let (operation, kind) = (context.operation, context.kind);
        metrics::dispatch_failure_total()
            .add(1, &metrics::labels_with_reason(operation, kind, reason));

        if plan.failure_state().is_none() {
            return self.retain(resource, plan, from, context, reason).await;
        }

        let mut update = PartialUpdate::transition(from, ResourceState::Unresourced);
        if self.config.report_errors_to_inventory && context.has_errors() {
            update = update.with_field(fields::ERRORS, context.error_summary());
        }

        let (outcome, final_state) = match self.compensate(resource, &update).await {
            Ok(true) => {
                warn!(reason, errors = ?context.errors, "Resource unresourced");
                let outcome = DispatchOutcome::Unresourced {
                    reason: reason.to_string(),
                    errors: context.errors.clone(),
                };
                (outcome, Some(ResourceState::Unresourced))
            }
            Ok(false) => {
                error!(from = %from, reason, "Could not unresource, state changed concurrently");
                (DispatchOutcome::skipped(SkipReason::ClaimLost), None)
            }
            Err(e) => {
                error!(error = %e, from = %from, reason, "Could not unresource resource");
                (self.strand(from, context, reason), Some(from))
            }
        };

        self.notify(events::OPERATION_FAILED, resource, context, false, final_state)
            .await;
        outcome
    }

    fn strand(&self, state: ResourceState, context: &TaskContext, reason: &'static str) -> DispatchOutcome {
        metrics::dispatch_failure_total().add(
            1,
            &metrics::labels_with_reason(context.operation, context.kind, reasons::COMPENSATION_FAILED),
        );
        DispatchOutcome::Stranded {
            state,
            reason: reason.to_string(),
            errors: context.errors.clone(),
        }
    }

    /// Release a failed scrub's claim and queue the scrub for another attempt
    async fn retain(
        &self,
        resource: &Resource,
        plan: &TransitionPlan,
        from: ResourceState,
        context: &TaskContext,
        reason: &'static str,
    ) -> DispatchOutcome {
        if from != plan.source {
            let release = PartialUpdate::transition(from, plan.source);
            match self.compensate(resource, &release).await {
                Ok(true) => debug!(state = %plan.source, "Released scrub claim"),
                Ok(false) => {
                    error!(from = %from, reason, "Could not release scrub claim, state changed concurrently");
                    self.notify(events::OPERATION_FAILED, resource, context, false, None)
                        .await;
                    return DispatchOutcome::skipped(SkipReason::ClaimLost);
                }
                Err(e) => {
                    error!(error = %e, from = %from, reason, "Could not release scrub claim");
                    self.notify(events::OPERATION_FAILED, resource, context, false, Some(from))
                        .await;
                    return self.strand(from, context, reason);
                }
            }
        }

        let eligible_at = after_seconds(self.config.scrub_reschedule_seconds);
        let task = QueuedTask::new(context.operation, context.kind, resource.id, eligible_at, reason);
        let retry_at = match self.queue.enqueue(task).await {
            Ok(()) => Some(eligible_at),
            Err(e) => {
                error!(error = %e, "Failed to requeue scrub, the poller will pick it up again");
                None
            }
        };

        warn!(reason, errors = ?context.errors, retry_at = ?retry_at, "Scrub failed, resource stays queued");
        self.notify(events::OPERATION_FAILED, resource, context, false, Some(plan.source))
            .await;
        DispatchOutcome::Retained {
            reason: reason.to_string(),
            errors: context.errors.clone(),
            retry_at,
        }
    }

    async fn defer(&self, resource: &Resource, context: &TaskContext, detail: String) -> DispatchOutcome {
        let (operation, kind) = (context.operation, context.kind);

        if operation == LifecycleOperation::Scrub && kind == ResourceKind::VirtualRouter {
            let eligible_at = after_seconds(self.config.scrub_reschedule_seconds);
            let task = QueuedTask::new(operation, kind, resource.id, eligible_at, reasons::CHILDREN_REMAIN);
            match self.queue.enqueue(task).await {
                Ok(()) => {
                    info!(reason = %detail, eligible_at = %eligible_at, "Router scrub rescheduled");
                    metrics::dispatch_deferred_total()
                        .add(1, &metrics::labels_with_reason(operation, kind, reasons::CHILDREN_REMAIN));
                    return DispatchOutcome::Deferred {
                        reason: DeferReason::Rescheduled { eligible_at },
                    };
                }
                Err(e) => error!(error = %e, "Failed to reschedule router scrub"),
            }
        }

        info!(reason = %detail, "Dependencies not ready, deferring");
        metrics::dispatch_deferred_total()
            .add(1, &metrics::labels_with_reason(operation, kind, reasons::DEPENDENCY_NOT_READY));
        DispatchOutcome::Deferred {
            reason: DeferReason::DependencyNotReady { detail },
        }
    }

    fn skip(&self, context: &TaskContext, reason: SkipReason) -> DispatchOutcome {
        metrics::dispatch_skipped_total().add(
            1,
            &metrics::labels_with_reason(context.operation, context.kind, reason.label()),
        );
        DispatchOutcome::skipped(reason)
    }

    /// Undo a claim whose write may or may not have landed. Conditional on the
    /// in-progress state, so a claim that never landed is left alone.
    async fn release_claim(&self, resource: &Resource, plan: &TransitionPlan, in_progress: ResourceState) {
        let release = PartialUpdate::transition(in_progress, plan.source);
        match self.compensate(resource, &release).await {
            Ok(true) => info!(state = %plan.source, "Released uncertain claim"),
            Ok(false) => debug!("Claim had not landed, nothing to release"),
            Err(e) => error!(error = %e, state = %in_progress, "Could not release claim"),
        }
    }

    /// Conditional compensating write, retried with backoff on errors.
    ///
    /// An error can hide a write that landed, so a rejected precondition after
    /// an earlier error counts as applied when the record already holds the
    /// target state.
    async fn compensate(&self, resource: &Resource, update: &PartialUpdate) -> InventoryResult<bool> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .inventory
                .partial_update(resource.record_type(), resource.id, update)
                .await
            {
                Ok(false) if attempt > 1 => return self.holds_target(resource, update).await,
                Ok(applied) => return Ok(applied),
                Err(e) if attempt >= self.compensation.max_attempts => {
                    error!(error = %e, attempts = attempt, "Giving up on compensating write");
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.compensation.delay_for(attempt);
                    warn!(
                        error = %e,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Compensating write failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn holds_target(&self, resource: &Resource, update: &PartialUpdate) -> InventoryResult<bool> {
        let Some(target) = update.new_state() else {
            return Ok(false);
        };
        let current = self.inventory.read(resource.record_type(), resource.id).await?;
        Ok(current.and_then(|record| record.state()) == Some(target))
    }

    /// Delete the project once it holds no live VMs or routers
    async fn cleanup_project(&self, resource: &Resource) -> bool {
        let Some(project_id) = resource.project_id else {
            return false;
        };

        let filters = ListFilters::new().project(project_id);
        for record_type in [RecordType::VirtualMachine, RecordType::VirtualRouter] {
            match self.inventory.list(record_type, &filters).await {
                Ok(records) => {
                    let live = records
                        .iter()
                        .filter(|r| r.state().map_or(true, |s| s.is_live()))
                        .count();
                    if live > 0 {
                        debug!(project_id, record_type = %record_type, live, "Project still in use");
                        return false;
                    }
                }
                Err(e) => {
                    warn!(error = %e, project_id, "Could not check project for cleanup");
                    return false;
                }
            }
        }

        match self.inventory.delete(RecordType::Project, project_id).await {
            Ok(deleted) => {
                if deleted {
                    info!(project_id, "Deleted empty project");
                }
                deleted
            }
            Err(e) => {
                warn!(error = %e, project_id, "Failed to delete empty project");
                false
            }
        }
    }

    /// Notifier failures and panics are logged and dropped
    async fn notify(
        &self,
        event_kind: &str,
        resource: &Resource,
        context: &TaskContext,
        success: bool,
        final_state: Option<ResourceState>,
    ) {
        let outcome = OperationOutcome {
            operation: context.operation,
            success,
            final_state,
            errors: context.errors.clone(),
            correlation_id: context.correlation_id,
        };

        let sent = AssertUnwindSafe(self.notifier.notify(event_kind, resource, &outcome))
            .catch_unwind()
            .await;
        match sent {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, event_kind, "Notifier failed"),
            Err(panic) => error!(
                panic = %panic_message(panic.as_ref()),
                event_kind,
                "Notifier panicked"
            ),
        }
    }
}

fn after_seconds(seconds: u64) -> DateTime<Utc> {
    let now = Utc::now();
    ChronoDuration::from_std(Duration::from_secs(seconds))
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
