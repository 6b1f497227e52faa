//! Transition table for lifecycle operations.
//!
//! Every operation starts from a request state, claims the resource by moving
//! it to an in-progress state, and finishes in either a stable state or
//! [`ResourceState::Unresourced`]. Scrub is the exception on both ends: it
//! starts from the scrub queue, a successful scrub removes the record
//! altogether, and a failed one is released back to the queue for a retry.

use serde::{Deserialize, Serialize};

use super::errors::StateMachineError;
use super::operations::LifecycleOperation;
use super::states::ResourceState;

/// What a successful operation does to the inventory record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "state")]
pub enum SuccessTarget {
    State(ResourceState),
    Delete,
}

/// Resolved transitions for one operation starting from one state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionPlan {
    pub operation: LifecycleOperation,
    pub source: ResourceState,
    pub in_progress: Option<ResourceState>,
    pub success: SuccessTarget,
}

impl TransitionPlan {
    /// State written when the operation fails after the claim.
    ///
    /// `None` for scrub: the claim is released back to the source state and
    /// the scrub is retried.
    pub fn failure_state(&self) -> Option<ResourceState> {
        match self.success {
            SuccessTarget::Delete => None,
            SuccessTarget::State(_) => Some(ResourceState::Unresourced),
        }
    }

    /// State the resource is in while the executor runs
    pub fn working_state(&self) -> ResourceState {
        self.in_progress.unwrap_or(self.source)
    }
}

/// Source states accepted by an operation
pub fn source_states(operation: LifecycleOperation) -> &'static [ResourceState] {
    match operation {
        LifecycleOperation::Build => &[ResourceState::Requested],
        LifecycleOperation::Quiesce => &[ResourceState::Quiesce, ResourceState::Scrub],
        LifecycleOperation::Scrub => &[ResourceState::ScrubQueue],
        LifecycleOperation::Restart => &[ResourceState::Restart],
        LifecycleOperation::Update => &[ResourceState::Update, ResourceState::QuiescedUpdate],
    }
}

/// Resolve the transitions for `operation` from `current`
pub fn plan_for(
    operation: LifecycleOperation,
    current: ResourceState,
) -> Result<TransitionPlan, StateMachineError> {
    use LifecycleOperation as Op;
    use ResourceState as S;

    let (in_progress, success) = match (operation, current) {
        (Op::Build, S::Requested) => (Some(S::Building), SuccessTarget::State(S::Running)),
        (Op::Quiesce, S::Quiesce) => (Some(S::Quiescing), SuccessTarget::State(S::Quiesced)),
        (Op::Quiesce, S::Scrub) => (Some(S::ScrubPrep), SuccessTarget::State(S::ScrubQueue)),
        (Op::Scrub, S::ScrubQueue) => (Some(S::ScrubPrep), SuccessTarget::Delete),
        (Op::Restart, S::Restart) => (Some(S::Restarting), SuccessTarget::State(S::Running)),
        (Op::Update, S::Update) => (Some(S::Updating), SuccessTarget::State(S::Running)),
        (Op::Update, S::QuiescedUpdate) => {
            (Some(S::QuiescedUpdating), SuccessTarget::State(S::Quiesced))
        }
        (operation, from) => {
            return Err(StateMachineError::InvalidTransition {
                operation: operation.to_string(),
                from: from.to_string(),
            })
        }
    };

    Ok(TransitionPlan {
        operation,
        source: current,
        in_progress,
        success,
    })
}

/// Operation that picks up a resource sitting in `state`, if any
pub fn operation_for_state(state: ResourceState) -> Option<LifecycleOperation> {
    LifecycleOperation::ALL
        .iter()
        .copied()
        .find(|operation| source_states(*operation).contains(&state))
}

/// Plan used to compensate a record found abandoned in `state`.
///
/// Only in-progress states that fail to [`ResourceState::Unresourced`] have
/// one. `ScrubPrep` resolves to the quiesce ahead of a scrub.
pub fn plan_for_stale_claim(state: ResourceState) -> Option<TransitionPlan> {
    LifecycleOperation::ALL.iter().find_map(|operation| {
        source_states(*operation)
            .iter()
            .filter_map(|source| plan_for(*operation, *source).ok())
            .find(|plan| plan.in_progress == Some(state) && plan.failure_state().is_some())
    })
}
