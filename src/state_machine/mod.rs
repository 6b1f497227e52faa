// Resource lifecycle state machine
//
// States, operations and the transition table the dispatcher drives resources
// through. Transitions are applied to inventory with conditional updates; this
// module only decides which ones are legal.

pub mod errors;
pub mod operations;
pub mod states;
pub mod transitions;

pub use errors::StateMachineError;
pub use operations::LifecycleOperation;
pub use states::{ResourceKind, ResourceState};
pub use transitions::{
    operation_for_state, plan_for, plan_for_stale_claim, source_states, SuccessTarget,
    TransitionPlan,
};
