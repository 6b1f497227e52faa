use thiserror::Error;

/// Errors raised while resolving or applying a state transition
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("Invalid transition: cannot {operation} a resource in state {from}")]
    InvalidTransition { operation: String, from: String },

    #[error("Conditional update rejected for {kind} {resource_id}: expected state {expected}")]
    PreconditionLost {
        kind: String,
        resource_id: i64,
        expected: String,
    },
}

impl StateMachineError {
    pub fn precondition_lost(
        kind: impl ToString,
        resource_id: i64,
        expected: impl ToString,
    ) -> Self {
        Self::PreconditionLost {
            kind: kind.to_string(),
            resource_id,
            expected: expected.to_string(),
        }
    }
}
