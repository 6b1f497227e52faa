//! # Lifecycle Error Types
//!
//! Crate-level error type. Each subsystem owns a narrower error enum that
//! converts into [`LifecycleError`] with `?`. Only the dispatcher turns errors
//! into resource state changes; everything below it returns these types.

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::credentials::CredentialError;
use crate::executor::ExecutorError;
use crate::inventory::InventoryError;
use crate::notifier::NotifierError;
use crate::orchestration::attributes::AttributeError;
use crate::orchestration::task_queue::QueueError;
use crate::state_machine::StateMachineError;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Attribute resolution failed: {0}")]
    Attributes(#[from] AttributeError),

    #[error("State machine error: {0}")]
    StateMachine(#[from] StateMachineError),

    #[error("Task queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Notification error: {0}")]
    Notifier(#[from] NotifierError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LifecycleError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether retrying the same call later could succeed.
    ///
    /// Transport-level inventory failures and queue errors are transient;
    /// configuration, attribute and state machine errors are not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Inventory(e) => e.is_recoverable(),
            Self::Credential(_) | Self::Queue(_) | Self::Notifier(_) => true,
            Self::Executor(_)
            | Self::Attributes(_)
            | Self::StateMachine(_)
            | Self::Configuration(_)
            | Self::Internal(_) => false,
        }
    }
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;
