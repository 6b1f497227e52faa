//! # Executor Adapters
//!
//! Executors perform the remote work of an operation on one platform
//! (hypervisor, router model, storage backend). Ordinary remote failures are
//! reported as an unsuccessful [`ExecutionOutcome`]; `Err` is reserved for
//! conditions the adapter cannot express as an outcome. The dispatcher treats
//! `Err`, panics and unsuccessful outcomes alike.

pub mod command;
pub mod registry;
pub mod transport;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::TaskContext;
use crate::state_machine::{LifecycleOperation, ResourceKind};

pub use command::{CommandExecutor, CommandPlan, RetryPolicy};
pub use registry::ExecutorRegistry;
pub use transport::{CommandOutput, SshConfig, SshTransport, Transport, TransportError};

/// Result of one executor call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    /// Diagnostic output from the remote side
    pub output: String,
    pub errors: Vec<String>,
}

impl ExecutionOutcome {
    pub fn succeeded(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            errors: Vec::new(),
        }
    }

    pub fn failed(output: impl Into<String>, errors: Vec<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            errors,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("No executor registered for {kind} platform '{platform}'")]
    UnknownPlatform { kind: ResourceKind, platform: String },

    #[error("Executor already registered for {kind} platform '{platform}'")]
    DuplicateRegistration { kind: ResourceKind, platform: String },

    #[error("{executor} does not support {operation}")]
    Unsupported {
        executor: String,
        operation: LifecycleOperation,
    },

    #[error("Missing executor attribute: {0}")]
    MissingAttribute(String),

    #[error("Invalid executor configuration: {0}")]
    Configuration(String),

    #[error("Executor internal error: {0}")]
    Internal(String),
}

impl ExecutorError {
    pub fn unknown_platform(kind: ResourceKind, platform: impl Into<String>) -> Self {
        Self::UnknownPlatform {
            kind,
            platform: platform.into(),
        }
    }
}

pub type ExecutorResult = Result<ExecutionOutcome, ExecutorError>;

/// Platform-specific implementation of the lifecycle operations.
///
/// The dispatcher calls exactly one method once per task, with the context
/// already carrying the resolved attributes.
#[async_trait]
pub trait ExecutorAdapter: Send + Sync {
    /// Name for logs
    fn name(&self) -> &str;

    async fn build(&self, context: &TaskContext) -> ExecutorResult;

    async fn quiesce(&self, context: &TaskContext) -> ExecutorResult;

    async fn scrub(&self, context: &TaskContext) -> ExecutorResult;

    async fn restart(&self, context: &TaskContext) -> ExecutorResult;

    async fn update(&self, context: &TaskContext) -> ExecutorResult;

    /// Route to the method for `operation`
    async fn execute(&self, operation: LifecycleOperation, context: &TaskContext) -> ExecutorResult {
        match operation {
            LifecycleOperation::Build => self.build(context).await,
            LifecycleOperation::Quiesce => self.quiesce(context).await,
            LifecycleOperation::Scrub => self.scrub(context).await,
            LifecycleOperation::Restart => self.restart(context).await,
            LifecycleOperation::Update => self.update(context).await,
        }
    }
}
