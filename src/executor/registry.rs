use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::command::{CommandExecutor, CommandPlan, RetryPolicy};
use super::transport::{SshConfig, SshTransport, Transport};
use super::{ExecutorAdapter, ExecutorError};
use crate::config::ExecutorConfig;
use crate::state_machine::{LifecycleOperation, ResourceKind};

/// Executors keyed by resource kind and platform tag.
///
/// Built once at startup and shared read-only afterwards.
#[derive(Default)]
pub struct ExecutorRegistry {
    adapters: HashMap<(ResourceKind, String), Arc<dyn ExecutorAdapter>>,
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<String> = self
            .adapters
            .keys()
            .map(|(kind, platform)| format!("{kind}/{platform}"))
            .collect();
        keys.sort();
        f.debug_struct("ExecutorRegistry")
            .field("platforms", &keys)
            .finish()
    }
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor; a second registration for the same key is an error
    pub fn register(
        &mut self,
        kind: ResourceKind,
        platform: impl Into<String>,
        adapter: Arc<dyn ExecutorAdapter>,
    ) -> Result<(), ExecutorError> {
        let platform = platform.into();
        let key = (kind, platform.clone());
        if self.adapters.contains_key(&key) {
            return Err(ExecutorError::DuplicateRegistration { kind, platform });
        }
        debug!(kind = %kind, platform = %platform, executor = adapter.name(), "Registered executor");
        self.adapters.insert(key, adapter);
        Ok(())
    }

    /// Executor for a resource; a missing tag resolves like an unknown one
    pub fn resolve(
        &self,
        kind: ResourceKind,
        platform: Option<&str>,
    ) -> Result<Arc<dyn ExecutorAdapter>, ExecutorError> {
        let platform = platform.unwrap_or_default();
        self.adapters
            .get(&(kind, platform.to_string()))
            .cloned()
            .ok_or_else(|| ExecutorError::unknown_platform(kind, platform))
    }

    /// One SSH-backed [`CommandExecutor`] per configured platform, all sharing
    /// a single transport
    pub fn from_config(config: &ExecutorConfig) -> Result<Self, ExecutorError> {
        let ssh = SshConfig::from_settings(
            &config.ssh,
            Duration::from_secs(config.command_timeout_seconds),
        );
        let transport: Arc<dyn Transport> = Arc::new(SshTransport::new(ssh));
        let retry = RetryPolicy::from_config(config);

        let mut registry = Self::new();
        for platform in &config.platforms {
            let kind: ResourceKind = platform
                .kind
                .parse()
                .map_err(ExecutorError::Configuration)?;

            let mut plan = CommandPlan::new();
            for (operation, commands) in &platform.commands {
                let operation: LifecycleOperation =
                    operation.parse().map_err(ExecutorError::Configuration)?;
                plan = plan.with_commands(operation, commands.iter().cloned());
            }
            for marker in &platform.retryable_markers {
                plan = plan.with_retryable_marker(marker.clone());
            }

            let name = format!("{}-{}", platform.platform, kind);
            let executor = CommandExecutor::new(name, transport.clone(), plan, retry);
            registry.register(kind, platform.platform.clone(), Arc::new(executor))?;
        }

        info!(executors = registry.len(), "Built executor registry");
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
