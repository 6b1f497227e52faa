//! # Configuration
//!
//! Typed worker configuration. Every section has defaults, so a config file
//! only needs to carry what differs; see [`loader::ConfigManager`] for how
//! files and environment variables are layered on top.

pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

use crate::constants::{
    DEFAULT_COMPENSATION_MAX_ATTEMPTS, DEFAULT_EXECUTOR_MAX_ATTEMPTS,
    DEFAULT_POLL_INTERVAL_SECONDS, DEFAULT_SCRUB_RESCHEDULE_SECONDS,
    DEFAULT_STALE_CLAIM_TIMEOUT_SECONDS,
};
use crate::state_machine::{LifecycleOperation, ResourceKind};

pub use loader::ConfigManager;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigurationError {
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;

/// Root configuration for a lifecycle worker
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub environment: Option<String>,
    pub inventory: InventoryConfig,
    pub auth: AuthConfig,
    pub poller: PollerConfig,
    pub dispatch: DispatchConfig,
    pub executor: ExecutorConfig,
    pub notifier: NotifierConfig,
    pub logging: LoggingConfig,
}

/// Inventory API connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InventoryConfig {
    /// Base URL for the inventory API (e.g., "<http://inventory:8000/api/>")
    pub base_url: String,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
    /// Maximum attempts for reads before giving up
    pub max_retries: u32,
    /// Base delay between read attempts, doubled after each retry
    pub retry_backoff_ms: u64,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/".to_string(),
            timeout_ms: 30000,
            max_retries: 3,
            retry_backoff_ms: 1000,
        }
    }
}

/// Token endpoint settings for the credential provider
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub token_url: String,
    pub username: String,
    pub password: String,
    pub token_ttl_seconds: u64,
    pub refresh_margin_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token_url: "http://localhost:8000/auth/login/".to_string(),
            username: String::new(),
            password: String::new(),
            token_ttl_seconds: 3600,
            refresh_margin_seconds: 60,
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("enabled", &self.enabled)
            .field("token_url", &self.token_url)
            .field("username", &self.username)
            .field("password", &"***")
            .field("token_ttl_seconds", &self.token_ttl_seconds)
            .field("refresh_margin_seconds", &self.refresh_margin_seconds)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PollerConfig {
    pub interval_seconds: u64,
    /// Maximum resources dispatched per kind and state in one cycle
    pub batch_size: usize,
    /// In-progress records untouched for this long are unresourced by the
    /// sweep; 0 disables the sweep
    pub stale_claim_timeout_seconds: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: DEFAULT_POLL_INTERVAL_SECONDS,
            batch_size: 50,
            stale_claim_timeout_seconds: DEFAULT_STALE_CLAIM_TIMEOUT_SECONDS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Delay before a router scrub blocked by children is retried
    pub scrub_reschedule_seconds: u64,
    /// Minimum time a resource sits in scrub queue before it is scrubbed
    pub scrub_grace_period_seconds: u64,
    /// Write accumulated errors to the record when unresourcing it
    pub report_errors_to_inventory: bool,
    /// Reference passed to executors so they can look up host credentials
    pub credentials_ref: Option<String>,
    /// Attempts at a compensating write (unresource, claim release)
    pub compensation_max_attempts: u32,
    /// Base delay between compensation attempts, doubled after each retry
    pub compensation_backoff_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            scrub_reschedule_seconds: DEFAULT_SCRUB_RESCHEDULE_SECONDS,
            scrub_grace_period_seconds: 0,
            report_errors_to_inventory: true,
            credentials_ref: None,
            compensation_max_attempts: DEFAULT_COMPENSATION_MAX_ATTEMPTS,
            compensation_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub command_timeout_seconds: u64,
    pub ssh: SshSettings,
    /// One SSH command executor per entry
    pub platforms: Vec<PlatformConfig>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_EXECUTOR_MAX_ATTEMPTS,
            initial_backoff_ms: 2000,
            max_backoff_ms: 30000,
            command_timeout_seconds: 300,
            ssh: SshSettings::default(),
            platforms: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SshSettings {
    pub user: Option<String>,
    pub port: Option<u16>,
    pub identity_file: Option<PathBuf>,
    pub extra_args: Vec<String>,
}

/// Command plan for one `(kind, platform)` pair.
///
/// ```toml
/// [[executor.platforms]]
/// kind = "virtual_machine"
/// platform = "kvm"
/// retryable_markers = ["Connection refused"]
/// [executor.platforms.commands]
/// build = ["vm-build {id} {image_filename}"]
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub kind: String,
    pub platform: String,
    /// Operation name to the commands run for it, in order
    pub commands: HashMap<String, Vec<String>>,
    pub retryable_markers: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Optional webhook receiving a JSON body per notification
    pub webhook_url: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when RUST_LOG is unset; falls back to a level
    /// derived from the environment
    pub level: Option<String>,
    pub json: bool,
}

impl LifecycleConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.inventory.base_url.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "inventory.base_url",
                "must not be empty",
            ));
        }
        if self.inventory.max_retries == 0 {
            return Err(ConfigurationError::invalid_value(
                "inventory.max_retries",
                "must be at least 1",
            ));
        }
        if self.poller.interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "poller.interval_seconds",
                "must be greater than zero",
            ));
        }
        if self.dispatch.compensation_max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "dispatch.compensation_max_attempts",
                "must be at least 1",
            ));
        }
        if self.executor.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "executor.max_attempts",
                "must be at least 1",
            ));
        }
        if self.auth.enabled && self.auth.username.is_empty() {
            return Err(ConfigurationError::invalid_value(
                "auth.username",
                "required when auth is enabled",
            ));
        }
        for (index, platform) in self.executor.platforms.iter().enumerate() {
            let field = format!("executor.platforms[{index}]");
            platform
                .kind
                .parse::<ResourceKind>()
                .map_err(|e| ConfigurationError::invalid_value(format!("{field}.kind"), e))?;
            if platform.platform.trim().is_empty() {
                return Err(ConfigurationError::invalid_value(
                    format!("{field}.platform"),
                    "must not be empty",
                ));
            }
            for operation in platform.commands.keys() {
                operation.parse::<LifecycleOperation>().map_err(|e| {
                    ConfigurationError::invalid_value(format!("{field}.commands"), e)
                })?;
            }
        }
        Ok(())
    }

    /// JSON view with secrets masked, safe to log
    pub fn sanitized(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let Some(password) = value.pointer_mut("/auth/password") {
            if password.as_str().is_some_and(|p| !p.is_empty()) {
                *password = serde_json::Value::String("***".to_string());
            }
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = LifecycleConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dispatch.scrub_reschedule_seconds, 60);
        assert_eq!(config.executor.max_attempts, 10);
        assert_eq!(config.dispatch.compensation_max_attempts, 5);
        assert_eq!(config.poller.stale_claim_timeout_seconds, 3600);
    }

    #[test]
    fn test_validation_rejects_zero_compensation_attempts() {
        let mut config = LifecycleConfig::default();
        config.dispatch.compensation_max_attempts = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("dispatch.compensation_max_attempts"));
    }

    #[test]
    fn test_validation_rejects_zero_interval() {
        let mut config = LifecycleConfig::default();
        config.poller.interval_seconds = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("poller.interval_seconds"));
    }

    #[test]
    fn test_validation_rejects_unknown_platform_operation() {
        let mut config = LifecycleConfig::default();
        config.executor.platforms.push(PlatformConfig {
            kind: "vm".to_string(),
            platform: "kvm".to_string(),
            commands: HashMap::from([("reboot".to_string(), vec!["virsh reboot {id}".to_string()])]),
            retryable_markers: Vec::new(),
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("executor.platforms[0].commands"));

        config.executor.platforms[0].commands =
            HashMap::from([("restart".to_string(), vec!["virsh reboot {id}".to_string()])]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_password_is_masked() {
        let mut config = LifecycleConfig::default();
        config.auth.password = "hunter2".to_string();

        assert!(!format!("{:?}", config.auth).contains("hunter2"));
        let sanitized = config.sanitized();
        assert_eq!(sanitized["auth"]["password"], "***");
    }
}
