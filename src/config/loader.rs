//! Configuration Loader
//!
//! Layers, lowest precedence first: built-in defaults, an optional TOML file,
//! then `LIFECYCLE__SECTION__KEY` environment variables.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::{ConfigResult, LifecycleConfig};

pub const ENV_PREFIX: &str = "LIFECYCLE";
pub const ENV_SEPARATOR: &str = "__";
pub const CONFIG_PATH_ENV: &str = "LIFECYCLE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/lifecycle.toml";

/// Loaded configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: LifecycleConfig,
    environment: String,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection.
    ///
    /// An explicit `path` must exist. Without one, `LIFECYCLE_CONFIG` is
    /// consulted, then `config/lifecycle.toml` is used if present.
    pub fn load(path: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let explicit = path.or_else(|| env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from));
        let config_path = match explicit {
            Some(path) => Some(path),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_PATH);
                default.exists().then_some(default)
            }
        };

        let env_source = config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true);

        Self::load_from(config_path.as_deref(), env_source, &Self::detect_environment())
    }

    /// Load from an explicit file and environment source.
    ///
    /// Tests pass an `Environment` built with `.source(Some(map))` so they do
    /// not have to touch process-wide variables.
    pub fn load_from(
        config_path: Option<&Path>,
        env_source: config::Environment,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let mut builder = config::Config::builder();
        if let Some(path) = config_path {
            debug!("Loading configuration file: {}", path.display());
            builder = builder.add_source(config::File::from(path.to_path_buf()).required(true));
        }
        builder = builder.add_source(env_source);

        let mut config: LifecycleConfig = builder.build()?.try_deserialize()?;
        if config.environment.is_none() {
            config.environment = Some(environment.to_string());
        }

        config.validate()?;

        debug!(
            "Configuration loaded successfully: {}",
            serde_json::to_string_pretty(&config.sanitized())
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );
        info!(
            environment = environment,
            inventory_url = %config.inventory.base_url,
            poll_interval_seconds = config.poller.interval_seconds,
            config_file = ?config_path.map(|p| p.display().to_string()),
            "Configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_path: config_path.map(Path::to_path_buf),
        }))
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Configuration with secrets masked, for logs and `validate-config`
    pub fn debug_config(&self) -> serde_json::Value {
        self.config.sanitized()
    }

    /// Current environment from environment variables
    pub fn detect_environment() -> String {
        env::var("LIFECYCLE_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }
}
