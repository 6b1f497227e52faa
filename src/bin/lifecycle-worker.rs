//! # Lifecycle Worker
//!
//! Runs the poller against the inventory API, dispatches a single operation
//! by hand, or checks a configuration file.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use fleet_lifecycle::config::LifecycleConfig;
use fleet_lifecycle::credentials::{CachedTokenProvider, CredentialProvider, HttpTokenSource};
use fleet_lifecycle::executor::ExecutorRegistry;
use fleet_lifecycle::inventory::{HttpInventoryClient, InventoryClient};
use fleet_lifecycle::logging::init_structured_logging;
use fleet_lifecycle::notifier::{CompositeNotifier, Notifier};
use fleet_lifecycle::orchestration::{InMemoryTaskQueue, Poller, TaskDispatcher, TaskQueue};
use fleet_lifecycle::{
    ConfigManager, LifecycleOperation, LifecycleResult, ResourceId, ResourceKind,
};

#[derive(Parser)]
#[command(name = "lifecycle-worker")]
#[command(about = "Drive VM, router and volume lifecycle operations from the inventory")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file (default: config/lifecycle.toml)
    #[arg(short, long, env = "LIFECYCLE_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the inventory and dispatch operations until Ctrl-C
    Run,

    /// Run one operation against one resource and print the outcome
    Dispatch {
        /// build, quiesce, scrub, restart or update
        operation: LifecycleOperation,
        /// vm, router or volume
        kind: ResourceKind,
        id: ResourceId,
    },

    /// Load and validate the configuration, then print it with secrets masked
    ValidateConfig,
}

struct Components {
    inventory: Arc<dyn InventoryClient>,
    queue: Arc<dyn TaskQueue>,
    dispatcher: Arc<TaskDispatcher>,
}

fn build_components(config: &LifecycleConfig) -> LifecycleResult<Components> {
    let credentials: Option<Arc<dyn CredentialProvider>> = if config.auth.enabled {
        let source = HttpTokenSource::new(
            &config.auth,
            Duration::from_millis(config.inventory.timeout_ms),
        )?;
        Some(Arc::new(CachedTokenProvider::from_config(source, &config.auth)))
    } else {
        None
    };

    let inventory: Arc<dyn InventoryClient> = Arc::new(HttpInventoryClient::new(
        config.inventory.clone(),
        credentials,
    )?);

    let executors = ExecutorRegistry::from_config(&config.executor)?;
    if executors.is_empty() {
        warn!("No executor platforms configured; claimed resources will be unresourced");
    }

    let notifier: Arc<dyn Notifier> = Arc::new(CompositeNotifier::from_config(&config.notifier)?);
    let queue: Arc<dyn TaskQueue> = Arc::new(InMemoryTaskQueue::new());

    let dispatcher = Arc::new(TaskDispatcher::new(
        inventory.clone(),
        Arc::new(executors),
        notifier,
        queue.clone(),
        config.dispatch.clone(),
    ));

    Ok(Components {
        inventory,
        queue,
        dispatcher,
    })
}

async fn run(config: &LifecycleConfig) -> Result<()> {
    let components = build_components(config).context("failed to build worker components")?;
    let poller = Poller::new(
        components.dispatcher,
        components.inventory,
        components.queue,
        config.poller.clone(),
        Duration::from_secs(config.dispatch.scrub_grace_period_seconds),
    );

    poller
        .run(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => {
                    error!(error = %e, "Failed to listen for shutdown signal");
                    std::future::pending::<()>().await;
                }
            }
        })
        .await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let manager = ConfigManager::load(cli.config).context("failed to load configuration")?;
    let config = manager.config();
    init_structured_logging(&config.logging);
    info!(
        environment = %manager.environment(),
        config_file = ?manager.config_path(),
        "Starting lifecycle-worker"
    );

    match cli.command {
        Commands::Run => run(config).await,
        Commands::Dispatch {
            operation,
            kind,
            id,
        } => {
            let components =
                build_components(config).context("failed to build worker components")?;
            let outcome = components.dispatcher.dispatch(operation, kind, id).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        Commands::ValidateConfig => {
            println!("{}", serde_json::to_string_pretty(&manager.debug_config())?);
            Ok(())
        }
    }
}
