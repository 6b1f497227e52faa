#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Fleet Lifecycle
//!
//! State-machine-driven lifecycle dispatcher for virtual machines, virtual
//! routers and storage volumes.
//!
//! ## Overview
//!
//! Users ask for work by moving a resource into a request state in the
//! inventory API (build requested, quiesce, restart, scrub, update). A poller
//! finds those resources and hands each to the dispatcher, which claims the
//! resource with a conditional write, checks its dependencies, resolves the
//! details an executor needs, runs the platform-specific executor and writes
//! the resulting state back. Every operation ends in a stable state, in
//! `Unresourced` with the collected errors, or (for scrub) with the record
//! deleted.
//!
//! ## Module Organization
//!
//! - [`state_machine`] - States, operations and the transition table
//! - [`models`] - Inventory records, resources and per-task context
//! - [`inventory`] - Inventory API client (HTTP and in-memory)
//! - [`credentials`] - Tokens for the inventory API
//! - [`dependency`] - Cross-resource readiness checks
//! - [`executor`] - Executor trait, registry and the SSH command executor
//! - [`notifier`] - Success/failure notifications
//! - [`orchestration`] - Dispatcher, attribute resolver, task queue and poller
//! - [`config`] - Layered configuration
//! - [`logging`] / [`metrics`] - Observability
//! - [`error`] - Crate-level error type
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fleet_lifecycle::executor::ExecutorRegistry;
//! use fleet_lifecycle::inventory::{InMemoryInventory, InventoryClient};
//! use fleet_lifecycle::notifier::LogNotifier;
//! use fleet_lifecycle::orchestration::{InMemoryTaskQueue, TaskDispatcher};
//! use fleet_lifecycle::config::DispatchConfig;
//! use fleet_lifecycle::state_machine::ResourceKind;
//!
//! # async fn example() {
//! let inventory: Arc<dyn InventoryClient> = Arc::new(InMemoryInventory::new());
//! let dispatcher = TaskDispatcher::new(
//!     inventory,
//!     Arc::new(ExecutorRegistry::new()),
//!     Arc::new(LogNotifier),
//!     Arc::new(InMemoryTaskQueue::new()),
//!     DispatchConfig::default(),
//! );
//!
//! let outcome = dispatcher.dispatch_build(ResourceKind::VirtualMachine, 42).await;
//! println!("build finished: {}", outcome.status());
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod credentials;
pub mod dependency;
pub mod error;
pub mod executor;
pub mod inventory;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod notifier;
pub mod orchestration;
pub mod state_machine;

pub use config::{ConfigManager, ConfigurationError, LifecycleConfig};
pub use error::{LifecycleError, LifecycleResult};
pub use executor::{ExecutionOutcome, ExecutorAdapter, ExecutorRegistry};
pub use inventory::{InventoryClient, InventoryError};
pub use models::{Resource, ResourceId, TaskContext};
pub use notifier::Notifier;
pub use orchestration::{DispatchOutcome, Poller, TaskDispatcher};
pub use state_machine::{LifecycleOperation, ResourceKind, ResourceState};
