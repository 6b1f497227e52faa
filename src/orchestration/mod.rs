//! # Orchestration
//!
//! The runtime half of the crate: the dispatcher that carries one operation
//! through claim, execution and finalization, the attribute resolver it feeds
//! executors from, the delayed task queue and the poller that drives it all.
//!
//! ## Core Components
//!
//! - **TaskDispatcher**: one operation against one resource, start to finish
//! - **AttributeResolver**: host, image, network and storage details for executors
//! - **TaskQueue**: delayed re-dispatch (router scrubs waiting on children, failed scrubs)
//! - **Poller**: periodic discovery of request states plus queue draining

pub mod attributes;
pub mod dispatcher;
pub mod poller;
pub mod task_queue;

pub use attributes::{AttributeError, AttributeResolver};
pub use dispatcher::{DeferReason, DispatchOutcome, SkipReason, TaskDispatcher};
pub use poller::{CycleSummary, Poller, PollerStats};
pub use task_queue::{InMemoryTaskQueue, QueueError, QueuedTask, TaskQueue};
