pub mod resource;
pub mod task_context;

// Re-export core models for easy access
pub use resource::{fields, InventoryRecord, RecordType, Resource, ResourceId};
pub use task_context::{DependencySnapshot, ResourceAttributes, TaskContext};
