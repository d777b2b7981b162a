//! Task Lifecycle Management
//!
//! Core task state for the engine:
//!
//! - `TaskStore`: storage abstraction that owns task identity and enforces
//!   the state-transition and artifact-chunk invariants
//! - `InMemoryTaskStore`: in-memory implementation for single-process use
//! - `TaskManager`: lifecycle orchestration, per-task write serialization,
//!   and event fan-out to the streaming and push subsystems

pub mod in_memory_task_store;
pub mod task_manager;
pub mod task_store;

pub use in_memory_task_store::InMemoryTaskStore;
pub use task_manager::TaskManager;
pub use task_store::TaskStore;
