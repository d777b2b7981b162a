//! Task Protocol Engine
//!
//! A stateful task subsystem speaking a JSON-RPC 2.0 protocol: create and
//! advance tasks through a fixed state machine, stream lifecycle events to
//! subscribers, and push them to registered webhooks. Task content is
//! produced by a pluggable [`executor::WorkExecutor`]; the engine owns
//! identity, state transitions, artifact assembly, history, and fan-out.

pub mod a2a;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod events;
pub mod executor;
pub mod push;
pub mod task;

pub use config::{EngineConfig, PushRetryPolicy};
pub use dispatcher::{Dispatch, Dispatcher, EventStream};
pub use errors::{EngineError, EngineResult};
pub use events::{EventBus, InMemoryEventBus};
pub use executor::{TaskContext, TaskUpdater, WorkExecutor};
pub use push::PushNotificationManager;
pub use task::{InMemoryTaskStore, TaskManager, TaskStore};
