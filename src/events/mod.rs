//! Streaming event distribution
//!
//! Turns task mutations into ordered, per-task event feeds. Each subscriber
//! gets its own bounded channel so a slow consumer can only lose its own
//! events, never stall the task or other subscribers. Overflow drops the
//! event currently being published for that subscriber; a final status
//! event additionally tears down the task's subscriptions, so a stream
//! that lost the final event to overflow still terminates through channel
//! closure rather than hanging.

pub mod event_bus;

pub use event_bus::{EventBus, InMemoryEventBus};
