//! Engine configuration types
//!
//! Runtime knobs for the engine: the capability flags read from the
//! deployment's agent card, the per-subscriber stream buffer, and the push
//! delivery retry policy.

use crate::a2a::{AgentCapabilities, AgentCard};
use std::time::Duration;

/// Retry policy for push notification delivery.
#[derive(Debug, Clone)]
pub struct PushRetryPolicy {
    /// Total delivery attempts before the event is dropped.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each failure.
    pub base_delay: Duration,
}

impl Default for PushRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Configuration for engine behavior
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Capability flags gating streaming and push notification methods
    pub capabilities: AgentCapabilities,
    /// Per-subscriber event channel capacity; events beyond it are dropped
    /// for that subscriber rather than stalling the task
    pub stream_buffer: usize,
    /// Push notification delivery retry policy
    pub push_retry: PushRetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            capabilities: AgentCapabilities::default(),
            stream_buffer: 256,
            push_retry: PushRetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Adopt the capability flags of an agent card
    pub fn from_card(card: &AgentCard) -> Self {
        Self::default().with_capabilities(card.capabilities.clone())
    }

    pub fn with_capabilities(mut self, capabilities: AgentCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_stream_buffer(mut self, stream_buffer: usize) -> Self {
        self.stream_buffer = stream_buffer;
        self
    }

    pub fn with_push_retry(mut self, push_retry: PushRetryPolicy) -> Self {
        self.push_retry = push_retry;
        self
    }
}
