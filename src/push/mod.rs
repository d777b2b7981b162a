//! Push notification delivery
//!
//! Out-of-band webhook callbacks for task events when no live stream is
//! attached. Delivery is best-effort and at-least-once: failures are retried
//! with bounded exponential backoff on an independent timer and eventually
//! dropped with a log line, never affecting task progress.

pub mod manager;

pub use manager::PushNotificationManager;
