use crate::a2a::TaskUpdateEvent;
use crate::errors::EngineResult;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// EventBus trait for streaming task update events to subscribers.
/// Provides per-task publish/subscribe for real-time event distribution.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event to all subscribers of its task.
    async fn publish(&self, event: TaskUpdateEvent) -> EngineResult<()>;

    /// Subscribe to events for one task id.
    /// Returns a receiver that sees every subsequent event for that task
    /// exactly once, in publication order.
    async fn subscribe(&self, task_id: &str) -> EngineResult<mpsc::Receiver<TaskUpdateEvent>>;

    /// Number of live subscribers attached to a task. The push subsystem
    /// uses this to decide whether an out-of-band delivery is needed.
    async fn subscriber_count(&self, task_id: &str) -> usize;
}

/// Subscription handle for one attached consumer
#[derive(Debug)]
struct Subscription {
    id: String,
    task_id: String,
    sender: mpsc::Sender<TaskUpdateEvent>,
}

/// In-memory EventBus implementation using tokio channels.
/// Suitable for single-process deployments.
pub struct InMemoryEventBus {
    subscribers: Arc<tokio::sync::RwLock<Vec<Subscription>>>,
    buffer: usize,
}

impl InMemoryEventBus {
    /// Create a new in-memory event bus with the given per-subscriber
    /// channel capacity.
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: Arc::new(tokio::sync::RwLock::new(Vec::new())),
            buffer,
        }
    }

    /// Clean up closed subscribers
    async fn cleanup_closed_subscribers(&self) {
        let mut subscribers = self.subscribers.write().await;
        subscribers.retain(|sub| !sub.sender.is_closed());
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: TaskUpdateEvent) -> EngineResult<()> {
        self.cleanup_closed_subscribers().await;

        {
            let subscribers = self.subscribers.read().await;
            for subscription in subscribers.iter() {
                if subscription.task_id != event.task_id() {
                    continue;
                }
                // try_send so a slow subscriber never stalls the task or
                // other subscribers: the event being published is dropped
                // for that subscriber only.
                if subscription.sender.try_send(event.clone()).is_err() {
                    tracing::warn!(
                        subscription = %subscription.id,
                        task_id = %subscription.task_id,
                        "subscriber channel full or closed, dropping event for it"
                    );
                }
            }
        }

        // A final status event ends the task's streams. Dropping the senders
        // closes each subscriber channel once its buffered events drain, so
        // a subscriber whose full buffer lost the final event still sees
        // end-of-stream instead of waiting forever.
        if event.is_final() {
            let mut subscribers = self.subscribers.write().await;
            subscribers.retain(|sub| sub.task_id != event.task_id());
        }

        Ok(())
    }

    async fn subscribe(&self, task_id: &str) -> EngineResult<mpsc::Receiver<TaskUpdateEvent>> {
        self.cleanup_closed_subscribers().await;

        let (sender, receiver) = mpsc::channel(self.buffer);
        let subscription = Subscription {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            sender,
        };

        let mut subscribers = self.subscribers.write().await;
        subscribers.push(subscription);

        Ok(receiver)
    }

    async fn subscriber_count(&self, task_id: &str) -> usize {
        self.cleanup_closed_subscribers().await;
        let subscribers = self.subscribers.read().await;
        subscribers
            .iter()
            .filter(|sub| sub.task_id == task_id)
            .count()
    }
}
