use std::collections::HashMap;

use reqwest::Client;
use tokio::sync::RwLock;

use crate::a2a::{PushNotificationConfig, TaskPushNotificationConfig, TaskUpdateEvent};
use crate::config::PushRetryPolicy;
use crate::errors::{EngineError, EngineResult};

/// Header carrying the caller-provided verification token on each callback.
const NOTIFICATION_TOKEN_HEADER: &str = "X-A2A-Notification-Token";

/// Registry of per-task webhook configurations plus the delivery path.
///
/// Holds no task state beyond ids: it receives read-only events from the
/// store and posts them to the registered endpoint. No store lock is ever
/// held during network I/O; deliveries run on their own spawned timers.
pub struct PushNotificationManager {
    enabled: bool,
    configs: RwLock<HashMap<String, PushNotificationConfig>>,
    client: Client,
    retry: PushRetryPolicy,
}

impl PushNotificationManager {
    pub fn new(enabled: bool, retry: PushRetryPolicy) -> Self {
        Self {
            enabled,
            configs: RwLock::new(HashMap::new()),
            client: Client::new(),
            retry,
        }
    }

    /// Whether the deployment has this feature enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Store or replace the webhook configuration for a task.
    pub async fn set_config(
        &self,
        task_id: &str,
        config: PushNotificationConfig,
    ) -> EngineResult<TaskPushNotificationConfig> {
        if !self.enabled {
            return Err(EngineError::PushNotificationNotSupported);
        }

        let mut configs = self.configs.write().await;
        configs.insert(task_id.to_string(), config.clone());

        Ok(TaskPushNotificationConfig {
            id: task_id.to_string(),
            push_notification_config: config,
        })
    }

    /// Retrieve the webhook configuration for a task.
    pub async fn get_config(&self, task_id: &str) -> EngineResult<TaskPushNotificationConfig> {
        if !self.enabled {
            return Err(EngineError::PushNotificationNotSupported);
        }

        let configs = self.configs.read().await;
        let config = configs
            .get(task_id)
            .cloned()
            .ok_or_else(|| EngineError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;

        Ok(TaskPushNotificationConfig {
            id: task_id.to_string(),
            push_notification_config: config,
        })
    }

    /// Drop the configuration for a task, e.g. once it reaches a terminal
    /// state and its final event has been dispatched.
    pub async fn remove_config(&self, task_id: &str) {
        let mut configs = self.configs.write().await;
        configs.remove(task_id);
    }

    /// Deliver `event` to the task's registered endpoint, if any.
    ///
    /// Fire-and-forget: the delivery attempt (and its retries) run on a
    /// spawned timer so the caller is never blocked by network I/O.
    pub async fn notify(&self, event: &TaskUpdateEvent) {
        if !self.enabled {
            return;
        }

        let config = {
            let configs = self.configs.read().await;
            configs.get(event.task_id()).cloned()
        };
        let Some(config) = config else {
            return;
        };

        let body = match serde_json::to_value(event) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(task_id = %event.task_id(), error = %e, "failed to serialize push notification payload");
                return;
            }
        };

        let client = self.client.clone();
        let retry = self.retry.clone();
        let task_id = event.task_id().to_string();
        tokio::spawn(async move {
            deliver_with_backoff(client, config, body, retry, task_id).await;
        });
    }
}

/// At-least-once delivery attempt with bounded exponential backoff.
/// Exhausted retries are logged and the event is dropped.
async fn deliver_with_backoff(
    client: Client,
    config: PushNotificationConfig,
    body: serde_json::Value,
    retry: PushRetryPolicy,
    task_id: String,
) {
    let mut delay = retry.base_delay;

    for attempt in 1..=retry.max_attempts {
        let mut request = client.post(&config.url).json(&body);

        if let Some(token) = &config.token {
            request = request.header(NOTIFICATION_TOKEN_HEADER, token);
        }
        if let Some(auth) = &config.authentication {
            if let Some(credentials) = &auth.credentials {
                request = request.bearer_auth(credentials);
            }
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(task_id = %task_id, url = %config.url, attempt, "push notification delivered");
                return;
            }
            Ok(response) => {
                tracing::warn!(
                    task_id = %task_id,
                    url = %config.url,
                    attempt,
                    status = %response.status(),
                    "push notification rejected by endpoint"
                );
            }
            Err(e) => {
                tracing::warn!(
                    task_id = %task_id,
                    url = %config.url,
                    attempt,
                    error = %e,
                    "push notification delivery failed"
                );
            }
        }

        if attempt < retry.max_attempts {
            tokio::time::sleep(delay).await;
            delay = delay.saturating_mul(2);
        }
    }

    tracing::error!(
        task_id = %task_id,
        url = %config.url,
        attempts = retry.max_attempts,
        "push notification dropped after exhausting retries"
    );
}
