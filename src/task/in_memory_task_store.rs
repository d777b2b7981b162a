use crate::errors::{EngineError, EngineResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::task_store::TaskStore;
use crate::a2a::{Artifact, Message, Task, TaskStatus};

/// In-memory implementation of TaskStore.
///
/// Thread-safe via a single RwLock over the task map: reads take snapshots,
/// writes are serialized, so concurrent writers to the same task cannot
/// interleave. Suitable for single-process deployments and testing; a
/// database-backed implementation should replace it for durable state.
pub struct InMemoryTaskStore {
    tasks: Arc<RwLock<HashMap<String, Task>>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Clear all tasks. Primarily used for testing.
    pub async fn clear(&self) {
        let mut tasks = self.tasks.write().await;
        tasks.clear();
    }

    /// Number of tasks currently stored.
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get_task(&self, task_id: &str) -> EngineResult<Option<Task>> {
        let tasks = self.tasks.read().await;
        Ok(tasks.get(task_id).cloned())
    }

    async fn create_task(&self, task: &Task) -> EngineResult<()> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(EngineError::TaskAlreadyExists {
                task_id: task.id.clone(),
            });
        }
        tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn delete_task(&self, task_id: &str) -> EngineResult<()> {
        let mut tasks = self.tasks.write().await;
        tasks.remove(task_id);
        Ok(())
    }

    async fn list_tasks(&self, session_id: Option<&str>) -> EngineResult<Vec<Task>> {
        let tasks = self.tasks.read().await;

        let mut result: Vec<Task> = match session_id {
            Some(filter) => tasks
                .values()
                .filter(|task| task.session_id.as_deref() == Some(filter))
                .cloned()
                .collect(),
            None => tasks.values().cloned().collect(),
        };

        result.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(result)
    }

    async fn task_exists(&self, task_id: &str) -> EngineResult<bool> {
        let tasks = self.tasks.read().await;
        Ok(tasks.contains_key(task_id))
    }

    async fn append_message(&self, task_id: &str, message: Message) -> EngineResult<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| EngineError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;

        task.history.push(message);
        Ok(())
    }

    async fn append_artifact(&self, task_id: &str, artifact: Artifact) -> EngineResult<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| EngineError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;

        match task.artifacts.iter_mut().find(|a| a.index == artifact.index) {
            Some(existing) => {
                if existing.last_chunk == Some(true) {
                    tracing::error!(
                        task_id = %task_id,
                        index = artifact.index,
                        "artifact update received for an index already closed by lastChunk"
                    );
                    return Err(EngineError::InvalidParams {
                        reason: format!(
                            "artifact index {} is already complete",
                            artifact.index
                        ),
                    });
                }

                if artifact.append == Some(true) {
                    existing.parts.extend(artifact.parts);
                    if artifact.name.is_some() {
                        existing.name = artifact.name;
                    }
                    if artifact.description.is_some() {
                        existing.description = artifact.description;
                    }
                    if artifact.last_chunk.is_some() {
                        existing.last_chunk = artifact.last_chunk;
                    }
                } else {
                    *existing = artifact;
                }
            }
            None => task.artifacts.push(artifact),
        }
        Ok(())
    }

    async fn update_status(&self, task_id: &str, status: TaskStatus) -> EngineResult<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| EngineError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;

        if !task.status.state.can_transition_to(status.state) {
            tracing::error!(
                task_id = %task_id,
                from = %task.status.state,
                to = %status.state,
                "rejected illegal task state transition"
            );
            return Err(EngineError::InvalidTaskStateTransition {
                from: task.status.state.to_string(),
                to: status.state.to_string(),
            });
        }

        // A status message is part of the exchange; keep it in history so a
        // later tasks/get can see it.
        if let Some(message) = &status.message {
            task.history.push(message.clone());
        }

        task.status = status;
        Ok(())
    }
}
