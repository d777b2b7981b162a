use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

use super::task_store::TaskStore;
use crate::a2a::{
    Artifact, Message, Task, TaskArtifactUpdateEvent, TaskSendParams, TaskState, TaskStatus,
    TaskStatusUpdateEvent, TaskUpdateEvent,
};
use crate::config::EngineConfig;
use crate::errors::{EngineError, EngineResult};
use crate::events::{EventBus, InMemoryEventBus};
use crate::executor::{TaskContext, TaskUpdater, WorkExecutor};
use crate::push::PushNotificationManager;

/// Task lifecycle orchestration.
///
/// Owns the store, the event bus, and the push subsystem; every mutation of
/// a task flows through here so that:
/// - writers to one task are serialized (per-task writer lock),
/// - each successful mutation publishes exactly one event, in mutation
///   order, to the streaming and push subsystems,
/// - work execution is handed off fire-and-forget, with progress pushed
///   back asynchronously through a `TaskUpdater`.
pub struct TaskManager {
    store: Arc<dyn TaskStore>,
    bus: Arc<dyn EventBus>,
    push: Arc<PushNotificationManager>,
    executor: Arc<dyn WorkExecutor>,
    config: EngineConfig,
    /// Per-task writer serialization. Mutation plus event publication happen
    /// under the task's lock so per-task event order equals mutation order.
    writer_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Cooperative cancellation signals for running executors.
    cancel_signals: Mutex<HashMap<String, watch::Sender<bool>>>,
}

impl TaskManager {
    pub fn new(
        store: Arc<dyn TaskStore>,
        executor: Arc<dyn WorkExecutor>,
        config: EngineConfig,
    ) -> Arc<Self> {
        let bus = Arc::new(InMemoryEventBus::new(config.stream_buffer));
        let push = Arc::new(PushNotificationManager::new(
            config.capabilities.push_notifications,
            config.push_retry.clone(),
        ));

        Arc::new(Self {
            store,
            bus,
            push,
            executor,
            config,
            writer_locks: Mutex::new(HashMap::new()),
            cancel_signals: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    pub fn push_notifications(&self) -> &Arc<PushNotificationManager> {
        &self.push
    }

    async fn writer_lock(&self, task_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.writer_locks.lock().await;
        locks
            .entry(task_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Create a task or deliver input to an existing one.
    ///
    /// An unseen id creates the task in `submitted` state, records the
    /// message, and hands off to the work executor. A known id appends the
    /// message as input delivery; if the task was waiting in
    /// `input-required` it transitions back to `working` and execution
    /// resumes.
    pub async fn send(self: &Arc<Self>, params: TaskSendParams) -> EngineResult<Task> {
        if params.message.parts.is_empty() {
            return Err(EngineError::InvalidParams {
                reason: "message must contain at least one part".to_string(),
            });
        }

        if let Some(push_config) = &params.push_notification {
            self.push.set_config(&params.id, push_config.clone()).await?;
        }

        let lock = self.writer_lock(&params.id).await;
        let _guard = lock.lock().await;

        let task = match self.store.get_task(&params.id).await? {
            None => {
                let task = Task {
                    id: params.id.clone(),
                    session_id: params.session_id.clone(),
                    status: TaskStatus::new(TaskState::Submitted),
                    artifacts: Vec::new(),
                    history: vec![params.message.clone()],
                    metadata: params.metadata.clone(),
                };
                self.store.create_task(&task).await?;

                self.publish(TaskUpdateEvent::Status(TaskStatusUpdateEvent {
                    id: task.id.clone(),
                    status: task.status.clone(),
                    is_final: false,
                    metadata: None,
                }))
                .await;

                self.spawn_executor(task.clone()).await;
                task
            }
            Some(existing) => {
                if existing.status.state.is_terminal() {
                    return Err(EngineError::InvalidParams {
                        reason: format!(
                            "task {} is already {} and accepts no further input",
                            existing.id, existing.status.state
                        ),
                    });
                }

                self.store
                    .append_message(&params.id, params.message.clone())
                    .await?;

                if existing.status.state == TaskState::InputRequired {
                    self.status_update_locked(&params.id, TaskStatus::new(TaskState::Working))
                        .await?;
                    let resumed = self.snapshot(&params.id).await?;
                    self.spawn_executor(resumed).await;
                }

                self.snapshot(&params.id).await?
            }
        };

        Ok(truncate_history(task, params.history_length))
    }

    /// Read a task snapshot, bounding `history` to the newest
    /// `history_length` messages when requested.
    pub async fn get(&self, task_id: &str, history_length: Option<u32>) -> EngineResult<Task> {
        let task = self.snapshot(task_id).await?;
        Ok(truncate_history(task, history_length))
    }

    /// Request cooperative cancellation and mark the task canceled.
    ///
    /// A task already in a terminal state cannot be canceled; the request
    /// fails instead of being silently ignored.
    pub async fn cancel(&self, task_id: &str) -> EngineResult<Task> {
        let lock = self.writer_lock(task_id).await;
        let _guard = lock.lock().await;

        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| EngineError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;

        if task.status.state.is_terminal() {
            return Err(EngineError::TaskNotCancelable {
                task_id: task_id.to_string(),
                state: task.status.state.to_string(),
            });
        }

        {
            let signals = self.cancel_signals.lock().await;
            if let Some(signal) = signals.get(task_id) {
                // Receiver may already be gone if the executor returned.
                let _ = signal.send(true);
            }
        }

        self.status_update_locked(task_id, TaskStatus::new(TaskState::Canceled))
            .await?;

        self.snapshot(task_id).await
    }

    /// Apply a status transition reported by the work executor.
    ///
    /// Illegal transitions are rejected by the store, logged there, and
    /// surfaced to the executor only; they never reach the original caller
    /// or affect other tasks.
    pub(crate) async fn apply_status_update(
        &self,
        task_id: &str,
        state: TaskState,
        message: Option<Message>,
    ) -> EngineResult<TaskStatusUpdateEvent> {
        let lock = self.writer_lock(task_id).await;
        let _guard = lock.lock().await;

        let mut status = TaskStatus::new(state);
        status.message = message;
        self.status_update_locked(task_id, status).await
    }

    /// Apply an artifact chunk reported by the work executor.
    pub(crate) async fn apply_artifact_update(
        &self,
        task_id: &str,
        artifact: Artifact,
    ) -> EngineResult<TaskArtifactUpdateEvent> {
        let lock = self.writer_lock(task_id).await;
        let _guard = lock.lock().await;

        self.store.append_artifact(task_id, artifact.clone()).await?;

        let event = TaskArtifactUpdateEvent {
            id: task_id.to_string(),
            artifact,
            metadata: None,
        };
        self.publish(TaskUpdateEvent::Artifact(event.clone())).await;

        Ok(event)
    }

    /// Status mutation plus event publication; caller holds the writer lock.
    async fn status_update_locked(
        &self,
        task_id: &str,
        status: TaskStatus,
    ) -> EngineResult<TaskStatusUpdateEvent> {
        self.store.update_status(task_id, status.clone()).await?;

        let is_final = status.state.is_terminal();
        let event = TaskStatusUpdateEvent {
            id: task_id.to_string(),
            status,
            is_final,
            metadata: None,
        };
        self.publish(TaskUpdateEvent::Status(event.clone())).await;

        if is_final {
            self.cleanup_task(task_id).await;
        }

        Ok(event)
    }

    /// Fan a mutation event out: streaming subscribers always, the push
    /// endpoint only when no live stream is attached.
    async fn publish(&self, event: TaskUpdateEvent) {
        // Count before publishing: a final event tears down the task's
        // subscriptions, which must not look like "nobody was listening".
        let live_subscribers = self.bus.subscriber_count(event.task_id()).await;

        if let Err(e) = self.bus.publish(event.clone()).await {
            tracing::warn!(task_id = %event.task_id(), error = %e, "failed to publish task event");
        }

        if live_subscribers == 0 {
            self.push.notify(&event).await;
        }
    }

    async fn cleanup_task(&self, task_id: &str) {
        let mut signals = self.cancel_signals.lock().await;
        signals.remove(task_id);
        drop(signals);

        // The current writer still holds its Arc'd guard; removing the map
        // entry only stops the map from growing with finished tasks.
        let mut locks = self.writer_locks.lock().await;
        locks.remove(task_id);
        drop(locks);

        self.push.remove_config(task_id).await;
    }

    async fn snapshot(&self, task_id: &str) -> EngineResult<Task> {
        self.store
            .get_task(task_id)
            .await?
            .ok_or_else(|| EngineError::TaskNotFound {
                task_id: task_id.to_string(),
            })
    }

    /// Hand a task off to the work executor, fire-and-forget.
    async fn spawn_executor(self: &Arc<Self>, task: Task) {
        let (signal, cancel) = watch::channel(false);
        {
            let mut signals = self.cancel_signals.lock().await;
            signals.insert(task.id.clone(), signal);
        }

        let manager = Arc::clone(self);
        let executor = Arc::clone(&self.executor);
        let task_id = task.id.clone();

        tokio::spawn(async move {
            let updater = TaskUpdater::new(Arc::clone(&manager), task_id.clone());
            let context = TaskContext::new(task, updater.clone(), cancel);

            if let Err(e) = executor.execute(context).await {
                tracing::error!(task_id = %task_id, error = %e, "work executor failed");
                let message = Message::agent_text(format!("Task execution failed: {e}"));
                if let Err(update_err) = updater.fail(message).await {
                    // Expected when the task was canceled while failing.
                    tracing::warn!(
                        task_id = %task_id,
                        error = %update_err,
                        "could not record executor failure"
                    );
                }
            }
        });
    }
}

/// Bound `history` to the newest `limit` messages, dropping from the oldest
/// end.
fn truncate_history(mut task: Task, limit: Option<u32>) -> Task {
    if let Some(limit) = limit {
        let limit = limit as usize;
        if task.history.len() > limit {
            let drop = task.history.len() - limit;
            task.history.drain(..drop);
        }
    }
    task
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a2a::Part;
    use crate::task::InMemoryTaskStore;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Executor that marks the task working, emits one artifact, and
    /// completes.
    struct EchoExecutor;

    #[async_trait]
    impl WorkExecutor for EchoExecutor {
        async fn execute(&self, context: TaskContext) -> EngineResult<()> {
            let updater = context.updater();
            updater.working().await?;
            updater
                .add_artifact(Artifact {
                    name: Some("echo".to_string()),
                    description: None,
                    parts: vec![Part::Text {
                        text: "done".to_string(),
                        metadata: None,
                    }],
                    index: 0,
                    append: None,
                    last_chunk: Some(true),
                    metadata: None,
                })
                .await?;
            updater.complete(None).await
        }
    }

    /// Executor that never reports anything, leaving tasks in `submitted`.
    struct IdleExecutor;

    #[async_trait]
    impl WorkExecutor for IdleExecutor {
        async fn execute(&self, _context: TaskContext) -> EngineResult<()> {
            Ok(())
        }
    }

    /// Executor that fails outright.
    struct FailingExecutor;

    #[async_trait]
    impl WorkExecutor for FailingExecutor {
        async fn execute(&self, context: TaskContext) -> EngineResult<()> {
            context.updater().working().await?;
            Err(EngineError::Internal {
                component: "worker".to_string(),
                reason: "boom".to_string(),
            })
        }
    }

    fn manager_with(executor: Arc<dyn WorkExecutor>) -> Arc<TaskManager> {
        TaskManager::new(
            Arc::new(InMemoryTaskStore::new()),
            executor,
            EngineConfig::default(),
        )
    }

    fn send_params(id: &str, text: &str) -> TaskSendParams {
        TaskSendParams {
            id: id.to_string(),
            session_id: None,
            message: Message::user_text(text),
            push_notification: None,
            history_length: None,
            metadata: None,
        }
    }

    async fn wait_for_state(manager: &TaskManager, task_id: &str, state: TaskState) -> Task {
        for _ in 0..100 {
            let task = manager.get(task_id, None).await.unwrap();
            if task.status.state == state {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {task_id} never reached {state}");
    }

    #[tokio::test]
    async fn test_send_creates_submitted_task_with_history() {
        let manager = manager_with(Arc::new(IdleExecutor));
        let task = manager.send(send_params("t1", "hi")).await.unwrap();

        assert_eq!(task.id, "t1");
        assert_eq!(task.status.state, TaskState::Submitted);
        assert_eq!(task.history.len(), 1);
        assert_eq!(task.history[0], Message::user_text("hi"));
    }

    #[tokio::test]
    async fn test_send_rejects_empty_message() {
        let manager = manager_with(Arc::new(IdleExecutor));
        let mut params = send_params("t1", "hi");
        params.message.parts.clear();

        let err = manager.send(params).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidParams { .. }));
    }

    #[tokio::test]
    async fn test_lifecycle_runs_to_completed() {
        let manager = manager_with(Arc::new(EchoExecutor));
        manager.send(send_params("t1", "hi")).await.unwrap();

        let task = wait_for_state(&manager, "t1", TaskState::Completed).await;
        assert_eq!(task.artifacts.len(), 1);
        assert_eq!(task.artifacts[0].last_chunk, Some(true));
    }

    #[tokio::test]
    async fn test_terminal_task_releases_bookkeeping() {
        let manager = manager_with(Arc::new(EchoExecutor));
        manager.send(send_params("t1", "hi")).await.unwrap();
        wait_for_state(&manager, "t1", TaskState::Completed).await;

        // Cleanup runs right after the final event; give the executor's
        // writer a moment to finish.
        for _ in 0..100 {
            let locks = manager.writer_locks.lock().await;
            let signals = manager.cancel_signals.lock().await;
            if !locks.contains_key("t1") && !signals.contains_key("t1") {
                return;
            }
            drop(signals);
            drop(locks);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("writer lock or cancel signal for t1 was never released");
    }

    #[tokio::test]
    async fn test_executor_failure_becomes_failed_status() {
        let manager = manager_with(Arc::new(FailingExecutor));
        // The send itself succeeds; the failure is a task transition.
        manager.send(send_params("t1", "hi")).await.unwrap();

        let task = wait_for_state(&manager, "t1", TaskState::Failed).await;
        let status_message = task.status.message.expect("failed status carries a message");
        assert!(matches!(
            &status_message.parts[0],
            Part::Text { text, .. } if text.contains("failed")
        ));
    }

    #[tokio::test]
    async fn test_get_unknown_task() {
        let manager = manager_with(Arc::new(IdleExecutor));
        let err = manager.get("missing", None).await.unwrap_err();
        assert!(matches!(err, EngineError::TaskNotFound { .. }));
    }

    #[tokio::test]
    async fn test_history_truncation_keeps_newest() {
        let manager = manager_with(Arc::new(IdleExecutor));
        manager.send(send_params("t1", "first")).await.unwrap();
        manager.send(send_params("t1", "second")).await.unwrap();
        manager.send(send_params("t1", "third")).await.unwrap();

        let task = manager.get("t1", Some(2)).await.unwrap();
        assert_eq!(task.history.len(), 2);
        // Oldest end is dropped, newest kept.
        assert_eq!(task.history[0], Message::user_text("second"));
        assert_eq!(task.history[1], Message::user_text("third"));

        // Zero keeps nothing; absence keeps everything.
        let task = manager.get("t1", Some(0)).await.unwrap();
        assert!(task.history.is_empty());
        let task = manager.get("t1", None).await.unwrap();
        assert_eq!(task.history.len(), 3);
    }

    #[tokio::test]
    async fn test_send_to_existing_task_appends_input() {
        let manager = manager_with(Arc::new(IdleExecutor));
        manager.send(send_params("t1", "first")).await.unwrap();
        let task = manager.send(send_params("t1", "more input")).await.unwrap();

        // Same identity, not a new task.
        assert_eq!(task.history.len(), 2);
        assert_eq!(task.status.state, TaskState::Submitted);
    }

    #[tokio::test]
    async fn test_input_required_resumes_to_working() {
        let manager = manager_with(Arc::new(IdleExecutor));
        manager.send(send_params("t1", "hi")).await.unwrap();

        manager
            .apply_status_update("t1", TaskState::Working, None)
            .await
            .unwrap();
        manager
            .apply_status_update(
                "t1",
                TaskState::InputRequired,
                Some(Message::agent_text("which city?")),
            )
            .await
            .unwrap();

        let task = manager.send(send_params("t1", "tokyo")).await.unwrap();
        assert_eq!(task.status.state, TaskState::Working);
        // History holds: user hi, agent question, user answer.
        assert_eq!(task.history.len(), 3);
    }

    #[tokio::test]
    async fn test_send_to_terminal_task_fails() {
        let manager = manager_with(Arc::new(EchoExecutor));
        manager.send(send_params("t1", "hi")).await.unwrap();
        wait_for_state(&manager, "t1", TaskState::Completed).await;

        let err = manager.send(send_params("t1", "again")).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidParams { .. }));
    }

    #[tokio::test]
    async fn test_cancel_nonterminal_task() {
        let manager = manager_with(Arc::new(IdleExecutor));
        manager.send(send_params("t1", "hi")).await.unwrap();

        let task = manager.cancel("t1").await.unwrap();
        assert_eq!(task.status.state, TaskState::Canceled);
    }

    #[tokio::test]
    async fn test_cancel_completed_task_not_cancelable() {
        let manager = manager_with(Arc::new(EchoExecutor));
        manager.send(send_params("t1", "hi")).await.unwrap();
        wait_for_state(&manager, "t1", TaskState::Completed).await;

        let err = manager.cancel("t1").await.unwrap_err();
        assert!(matches!(err, EngineError::TaskNotCancelable { .. }));
        assert_eq!(err.rpc_code(), -32002);
    }

    #[tokio::test]
    async fn test_cancel_unknown_task() {
        let manager = manager_with(Arc::new(IdleExecutor));
        let err = manager.cancel("missing").await.unwrap_err();
        assert_eq!(err.rpc_code(), -32001);
    }

    #[tokio::test]
    async fn test_late_executor_updates_after_cancel_are_rejected() {
        let manager = manager_with(Arc::new(IdleExecutor));
        manager.send(send_params("t1", "hi")).await.unwrap();
        manager.cancel("t1").await.unwrap();

        // A racing executor reporting progress after cancellation is fatal
        // to that update only.
        let err = manager
            .apply_status_update("t1", TaskState::Working, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTaskStateTransition { .. }));

        let task = manager.get("t1", None).await.unwrap();
        assert_eq!(task.status.state, TaskState::Canceled);
    }

    #[tokio::test]
    async fn test_events_published_in_mutation_order() {
        let manager = manager_with(Arc::new(IdleExecutor));
        let mut rx = manager.bus().subscribe("t1").await.unwrap();

        manager.send(send_params("t1", "hi")).await.unwrap();
        manager
            .apply_status_update("t1", TaskState::Working, None)
            .await
            .unwrap();
        manager
            .apply_status_update("t1", TaskState::Completed, None)
            .await
            .unwrap();

        let states: Vec<TaskState> = [
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
        ]
        .into_iter()
        .map(|event| match event {
            TaskUpdateEvent::Status(e) => e.status.state,
            TaskUpdateEvent::Artifact(_) => panic!("unexpected artifact event"),
        })
        .collect();

        assert_eq!(
            states,
            vec![TaskState::Submitted, TaskState::Working, TaskState::Completed]
        );
    }

    #[tokio::test]
    async fn test_concurrent_input_no_lost_updates() {
        let manager = manager_with(Arc::new(IdleExecutor));
        manager.send(send_params("t1", "seed")).await.unwrap();

        let mut join_set = tokio::task::JoinSet::new();
        for i in 0..50 {
            let manager = Arc::clone(&manager);
            join_set.spawn(async move {
                manager.send(send_params("t1", &format!("msg_{i}"))).await
            });
        }
        while let Some(result) = join_set.join_next().await {
            result.unwrap().unwrap();
        }

        let task = manager.get("t1", None).await.unwrap();
        assert_eq!(task.history.len(), 51);
    }
}
