//! Work executor seam
//!
//! The engine never computes task content itself. It hands each task to a
//! `WorkExecutor` together with a `TaskUpdater` for reporting progress and a
//! cooperative cancellation signal, then gets status and artifact updates
//! pushed back asynchronously.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;

use crate::a2a::{Artifact, Message, Task, TaskState};
use crate::errors::EngineResult;
use crate::task::TaskManager;

/// Performs the actual task computation.
///
/// Implementations run outside the request/response path: `execute` is
/// spawned fire-and-forget and may block for long periods. Progress flows
/// back through the context's updater; a returned error transitions the task
/// to `failed` with a status message rather than surfacing as a protocol
/// error.
#[async_trait]
pub trait WorkExecutor: Send + Sync {
    async fn execute(&self, context: TaskContext) -> EngineResult<()>;
}

/// Everything an executor gets for one task dispatch.
pub struct TaskContext {
    task: Task,
    updater: TaskUpdater,
    cancel: watch::Receiver<bool>,
}

impl TaskContext {
    pub(crate) fn new(task: Task, updater: TaskUpdater, cancel: watch::Receiver<bool>) -> Self {
        Self {
            task,
            updater,
            cancel,
        }
    }

    /// Snapshot of the task as it was handed off. Later mutations are not
    /// reflected here; use the updater's manager-backed reads if needed.
    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn updater(&self) -> &TaskUpdater {
        &self.updater
    }

    /// True once cancellation has been requested. Cooperative: the executor
    /// is expected to poll or await this and stop promptly.
    pub fn is_canceled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves when cancellation is requested. Also resolves if the engine
    /// dropped the task's cancel signal (the task reached a terminal state).
    pub async fn canceled(&mut self) {
        while !*self.cancel.borrow() {
            if self.cancel.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Executor-facing handle for pushing progress into the task store.
///
/// All writes go through the manager, so transition rules, event fan-out,
/// and per-task ordering apply exactly as for caller-initiated mutations.
#[derive(Clone)]
pub struct TaskUpdater {
    manager: Arc<TaskManager>,
    task_id: String,
}

impl TaskUpdater {
    pub(crate) fn new(manager: Arc<TaskManager>, task_id: String) -> Self {
        Self { manager, task_id }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Report a state change, optionally with an accompanying message.
    pub async fn update_status(
        &self,
        state: TaskState,
        message: Option<Message>,
    ) -> EngineResult<()> {
        self.manager
            .apply_status_update(&self.task_id, state, message)
            .await
            .map(|_| ())
    }

    /// Mark the task working, the usual first report of a fresh executor.
    pub async fn working(&self) -> EngineResult<()> {
        self.update_status(TaskState::Working, None).await
    }

    /// Mark the task completed, optionally with a closing message.
    pub async fn complete(&self, message: Option<Message>) -> EngineResult<()> {
        self.update_status(TaskState::Completed, message).await
    }

    /// Mark the task failed with an explanatory message.
    pub async fn fail(&self, message: Message) -> EngineResult<()> {
        self.update_status(TaskState::Failed, Some(message)).await
    }

    /// Ask the caller for more input. The next `tasks/send` with this task
    /// id resumes the work.
    pub async fn require_input(&self, message: Message) -> EngineResult<()> {
        self.update_status(TaskState::InputRequired, Some(message))
            .await
    }

    /// Produce an artifact chunk.
    pub async fn add_artifact(&self, artifact: Artifact) -> EngineResult<()> {
        self.manager
            .apply_artifact_update(&self.task_id, artifact)
            .await
            .map(|_| ())
    }
}
