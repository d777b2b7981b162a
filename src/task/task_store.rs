use crate::errors::EngineResult;
use async_trait::async_trait;

use crate::a2a::{Artifact, Message, Task, TaskStatus};

/// Storage abstraction for task persistence.
///
/// The store exclusively owns task identity and status transitions. The
/// streaming and push subsystems only ever see task ids and read-only
/// snapshots produced here.
///
/// Mutating operations are atomic with respect to one another: a backend
/// must not interleave two writes to the same task, and chunk appends for a
/// given artifact index must be applied in arrival order.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Retrieve a task snapshot by id. Returns None if the id is unseen.
    async fn get_task(&self, task_id: &str) -> EngineResult<Option<Task>>;

    /// Insert a new task. Fails with `TaskAlreadyExists` if the id is taken:
    /// a task is created exactly once per id, and later writes to that id
    /// must be transitions of the same task, never a new identity.
    async fn create_task(&self, task: &Task) -> EngineResult<()>;

    /// Delete a task by id. Succeeds silently if it doesn't exist.
    async fn delete_task(&self, task_id: &str) -> EngineResult<()>;

    /// List tasks, optionally filtered to one session.
    async fn list_tasks(&self, session_id: Option<&str>) -> EngineResult<Vec<Task>>;

    /// Check if a task exists without retrieving it.
    async fn task_exists(&self, task_id: &str) -> EngineResult<bool>;

    /// Atomically append a message to a task's history. Messages are
    /// immutable once appended.
    async fn append_message(&self, task_id: &str, message: Message) -> EngineResult<()>;

    /// Atomically apply an artifact update with chunk semantics: an update
    /// with `append = true` concatenates its parts onto the artifact already
    /// at that index, anything else replaces it. Fails once the index has
    /// been closed with `last_chunk = true`.
    async fn append_artifact(&self, task_id: &str, artifact: Artifact) -> EngineResult<()>;

    /// Atomically update a task's status. Rejects with
    /// `InvalidTaskStateTransition` any transition outside the allowed
    /// table; the task is left untouched in that case.
    async fn update_status(&self, task_id: &str, status: TaskStatus) -> EngineResult<()>;
}
