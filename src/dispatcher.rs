//! Envelope validation and method routing
//!
//! The dispatcher accepts raw JSON-RPC envelopes, validates them
//! structurally, routes recognized methods to the task, streaming, and push
//! subsystems, and maps every outcome back onto a response envelope that
//! echoes the caller's id. Unexpected failures are logged with their cause
//! and surfaced only as a generic internal error.

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::a2a::envelope::{
    JSONRPC_VERSION, METHOD_PUSH_NOTIFICATION_GET, METHOD_PUSH_NOTIFICATION_SET,
    METHOD_TASKS_CANCEL, METHOD_TASKS_GET, METHOD_TASKS_RESUBSCRIBE, METHOD_TASKS_SEND,
    METHOD_TASKS_SEND_SUBSCRIBE,
};
use crate::a2a::{
    JsonRpcId, JsonRpcRequest, JsonRpcResponse, StreamEvent, Task, TaskIdParams,
    TaskPushNotificationConfig, TaskQueryParams, TaskSendParams, TaskUpdateEvent,
};
use crate::errors::{EngineError, EngineResult};
use crate::task::TaskManager;

/// Lazy, ordered, finite-until-terminal sequence of envelope-wrapped events.
pub type EventStream = Pin<Box<dyn Stream<Item = JsonRpcResponse> + Send>>;

/// Outcome of dispatching one envelope: a single response for unary methods,
/// a stream for `tasks/sendSubscribe` and `tasks/resubscribe`.
pub enum Dispatch {
    Response(JsonRpcResponse),
    Stream(EventStream),
}

impl Dispatch {
    /// The unary response, if this dispatch produced one. Test convenience.
    pub fn into_response(self) -> Option<JsonRpcResponse> {
        match self {
            Self::Response(response) => Some(response),
            Self::Stream(_) => None,
        }
    }
}

pub struct Dispatcher {
    manager: Arc<TaskManager>,
}

impl Dispatcher {
    pub fn new(manager: Arc<TaskManager>) -> Self {
        Self { manager }
    }

    /// Dispatch a raw JSON payload.
    pub async fn dispatch(&self, raw: &str) -> Dispatch {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                return Dispatch::Response(self.error_response(
                    None,
                    &EngineError::Parse {
                        reason: e.to_string(),
                    },
                ))
            }
        };
        self.dispatch_value(value).await
    }

    /// Dispatch an already-parsed JSON value.
    pub async fn dispatch_value(&self, value: Value) -> Dispatch {
        // Pull the id out first so even a structurally broken envelope gets
        // its id echoed back.
        let id = value
            .get("id")
            .cloned()
            .and_then(|id| serde_json::from_value::<JsonRpcId>(id).ok());

        let request: JsonRpcRequest = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(e) => {
                return Dispatch::Response(self.error_response(
                    id,
                    &EngineError::InvalidRequest {
                        reason: e.to_string(),
                    },
                ))
            }
        };

        if request.jsonrpc != JSONRPC_VERSION {
            return Dispatch::Response(self.error_response(
                id,
                &EngineError::InvalidRequest {
                    reason: format!("unsupported jsonrpc version: {}", request.jsonrpc),
                },
            ));
        }

        let Some(params) = request.params else {
            return Dispatch::Response(self.error_response(
                id,
                &EngineError::InvalidRequest {
                    reason: "missing params".to_string(),
                },
            ));
        };

        match request.method.as_str() {
            METHOD_TASKS_SEND => Dispatch::Response(self.handle_send(id, params).await),
            METHOD_TASKS_GET => Dispatch::Response(self.handle_get(id, params).await),
            METHOD_TASKS_CANCEL => Dispatch::Response(self.handle_cancel(id, params).await),
            METHOD_PUSH_NOTIFICATION_SET => {
                Dispatch::Response(self.handle_push_set(id, params).await)
            }
            METHOD_PUSH_NOTIFICATION_GET => {
                Dispatch::Response(self.handle_push_get(id, params).await)
            }
            METHOD_TASKS_SEND_SUBSCRIBE => self.handle_send_subscribe(id, params).await,
            METHOD_TASKS_RESUBSCRIBE => self.handle_resubscribe(id, params).await,
            method => Dispatch::Response(self.error_response(
                id,
                &EngineError::MethodNotFound {
                    method: method.to_string(),
                },
            )),
        }
    }

    async fn handle_send(&self, id: Option<JsonRpcId>, params: Value) -> JsonRpcResponse {
        match self.run_send(params).await {
            Ok(task) => self.success(id, &task),
            Err(e) => self.error_response(id, &e),
        }
    }

    async fn run_send(&self, params: Value) -> EngineResult<Task> {
        let params: TaskSendParams = parse_params(params)?;
        self.manager.send(params).await
    }

    async fn handle_get(&self, id: Option<JsonRpcId>, params: Value) -> JsonRpcResponse {
        match self.run_get(params).await {
            Ok(task) => self.success(id, &task),
            Err(e) => self.error_response(id, &e),
        }
    }

    async fn run_get(&self, params: Value) -> EngineResult<Task> {
        let params: TaskQueryParams = parse_params(params)?;
        self.manager.get(&params.id, params.history_length).await
    }

    async fn handle_cancel(&self, id: Option<JsonRpcId>, params: Value) -> JsonRpcResponse {
        match self.run_cancel(params).await {
            Ok(task) => self.success(id, &task),
            Err(e) => self.error_response(id, &e),
        }
    }

    async fn run_cancel(&self, params: Value) -> EngineResult<Task> {
        let params: TaskIdParams = parse_params(params)?;
        self.manager.cancel(&params.id).await
    }

    async fn handle_push_set(&self, id: Option<JsonRpcId>, params: Value) -> JsonRpcResponse {
        match self.run_push_set(params).await {
            Ok(config) => self.success(id, &config),
            Err(e) => self.error_response(id, &e),
        }
    }

    async fn run_push_set(&self, params: Value) -> EngineResult<TaskPushNotificationConfig> {
        let params: TaskPushNotificationConfig = parse_params(params)?;
        self.manager
            .push_notifications()
            .set_config(&params.id, params.push_notification_config)
            .await
    }

    async fn handle_push_get(&self, id: Option<JsonRpcId>, params: Value) -> JsonRpcResponse {
        match self.run_push_get(params).await {
            Ok(config) => self.success(id, &config),
            Err(e) => self.error_response(id, &e),
        }
    }

    async fn run_push_get(&self, params: Value) -> EngineResult<TaskPushNotificationConfig> {
        let params: TaskIdParams = parse_params(params)?;
        self.manager.push_notifications().get_config(&params.id).await
    }

    /// `tasks/send` semantics plus an event stream opened before the work is
    /// handed off, so the subscriber sees the task's very first event.
    async fn handle_send_subscribe(&self, id: Option<JsonRpcId>, params: Value) -> Dispatch {
        if !self.manager.config().capabilities.streaming {
            return Dispatch::Response(self.error_response(
                id,
                &EngineError::UnsupportedOperation {
                    operation: METHOD_TASKS_SEND_SUBSCRIBE.to_string(),
                },
            ));
        }

        let params: TaskSendParams = match parse_params(params) {
            Ok(params) => params,
            Err(e) => return Dispatch::Response(self.error_response(id, &e)),
        };

        // Subscribe before sending: the task id is caller-assigned, so the
        // subscription catches the submitted event of a fresh task.
        let rx = match self.manager.bus().subscribe(&params.id).await {
            Ok(rx) => rx,
            Err(e) => return Dispatch::Response(self.error_response(id, &e)),
        };

        if let Err(e) = self.manager.send(params).await {
            return Dispatch::Response(self.error_response(id, &e));
        }

        Dispatch::Stream(self.event_stream(id, None, rx))
    }

    /// Reattach to an existing task's event stream without re-submitting
    /// work. No replay: the current task snapshot is delivered first, then
    /// only events published after attachment.
    async fn handle_resubscribe(&self, id: Option<JsonRpcId>, params: Value) -> Dispatch {
        if !self.manager.config().capabilities.streaming {
            return Dispatch::Response(self.error_response(
                id,
                &EngineError::UnsupportedOperation {
                    operation: METHOD_TASKS_RESUBSCRIBE.to_string(),
                },
            ));
        }

        let params: TaskQueryParams = match parse_params(params) {
            Ok(params) => params,
            Err(e) => return Dispatch::Response(self.error_response(id, &e)),
        };

        let rx = match self.manager.bus().subscribe(&params.id).await {
            Ok(rx) => rx,
            Err(e) => return Dispatch::Response(self.error_response(id, &e)),
        };

        let snapshot = match self.manager.get(&params.id, params.history_length).await {
            Ok(task) => task,
            Err(e) => return Dispatch::Response(self.error_response(id, &e)),
        };

        Dispatch::Stream(self.event_stream(id, Some(snapshot), rx))
    }

    /// Forward bus events into an envelope-wrapped stream, ending after the
    /// final status event. An optional snapshot is delivered first; a
    /// snapshot of an already-terminal task closes the stream by itself.
    fn event_stream(
        &self,
        request_id: Option<JsonRpcId>,
        snapshot: Option<Task>,
        mut rx: mpsc::Receiver<TaskUpdateEvent>,
    ) -> EventStream {
        let (tx, out) = mpsc::channel(self.manager.config().stream_buffer);

        tokio::spawn(async move {
            if let Some(task) = snapshot {
                let terminal = task.status.state.is_terminal();
                let item = wrap_stream_event(request_id.clone(), StreamEvent::Task(task));
                if tx.send(item).await.is_err() || terminal {
                    return;
                }
            }

            while let Some(event) = rx.recv().await {
                let is_final = event.is_final();
                let item = wrap_stream_event(request_id.clone(), StreamEvent::from(event));
                if tx.send(item).await.is_err() || is_final {
                    break;
                }
            }
        });

        Box::pin(ReceiverStream::new(out))
    }

    fn success<T: serde::Serialize>(&self, id: Option<JsonRpcId>, result: &T) -> JsonRpcResponse {
        match serde_json::to_value(result) {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => self.error_response(id, &EngineError::from(e)),
        }
    }

    fn error_response(&self, id: Option<JsonRpcId>, error: &EngineError) -> JsonRpcResponse {
        if error.is_client_error() {
            tracing::warn!(code = error.rpc_code(), error = %error, "request failed");
        } else {
            tracing::error!(code = error.rpc_code(), error = %error, "request failed internally");
        }

        let rpc_error = error.to_rpc_error();
        JsonRpcResponse::error(id, rpc_error.code, rpc_error.message, rpc_error.data)
    }
}

fn wrap_stream_event(request_id: Option<JsonRpcId>, event: StreamEvent) -> JsonRpcResponse {
    JsonRpcResponse::success(
        request_id,
        serde_json::to_value(event).unwrap_or(Value::Null),
    )
}

fn parse_params<T: DeserializeOwned>(params: Value) -> EngineResult<T> {
    serde_json::from_value(params).map_err(|e| EngineError::InvalidParams {
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a2a::TaskState;
    use crate::config::EngineConfig;
    use crate::errors::EngineResult;
    use crate::executor::{TaskContext, WorkExecutor};
    use crate::task::InMemoryTaskStore;
    use async_trait::async_trait;
    use futures::StreamExt;
    use serde_json::json;

    struct IdleExecutor;

    #[async_trait]
    impl WorkExecutor for IdleExecutor {
        async fn execute(&self, _context: TaskContext) -> EngineResult<()> {
            Ok(())
        }
    }

    fn dispatcher() -> Dispatcher {
        dispatcher_with_config(EngineConfig::default())
    }

    fn dispatcher_with_config(config: EngineConfig) -> Dispatcher {
        Dispatcher::new(TaskManager::new(
            Arc::new(InMemoryTaskStore::new()),
            Arc::new(IdleExecutor),
            config,
        ))
    }

    fn send_request(request_id: i64, task_id: &str) -> String {
        json!({
            "jsonrpc": "2.0",
            "id": request_id,
            "method": "tasks/send",
            "params": {
                "id": task_id,
                "message": {"role": "user", "parts": [{"type": "text", "text": "hi"}]}
            }
        })
        .to_string()
    }

    async fn unary(dispatcher: &Dispatcher, raw: &str) -> JsonRpcResponse {
        dispatcher
            .dispatch(raw)
            .await
            .into_response()
            .expect("expected a unary response")
    }

    #[tokio::test]
    async fn test_malformed_json_is_parse_error() {
        let d = dispatcher();
        let response = unary(&d, "{not json").await;
        assert_eq!(response.error.as_ref().unwrap().code, -32700);
        assert!(response.id.is_none());
    }

    #[tokio::test]
    async fn test_missing_method_is_invalid_request_with_id_echo() {
        let d = dispatcher();
        let raw = json!({"jsonrpc": "2.0", "id": 7, "params": {}}).to_string();
        let response = unary(&d, &raw).await;
        assert_eq!(response.error.as_ref().unwrap().code, -32600);
        assert_eq!(response.id, Some(JsonRpcId::Number(7)));
    }

    #[tokio::test]
    async fn test_missing_params_is_invalid_request() {
        let d = dispatcher();
        let raw = json!({"jsonrpc": "2.0", "id": 1, "method": "tasks/get"}).to_string();
        let response = unary(&d, &raw).await;
        assert_eq!(response.error.as_ref().unwrap().code, -32600);
    }

    #[tokio::test]
    async fn test_wrong_version_is_invalid_request() {
        let d = dispatcher();
        let raw =
            json!({"jsonrpc": "1.0", "id": 1, "method": "tasks/get", "params": {"id": "t"}})
                .to_string();
        let response = unary(&d, &raw).await;
        assert_eq!(response.error.as_ref().unwrap().code, -32600);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let d = dispatcher();
        let raw =
            json!({"jsonrpc": "2.0", "id": 1, "method": "tasks/frobnicate", "params": {}})
                .to_string();
        let response = unary(&d, &raw).await;
        assert_eq!(response.error.as_ref().unwrap().code, -32601);
    }

    #[tokio::test]
    async fn test_schema_mismatched_params() {
        let d = dispatcher();
        let raw = json!({
            "jsonrpc": "2.0", "id": 1, "method": "tasks/send",
            "params": {"id": "t1"}
        })
        .to_string();
        let response = unary(&d, &raw).await;
        assert_eq!(response.error.as_ref().unwrap().code, -32602);
    }

    #[tokio::test]
    async fn test_send_then_get_echoes_ids() {
        let d = dispatcher();

        let response = unary(&d, &send_request(1, "t1")).await;
        assert!(!response.is_error());
        assert_eq!(response.id, Some(JsonRpcId::Number(1)));
        let task: Task = serde_json::from_value(response.result.unwrap()).unwrap();
        assert_eq!(task.status.state, TaskState::Submitted);

        let raw = json!({
            "jsonrpc": "2.0", "id": "req-2", "method": "tasks/get",
            "params": {"id": "t1"}
        })
        .to_string();
        let response = unary(&d, &raw).await;
        assert_eq!(response.id, Some(JsonRpcId::String("req-2".to_string())));
        let task: Task = serde_json::from_value(response.result.unwrap()).unwrap();
        assert_eq!(task.history.len(), 1);
    }

    #[tokio::test]
    async fn test_get_unknown_task_id_echo_on_error() {
        let d = dispatcher();
        let raw = json!({
            "jsonrpc": "2.0", "id": 9, "method": "tasks/get",
            "params": {"id": "missing"}
        })
        .to_string();
        let response = unary(&d, &raw).await;
        assert_eq!(response.error.as_ref().unwrap().code, -32001);
        assert_eq!(response.id, Some(JsonRpcId::Number(9)));
    }

    #[tokio::test]
    async fn test_push_notification_set_get_roundtrip() {
        let d = dispatcher();
        unary(&d, &send_request(1, "t1")).await;

        let raw = json!({
            "jsonrpc": "2.0", "id": 2, "method": "tasks/pushNotification/set",
            "params": {"id": "t1", "pushNotificationConfig": {"url": "https://x"}}
        })
        .to_string();
        let response = unary(&d, &raw).await;
        assert!(!response.is_error());

        let raw = json!({
            "jsonrpc": "2.0", "id": 3, "method": "tasks/pushNotification/get",
            "params": {"id": "t1"}
        })
        .to_string();
        let response = unary(&d, &raw).await;
        let config: TaskPushNotificationConfig =
            serde_json::from_value(response.result.unwrap()).unwrap();
        assert_eq!(config.push_notification_config.url, "https://x");
    }

    #[tokio::test]
    async fn test_streaming_disabled_is_unsupported_operation() {
        let mut config = EngineConfig::default();
        config.capabilities.streaming = false;
        let d = dispatcher_with_config(config);

        let raw = json!({
            "jsonrpc": "2.0", "id": 1, "method": "tasks/sendSubscribe",
            "params": {
                "id": "t1",
                "message": {"role": "user", "parts": [{"type": "text", "text": "hi"}]}
            }
        })
        .to_string();
        let response = unary(&d, &raw).await;
        // Disabled, not unknown: the method exists in the protocol.
        assert_eq!(response.error.as_ref().unwrap().code, -32004);
    }

    #[tokio::test]
    async fn test_resubscribe_unknown_task() {
        let d = dispatcher();
        let raw = json!({
            "jsonrpc": "2.0", "id": 1, "method": "tasks/resubscribe",
            "params": {"id": "missing"}
        })
        .to_string();
        let response = unary(&d, &raw).await;
        assert_eq!(response.error.as_ref().unwrap().code, -32001);
    }

    #[tokio::test]
    async fn test_resubscribe_terminal_task_yields_snapshot_only() {
        let d = dispatcher();
        unary(&d, &send_request(1, "t1")).await;
        let raw = json!({
            "jsonrpc": "2.0", "id": 2, "method": "tasks/cancel",
            "params": {"id": "t1"}
        })
        .to_string();
        unary(&d, &raw).await;

        let raw = json!({
            "jsonrpc": "2.0", "id": 3, "method": "tasks/resubscribe",
            "params": {"id": "t1"}
        })
        .to_string();
        let Dispatch::Stream(stream) = d.dispatch(&raw).await else {
            panic!("expected a stream");
        };
        let items: Vec<JsonRpcResponse> = stream.collect().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, Some(JsonRpcId::Number(3)));
        let task: Task = serde_json::from_value(items[0].result.clone().unwrap()).unwrap();
        assert_eq!(task.status.state, TaskState::Canceled);
    }
}
