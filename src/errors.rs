use crate::a2a::envelope::{
    self, JsonRpcError, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND,
    PARSE_ERROR,
};

/// Main error type for the task engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // === Envelope / dispatch errors ===
    #[error("Malformed JSON payload: {reason}")]
    Parse { reason: String },

    #[error("Invalid request envelope: {reason}")]
    InvalidRequest { reason: String },

    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    #[error("Invalid params: {reason}")]
    InvalidParams { reason: String },

    // === Task errors ===
    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("Task cannot be canceled: {task_id} is {state}")]
    TaskNotCancelable { task_id: String, state: String },

    #[error("Task already exists: {task_id}")]
    TaskAlreadyExists { task_id: String },

    #[error("Invalid task state transition: {from} -> {to}")]
    InvalidTaskStateTransition { from: String, to: String },

    // === Capability errors ===
    #[error("Push notifications are not supported by this deployment")]
    PushNotificationNotSupported,

    #[error("Unsupported operation: {operation}")]
    UnsupportedOperation { operation: String },

    // === Infrastructure errors ===
    #[error("Serialization error: {reason}")]
    Serialization { reason: String },

    #[error("Network error: {operation}: {reason}")]
    Network { operation: String, reason: String },

    #[error("Internal error: {component}: {reason}")]
    Internal { component: String, reason: String },
}

impl EngineError {
    /// JSON-RPC error code from the fixed taxonomy.
    pub fn rpc_code(&self) -> i32 {
        match self {
            Self::Parse { .. } => PARSE_ERROR,
            Self::InvalidRequest { .. } => INVALID_REQUEST,
            Self::MethodNotFound { .. } => METHOD_NOT_FOUND,
            Self::InvalidParams { .. } => INVALID_PARAMS,
            Self::TaskNotFound { .. } => envelope::TASK_NOT_FOUND,
            Self::TaskNotCancelable { .. } => envelope::TASK_NOT_CANCELABLE,
            Self::PushNotificationNotSupported => envelope::PUSH_NOTIFICATION_NOT_SUPPORTED,
            Self::UnsupportedOperation { .. } => envelope::UNSUPPORTED_OPERATION,
            Self::TaskAlreadyExists { .. }
            | Self::InvalidTaskStateTransition { .. }
            | Self::Serialization { .. }
            | Self::Network { .. }
            | Self::Internal { .. } => INTERNAL_ERROR,
        }
    }

    /// Expected caller mistakes log at warn; everything else is an engine
    /// fault and logs at error.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Self::TaskAlreadyExists { .. }
                | Self::InvalidTaskStateTransition { .. }
                | Self::Serialization { .. }
                | Self::Network { .. }
                | Self::Internal { .. }
        )
    }

    /// Convert to a wire error. Internal causes are replaced by a generic
    /// message so they are logged but never leaked in the response payload.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        let message = if self.rpc_code() == INTERNAL_ERROR {
            "Internal error".to_string()
        } else {
            self.to_string()
        };
        JsonRpcError {
            code: self.rpc_code(),
            message,
            data: None,
        }
    }
}

/// Convenience type alias
pub type EngineResult<T> = std::result::Result<T, EngineError>;

impl From<serde_json::Error> for EngineError {
    fn from(error: serde_json::Error) -> Self {
        EngineError::Serialization {
            reason: error.to_string(),
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(error: reqwest::Error) -> Self {
        EngineError::Network {
            operation: "http_request".to_string(),
            reason: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_codes() {
        let err = EngineError::TaskNotFound {
            task_id: "t1".to_string(),
        };
        assert_eq!(err.rpc_code(), -32001);
        assert!(err.is_client_error());

        let err = EngineError::TaskNotCancelable {
            task_id: "t1".to_string(),
            state: "completed".to_string(),
        };
        assert_eq!(err.rpc_code(), -32002);

        assert_eq!(EngineError::PushNotificationNotSupported.rpc_code(), -32003);
        assert_eq!(
            EngineError::UnsupportedOperation {
                operation: "streaming".to_string()
            }
            .rpc_code(),
            -32004
        );
    }

    #[test]
    fn test_internal_causes_never_leak() {
        let err = EngineError::Internal {
            component: "store".to_string(),
            reason: "lock poisoned at /secret/path".to_string(),
        };
        let rpc = err.to_rpc_error();
        assert_eq!(rpc.code, -32603);
        assert_eq!(rpc.message, "Internal error");
        assert!(rpc.data.is_none());

        let err = EngineError::InvalidTaskStateTransition {
            from: "completed".to_string(),
            to: "working".to_string(),
        };
        assert_eq!(err.to_rpc_error().message, "Internal error");
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_serde_conversion() {
        let json_err: EngineError = serde_json::from_str::<serde_json::Value>("not json")
            .unwrap_err()
            .into();
        assert!(matches!(json_err, EngineError::Serialization { .. }));
        assert_eq!(json_err.rpc_code(), -32603);
    }
}
