//! Protocol Types
//!
//! Wire-level definitions for the task protocol: the JSON-RPC envelope, the
//! task/message/artifact data model, method parameter shapes, and the
//! streaming event variants. Everything here serializes to the exact field
//! names the protocol schema defines.

pub mod envelope;
pub mod types;

pub use envelope::{JsonRpcError, JsonRpcId, JsonRpcRequest, JsonRpcResponse};
pub use types::*;
