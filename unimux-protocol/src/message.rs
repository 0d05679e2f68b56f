//! Opaque JSON-RPC message
//!
//! The proxy never interprets message bodies beyond the `id` and `method`
//! members. Everything else is carried through untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC version tag used on synthesized replies
pub const JSONRPC_VERSION: &str = "2.0";

/// Method of the one-time handshake request
pub const HANDSHAKE_METHOD: &str = "initialize";

/// Method of the one-way notification acknowledging the handshake
pub const HANDSHAKE_ACK_METHOD: &str = "notifications/initialized";

/// A single framed message
///
/// Serializes exactly as the wrapped JSON value. Requests carry an `id`,
/// notifications do not; a `null` id is treated as absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(Value);

impl Message {
    /// Wrap an arbitrary JSON value
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Build a successful reply carrying `result` for request `id`
    pub fn response(id: Value, result: Value) -> Self {
        Self(serde_json::json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": id,
            "result": result,
        }))
    }

    /// Request id, if this message expects a reply
    pub fn id(&self) -> Option<&Value> {
        match self.0.get("id") {
            None | Some(Value::Null) => None,
            Some(id) => Some(id),
        }
    }

    /// Replace the request id
    ///
    /// Messages that are not JSON objects have no id and are left alone.
    pub fn set_id(&mut self, id: Value) {
        if let Value::Object(map) = &mut self.0 {
            map.insert("id".to_string(), id);
        }
    }

    /// Method name, present on requests and notifications
    pub fn method(&self) -> Option<&str> {
        self.0.get("method").and_then(Value::as_str)
    }

    /// `result` member of a reply
    pub fn result(&self) -> Option<&Value> {
        self.0.get("result")
    }

    /// Whether this is the one-time handshake request
    pub fn is_handshake(&self) -> bool {
        self.method() == Some(HANDSHAKE_METHOD)
    }

    /// Whether this is the handshake acknowledgement notification
    pub fn is_handshake_ack(&self) -> bool {
        self.method() == Some(HANDSHAKE_ACK_METHOD)
    }

    /// Borrow the underlying JSON value
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Consume into the underlying JSON value
    pub fn into_value(self) -> Value {
        self.0
    }
}
