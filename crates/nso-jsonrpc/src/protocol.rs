//! JSON-RPC 2.0 request and response envelopes as spoken by NSO.
//!
//! ```text
//! -> {"jsonrpc": "2.0", "id": 7, "method": "get_values", "params": {...}}
//! <- {"jsonrpc": "2.0", "id": 7, "result": {...}}
//! <- {"jsonrpc": "2.0", "id": 7, "error": {"code": -32000, "type": "...", "message": "...", "data": {...}}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    /// Create a new JSON-RPC 2.0 request.
    ///
    /// NSO rejects `"params": {}` on parameterless methods such as `logout`,
    /// so an empty object is dropped from the envelope.
    pub fn new(method: impl Into<String>, params: Value, id: u64) -> Self {
        let params = match params {
            Value::Null => None,
            Value::Object(map) if map.is_empty() => None,
            other => Some(other),
        };
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
    #[serde(default)]
    pub id: Option<Value>,
}

impl RpcResponse {
    /// Create a success response.
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: Some("2.0".to_string()),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Create an error response.
    pub fn error(id: Option<Value>, error: RpcErrorObject) -> Self {
        Self {
            jsonrpc: Some("2.0".to_string()),
            result: None,
            error: Some(error),
            id,
        }
    }
}

/// JSON-RPC 2.0 error object, extended with NSO's `type` discriminator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcErrorObject {
    pub fn new(code: i64, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            kind: Some(kind.into()),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Whether the server is reporting a keypath that does not resolve.
    ///
    /// NSO signals this either with a `data.*not_found`/`data.*not_exists`
    /// type or as an invalid `path` parameter. `rpc.method.not_found` is an
    /// unknown method, not a missing keypath.
    pub fn is_path_error(&self) -> bool {
        let kind = self.kind.as_deref().unwrap_or_default();
        if kind.starts_with("data.") && (kind.ends_with("not_found") || kind.ends_with("not_exists")) {
            return true;
        }
        if kind.ends_with("invalid_params") {
            return self
                .data
                .as_ref()
                .and_then(|d| d.get("param"))
                .and_then(Value::as_str)
                .is_some_and(|param| param == "path");
        }
        false
    }

    /// Human readable summary: type, message and any `data.reason`.
    pub fn describe(&self) -> String {
        let mut out = match &self.kind {
            Some(kind) => format!("{} [{}]", self.message, kind),
            None => self.message.clone(),
        };
        if let Some(reason) = self
            .data
            .as_ref()
            .and_then(|d| d.get("reason"))
            .and_then(Value::as_str)
        {
            out.push_str(": ");
            out.push_str(reason);
        }
        out
    }
}
