//! Error types for the NSO JSON-RPC client.
//!
//! Errors fall into three groups:
//! - transport failures (`Transport`, `Timeout`): the request never produced a
//!   JSON-RPC answer; the caller may retry, the client never does
//! - local precondition violations (`NotAuthenticated`, `NoActiveTransaction`,
//!   `ReadOnlyTransaction`): programming errors raised before any network call
//! - remote rejections (`Auth`, `PathNotFound`, `Query`, `Subscription`, `Rpc`):
//!   the server answered with a JSON-RPC error object

use crate::protocol::RpcErrorObject;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the NSO client.
#[derive(Debug, Error)]
pub enum NsoError {
    // Transport errors
    #[error("Transport error calling {method}: {message}")]
    Transport {
        method: String,
        message: String,
        /// HTTP status, when the server answered with a non-success code
        status: Option<u16>,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("Request {method} timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    // Authentication errors
    #[error("Authentication failed ({method}): {message}")]
    Auth { method: String, message: String },

    // Precondition violations
    #[error("Session is not authenticated, call login() before {method}")]
    NotAuthenticated { method: String },

    #[error("No active transaction, call new_trans() before {method}")]
    NoActiveTransaction { method: String },

    #[error("{method} requires a read_write transaction, current mode is {mode}")]
    ReadOnlyTransaction { method: String, mode: String },

    // Remote rejections
    #[error("Path not found ({method}): {path}: {message}")]
    PathNotFound {
        method: String,
        path: String,
        message: String,
    },

    #[error("Query error ({method}): {message}")]
    Query {
        method: String,
        message: String,
        /// Remote error code; `None` when raised locally
        code: Option<i64>,
    },

    #[error("Subscription error ({method}): {message}")]
    Subscription {
        method: String,
        message: String,
        /// Remote error code; `None` when raised locally
        code: Option<i64>,
    },

    #[error("{method} failed with {code} {kind}: {message}")]
    Rpc {
        method: String,
        code: i64,
        /// NSO error `type`, e.g. `rpc.method.failed`
        kind: String,
        message: String,
        data: Option<serde_json::Value>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("YAML error: {source}")]
    Yaml {
        #[from]
        source: serde_yaml::Error,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for NSO client operations.
pub type Result<T> = std::result::Result<T, NsoError>;

impl From<serde_json::Error> for NsoError {
    fn from(err: serde_json::Error) -> Self {
        NsoError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<url::ParseError> for NsoError {
    fn from(err: url::ParseError) -> Self {
        NsoError::Config {
            message: format!("Invalid server URL: {}", err),
        }
    }
}

impl NsoError {
    /// Wrap a reqwest failure for `method`.
    ///
    /// Only the request deadline maps to `Timeout`. A connect timeout also
    /// reports `is_timeout()` and is kept as a `Transport` error.
    pub(crate) fn transport(method: &str, err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() && !err.is_connect() {
            NsoError::Timeout {
                method: method.to_string(),
                timeout,
            }
        } else {
            NsoError::Transport {
                method: method.to_string(),
                message: err.to_string(),
                status: err.status().map(|s| s.as_u16()),
                source: Some(err),
            }
        }
    }

    /// Classify a JSON-RPC error object returned for `method`.
    ///
    /// `path` is the keypath the request addressed, if any.
    pub(crate) fn from_remote(method: &str, path: Option<&str>, err: RpcErrorObject) -> Self {
        let kind = err.kind.clone().unwrap_or_default();
        let message = err.describe();

        if method == "login" || kind.starts_with("session.") {
            return NsoError::Auth {
                method: method.to_string(),
                message,
            };
        }

        if err.is_path_error() {
            return NsoError::PathNotFound {
                method: method.to_string(),
                path: path.unwrap_or_default().to_string(),
                message,
            };
        }

        match method {
            "start_query" | "run_query" | "reset_query" | "stop_query" => NsoError::Query {
                method: method.to_string(),
                message,
                code: Some(err.code),
            },
            "comet" | "start_subscription" | "unsubscribe" | "get_subscriptions" => {
                NsoError::Subscription {
                    method: method.to_string(),
                    message,
                    code: Some(err.code),
                }
            }
            m if m.starts_with("subscribe_") => NsoError::Subscription {
                method: method.to_string(),
                message,
                code: Some(err.code),
            },
            _ => NsoError::Rpc {
                method: method.to_string(),
                code: err.code,
                kind,
                message: err.message,
                data: err.data,
            },
        }
    }

    /// Check if the caller may retry the failed call unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NsoError::Transport { .. } | NsoError::Timeout { .. })
    }

    /// Check if this is a local precondition violation (no request was sent).
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            NsoError::NotAuthenticated { .. }
                | NsoError::NoActiveTransaction { .. }
                | NsoError::ReadOnlyTransaction { .. }
        )
    }

    /// Check if the server rejected the request.
    pub fn is_remote(&self) -> bool {
        match self {
            NsoError::Auth { .. } | NsoError::PathNotFound { .. } | NsoError::Rpc { .. } => true,
            NsoError::Query { code, .. } | NsoError::Subscription { code, .. } => code.is_some(),
            _ => false,
        }
    }

    pub(crate) fn local_query(method: &str, message: impl Into<String>) -> Self {
        NsoError::Query {
            method: method.to_string(),
            message: message.into(),
            code: None,
        }
    }

    pub(crate) fn local_subscription(method: &str, message: impl Into<String>) -> Self {
        NsoError::Subscription {
            method: method.to_string(),
            message: message.into(),
            code: None,
        }
    }
}
