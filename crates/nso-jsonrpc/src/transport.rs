//! HTTP transport for JSON-RPC calls.
//!
//! Wraps a reqwest client with:
//! - one POST per call to the fixed `/jsonrpc` endpoint
//! - session cookie capture on login and replay on every later call
//! - separate deadlines for ordinary calls and comet long-polls
//! - mapping of HTTP failures and JSON-RPC error objects onto [`NsoError`]

use crate::config::{ClientConfig, NsoConfig, Scheme};
use crate::protocol::{RpcRequest, RpcResponse};
use crate::{NsoError, Result};
use reqwest::{header, Client, StatusCode};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Session cookie issued by the server on login, as a `name=value` pair.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub(crate) fn new(cookie: impl Into<String>) -> Self {
        Self(cookie.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.0.split('=').next().unwrap_or_default();
        write!(f, "AuthToken({}=<redacted>)", name)
    }
}

/// Which deadline a call runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    Request,
    Poll,
}

/// A single outgoing call.
#[derive(Debug)]
pub(crate) struct Call<'a> {
    pub method: &'a str,
    pub params: Value,
    pub token: Option<&'a AuthToken>,
    /// Keypath addressed by the call, for error reporting.
    pub path: Option<&'a str>,
    pub deadline: Deadline,
}

impl<'a> Call<'a> {
    pub fn new(method: &'a str, params: Value) -> Self {
        Self {
            method,
            params,
            token: None,
            path: None,
            deadline: Deadline::Request,
        }
    }

    pub fn token(mut self, token: &'a AuthToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn path(mut self, path: &'a str) -> Self {
        self.path = Some(path);
        self
    }

    pub fn deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Successful JSON-RPC answer.
#[derive(Debug)]
pub(crate) struct Reply {
    pub result: Value,
    /// Session cookie set by this response, if any.
    pub cookie: Option<AuthToken>,
}

/// JSON-RPC over HTTP(S) client bound to one endpoint.
#[derive(Debug)]
pub struct RpcClient {
    client: Client,
    endpoint: Url,
    next_id: AtomicU64,
    request_timeout: Duration,
    poll_timeout: Duration,
}

impl RpcClient {
    /// Build a transport for `config`.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let endpoint = config.endpoint()?;

        let mut builder = Client::builder()
            .connect_timeout(config.timeout)
            .user_agent(NsoConfig::USER_AGENT);

        if config.scheme == Scheme::Https && !config.ssl_verify {
            warn!(
                "TLS certificate verification disabled for {}; any certificate will be accepted",
                endpoint
            );
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build().map_err(|e| NsoError::Config {
            message: format!("Failed to create HTTP client: {}", e),
        })?;

        Ok(Self {
            client,
            endpoint,
            next_id: AtomicU64::new(u64::from(rand::random_range(1..=100_000u32))),
            request_timeout: config.timeout,
            poll_timeout: config.poll_timeout,
        })
    }

    /// Endpoint every call is posted to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    /// Send one call and return its `result`.
    pub(crate) async fn send(&self, call: Call<'_>) -> Result<Reply> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let timeout = match call.deadline {
            Deadline::Request => self.request_timeout,
            Deadline::Poll => self.poll_timeout,
        };
        let request = RpcRequest::new(call.method, call.params, id);
        debug!("-> {} (id {})", call.method, id);

        let mut builder = self
            .client
            .post(self.endpoint.clone())
            .header(header::ACCEPT, "application/json")
            .timeout(timeout)
            .json(&request);
        if let Some(token) = call.token {
            builder = builder.header(header::COOKIE, token.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| NsoError::transport(call.method, e, timeout))?;

        let status = response.status();
        let cookie = session_cookie(response.headers());

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(NsoError::Auth {
                method: call.method.to_string(),
                message: format!("server answered HTTP {}", status),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| NsoError::transport(call.method, e, timeout))?;

        let parsed: std::result::Result<RpcResponse, _> = serde_json::from_slice(&body);
        let rpc = match parsed {
            Ok(rpc) => rpc,
            Err(e) if status.is_success() => {
                return Err(NsoError::Json {
                    message: format!("Invalid JSON-RPC response to {}: {}", call.method, e),
                    source: Some(e),
                })
            }
            Err(_) => {
                return Err(NsoError::Transport {
                    method: call.method.to_string(),
                    message: format!(
                        "server answered HTTP {}: {}",
                        status,
                        String::from_utf8_lossy(&body)
                    ),
                    status: Some(status.as_u16()),
                    source: None,
                })
            }
        };

        if let Some(err) = rpc.error {
            debug!("<- {} (id {}) error {} {:?}", call.method, id, err.code, err.kind);
            return Err(NsoError::from_remote(call.method, call.path, err));
        }

        if !status.is_success() {
            return Err(NsoError::Transport {
                method: call.method.to_string(),
                message: format!("server answered HTTP {}", status),
                status: Some(status.as_u16()),
                source: None,
            });
        }

        debug!("<- {} (id {})", call.method, id);
        Ok(Reply {
            result: rpc.result.unwrap_or(Value::Null),
            cookie,
        })
    }
}

/// Pick the session cookie out of `Set-Cookie` headers.
///
/// NSO names it `sessionid_<port>`; any other cookie is used only when no
/// session cookie is present.
fn session_cookie(headers: &header::HeaderMap) -> Option<AuthToken> {
    let pairs: Vec<&str> = headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(str::trim)
        .filter(|pair| pair.contains('='))
        .collect();

    pairs
        .iter()
        .find(|pair| pair.starts_with("sessionid"))
        .or_else(|| pairs.first())
        .map(|pair| AuthToken::new(*pair))
}
