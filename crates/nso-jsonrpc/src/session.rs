//! Session manager: login, logout and the authenticated call path.
//!
//! A [`Session`] starts unauthenticated. Every component call checks the
//! session first and fails with [`NsoError::NotAuthenticated`] without
//! touching the network when no session cookie is held.
//!
//! `logout()` is idempotent: on a session that is not logged in it returns
//! `Ok(())` and sends nothing.

use crate::config::{ClientConfig, Credentials};
use crate::transaction::Transaction;
use crate::transport::{AuthToken, Call, Deadline, RpcClient};
use crate::{NsoError, Result};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Sections readable through `get_system_setting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemSetting {
    Capabilities,
    Customizations,
    Models,
    User,
    Version,
    All,
}

impl SystemSetting {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemSetting::Capabilities => "capabilities",
            SystemSetting::Customizations => "customizations",
            SystemSetting::Models => "models",
            SystemSetting::User => "user",
            SystemSetting::Version => "version",
            SystemSetting::All => "all",
        }
    }
}

/// An NSO JSON-RPC session.
///
/// Owns the session cookie and at most one [`Transaction`]. Anything that
/// changes either takes `&mut self`, so calls on one session are strictly
/// sequential.
#[derive(Debug)]
pub struct Session {
    rpc: RpcClient,
    credentials: Credentials,
    poll_interval: Duration,
    token: Option<AuthToken>,
    pub(crate) transaction: Option<Transaction>,
}

impl Session {
    /// Create an unauthenticated session for `config`.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let rpc = RpcClient::new(&config)?;
        Ok(Self {
            rpc,
            credentials: config.credentials,
            poll_interval: config.poll_interval,
            token: None,
            transaction: None,
        })
    }

    /// Create a session and log in with the configured credentials.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let mut session = Self::new(config)?;
        let credentials = session.credentials.clone();
        session.login(&credentials).await?;
        Ok(session)
    }

    /// Endpoint this session talks to.
    pub fn base_url(&self) -> &Url {
        self.rpc.endpoint()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// Authenticate and store the session cookie.
    ///
    /// On a session that is already logged in, the active transaction is
    /// closed and the old server session logged out before the new login is
    /// sent. Failures of that teardown are logged, not returned.
    pub async fn login(&mut self, credentials: &Credentials) -> Result<()> {
        if self.token.is_some() {
            self.discard_trans().await;
            if let Err(e) = self.call("logout", json!({})).await {
                warn!("Failed to log out previous session: {}", e);
            }
            self.token = None;
        }

        let call = Call::new(
            "login",
            json!({
                "user": credentials.username,
                "passwd": credentials.password,
            }),
        );
        let reply = self.rpc.send(call).await?;

        let token = reply.cookie.ok_or_else(|| NsoError::Auth {
            method: "login".to_string(),
            message: "server did not issue a session cookie".to_string(),
        })?;

        if let Some(warning) = reply.result.get("warning").and_then(Value::as_str) {
            warn!("Login warning from {}: {}", self.base_url(), warning);
        }

        self.credentials = credentials.clone();
        self.token = Some(token);
        info!("Logged in to {} as {}", self.base_url(), credentials.username);
        Ok(())
    }

    /// Invalidate the session server-side and locally.
    ///
    /// Live query handles are stopped first. A session that is not logged in
    /// is left untouched.
    pub async fn logout(&mut self) -> Result<()> {
        if self.token.is_none() {
            debug!("logout on unauthenticated session, nothing to do");
            return Ok(());
        }

        if let Some(trans) = self.transaction.take() {
            self.release_queries(&trans).await;
        }

        let result = self.call("logout", json!({})).await;
        self.token = None;
        result?;

        info!("Logged out of {}", self.base_url());
        Ok(())
    }

    /// Read a system setting section.
    pub async fn get_system_setting(&self, operation: SystemSetting) -> Result<Value> {
        self.call(
            "get_system_setting",
            json!({ "operation": operation.as_str() }),
        )
        .await
    }

    /// Ask the server to abort the outstanding request with `request_id`.
    pub async fn abort(&self, request_id: u64) -> Result<Value> {
        self.call("abort", json!({ "id": request_id })).await
    }

    /// The session cookie, or `NotAuthenticated` for `method`.
    pub(crate) fn token(&self, method: &str) -> Result<&AuthToken> {
        self.token.as_ref().ok_or_else(|| NsoError::NotAuthenticated {
            method: method.to_string(),
        })
    }

    /// Authenticated call with no keypath context.
    pub(crate) async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let token = self.token(method)?;
        let reply = self.rpc.send(Call::new(method, params).token(token)).await?;
        Ok(reply.result)
    }

    /// Authenticated call addressing `path`.
    pub(crate) async fn call_at(&self, method: &str, path: &str, params: Value) -> Result<Value> {
        let token = self.token(method)?;
        let call = Call::new(method, params).token(token).path(path);
        Ok(self.rpc.send(call).await?.result)
    }

    /// Authenticated call under the long-poll deadline.
    pub(crate) async fn long_poll(&self, method: &str, params: Value) -> Result<Value> {
        let token = self.token(method)?;
        let call = Call::new(method, params)
            .token(token)
            .deadline(Deadline::Poll);
        Ok(self.rpc.send(call).await?.result)
    }

    pub(crate) fn poll_timeout(&self) -> Duration {
        self.rpc.poll_timeout()
    }

    /// Pause between comet polls in a change stream.
    pub(crate) fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Best-effort `stop_query` for every live handle of `trans`.
    pub(crate) async fn release_queries(&self, trans: &Transaction) {
        for qh in trans.live_queries() {
            if let Err(e) = self.call("stop_query", json!({ "qh": qh })).await {
                warn!("Failed to stop query handle {}: {}", qh, e);
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(trans) = &self.transaction {
            let live = trans.live_queries();
            if !live.is_empty() {
                warn!(
                    "Session dropped with {} live query handle(s) {:?}; call stop_query or logout first",
                    live.len(),
                    live
                );
            }
        }
    }
}
