//! Transaction manager.
//!
//! A session holds at most one transaction. Opening a new one while another
//! is active closes the old one first: its live queries are stopped and the
//! old `th` is released with `delete_trans`, then the new transaction is
//! opened.

use crate::config::NsoConfig;
use crate::session::Session;
use crate::{NsoError, Result};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{info, warn};

/// Transaction access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransMode {
    Read,
    #[default]
    ReadWrite,
}

impl TransMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransMode::Read => "read",
            TransMode::ReadWrite => "read_write",
        }
    }
}

impl fmt::Display for TransMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the transaction shares the candidate configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfMode {
    #[default]
    Private,
    Shared,
    Exclusive,
}

impl ConfMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfMode::Private => "private",
            ConfMode::Shared => "shared",
            ConfMode::Exclusive => "exclusive",
        }
    }
}

/// What to do with a pending tagged transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnPendingChanges {
    #[default]
    Reuse,
    Reject,
    Discard,
}

impl OnPendingChanges {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnPendingChanges::Reuse => "reuse",
            OnPendingChanges::Reject => "reject",
            OnPendingChanges::Discard => "discard",
        }
    }
}

/// Parameters for `new_trans`.
#[derive(Debug, Clone)]
pub struct TransOptions {
    pub db: String,
    pub mode: TransMode,
    pub conf_mode: ConfMode,
    pub tag: Option<String>,
    pub on_pending_changes: OnPendingChanges,
}

impl Default for TransOptions {
    fn default() -> Self {
        Self {
            db: NsoConfig::DEFAULT_DB.to_string(),
            mode: TransMode::default(),
            conf_mode: ConfMode::default(),
            tag: None,
            on_pending_changes: OnPendingChanges::default(),
        }
    }
}

impl TransOptions {
    pub fn read() -> Self {
        Self {
            mode: TransMode::Read,
            ..Self::default()
        }
    }

    pub fn read_write() -> Self {
        Self::default()
    }

    pub fn with_conf_mode(mut self, conf_mode: ConfMode) -> Self {
        self.conf_mode = conf_mode;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_on_pending_changes(mut self, on_pending_changes: OnPendingChanges) -> Self {
        self.on_pending_changes = on_pending_changes;
        self
    }

    fn to_params(&self) -> Value {
        let mut params = json!({
            "db": self.db,
            "mode": self.mode.as_str(),
            "conf_mode": self.conf_mode.as_str(),
            "on_pending_changes": self.on_pending_changes.as_str(),
        });
        if let Some(tag) = &self.tag {
            params["tag"] = json!(tag);
        }
        params
    }
}

/// An open transaction against the configuration database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    th: u64,
    mode: TransMode,
    conf_mode: ConfMode,
    live_queries: BTreeSet<u64>,
}

impl Transaction {
    /// Server-issued transaction handle.
    pub fn th(&self) -> u64 {
        self.th
    }

    pub fn mode(&self) -> TransMode {
        self.mode
    }

    pub fn conf_mode(&self) -> ConfMode {
        self.conf_mode
    }

    pub fn is_writable(&self) -> bool {
        self.mode == TransMode::ReadWrite
    }

    /// Query handles started in this transaction and not yet stopped.
    pub fn live_queries(&self) -> Vec<u64> {
        self.live_queries.iter().copied().collect()
    }

    pub(crate) fn track_query(&mut self, qh: u64) {
        self.live_queries.insert(qh);
    }

    pub(crate) fn untrack_query(&mut self, qh: u64) -> bool {
        self.live_queries.remove(&qh)
    }

    pub(crate) fn is_live(&self, qh: u64) -> bool {
        self.live_queries.contains(&qh)
    }
}

impl Session {
    /// Open a transaction, closing any transaction already active.
    pub async fn new_trans(&mut self, options: TransOptions) -> Result<&Transaction> {
        self.token("new_trans")?;
        self.discard_trans().await;

        let result = self.call("new_trans", options.to_params()).await?;
        let th = result
            .get("th")
            .and_then(Value::as_u64)
            .ok_or_else(|| NsoError::Json {
                message: format!("new_trans result has no numeric th: {}", result),
                source: None,
            })?;

        info!("Opened {} transaction {}", options.mode, th);
        Ok(&*self.transaction.insert(Transaction {
            th,
            mode: options.mode,
            conf_mode: options.conf_mode,
            live_queries: BTreeSet::new(),
        }))
    }

    /// Close the active transaction server-side.
    pub async fn close_trans(&mut self) -> Result<()> {
        let th = self.active_trans("delete_trans")?.th;
        if let Some(trans) = self.transaction.take() {
            self.release_queries(&trans).await;
        }
        self.call("delete_trans", json!({ "th": th })).await?;
        info!("Closed transaction {}", th);
        Ok(())
    }

    /// Best-effort close of the active transaction and its live queries.
    ///
    /// Failures are logged; the transaction is forgotten either way.
    pub(crate) async fn discard_trans(&mut self) {
        if let Some(old) = self.transaction.take() {
            info!("Closing transaction {}", old.th);
            self.release_queries(&old).await;
            if let Err(e) = self.call("delete_trans", json!({ "th": old.th })).await {
                warn!("Failed to close transaction {}: {}", old.th, e);
            }
        }
    }

    /// The active transaction, if any.
    pub fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }

    /// List the transactions the server holds for this session.
    pub async fn get_trans(&self) -> Result<Value> {
        self.call("get_trans", json!({})).await
    }

    /// Evaluate an XPath expression in the active transaction.
    pub async fn eval_xpath(&self, xpath_expr: &str) -> Result<Value> {
        let th = self.active_trans("eval_xpath")?.th;
        self.call(
            "eval_xpath",
            json!({ "th": th, "xpath_expr": xpath_expr }),
        )
        .await
    }

    /// The active transaction, checking authentication first.
    pub(crate) fn active_trans(&self, method: &str) -> Result<&Transaction> {
        self.token(method)?;
        self.transaction
            .as_ref()
            .ok_or_else(|| NsoError::NoActiveTransaction {
                method: method.to_string(),
            })
    }

    /// The active transaction, which must be read-write.
    pub(crate) fn writable_trans(&self, method: &str) -> Result<&Transaction> {
        let trans = self.active_trans(method)?;
        if !trans.is_writable() {
            return Err(NsoError::ReadOnlyTransaction {
                method: method.to_string(),
                mode: trans.mode.to_string(),
            });
        }
        Ok(trans)
    }

    pub(crate) fn active_trans_mut(&mut self, method: &str) -> Result<&mut Transaction> {
        self.token(method)?;
        self.transaction
            .as_mut()
            .ok_or_else(|| NsoError::NoActiveTransaction {
                method: method.to_string(),
            })
    }
}
