//! Subscription/comet poller.
//!
//! A [`Subscription`] registers keypath watches under one comet id, activates
//! them with `subscribe_upgrade`, then long-polls the `comet` method for
//! notifications. It moves through [`CometState`] in one direction:
//!
//! ```text
//! Idle -> Subscribing -> Upgraded -> Polling -> Stopped
//! ```
//!
//! The subscription borrows its [`Session`], so the session cannot log out
//! or be dropped while watches are registered.

use crate::cancel::CancellationToken;
use crate::session::Session;
use crate::{NsoError, Result};
use futures::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use tracing::{debug, info, warn};

/// Lifecycle state of a [`Subscription`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CometState {
    /// Nothing registered yet.
    Idle,
    /// At least one watch registered, not yet activated.
    Subscribing,
    /// Watches activated; no poll issued yet.
    Upgraded,
    Polling,
    Stopped,
}

impl fmt::Display for CometState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CometState::Idle => "idle",
            CometState::Subscribing => "subscribing",
            CometState::Upgraded => "upgraded",
            CometState::Polling => "polling",
            CometState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// What a watch listens for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchKind {
    /// Committed configuration changes below the keypath.
    Changes,
    /// Periodic reads of a single leaf, every `interval` seconds.
    PollLeaf { interval: u32 },
    /// Operational data changes below the keypath.
    CdbOper,
    /// Upgrade progress events for the whole system.
    Upgrade,
    /// Batched replies to JSON-RPC requests sent with a comet id.
    JsonRpcBatch,
}

/// A registered watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watch {
    /// Watched keypath; empty for system-wide watches.
    pub path: String,
    pub handle: String,
    pub kind: WatchKind,
}

/// One changed node inside a notification.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Change {
    pub keypath: String,
    pub op: String,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub old: Option<Value>,
}

/// A notification delivered for one of this subscription's handles.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub handle: String,
    /// Keypath of the watch that produced it.
    pub path: String,
    /// Raw notification payload.
    pub message: Value,
}

impl Notification {
    /// Changed nodes carried by the payload, if it has a `changes` list.
    pub fn changes(&self) -> Vec<Change> {
        self.message
            .get("changes")
            .and_then(Value::as_array)
            .map(|changes| {
                changes
                    .iter()
                    .filter_map(|c| serde_json::from_value(c.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Notifications returned by one comet poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub notifications: Vec<Notification>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }

    pub fn len(&self) -> usize {
        self.notifications.len()
    }

    /// Every changed node across all notifications, in delivery order.
    pub fn changes(&self) -> Vec<Change> {
        self.notifications.iter().flat_map(Notification::changes).collect()
    }
}

#[derive(Debug, Deserialize)]
struct CometEntry {
    handle: Value,
    #[serde(default)]
    message: Value,
}

impl Session {
    /// Start a subscription bound to this session.
    pub fn subscription(&self) -> Result<Subscription<'_>> {
        self.token("subscribe_changes")?;
        let comet_id = format!("remote-comet-{}", rand::random_range(1..=100_000u32));
        debug!("Created subscription {}", comet_id);
        Ok(Subscription {
            session: self,
            comet_id,
            state: CometState::Idle,
            watches: Vec::new(),
            started: 0,
        })
    }
}

/// A set of keypath watches polled through one comet id.
#[derive(Debug)]
pub struct Subscription<'s> {
    session: &'s Session,
    comet_id: String,
    state: CometState,
    watches: Vec<Watch>,
    /// Leading watches already activated with `start_subscription`.
    started: usize,
}

impl<'s> Subscription<'s> {
    pub fn comet_id(&self) -> &str {
        &self.comet_id
    }

    pub fn state(&self) -> CometState {
        self.state
    }

    pub fn watches(&self) -> &[Watch] {
        &self.watches
    }

    /// Watch committed changes below `path`.
    pub async fn subscribe_changes(&mut self, path: &str) -> Result<&Watch> {
        let params = json!({ "comet_id": self.comet_id, "path": path });
        self.register("subscribe_changes", Some(path), params, WatchKind::Changes)
            .await
    }

    /// Poll the leaf at `path` every `interval` seconds.
    pub async fn subscribe_poll_leaf(&mut self, path: &str, interval: u32) -> Result<&Watch> {
        let params = json!({ "comet_id": self.comet_id, "path": path, "interval": interval });
        self.register(
            "subscribe_poll_leaf",
            Some(path),
            params,
            WatchKind::PollLeaf { interval },
        )
        .await
    }

    /// Watch operational data below `path`.
    pub async fn subscribe_cdboper(&mut self, path: &str) -> Result<&Watch> {
        let params = json!({ "comet_id": self.comet_id, "path": path });
        self.register("subscribe_cdboper", Some(path), params, WatchKind::CdbOper)
            .await
    }

    /// Watch upgrade progress events.
    pub async fn subscribe_upgrade_events(&mut self) -> Result<&Watch> {
        let params = json!({ "comet_id": self.comet_id });
        self.register("subscribe_upgrade", None, params, WatchKind::Upgrade)
            .await
    }

    /// Receive batched JSON-RPC replies through this comet id.
    pub async fn subscribe_jsonrpc_batch(&mut self) -> Result<&Watch> {
        let params = json!({ "comet_id": self.comet_id });
        self.register(
            "subscribe_jsonrpc_batch",
            None,
            params,
            WatchKind::JsonRpcBatch,
        )
        .await
    }

    async fn register(
        &mut self,
        method: &str,
        path: Option<&str>,
        params: Value,
        kind: WatchKind,
    ) -> Result<&Watch> {
        if !matches!(self.state, CometState::Idle | CometState::Subscribing) {
            return Err(NsoError::local_subscription(
                method,
                format!("cannot subscribe while {}", self.state),
            ));
        }

        let result = match path {
            Some(path) => self.session.call_at(method, path, params).await?,
            None => self.session.call(method, params).await?,
        };
        let handle = handle_string(result.get("handle").unwrap_or(&Value::Null))
            .ok_or_else(|| NsoError::Json {
                message: format!("{} result has no handle: {}", method, result),
                source: None,
            })?;

        let path = path.unwrap_or_default();
        debug!("Watch {} on '{}' ({})", handle, path, method);
        self.state = CometState::Subscribing;
        self.watches.push(Watch {
            path: path.to_string(),
            handle,
            kind,
        });
        let last = self.watches.len() - 1;
        Ok(&self.watches[last])
    }

    /// Activate every registered watch.
    ///
    /// Watches are started in registration order. If one fails, the state
    /// stays `Subscribing` and the error is returned; a retry starts only the
    /// watches that are not active yet.
    pub async fn subscribe_upgrade(&mut self) -> Result<()> {
        if self.state != CometState::Subscribing || self.watches.is_empty() {
            return Err(NsoError::local_subscription(
                "subscribe_upgrade",
                match self.state {
                    CometState::Idle => "nothing subscribed".to_string(),
                    state => format!("cannot upgrade while {}", state),
                },
            ));
        }

        while let Some(watch) = self.watches.get(self.started) {
            self.session
                .call("start_subscription", json!({ "handle": watch.handle }))
                .await?;
            self.started += 1;
        }

        self.state = CometState::Upgraded;
        info!(
            "Subscription {} active with {} watch(es)",
            self.comet_id,
            self.watches.len()
        );
        Ok(())
    }

    /// Long-poll once for notifications.
    ///
    /// Only notifications for this subscription's handles are returned. A
    /// poll that times out yields an empty change set.
    pub async fn comet_poll(&mut self) -> Result<ChangeSet> {
        if !matches!(self.state, CometState::Upgraded | CometState::Polling) {
            return Err(NsoError::local_subscription(
                "comet",
                format!("cannot poll while {}", self.state),
            ));
        }
        self.state = CometState::Polling;

        let result = match self
            .session
            .long_poll("comet", json!({ "comet_id": self.comet_id }))
            .await
        {
            Ok(result) => result,
            Err(NsoError::Timeout { .. }) => {
                debug!(
                    "Comet poll for {} idle after {:?}",
                    self.comet_id,
                    self.session.poll_timeout()
                );
                return Ok(ChangeSet::default());
            }
            Err(e) => return Err(e),
        };

        let entries: Vec<CometEntry> = match result {
            Value::Null => Vec::new(),
            other => serde_json::from_value(other)?,
        };

        let notifications = entries
            .into_iter()
            .filter_map(|entry| {
                let handle = handle_string(&entry.handle)?;
                let watch = self.watches.iter().find(|w| w.handle == handle)?;
                Some(Notification {
                    path: watch.path.clone(),
                    handle,
                    message: entry.message,
                })
            })
            .collect();

        Ok(ChangeSet { notifications })
    }

    /// Poll repeatedly, yielding each non-empty change set.
    ///
    /// The stream ends when `cancel` is tripped, which interrupts an
    /// in-flight poll or the pause between polls. It also ends after the
    /// first error. Server-side watches stay registered either way; call
    /// `stop_comet` afterwards.
    pub fn changes(&mut self, cancel: CancellationToken) -> BoxStream<'_, Result<ChangeSet>> {
        let interval = self.session.poll_interval();
        stream::unfold(
            (self, cancel, true, false),
            move |(sub, cancel, mut first, done)| async move {
                if done {
                    return None;
                }
                loop {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    if !first {
                        tokio::select! {
                            _ = cancel.cancelled() => return None,
                            _ = tokio::time::sleep(interval) => {}
                        }
                    }
                    first = false;

                    let polled = tokio::select! {
                        _ = cancel.cancelled() => return None,
                        polled = sub.comet_poll() => polled,
                    };
                    match polled {
                        Ok(set) if set.is_empty() => continue,
                        Ok(set) => return Some((Ok(set), (sub, cancel, false, false))),
                        Err(e) => return Some((Err(e), (sub, cancel, false, true))),
                    }
                }
            },
        )
        .boxed()
    }

    /// Subscriptions the server holds for this session.
    pub async fn get_subscriptions(&self) -> Result<Value> {
        self.session.call("get_subscriptions", json!({})).await
    }

    /// Unsubscribe every watch and stop the subscription.
    ///
    /// Every handle is unsubscribed even if one fails; the first failure is
    /// returned. The subscription is stopped regardless.
    pub async fn stop_comet(&mut self) -> Result<()> {
        if matches!(self.state, CometState::Idle | CometState::Stopped) {
            return Err(NsoError::local_subscription(
                "unsubscribe",
                format!("cannot stop while {}", self.state),
            ));
        }

        let mut first_err = None;
        for watch in &self.watches {
            if let Err(e) = self
                .session
                .call("unsubscribe", json!({ "handle": watch.handle }))
                .await
            {
                warn!("Failed to unsubscribe {}: {}", watch.handle, e);
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }

        self.state = CometState::Stopped;
        info!("Subscription {} stopped", self.comet_id);
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for Subscription<'_> {
    fn drop(&mut self) {
        if self.state != CometState::Stopped && !self.watches.is_empty() {
            warn!(
                "Subscription {} dropped while {} with {} watch(es); call stop_comet first",
                self.comet_id,
                self.state,
                self.watches.len()
            );
        }
    }
}

/// Handles arrive as strings, but some servers send numbers.
fn handle_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
