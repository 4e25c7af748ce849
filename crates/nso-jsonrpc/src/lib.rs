//! NSO JSON-RPC - Async client for the NSO network controller's JSON-RPC API.
//!
//! The crate is organised by the stages of a conversation with the server:
//! a [`Session`] logs in and owns the session cookie, opens one
//! [`Transaction`] at a time, reads and writes configuration through it,
//! walks large lists with server-side queries, and watches keypaths for
//! change notifications through a comet [`Subscription`].
//!
//! # Example
//!
//! ```rust,ignore
//! use nso_jsonrpc::{ClientConfig, Session, TransOptions};
//!
//! #[tokio::main]
//! async fn main() -> nso_jsonrpc::Result<()> {
//!     let mut session = Session::connect(ClientConfig::new("10.0.0.5")).await?;
//!     session.new_trans(TransOptions::read()).await?;
//!
//!     let devices = session.get_list_keys("/ncs:devices/device").await?;
//!     println!("Found {} devices", devices.len());
//!
//!     let values = session
//!         .get_values("/ncs:devices/device{ce0}", &["address", "port"], false)
//!         .await?;
//!     for (name, value) in values.iter() {
//!         println!("{}: {:?}", name, value);
//!     }
//!
//!     session.logout().await
//! }
//! ```

pub mod cancel;
pub mod cdb;
pub mod comet;
pub mod config;
pub mod error;
pub mod protocol;
pub mod query;
pub mod render;
pub mod session;
pub mod transaction;
pub mod transport;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use cdb::{
    CommitOptions, DerefResultAs, DryRunOutput, KeyTuple, LeafValue, LeafValues, LoadFormat,
    LoadMode, LoadOptions, ShowConfigFormat, ShowConfigOptions,
};
pub use comet::{Change, ChangeSet, CometState, Notification, Subscription, Watch, WatchKind};
pub use config::{ClientConfig, Credentials, NsoConfig, Scheme};
pub use error::{NsoError, Result};
pub use query::{AsQueryId, QueryHandle, QueryPage, QueryRequest, QueryResultAs};
pub use session::{Session, SystemSetting};
pub use transaction::{ConfMode, OnPendingChanges, TransMode, TransOptions, Transaction};
pub use transport::{AuthToken, RpcClient};
