//! Query engine: server-side cursors over the configuration tree.
//!
//! `start_query` returns a [`QueryHandle`]; `run_query` fetches the next page
//! and returns an empty page once the cursor is exhausted. Handles are tracked
//! on the owning transaction until `stop_query` releases them, so a stale or
//! doubly-stopped handle is rejected locally with [`NsoError::Query`].

use crate::config::NsoConfig;
use crate::session::Session;
use crate::{NsoError, Result};
use futures::stream::{self, Stream, TryStreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

/// How each selected field is rendered in result rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryResultAs {
    #[default]
    String,
    KeypathValue,
    LeafValueAsString,
}

impl QueryResultAs {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryResultAs::String => "string",
            QueryResultAs::KeypathValue => "keypath-value",
            QueryResultAs::LeafValueAsString => "leaf_value_as_string",
        }
    }
}

/// Parameters for `start_query`.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// Keypath the query iterates over.
    pub path: String,
    /// Field expressions, relative to each matched node (e.g. `../name`).
    pub selection: Vec<String>,
    /// Rows per `run_query` page.
    pub chunk_size: u32,
    /// Zero-based offset of the first row.
    pub initial_offset: u32,
    pub result_as: QueryResultAs,
}

impl QueryRequest {
    pub fn new<S: Into<String>>(path: impl Into<String>, selection: impl IntoIterator<Item = S>) -> Self {
        Self {
            path: path.into(),
            selection: selection.into_iter().map(Into::into).collect(),
            chunk_size: NsoConfig::QUERY_CHUNK_SIZE,
            initial_offset: 0,
            result_as: QueryResultAs::default(),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_initial_offset(mut self, initial_offset: u32) -> Self {
        self.initial_offset = initial_offset;
        self
    }

    pub fn with_result_as(mut self, result_as: QueryResultAs) -> Self {
        self.result_as = result_as;
        self
    }
}

/// A live server-side query cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryHandle {
    qh: u64,
    path: String,
    selection: Vec<String>,
    chunk_size: u32,
}

impl QueryHandle {
    /// Server-issued handle id.
    pub fn qh(&self) -> u64 {
        self.qh
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn selection(&self) -> &[String] {
        &self.selection
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }
}

/// Anything that names a query handle.
pub trait AsQueryId {
    fn query_id(&self) -> u64;
}

impl AsQueryId for QueryHandle {
    fn query_id(&self) -> u64 {
        self.qh
    }
}

impl AsQueryId for u64 {
    fn query_id(&self) -> u64 {
        *self
    }
}

/// One page of query results. `results` holds one row per match, each row
/// ordered like the selection.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct QueryPage {
    #[serde(default)]
    pub position: u64,
    #[serde(default)]
    pub total_number_of_results: Option<u64>,
    #[serde(default)]
    pub number_of_results: u64,
    #[serde(default)]
    pub results: Vec<Vec<Value>>,
}

impl QueryPage {
    /// An empty page marks the end of the cursor.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

impl Session {
    /// Start a query over `path` selecting `selection` with default options.
    pub async fn start_query<S: Into<String>>(
        &mut self,
        path: &str,
        selection: impl IntoIterator<Item = S>,
    ) -> Result<QueryHandle> {
        self.start_query_with(QueryRequest::new(path, selection)).await
    }

    /// Start a query described by `request`.
    pub async fn start_query_with(&mut self, request: QueryRequest) -> Result<QueryHandle> {
        let th = self.active_trans("start_query")?.th();
        if request.selection.is_empty() {
            return Err(NsoError::local_query("start_query", "selection must not be empty"));
        }
        if request.chunk_size == 0 {
            return Err(NsoError::local_query("start_query", "chunk_size must be positive"));
        }

        let result = self
            .call_at(
                "start_query",
                &request.path,
                json!({
                    "th": th,
                    "path": request.path,
                    "selection": request.selection,
                    "chunk_size": request.chunk_size,
                    "initial_offset": request.initial_offset,
                    "result_as": request.result_as.as_str(),
                }),
            )
            .await?;

        let qh = result
            .get("qh")
            .and_then(Value::as_u64)
            .ok_or_else(|| NsoError::Json {
                message: format!("start_query result has no numeric qh: {}", result),
                source: None,
            })?;

        self.active_trans_mut("start_query")?.track_query(qh);
        info!("Started query {} over {}", qh, request.path);

        Ok(QueryHandle {
            qh,
            path: request.path,
            selection: request.selection,
            chunk_size: request.chunk_size,
        })
    }

    /// Fetch the next page. Returns an empty page once exhausted.
    pub async fn run_query(&self, handle: &QueryHandle) -> Result<QueryPage> {
        self.ensure_live("run_query", handle.qh)?;
        let result = self.call("run_query", json!({ "qh": handle.qh })).await?;
        let page: QueryPage = serde_json::from_value(result)?;
        debug!(
            "Query {} page at {} with {} rows",
            handle.qh,
            page.position,
            page.results.len()
        );
        Ok(page)
    }

    /// All remaining rows as a forward-only stream.
    ///
    /// The stream ends at the first empty page. It does not stop the handle.
    pub fn rows<'a>(
        &'a self,
        handle: &'a QueryHandle,
    ) -> impl Stream<Item = Result<Vec<Value>>> + 'a {
        stream::try_unfold((), move |()| async move {
            let page = self.run_query(handle).await?;
            if page.is_empty() {
                return Ok::<_, NsoError>(None);
            }
            Ok(Some((page.results, ())))
        })
        .map_ok(|rows| stream::iter(rows.into_iter().map(Ok::<_, NsoError>)))
        .try_flatten()
    }

    /// Rewind the cursor to its initial offset.
    pub async fn reset_query(&self, handle: &QueryHandle) -> Result<()> {
        self.ensure_live("reset_query", handle.qh)?;
        self.call("reset_query", json!({ "qh": handle.qh })).await?;
        Ok(())
    }

    /// Release the server-side cursor.
    ///
    /// Fails with a query error when the handle is unknown to the active
    /// transaction, including a second stop of the same handle.
    pub async fn stop_query(&mut self, handle: &impl AsQueryId) -> Result<()> {
        let qh = handle.query_id();
        self.ensure_live("stop_query", qh)?;
        self.call("stop_query", json!({ "qh": qh })).await?;
        self.active_trans_mut("stop_query")?.untrack_query(qh);
        info!("Stopped query {}", qh);
        Ok(())
    }

    fn ensure_live(&self, method: &str, qh: u64) -> Result<()> {
        if self.active_trans(method)?.is_live(qh) {
            Ok(())
        } else {
            Err(NsoError::local_query(
                method,
                format!("handle not found: {}", qh),
            ))
        }
    }
}
