//! In-process mock of the NSO JSON-RPC endpoint.
//!
//! Serves `/jsonrpc` on an ephemeral localhost port with a small seeded
//! configuration tree, query datasets and comet queues. Every call is
//! recorded so tests can assert on what actually went over the wire.

#![allow(dead_code)]

use axum::{
    extract::State,
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use nso_jsonrpc::protocol::{RpcErrorObject, RpcResponse};
use nso_jsonrpc::{ClientConfig, Credentials, Session};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Rows in the seeded `/ncs:devices/device` query dataset.
pub const DATASET_ROWS: usize = 25;

#[derive(Default)]
struct MockState {
    port: u16,
    sessions: HashSet<String>,
    next_id: u64,
    transactions: BTreeMap<u64, String>,
    closed_transactions: Vec<u64>,
    containers: BTreeSet<String>,
    leaves: HashMap<String, Value>,
    defaults: HashMap<String, Value>,
    lists: HashMap<String, Vec<Vec<String>>>,
    datasets: HashMap<String, Vec<Vec<Value>>>,
    queries: HashMap<u64, QueryCursor>,
    subscriptions: HashMap<String, MockSubscription>,
    comet_queues: HashMap<String, Vec<Value>>,
    comet_hold: Duration,
    /// Handles whose next `start_subscription` is rejected.
    failing_starts: HashSet<String>,
    calls: Vec<(String, Value)>,
}

struct QueryCursor {
    path: String,
    chunk_size: usize,
    initial_offset: usize,
    position: usize,
}

struct MockSubscription {
    comet_id: String,
    path: String,
    started: bool,
}

/// Handle to a running mock server.
#[derive(Clone)]
pub struct MockNso {
    state: Arc<Mutex<MockState>>,
    addr: SocketAddr,
    shutdown: Arc<Notify>,
    server: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl MockNso {
    /// Bind to `127.0.0.1:0`, seed the tree and start serving.
    pub async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("mock server address");

        let mut state = MockState {
            port: addr.port(),
            next_id: 1,
            comet_hold: Duration::from_millis(100),
            ..MockState::default()
        };
        seed(&mut state);

        let state = Arc::new(Mutex::new(state));
        let app = Router::new()
            .route("/jsonrpc", post(handle_rpc))
            .with_state(state.clone());

        let shutdown = Arc::new(Notify::new());
        let signal = shutdown.clone();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.notified().await })
                .await
                .expect("mock server error");
        });

        Self {
            state,
            addr,
            shutdown,
            server: Arc::new(Mutex::new(Some(server))),
        }
    }

    /// Stop accepting connections and wait for the server to wind down.
    pub async fn shutdown(&self) {
        self.shutdown.notify_one();
        let server = self.server.lock().expect("mock server handle").take();
        if let Some(server) = server {
            let _ = tokio::time::timeout(Duration::from_secs(2), server).await;
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Client configuration pointing at this server with short deadlines.
    pub fn config(&self) -> ClientConfig {
        ClientConfig::new("127.0.0.1")
            .with_port(self.port())
            .with_credentials(Credentials::new("admin", "admin"))
            .with_timeout(Duration::from_secs(5))
            .with_poll_timeout(Duration::from_secs(2))
            .with_poll_interval(Duration::from_millis(10))
    }

    /// A logged-in session.
    pub async fn session(&self) -> Session {
        Session::connect(self.config()).await.expect("login to mock")
    }

    /// Params of every recorded call to `method`, in order.
    pub fn calls(&self, method: &str) -> Vec<Value> {
        self.lock()
            .calls
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    pub fn open_transactions(&self) -> Vec<u64> {
        self.lock().transactions.keys().copied().collect()
    }

    pub fn closed_transactions(&self) -> Vec<u64> {
        self.lock().closed_transactions.clone()
    }

    pub fn active_sessions(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Invalidate every session server-side, as an idle timeout would.
    pub fn expire_sessions(&self) {
        self.lock().sessions.clear();
    }

    pub fn live_queries(&self) -> usize {
        self.lock().queries.len()
    }

    pub fn live_subscriptions(&self) -> usize {
        self.lock().subscriptions.len()
    }

    pub fn set_leaf(&self, path: &str, value: Value) {
        self.lock().leaves.insert(path.to_string(), value);
    }

    pub fn leaf(&self, path: &str) -> Option<Value> {
        self.lock().leaves.get(path).cloned()
    }

    pub fn set_list(&self, path: &str, keys: Vec<Vec<&str>>) {
        let keys = keys
            .into_iter()
            .map(|k| k.into_iter().map(str::to_string).collect())
            .collect();
        self.lock().lists.insert(path.to_string(), keys);
    }

    pub fn set_dataset(&self, path: &str, rows: Vec<Vec<Value>>) {
        self.lock().datasets.insert(path.to_string(), rows);
    }

    /// How long an empty comet poll is held open before answering `[]`.
    pub fn set_comet_hold(&self, hold: Duration) {
        self.lock().comet_hold = hold;
    }

    /// Reject the next `start_subscription` for `handle`.
    pub fn fail_start(&self, handle: &str) {
        self.lock().failing_starts.insert(handle.to_string());
    }

    /// Queue a change notification for the subscription owning `handle`.
    pub fn notify(&self, handle: &str, message: Value) {
        let mut state = self.lock();
        let comet_id = state
            .subscriptions
            .get(handle)
            .map(|s| s.comet_id.clone())
            .expect("notify on unknown handle");
        state
            .comet_queues
            .entry(comet_id)
            .or_default()
            .push(json!({ "handle": handle, "message": message }));
    }

    /// Queue a notification under `comet_id` for an arbitrary handle.
    pub fn notify_raw(&self, comet_id: &str, handle: &str, message: Value) {
        self.lock()
            .comet_queues
            .entry(comet_id.to_string())
            .or_default()
            .push(json!({ "handle": handle, "message": message }));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state poisoned")
    }
}

/// A `changes` payload as NSO sends it for subscribe_changes.
pub fn change_message(keypath: &str, value: &str) -> Value {
    json!({
        "changes": [{ "keypath": keypath, "op": "value_set", "value": value }],
        "user": "admin",
        "ip": "127.0.0.1",
    })
}

fn seed(state: &mut MockState) {
    for container in ["/ncs:devices", "/a", "/b", "/c"] {
        state.containers.insert(container.to_string());
    }

    state.lists.insert(
        "/ncs:devices/device".to_string(),
        vec![vec!["ce0".into()], vec!["ce1".into()], vec!["pe0".into()]],
    );
    state
        .lists
        .insert("/ncs:customers/customer".to_string(), Vec::new());

    state.leaves.insert(
        "/ncs:devices/device{ce0}/address".to_string(),
        json!("10.0.0.1"),
    );
    state
        .leaves
        .insert("/ncs:devices/device{ce0}/port".to_string(), json!("830"));
    state.defaults.insert(
        "/ncs:devices/device{ce0}/read-timeout".to_string(),
        json!("20"),
    );

    let rows = (0..DATASET_ROWS)
        .map(|i| vec![json!(format!("dev{}", i)), json!(format!("10.0.{}.1", i))])
        .collect();
    state.datasets.insert("/ncs:devices/device".to_string(), rows);
}

impl MockState {
    fn path_known(&self, path: &str) -> bool {
        let prefix = format!("{}/", path);
        self.containers.contains(path)
            || self.lists.contains_key(path)
            || self.leaves.contains_key(path)
            || self.defaults.contains_key(path)
            || self.leaves.keys().any(|k| k.starts_with(&prefix))
            || self.defaults.keys().any(|k| k.starts_with(&prefix))
    }

    fn next(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn cookie_name(&self) -> String {
        format!("sessionid_{}", self.port)
    }

    fn authenticated(&self, headers: &HeaderMap) -> bool {
        let name = self.cookie_name();
        headers
            .get(header::COOKIE)
            .and_then(|v| v.to_str().ok())
            .into_iter()
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .any(|(k, v)| k == name && self.sessions.contains(v))
    }

    fn trans_mode(&self, params: &Value) -> Option<&str> {
        params
            .get("th")
            .and_then(Value::as_u64)
            .and_then(|th| self.transactions.get(&th))
            .map(String::as_str)
    }
}

type Reply = std::result::Result<Value, RpcErrorObject>;

fn rpc_error(code: i64, kind: &str, message: &str, data: Option<Value>) -> RpcErrorObject {
    let error = RpcErrorObject::new(code, kind, message);
    match data {
        Some(data) => error.with_data(data),
        None => error,
    }
}

fn bad_path() -> RpcErrorObject {
    rpc_error(
        -32602,
        "rpc.method.invalid_params",
        "Invalid parameters",
        Some(json!({ "param": "path" })),
    )
}

fn bad_th() -> RpcErrorObject {
    rpc_error(
        -32602,
        "rpc.method.invalid_params",
        "Invalid parameters",
        Some(json!({ "param": "th" })),
    )
}

fn str_param<'a>(params: &'a Value, name: &str) -> &'a str {
    params.get(name).and_then(Value::as_str).unwrap_or_default()
}

async fn handle_rpc(
    State(state): State<Arc<Mutex<MockState>>>,
    headers: HeaderMap,
    Json(request): Json<Value>,
) -> Response {
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = str_param(&request, "method").to_string();
    let params = request.get("params").cloned().unwrap_or_else(|| json!({}));

    if method == "comet" {
        let reply = comet(&state, &headers, &params).await;
        return respond(id, reply, None);
    }

    handle_call(&state, &headers, &method, &params, id)
}

fn handle_call(
    state: &Mutex<MockState>,
    headers: &HeaderMap,
    method: &str,
    params: &Value,
    id: Value,
) -> Response {
    let mut guard = state.lock().expect("mock state poisoned");
    guard.calls.push((method.to_string(), params.clone()));

    if method == "login" {
        if str_param(params, "user") != "admin" || str_param(params, "passwd") != "admin" {
            let error = rpc_error(-32000, "rpc.method.failed", "Method failed", None);
            return respond(id, Err(error), None);
        }
        let sid = format!("sid{}", guard.next());
        guard.sessions.insert(sid.clone());
        let cookie = format!("{}={}; Path=/; HttpOnly", guard.cookie_name(), sid);
        return respond(id, Ok(json!({})), Some(cookie));
    }

    if !guard.authenticated(headers) {
        let error = rpc_error(
            -32000,
            "session.invalid_sessionid",
            "Invalid sessionid",
            None,
        );
        return respond(id, Err(error), None);
    }

    let reply = dispatch(&mut guard, headers, method, params);
    respond(id, reply, None)
}

fn respond(id: Value, reply: Reply, cookie: Option<String>) -> Response {
    let body = match reply {
        Ok(result) => RpcResponse::success(Some(id), result),
        Err(error) => RpcResponse::error(Some(id), error),
    };
    match cookie {
        Some(cookie) => ([(header::SET_COOKIE, cookie)], Json(body)).into_response(),
        None => Json(body).into_response(),
    }
}

fn dispatch(state: &mut MockState, headers: &HeaderMap, method: &str, params: &Value) -> Reply {
    match method {
        "logout" => {
            let name = state.cookie_name();
            let sid = headers
                .get(header::COOKIE)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| {
                    v.split(';')
                        .filter_map(|p| p.trim().split_once('='))
                        .find(|(k, _)| *k == name)
                        .map(|(_, v)| v.to_string())
                });
            if let Some(sid) = sid {
                state.sessions.remove(&sid);
            }
            Ok(json!({}))
        }
        "get_system_setting" => match str_param(params, "operation") {
            "version" => Ok(json!("6.1.2")),
            other => Ok(json!({ "operation": other })),
        },
        "new_trans" => {
            let th = state.next();
            let mode = params
                .get("mode")
                .and_then(Value::as_str)
                .unwrap_or("read")
                .to_string();
            state.transactions.insert(th, mode);
            Ok(json!({ "th": th }))
        }
        "delete_trans" => {
            let th = params.get("th").and_then(Value::as_u64).unwrap_or_default();
            if state.transactions.remove(&th).is_none() {
                return Err(bad_th());
            }
            state.closed_transactions.push(th);
            Ok(json!({}))
        }
        "get_trans" => {
            let trans: Vec<Value> = state
                .transactions
                .iter()
                .map(|(th, mode)| json!({ "th": th, "mode": mode, "db": "running" }))
                .collect();
            Ok(json!({ "trans": trans }))
        }
        "get_values" => {
            state.trans_mode(params).ok_or_else(bad_th)?;
            let path = str_param(params, "path");
            if !state.path_known(path) {
                return Err(bad_path());
            }
            let check_default = params
                .get("check_default")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let values: Vec<Value> = params
                .get("leafs")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default()
                .iter()
                .map(|leaf| {
                    let full = format!("{}/{}", path, leaf.as_str().unwrap_or_default());
                    leaf_entry(state, &full, check_default)
                })
                .collect();
            Ok(json!({ "values": values }))
        }
        "get_value" => {
            state.trans_mode(params).ok_or_else(bad_th)?;
            let path = str_param(params, "path");
            if !state.path_known(path) {
                return Err(bad_path());
            }
            let check_default = params
                .get("check_default")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            Ok(leaf_entry(state, path, check_default))
        }
        "get_list_keys" => {
            state.trans_mode(params).ok_or_else(bad_th)?;
            let path = str_param(params, "path");
            match state.lists.get(path) {
                Some(keys) => Ok(json!({ "keys": keys })),
                None => Err(rpc_error(-32000, "data.not_found", "Not found", None)),
            }
        }
        "exists" => {
            state.trans_mode(params).ok_or_else(bad_th)?;
            let path = str_param(params, "path");
            Ok(json!({ "exists": state.path_known(path) }))
        }
        "create" | "set_value" | "delete" | "load" => {
            let mode = state.trans_mode(params).ok_or_else(bad_th)?;
            if mode != "read_write" {
                return Err(rpc_error(-32000, "trans.read_only", "Read-only transaction", None));
            }
            let path = str_param(params, "path").to_string();
            match method {
                "create" => {
                    state.containers.insert(path);
                }
                "set_value" => {
                    let dry_run = params.get("dryrun").and_then(Value::as_bool).unwrap_or(false);
                    if !dry_run {
                        let value = params.get("value").cloned().unwrap_or(Value::Null);
                        state.leaves.insert(path, value);
                    }
                }
                "delete" => {
                    if !state.path_known(&path) {
                        return Err(bad_path());
                    }
                    let prefix = format!("{}/", path);
                    state.leaves.retain(|k, _| *k != path && !k.starts_with(&prefix));
                    state.defaults.retain(|k, _| !k.starts_with(&prefix));
                    state.containers.remove(&path);
                }
                _ => {}
            }
            Ok(json!({}))
        }
        "validate_commit" => {
            state.trans_mode(params).ok_or_else(bad_th)?;
            Ok(json!({}))
        }
        "commit" => {
            state.trans_mode(params).ok_or_else(bad_th)?;
            let flags: Vec<&str> = params
                .get("flags")
                .and_then(Value::as_array)
                .map(|f| f.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            match flags.iter().find_map(|f| f.strip_prefix("dry-run=")) {
                Some(format) => {
                    let mut result = serde_json::Map::new();
                    result.insert(
                        format.to_string(),
                        json!({ "local-node": { "data": "+ address 10.0.0.9" } }),
                    );
                    Ok(json!({ "dry_run_result": result }))
                }
                None => Ok(json!({})),
            }
        }
        "show_config" => {
            state.trans_mode(params).ok_or_else(bad_th)?;
            let path = str_param(params, "path");
            if !state.path_known(path) {
                return Err(bad_path());
            }
            Ok(json!({ "config": format!("{} {{\n}}\n", path) }))
        }
        "start_query" => {
            state.trans_mode(params).ok_or_else(bad_th)?;
            let path = str_param(params, "path").to_string();
            if !state.datasets.contains_key(&path) {
                return Err(bad_path());
            }
            let chunk_size = params
                .get("chunk_size")
                .and_then(Value::as_u64)
                .unwrap_or(100) as usize;
            let initial_offset = params
                .get("initial_offset")
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize;
            let qh = state.next();
            state.queries.insert(
                qh,
                QueryCursor {
                    path,
                    chunk_size,
                    initial_offset,
                    position: initial_offset,
                },
            );
            Ok(json!({ "qh": qh }))
        }
        "run_query" | "reset_query" | "stop_query" => {
            let qh = params.get("qh").and_then(Value::as_u64).unwrap_or_default();
            if !state.queries.contains_key(&qh) {
                return Err(rpc_error(-32000, "query.unknown_handle", "Unknown query handle", None));
            }
            match method {
                "stop_query" => {
                    state.queries.remove(&qh);
                    Ok(json!({}))
                }
                "reset_query" => {
                    if let Some(cursor) = state.queries.get_mut(&qh) {
                        cursor.position = cursor.initial_offset;
                    }
                    Ok(json!({}))
                }
                _ => Ok(run_query(state, qh)),
            }
        }
        "subscribe_changes"
        | "subscribe_poll_leaf"
        | "subscribe_cdboper"
        | "subscribe_upgrade"
        | "subscribe_jsonrpc_batch" => {
            let path = str_param(params, "path").to_string();
            let needs_path = !matches!(method, "subscribe_upgrade" | "subscribe_jsonrpc_batch");
            if needs_path && !state.path_known(&path) {
                return Err(bad_path());
            }
            let comet_id = str_param(params, "comet_id").to_string();
            let handle = format!("{}-{}", comet_id, state.next());
            state.subscriptions.insert(
                handle.clone(),
                MockSubscription {
                    comet_id,
                    path,
                    started: false,
                },
            );
            Ok(json!({ "handle": handle }))
        }
        "start_subscription" | "unsubscribe" => {
            let handle = str_param(params, "handle");
            if !state.subscriptions.contains_key(handle) {
                return Err(rpc_error(-32602, "rpc.method.invalid_params", "Unknown handle", Some(json!({ "param": "handle" }))));
            }
            if method == "start_subscription" && state.failing_starts.remove(handle) {
                return Err(rpc_error(-32000, "rpc.method.failed", "Method failed", None));
            }
            if method == "unsubscribe" {
                state.subscriptions.remove(handle);
            } else if let Some(sub) = state.subscriptions.get_mut(handle) {
                sub.started = true;
            }
            Ok(json!({}))
        }
        "get_subscriptions" => {
            let subs: Vec<Value> = state
                .subscriptions
                .iter()
                .map(|(handle, s)| json!({ "handle": handle, "path": s.path, "started": s.started }))
                .collect();
            Ok(json!({ "subscriptions": subs }))
        }
        _ => Err(rpc_error(-32601, "rpc.method.not_found", "Method not found", None)),
    }
}

fn leaf_entry(state: &MockState, full: &str, check_default: bool) -> Value {
    if let Some(value) = state.leaves.get(full) {
        json!({ "value": value })
    } else if let (true, Some(value)) = (check_default, state.defaults.get(full)) {
        json!({ "value": value, "default": true })
    } else {
        json!({})
    }
}

fn run_query(state: &mut MockState, qh: u64) -> Value {
    let Some(cursor) = state.queries.get_mut(&qh) else {
        return Value::Null;
    };
    let rows = state.datasets.get(&cursor.path).cloned().unwrap_or_default();
    let start = cursor.position.min(rows.len());
    let end = (start + cursor.chunk_size).min(rows.len());
    cursor.position = end;
    let page: Vec<Vec<Value>> = rows[start..end].to_vec();
    json!({
        "position": start,
        "total_number_of_results": rows.len(),
        "number_of_results": page.len(),
        "number_of_elements_per_result": page.first().map(Vec::len).unwrap_or(0),
        "results": page,
    })
}

async fn comet(state: &Arc<Mutex<MockState>>, headers: &HeaderMap, params: &Value) -> Reply {
    let comet_id = str_param(params, "comet_id").to_string();
    let hold = {
        let mut guard = state.lock().expect("mock state poisoned");
        guard.calls.push(("comet".to_string(), params.clone()));
        if !guard.authenticated(headers) {
            return Err(rpc_error(-32000, "session.invalid_sessionid", "Invalid sessionid", None));
        }
        guard.comet_hold
    };

    let deadline = Instant::now() + hold;
    loop {
        {
            let mut guard = state.lock().expect("mock state poisoned");
            let queued = guard.comet_queues.remove(&comet_id).unwrap_or_default();
            if !queued.is_empty() {
                return Ok(Value::Array(queued));
            }
        }
        if Instant::now() >= deadline {
            return Ok(json!([]));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
