//! Config accessor: reads and writes addressed by keypath inside the active
//! transaction.
//!
//! Keypaths are passed to the server verbatim. Every call here needs a
//! logged-in session with an open transaction; writes additionally need that
//! transaction to be `read_write`.

use crate::session::Session;
use crate::{NsoError, Result};
use serde_json::{json, Value};

/// State of one leaf as reported by `get_value`/`get_values`.
#[derive(Debug, Clone, PartialEq)]
pub enum LeafValue {
    /// Explicitly configured value.
    Set(Value),
    /// Schema default; only reported when `check_default` was requested.
    Default(Value),
    /// No value configured.
    Unset,
    /// The server refused the leaf, e.g. access denied.
    Error(String),
}

impl LeafValue {
    fn from_entry(entry: &Value) -> Self {
        if let Some(err) = entry.get("error") {
            let message = err
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string());
            return LeafValue::Error(message);
        }
        match entry.get("value") {
            Some(value) if entry.get("default").and_then(Value::as_bool) == Some(true) => {
                LeafValue::Default(value.clone())
            }
            Some(value) => LeafValue::Set(value.clone()),
            None => LeafValue::Unset,
        }
    }

    /// The value, whether configured or defaulted.
    pub fn value(&self) -> Option<&Value> {
        match self {
            LeafValue::Set(v) | LeafValue::Default(v) => Some(v),
            LeafValue::Unset | LeafValue::Error(_) => None,
        }
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, LeafValue::Unset)
    }
}

/// Leaf values keyed by field name, in the order the fields were requested.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeafValues {
    entries: Vec<(String, LeafValue)>,
}

impl LeafValues {
    pub fn get(&self, field: &str) -> Option<&LeafValue> {
        self.entries
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LeafValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One list entry's key values.
pub type KeyTuple = Vec<String>;

/// `show_config` output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShowConfigFormat {
    #[default]
    String,
    Json,
}

/// Options for `show_config`.
#[derive(Debug, Clone, Default)]
pub struct ShowConfigOptions {
    pub result_as: ShowConfigFormat,
    pub with_oper: bool,
    /// Maximum result size in bytes; 0 for no limit.
    pub max_size: u64,
}

/// `deref` result shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DerefResultAs {
    #[default]
    Paths,
    Target,
    ListTarget,
}

impl DerefResultAs {
    pub fn as_str(&self) -> &'static str {
        match self {
            DerefResultAs::Paths => "paths",
            DerefResultAs::Target => "target",
            DerefResultAs::ListTarget => "list-target",
        }
    }
}

/// Payload format for `load`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadFormat {
    Json,
    #[default]
    Xml,
}

/// How `load` merges its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMode {
    Create,
    #[default]
    Merge,
    Replace,
}

/// Options for `load`.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub path: String,
    pub format: LoadFormat,
    pub mode: LoadMode,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            format: LoadFormat::default(),
            mode: LoadMode::default(),
        }
    }
}

/// Dry-run output format for `commit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DryRunOutput {
    Cli,
    Native,
    Xml,
}

impl DryRunOutput {
    pub fn as_str(&self) -> &'static str {
        match self {
            DryRunOutput::Cli => "cli",
            DryRunOutput::Native => "native",
            DryRunOutput::Xml => "xml",
        }
    }
}

/// Options for `commit`.
///
/// The default is a `cli` dry run; use [`CommitOptions::apply`] to actually
/// commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOptions {
    pub dry_run: Option<DryRunOutput>,
    /// Also render the reverse diff; only honoured for native dry runs.
    pub reverse: bool,
}

impl Default for CommitOptions {
    fn default() -> Self {
        Self::dry_run(DryRunOutput::Cli)
    }
}

impl CommitOptions {
    pub fn apply() -> Self {
        Self {
            dry_run: None,
            reverse: false,
        }
    }

    pub fn dry_run(output: DryRunOutput) -> Self {
        Self {
            dry_run: Some(output),
            reverse: false,
        }
    }

    pub fn with_reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    fn flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if let Some(output) = self.dry_run {
            flags.push(format!("dry-run={}", output.as_str()));
            if output == DryRunOutput::Native && self.reverse {
                flags.push("dry-run-reverse".to_string());
            }
        }
        flags
    }
}

impl Session {
    /// Read several leaves below `path`.
    ///
    /// With `check_default` set, leaves holding only their schema default are
    /// reported as [`LeafValue::Default`]; otherwise they come back unset.
    pub async fn get_values<S: AsRef<str>>(
        &self,
        path: &str,
        fields: &[S],
        check_default: bool,
    ) -> Result<LeafValues> {
        let th = self.active_trans("get_values")?.th();
        let leafs: Vec<&str> = fields.iter().map(|f| f.as_ref()).collect();
        let result = self
            .call_at(
                "get_values",
                path,
                json!({
                    "th": th,
                    "path": path,
                    "leafs": leafs,
                    "check_default": check_default,
                }),
            )
            .await?;

        let values = result
            .get("values")
            .and_then(Value::as_array)
            .ok_or_else(|| malformed("get_values", &result))?;
        if values.len() != leafs.len() {
            return Err(NsoError::Json {
                message: format!(
                    "get_values returned {} values for {} leafs",
                    values.len(),
                    leafs.len()
                ),
                source: None,
            });
        }

        Ok(LeafValues {
            entries: leafs
                .iter()
                .zip(values)
                .map(|(name, entry)| (name.to_string(), LeafValue::from_entry(entry)))
                .collect(),
        })
    }

    /// Read a single leaf.
    pub async fn get_value(&self, path: &str, check_default: bool) -> Result<LeafValue> {
        let th = self.active_trans("get_value")?.th();
        let result = self
            .call_at(
                "get_value",
                path,
                json!({ "th": th, "path": path, "check_default": check_default }),
            )
            .await?;
        Ok(LeafValue::from_entry(&result))
    }

    /// Keys of the list at `path`; an empty list yields an empty vector.
    pub async fn get_list_keys(&self, path: &str) -> Result<Vec<KeyTuple>> {
        let th = self.active_trans("get_list_keys")?.th();
        let result = self
            .call_at("get_list_keys", path, json!({ "th": th, "path": path }))
            .await?;

        let keys = match result.get("keys") {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::Array(keys)) => keys,
            Some(_) => return Err(malformed("get_list_keys", &result)),
        };

        Ok(keys
            .iter()
            .map(|tuple| match tuple {
                Value::Array(parts) => parts.iter().map(key_part).collect(),
                single => vec![key_part(single)],
            })
            .collect())
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        let th = self.active_trans("exists")?.th();
        let result = self
            .call_at("exists", path, json!({ "th": th, "path": path }))
            .await?;
        result
            .get("exists")
            .and_then(Value::as_bool)
            .ok_or_else(|| malformed("exists", &result))
    }

    /// Create a list entry or presence container.
    pub async fn create(&self, path: &str) -> Result<()> {
        let th = self.writable_trans("create")?.th();
        self.call_at("create", path, json!({ "th": th, "path": path }))
            .await?;
        Ok(())
    }

    /// Set a leaf value. With `dry_run` the server validates without writing.
    pub async fn set_value(&self, path: &str, value: Value, dry_run: bool) -> Result<Value> {
        let th = self.writable_trans("set_value")?.th();
        self.call_at(
            "set_value",
            path,
            json!({ "th": th, "path": path, "value": value, "dryrun": dry_run }),
        )
        .await
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        let th = self.writable_trans("delete")?.th();
        self.call_at("delete", path, json!({ "th": th, "path": path }))
            .await?;
        Ok(())
    }

    /// Load a JSON or XML payload into the transaction.
    pub async fn load(&self, data: &str, options: &LoadOptions) -> Result<Value> {
        let th = self.writable_trans("load")?.th();
        let format = match options.format {
            LoadFormat::Json => "json",
            LoadFormat::Xml => "xml",
        };
        let mode = match options.mode {
            LoadMode::Create => "create",
            LoadMode::Merge => "merge",
            LoadMode::Replace => "replace",
        };
        self.call_at(
            "load",
            &options.path,
            json!({
                "th": th,
                "data": data,
                "path": options.path,
                "format": format,
                "mode": mode,
            }),
        )
        .await
    }

    pub async fn validate_commit(&self) -> Result<Value> {
        let th = self.writable_trans("validate_commit")?.th();
        self.call("validate_commit", json!({ "th": th })).await
    }

    /// Commit the transaction, or dry-run it (the default).
    pub async fn commit(&self, options: CommitOptions) -> Result<Value> {
        let th = self.writable_trans("commit")?.th();
        self.call("commit", json!({ "th": th, "flags": options.flags() }))
            .await
    }

    /// Render the configuration below `path`.
    pub async fn show_config(&self, path: &str, options: &ShowConfigOptions) -> Result<Value> {
        let th = self.active_trans("show_config")?.th();
        let result_as = match options.result_as {
            ShowConfigFormat::String => "string",
            ShowConfigFormat::Json => "json",
        };
        self.call_at(
            "show_config",
            path,
            json!({
                "th": th,
                "path": path,
                "result_as": result_as,
                "with_oper": options.with_oper,
                "max_size": options.max_size,
            }),
        )
        .await
    }

    /// Follow a leafref at `path`.
    pub async fn deref(&self, path: &str, result_as: DerefResultAs) -> Result<Value> {
        let th = self.active_trans("deref")?.th();
        self.call_at(
            "deref",
            path,
            json!({ "th": th, "path": path, "result_as": result_as.as_str() }),
        )
        .await
    }

    /// Values a leafref at `path` may point to.
    pub async fn get_leafref_values(
        &self,
        path: &str,
        skip_grouping: bool,
        keys: Option<&[String]>,
    ) -> Result<Value> {
        let th = self.active_trans("get_leafref_values")?.th();
        let mut params = json!({ "th": th, "path": path, "skip_grouping": skip_grouping });
        if let Some(keys) = keys {
            params["keys"] = json!(keys);
        }
        self.call_at("get_leafref_values", path, params).await
    }

    /// Invoke the action at `path` with optional input parameters.
    pub async fn run_action(&self, path: &str, input: Option<Value>) -> Result<Value> {
        let th = self.active_trans("run_action")?.th();
        let mut params = json!({ "th": th, "path": path });
        if let Some(input) = input {
            params["params"] = input;
        }
        self.call_at("run_action", path, params).await
    }

    pub async fn get_schema(&self, path: &str) -> Result<Value> {
        let th = self.active_trans("get_schema")?.th();
        self.call_at("get_schema", path, json!({ "th": th, "path": path }))
            .await
    }

    /// Which case of `choice` is active at `path`.
    pub async fn get_case(&self, path: &str, choice: &str) -> Result<Value> {
        let th = self.active_trans("get_case")?.th();
        self.call_at(
            "get_case",
            path,
            json!({ "th": th, "path": path, "choice": choice }),
        )
        .await
    }

    /// Service points registered on the server. Needs no transaction.
    pub async fn get_service_points(&self) -> Result<Value> {
        self.call("get_service_points", json!({})).await
    }

    pub async fn get_template_variables(&self, name: &str) -> Result<Value> {
        let th = self.active_trans("get_template_variables")?.th();
        self.call("get_template_variables", json!({ "th": th, "name": name }))
            .await
    }
}

fn key_part(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn malformed(method: &str, result: &Value) -> NsoError {
    NsoError::Json {
        message: format!("unexpected {} result: {}", method, result),
        source: None,
    }
}
