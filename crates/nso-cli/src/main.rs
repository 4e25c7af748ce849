//! NSO CLI - command-line client for the NSO JSON-RPC API.
//!
//! Each invocation logs in, opens a transaction, runs one command and logs
//! out again.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::{StreamExt, TryStreamExt};
use nso_jsonrpc::render::{to_pretty_json, to_yaml};
use nso_jsonrpc::{
    CancellationToken, ClientConfig, CommitOptions, Credentials, QueryRequest, Scheme, Session,
    ShowConfigFormat, ShowConfigOptions, SystemSetting, TransOptions,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "nso-cli")]
#[command(about = "Command-line client for the NSO JSON-RPC API")]
struct Args {
    /// YAML client configuration; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// http or https
    #[arg(long)]
    scheme: Option<Scheme>,

    /// NSO host name or address
    #[arg(long)]
    ip: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(short, long, env = "NSO_USERNAME")]
    username: Option<String>,

    #[arg(long, env = "NSO_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Accept any TLS certificate
    #[arg(long)]
    insecure: bool,

    /// Request timeout in seconds
    #[arg(long)]
    timeout: Option<f64>,

    /// Pause between comet polls in seconds
    #[arg(long)]
    poll_interval: Option<f64>,

    /// Print results as YAML instead of JSON
    #[arg(long)]
    yaml: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the server version
    Version,
    /// Read leaves below a keypath
    Values {
        path: String,
        #[arg(required = true)]
        fields: Vec<String>,
        /// Report schema defaults for unset leaves
        #[arg(long)]
        check_default: bool,
    },
    /// List the keys of a list
    Keys { path: String },
    /// Stream every row selected below a keypath
    Query {
        path: String,
        #[arg(required = true)]
        selection: Vec<String>,
        #[arg(long, default_value_t = 100)]
        chunk_size: u32,
    },
    /// Render configuration below a keypath
    ShowConfig {
        path: String,
        /// Ask for JSON instead of CLI text
        #[arg(long)]
        json: bool,
    },
    /// Set a leaf and dry-run the commit, or commit with --apply
    Set {
        path: String,
        value: String,
        #[arg(long)]
        apply: bool,
    },
    /// Watch keypaths for committed changes until ctrl-c
    Watch {
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

impl Args {
    fn client_config(&self) -> Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                ClientConfig::from_yaml(&text)?
            }
            None => ClientConfig::default(),
        };

        if let Some(scheme) = self.scheme {
            config.scheme = scheme;
        }
        if let Some(ip) = &self.ip {
            config.ip = ip.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.username.is_some() || self.password.is_some() {
            config.credentials = Credentials::new(
                self.username.clone().unwrap_or(config.credentials.username),
                self.password.clone().unwrap_or(config.credentials.password),
            );
        }
        if self.insecure {
            config.ssl_verify = false;
        }
        if let Some(secs) = self.timeout {
            config.timeout = seconds(secs)?;
        }
        if let Some(secs) = self.poll_interval {
            config.poll_interval = seconds(secs)?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn seconds(secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        bail!("durations must be a non-negative number of seconds, got {}", secs);
    }
    Ok(Duration::from_secs_f64(secs))
}

fn print(value: &Value, yaml: bool) -> Result<()> {
    let rendered = if yaml { to_yaml(value)? } else { to_pretty_json(value)? };
    println!("{}", rendered.trim_end());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging; RUST_LOG wins over --debug
    let default_level = if args.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let config = args.client_config()?;
    info!("Connecting to {}://{}:{}", config.scheme, config.ip, config.port);

    let mut session = Session::connect(config).await?;
    let outcome = run(&mut session, &args.command, args.yaml).await;

    if let Err(e) = session.logout().await {
        warn!("Logout failed: {}", e);
    }
    outcome
}

async fn run(session: &mut Session, command: &Command, yaml: bool) -> Result<()> {
    match command {
        Command::Version => {
            let version = session.get_system_setting(SystemSetting::Version).await?;
            print(&json!({ "version": version }), yaml)
        }
        Command::Values {
            path,
            fields,
            check_default,
        } => {
            session.new_trans(TransOptions::read()).await?;
            let values = session.get_values(path, fields, *check_default).await?;
            let rendered: serde_json::Map<String, Value> = values
                .iter()
                .map(|(name, value)| (name.to_string(), value.value().cloned().unwrap_or(Value::Null)))
                .collect();
            print(&Value::Object(rendered), yaml)
        }
        Command::Keys { path } => {
            session.new_trans(TransOptions::read()).await?;
            let keys = session.get_list_keys(path).await?;
            print(&json!(keys), yaml)
        }
        Command::Query {
            path,
            selection,
            chunk_size,
        } => {
            session.new_trans(TransOptions::read()).await?;
            let handle = session
                .start_query_with(
                    QueryRequest::new(path.as_str(), selection.iter().cloned())
                        .with_chunk_size(*chunk_size),
                )
                .await?;
            let rows: Result<Vec<Vec<Value>>, _> = session.rows(&handle).try_collect().await;
            session.stop_query(&handle).await?;
            print(&json!(rows?), yaml)
        }
        Command::ShowConfig { path, json } => {
            session.new_trans(TransOptions::read()).await?;
            let options = ShowConfigOptions {
                result_as: if *json {
                    ShowConfigFormat::Json
                } else {
                    ShowConfigFormat::String
                },
                ..ShowConfigOptions::default()
            };
            let shown = session.show_config(path, &options).await?;
            match shown.get("config").and_then(Value::as_str) {
                Some(text) => {
                    println!("{}", text.trim_end());
                    Ok(())
                }
                None => print(&shown, yaml),
            }
        }
        Command::Set { path, value, apply } => {
            session.new_trans(TransOptions::read_write()).await?;
            session.set_value(path, json!(value), false).await?;
            let options = if *apply {
                CommitOptions::apply()
            } else {
                CommitOptions::default()
            };
            let result = session.commit(options).await?;
            print(&result, yaml)
        }
        Command::Watch { paths } => watch(session, paths, yaml).await,
    }
}

async fn watch(session: &Session, paths: &[String], yaml: bool) -> Result<()> {
    let mut sub = session.subscription()?;
    for path in paths {
        sub.subscribe_changes(path).await?;
    }
    sub.subscribe_upgrade().await?;
    info!("Watching {} path(s); press ctrl-c to stop", paths.len());

    let token = CancellationToken::new();
    let handler = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handler.cancel();
        }
    });

    // Printing and polling errors end the loop but still unsubscribe.
    let mut outcome = Ok(());
    {
        let mut changes = sub.changes(token);
        while let Some(set) = changes.next().await {
            outcome = set.map_err(anyhow::Error::from).and_then(|set| {
                set.notifications.iter().try_for_each(|notification| {
                    print(
                        &json!({ "path": notification.path, "message": notification.message }),
                        yaml,
                    )
                })
            });
            if outcome.is_err() {
                break;
            }
        }
    }

    info!("Stopping subscription {}", sub.comet_id());
    sub.stop_comet().await?;
    outcome
}
