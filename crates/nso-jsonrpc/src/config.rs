//! Client configuration.
//!
//! Constants live on [`NsoConfig`]; per-client settings live on
//! [`ClientConfig`], which can be built in code or deserialized.

use crate::{NsoError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Protocol-level constants.
pub struct NsoConfig;

impl NsoConfig {
    pub const DEFAULT_HOST: &'static str = "127.0.0.1";
    pub const DEFAULT_PORT: u16 = 8080;
    pub const ENDPOINT_PATH: &'static str = "/jsonrpc";
    pub const DEFAULT_USERNAME: &'static str = "admin";
    pub const DEFAULT_PASSWORD: &'static str = "admin";
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    /// Must exceed the server's own long-poll hold time.
    pub const POLL_TIMEOUT: Duration = Duration::from_secs(90);
    pub const POLL_INTERVAL: Duration = Duration::from_secs(1);
    pub const QUERY_CHUNK_SIZE: u32 = 100;
    pub const DEFAULT_DB: &'static str = "running";
    pub const USER_AGENT: &'static str = "nso-jsonrpc/0.1";
}

/// Transport scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = NsoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            other => Err(NsoError::Config {
                message: format!("scheme must be http or https, got {:?}", other),
            }),
        }
    }
}

/// Login credentials.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::new(NsoConfig::DEFAULT_USERNAME, NsoConfig::DEFAULT_PASSWORD)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Settings for one client instance.
///
/// `ssl_verify` defaults to `true`. Turning it off accepts any certificate the
/// server presents and is logged at WARN when the transport is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub scheme: Scheme,
    pub ip: String,
    pub port: u16,
    pub ssl_verify: bool,
    pub credentials: Credentials,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    #[serde(with = "duration_secs")]
    pub poll_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            scheme: Scheme::default(),
            ip: NsoConfig::DEFAULT_HOST.to_string(),
            port: NsoConfig::DEFAULT_PORT,
            ssl_verify: true,
            credentials: Credentials::default(),
            timeout: NsoConfig::REQUEST_TIMEOUT,
            poll_timeout: NsoConfig::POLL_TIMEOUT,
            poll_interval: NsoConfig::POLL_INTERVAL,
        }
    }
}

impl ClientConfig {
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            ..Self::default()
        }
    }

    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Disable or enable TLS certificate verification.
    pub fn with_ssl_verify(mut self, ssl_verify: bool) -> Self {
        self.ssl_verify = ssl_verify;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Full endpoint URL, e.g. `http://127.0.0.1:8080/jsonrpc`.
    pub fn endpoint(&self) -> Result<Url> {
        if self.ip.is_empty() {
            return Err(NsoError::Config {
                message: "ip must not be empty".to_string(),
            });
        }
        let host = if self.ip.contains(':') && !self.ip.starts_with('[') {
            format!("[{}]", self.ip)
        } else {
            self.ip.clone()
        };
        let url = Url::parse(&format!(
            "{}://{}:{}{}",
            self.scheme,
            host,
            self.port,
            NsoConfig::ENDPOINT_PATH
        ))?;
        Ok(url)
    }

    /// Parse a YAML document; missing keys take their defaults.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check timeouts are usable.
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() || self.poll_timeout.is_zero() {
            return Err(NsoError::Config {
                message: "timeout and poll_timeout must be non-zero".to_string(),
            });
        }
        self.endpoint().map(|_| ())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be a non-negative number of seconds"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}
