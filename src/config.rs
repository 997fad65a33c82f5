//! Adapter configuration.
//!
//! Mirrors the adapter's configuration block:
//!
//! ```ignore
//! graphite:
//!   carbon: { host: localhost, port: 2003 }
//!   webapp: { host: localhost, port: 8080, username: guest, password: guest }
//! ```

use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{AdapterError, Result};

/// Configuration for a [`GraphiteAdapter`](crate::GraphiteAdapter).
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GraphiteConfig {
    /// Carbon plaintext listener receiving writes.
    #[serde(default)]
    pub carbon: CarbonConfig,

    /// Graphite-web instance serving the render API for reads.
    #[serde(default)]
    pub webapp: WebappConfig,

    /// How long a live tail sleeps between polls, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Timeout applied to each render API request, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for GraphiteConfig {
    fn default() -> Self {
        Self {
            carbon: CarbonConfig::default(),
            webapp: WebappConfig::default(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CarbonConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_carbon_port")]
    pub port: u16,
}

impl Default for CarbonConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_carbon_port(),
        }
    }
}

impl CarbonConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct WebappConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_webapp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for WebappConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_webapp_port(),
            username: None,
            password: None,
        }
    }
}

impl WebappConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_carbon_port() -> u16 {
    2003
}

fn default_webapp_port() -> u16 {
    8080
}

impl GraphiteConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Builds a configuration from `GRAPHITE_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = GraphiteConfig::default();

        if let Some(host) = lookup("GRAPHITE_CARBON_HOST") {
            config.carbon.host = host;
        }
        if let Some(port) = parse_var(&lookup, "GRAPHITE_CARBON_PORT")? {
            config.carbon.port = port;
        }
        if let Some(host) = lookup("GRAPHITE_WEBAPP_HOST") {
            config.webapp.host = host;
        }
        if let Some(port) = parse_var(&lookup, "GRAPHITE_WEBAPP_PORT")? {
            config.webapp.port = port;
        }
        config.webapp.username = lookup("GRAPHITE_USERNAME");
        config.webapp.password = lookup("GRAPHITE_PASSWORD");
        if let Some(interval) = parse_var(&lookup, "GRAPHITE_POLL_INTERVAL_MS")? {
            config.poll_interval_ms = interval;
        }
        if let Some(timeout) = parse_var(&lookup, "GRAPHITE_REQUEST_TIMEOUT_MS")? {
            config.request_timeout_ms = timeout;
        }

        Ok(config)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| AdapterError::Config(format!("{key}={raw:?}: {e}")))
        })
        .transpose()
}
