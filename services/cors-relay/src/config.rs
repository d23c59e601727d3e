//! Configuration types and loading
//!
//! Config precedence: env vars > config file > defaults. The file itself is
//! located by CLI arg, then `CONFIG_PATH`, then the default name in the
//! working directory. Only the default file may be absent.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Default config file name
pub const DEFAULT_CONFIG_FILE: &str = "cherry-cors-relay.toml";

/// Env override for `relay.upstream_host`
pub const UPSTREAM_HOST_ENV: &str = "RELAY_UPSTREAM_HOST";

/// Root configuration
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
}

/// URL scheme tried for relative targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Https,
    Http,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Https => "https",
            Scheme::Http => "http",
        }
    }
}

/// Relay settings
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Host (optionally `host:port`) that relative paths are sent to
    #[serde(default = "default_upstream_host")]
    pub upstream_host: String,
    #[serde(default = "default_scheme_order")]
    pub scheme_order: Vec<Scheme>,
    /// Also move on to the next scheme when a candidate answers non-2xx
    #[serde(default)]
    pub fallback_on_error_status: bool,
    /// Per-attempt upstream timeout; unset waits indefinitely
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            upstream_host: default_upstream_host(),
            scheme_order: default_scheme_order(),
            fallback_on_error_status: false,
            timeout_secs: None,
            max_connections: default_max_connections(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8787))
}

fn default_upstream_host() -> String {
    "main.devnew-app.cherryx.ai".to_string()
}

fn default_scheme_order() -> Vec<Scheme> {
    vec![Scheme::Https, Scheme::Http]
}

fn default_max_connections() -> usize {
    1000
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.finish()
    }

    /// Load from the resolved path. A missing file is only tolerated when
    /// neither the CLI nor `CONFIG_PATH` named one.
    pub fn load_resolved(cli_path: Option<&str>) -> common::Result<(Self, PathBuf)> {
        let explicit = cli_path.is_some() || std::env::var_os("CONFIG_PATH").is_some();
        let path = Self::resolve_path(cli_path);
        if !explicit && !path.exists() {
            return Ok((Config::default().finish()?, path));
        }
        Ok((Self::load(&path)?, path))
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from(DEFAULT_CONFIG_FILE)
    }

    fn finish(mut self) -> common::Result<Self> {
        if let Ok(host) = std::env::var(UPSTREAM_HOST_ENV) {
            let host = host.trim().to_string();
            if let Err(reason) = check_upstream_host(&host) {
                return Err(common::Error::Env {
                    var: UPSTREAM_HOST_ENV.into(),
                    reason,
                });
            }
            self.relay.upstream_host = host;
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> common::Result<()> {
        let relay = &self.relay;
        check_upstream_host(&relay.upstream_host)
            .map_err(|reason| common::Error::Config(format!("upstream_host {reason}")))?;

        if relay.scheme_order.is_empty() {
            return Err(common::Error::Config(
                "scheme_order must not be empty".into(),
            ));
        }

        if relay.timeout_secs == Some(0) {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if relay.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}

/// A bare `host` or `host:port`: no scheme, no path.
fn check_upstream_host(host: &str) -> std::result::Result<(), String> {
    if host.is_empty() {
        return Err("must not be empty".into());
    }
    if host.contains("://") {
        return Err(format!("must not include a scheme, got: {host}"));
    }
    if host.contains('/') || host.chars().any(char::is_whitespace) {
        return Err(format!("must be a bare host, got: {host}"));
    }
    Ok(())
}
