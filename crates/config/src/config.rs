//! Configuration structures and parsing for subgate

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Environment variable names read by [`Config::apply_env`]
pub mod env {
    pub const PORT: &str = "PORT";
    pub const CDN_URL: &str = "CDN_URL";
    pub const API_SERVER_URL: &str = "API_SERVER_URL";
    pub const SERVERLESS_BASE_URL: &str = "SERVERLESS_BASE_URL";
    pub const DYNAMIC_PROJECTS_URL: &str = "DYNAMIC_PROJECTS_URL";
    pub const REDIS_URL: &str = "REDIS_URL";
    pub const HOST_OVERRIDES: &str = "HOST_OVERRIDES";
    pub const S3_BUCKET_HOST: &str = "S3_BUCKET_HOST";
    pub const S3_BUCKET_URL: &str = "S3_BUCKET_URL";
    pub const PLATFORM_HOST: &str = "PLATFORM_HOST";
    pub const PLATFORM_URL: &str = "PLATFORM_URL";
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Listener settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Base URLs of the three backend classes
    #[serde(default)]
    pub backends: BackendsConfig,

    /// Authoritative backend-type registry
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Backend-type cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Upstream connection pool and timeouts
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Literal hostnames forwarded to a fixed target, bypassing the cache
    #[serde(default)]
    pub overrides: Vec<HostOverrideConfig>,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML without validating it
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Build the effective configuration: an optional file, then the
    /// process environment on top, then validation.
    pub fn load_with_env(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_toml_str(&std::fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from an environment lookup. Unset or empty variables
    /// leave the current value untouched.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(port) = get(env::PORT) {
            let port: u16 = port.trim().parse().map_err(|_| {
                ConfigError::Validation(format!("{} is not a valid port: {}", env::PORT, port))
            })?;
            self.server.listen = format!("0.0.0.0:{}", port);
        }

        if let Some(v) = get(env::CDN_URL) {
            self.backends.cdn_url = v;
        }
        if let Some(v) = get(env::SERVERLESS_BASE_URL) {
            self.backends.serverless_base_url = v;
        }
        if let Some(v) = get(env::DYNAMIC_PROJECTS_URL) {
            self.backends.dynamic_projects_url = v;
        }
        if let Some(v) = get(env::API_SERVER_URL) {
            self.registry.api_server_url = v;
        }
        if let Some(v) = get(env::REDIS_URL) {
            self.cache.url = Some(v);
        }

        if let Some(list) = get(env::HOST_OVERRIDES) {
            for pair in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let (host, target) = pair.split_once('=').ok_or_else(|| {
                    ConfigError::Validation(format!(
                        "{} entry must be host=url, got: {}",
                        env::HOST_OVERRIDES,
                        pair
                    ))
                })?;
                self.push_override(host.trim(), target.trim());
            }
        }

        for (host_key, url_key) in [
            (env::S3_BUCKET_HOST, env::S3_BUCKET_URL),
            (env::PLATFORM_HOST, env::PLATFORM_URL),
        ] {
            match (get(host_key), get(url_key)) {
                (Some(host), Some(target)) => self.push_override(host.trim(), target.trim()),
                (None, None) => {}
                _ => {
                    return Err(ConfigError::Validation(format!(
                        "{} and {} must be set together",
                        host_key, url_key
                    )))
                }
            }
        }

        Ok(())
    }

    /// Add an override, replacing any existing rule for the same host
    fn push_override(&mut self, host: &str, target: &str) {
        self.overrides.retain(|o| o.host != host);
        debug!(host = %host, target = %target, "Host override configured");
        self.overrides.push(HostOverrideConfig {
            host: host.to_string(),
            target: target.to_string(),
        });
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.listen.parse::<SocketAddr>().map_err(|_| {
            ConfigError::Validation(format!(
                "server.listen is not a socket address: {}",
                self.server.listen
            ))
        })?;

        let required = [
            ("backends.cdn_url", &self.backends.cdn_url),
            ("backends.serverless_base_url", &self.backends.serverless_base_url),
            ("backends.dynamic_projects_url", &self.backends.dynamic_projects_url),
            ("registry.api_server_url", &self.registry.api_server_url),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Validation(format!("{} is not configured", name)));
            }
        }

        if self.upstream.pool_size == 0 {
            return Err(ConfigError::Validation(
                "upstream.pool_size must be greater than zero".to_string(),
            ));
        }

        for rule in &self.overrides {
            if rule.host.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "Host override has an empty host".to_string(),
                ));
            }
            let valid_target = Url::parse(&rule.target)
                .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
                .unwrap_or(false);
            if !valid_target {
                return Err(ConfigError::Validation(format!(
                    "Host override '{}' has an invalid target: {}",
                    rule.host, rule.target
                )));
            }
        }

        Ok(())
    }
}

/// Listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address (host:port)
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Seconds to wait for in-flight requests on shutdown
    #[serde(default = "default_grace_period")]
    pub grace_period: u64,
}

fn default_listen() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_grace_period() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            grace_period: default_grace_period(),
        }
    }
}

/// Base URLs of the backend classes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendsConfig {
    /// Static asset CDN, full URL including scheme
    #[serde(default)]
    pub cdn_url: String,

    /// Serverless function host domain, without scheme
    #[serde(default)]
    pub serverless_base_url: String,

    /// Dynamic projects host (host[:port]), without scheme
    #[serde(default)]
    pub dynamic_projects_url: String,
}

/// Authoritative registry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Base URL of the API server
    #[serde(default)]
    pub api_server_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_registry_timeout")]
    pub timeout: u64,
}

fn default_registry_timeout() -> u64 {
    10
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            api_server_url: String::new(),
            timeout: default_registry_timeout(),
        }
    }
}

/// Backend-type cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Redis connection URL; in-process cache when unset
    #[serde(default)]
    pub url: Option<String>,

    /// TTL in seconds for entries written by the startup preload
    #[serde(default = "default_preload_ttl")]
    pub preload_ttl: u64,

    /// TTL in seconds for entries written after an on-demand lookup
    #[serde(default = "default_resolved_ttl")]
    pub resolved_ttl: u64,
}

fn default_preload_ttl() -> u64 {
    600
}

fn default_resolved_ttl() -> u64 {
    60 * 60 * 24 * 365
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: None,
            preload_ttl: default_preload_ttl(),
            resolved_ttl: default_resolved_ttl(),
        }
    }
}

/// Upstream connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Maximum idle keepalive connections Pingora keeps for reuse.
    ///
    /// Plain and TLS connections never share an entry, but this cap covers
    /// both together.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Connect timeout in seconds
    #[serde(default)]
    pub connect_timeout: Option<u64>,

    /// Read timeout in seconds
    #[serde(default)]
    pub read_timeout: Option<u64>,

    /// Idle timeout in seconds for pooled connections
    #[serde(default)]
    pub idle_timeout: Option<u64>,
}

fn default_pool_size() -> usize {
    100
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            connect_timeout: None,
            read_timeout: None,
            idle_timeout: None,
        }
    }
}

/// A literal hostname routed straight to a fixed target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostOverrideConfig {
    /// Exact hostname to match (no port)
    pub host: String,
    /// Absolute http(s) target URL
    pub target: String,
}
