//! Upstream target URLs per backend class

use crate::backend::BackendClass;
use crate::error::{ProxyError, Result};
use config::BackendsConfig;
use url::Url;

/// A parsed upstream target.
///
/// Recomputed for every request; the scheme decides whether the request
/// goes through the TLS or the plain connection pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    url: Url,
    uses_tls: bool,
}

impl Target {
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = |reason: &str| ProxyError::InvalidTarget {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let parsed = Url::parse(url).map_err(|e| invalid(&e.to_string()))?;
        let uses_tls = match parsed.scheme() {
            "https" => true,
            "http" => false,
            _ => return Err(invalid("scheme must be http or https")),
        };
        if parsed.host_str().is_none() {
            return Err(invalid("missing host"));
        }

        Ok(Self {
            url: parsed,
            uses_tls,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn uses_tls(&self) -> bool {
        self.uses_tls
    }

    /// Host without brackets, used for DNS and SNI
    pub fn host(&self) -> &str {
        let host = self.url.host_str().unwrap_or_default();
        host.trim_start_matches('[').trim_end_matches(']')
    }

    pub fn port(&self) -> u16 {
        self.url
            .port_or_known_default()
            .unwrap_or(if self.uses_tls { 443 } else { 80 })
    }

    /// Value for the outbound Host header
    pub fn host_header(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// Join the target's path with the inbound request target (path and
    /// query), as the upstream request line.
    pub fn upstream_path(&self, request_target: &str) -> String {
        let prefix = self.url.path().trim_end_matches('/');
        let joined = if request_target.starts_with('/') {
            format!("{}{}", prefix, request_target)
        } else {
            format!("{}/{}", prefix, request_target)
        };
        if joined.is_empty() {
            "/".to_string()
        } else {
            joined
        }
    }
}

/// Builds upstream targets from the configured backend bases
#[derive(Debug, Clone)]
pub struct TargetBuilder {
    cdn_url: String,
    serverless_base_url: String,
    dynamic_projects_url: String,
}

impl TargetBuilder {
    pub fn new(
        cdn_url: impl Into<String>,
        serverless_base_url: impl Into<String>,
        dynamic_projects_url: impl Into<String>,
    ) -> Self {
        Self {
            cdn_url: cdn_url.into().trim_end_matches('/').to_string(),
            serverless_base_url: serverless_base_url.into(),
            dynamic_projects_url: dynamic_projects_url.into(),
        }
    }

    pub fn from_config(config: &BackendsConfig) -> Self {
        Self::new(
            config.cdn_url.clone(),
            config.serverless_base_url.clone(),
            config.dynamic_projects_url.clone(),
        )
    }

    /// Target URL for a routing key served by `class`
    pub fn build_url(&self, class: BackendClass, key: &str) -> String {
        match class {
            BackendClass::Static => format!("{}/outputs/{}/", self.cdn_url, key),
            BackendClass::Serverless => format!("https://{}.{}/", key, self.serverless_base_url),
            BackendClass::Dynamic => {
                format!("http://{}/projects/{}/", self.dynamic_projects_url, key)
            }
        }
    }

    pub fn build(&self, class: BackendClass, key: &str) -> Result<Target> {
        Target::parse(&self.build_url(class, key))
    }
}
