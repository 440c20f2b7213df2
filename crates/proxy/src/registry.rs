//! Authoritative backend-type registry client
//!
//! The registry only offers a full snapshot of every routing key, so both the
//! startup preload and single-key lookups fetch the whole mapping.

use crate::error::Result;
use async_trait::async_trait;
use config::RegistryConfig;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Routing key to backend-class string, as reported by the registry
pub type AuthoritativeMapping = HashMap<String, String>;

/// Path of the snapshot endpoint, relative to the API server URL
pub const APP_TYPES_PATH: &str = "/api/v1/app-types";

/// Source of truth for routing-key to backend-class mappings
#[async_trait]
pub trait BackendRegistry: Send + Sync {
    /// Full mapping snapshot; `None` when the registry cannot be reached or
    /// returns something unusable.
    async fn fetch_all(&self) -> Option<AuthoritativeMapping>;
}

/// Registry reached over HTTP
pub struct HttpRegistry {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRegistry {
    pub fn new(api_server_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}{}", api_server_url.trim_end_matches('/'), APP_TYPES_PATH),
        })
    }

    pub fn from_config(config: &RegistryConfig) -> Result<Self> {
        Self::new(&config.api_server_url, Duration::from_secs(config.timeout))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn fetch(&self) -> Result<AuthoritativeMapping> {
        let body: serde_json::Map<String, serde_json::Value> = self
            .client
            .get(&self.endpoint)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(into_mapping(body))
    }
}

/// Keep string-valued entries; anything else cannot name a backend class.
fn into_mapping(body: serde_json::Map<String, serde_json::Value>) -> AuthoritativeMapping {
    body.into_iter()
        .filter_map(|(key, value)| match value {
            serde_json::Value::String(class) => Some((key, class)),
            other => {
                debug!(key = %key, value = %other, "Ignoring non-string registry entry");
                None
            }
        })
        .collect()
}

#[async_trait]
impl BackendRegistry for HttpRegistry {
    async fn fetch_all(&self) -> Option<AuthoritativeMapping> {
        debug!(endpoint = %self.endpoint, "Fetching app types from registry");
        match self.fetch().await {
            Ok(mapping) => {
                debug!(entries = mapping.len(), "Registry snapshot received");
                Some(mapping)
            }
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, "Registry fetch failed");
                None
            }
        }
    }
}
