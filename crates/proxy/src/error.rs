//! Error types for subgate-proxy

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("Registry error: {0}")]
    Registry(#[from] reqwest::Error),

    #[error("Invalid target URL '{url}': {reason}")]
    InvalidTarget { url: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ProxyError>;
