//! Backend classes and routing-key extraction

use std::fmt;

/// The category of upstream that serves a routing key.
///
/// The registry reports classes as strings. `"static"` and `"serverless"`
/// are recognised; every other value is served by the dynamic projects host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendClass {
    Static,
    Serverless,
    Dynamic,
}

impl BackendClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendClass::Static => "static",
            BackendClass::Serverless => "serverless",
            BackendClass::Dynamic => "dynamic",
        }
    }
}

impl From<&str> for BackendClass {
    fn from(value: &str) -> Self {
        match value {
            "static" => BackendClass::Static,
            "serverless" => BackendClass::Serverless,
            _ => BackendClass::Dynamic,
        }
    }
}

impl fmt::Display for BackendClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strip an optional port from a Host value.
///
/// Bracketed IPv6 literals keep their brackets removed along with the port.
pub fn hostname(host: &str) -> &str {
    let host = host.trim();
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}

/// The routing key of a hostname: everything before the first `.`.
///
/// Matching is case-sensitive. The key is spliced into upstream URLs, so
/// only ASCII letters, digits and `-` are accepted; anything else, or an
/// empty key, yields `None`.
pub fn routing_key(hostname: &str) -> Option<&str> {
    let key = hostname.split('.').next().unwrap_or_default();
    let valid = !key.is_empty() && key.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-');
    valid.then_some(key)
}
