//! Literal-hostname bypass routes
//!
//! A request whose hostname exactly matches a rule goes straight to the
//! rule's target. The cache and registry are not consulted.

use crate::error::Result;
use crate::target::Target;
use config::HostOverrideConfig;
use std::collections::HashMap;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct HostOverrides {
    rules: HashMap<String, Target>,
}

impl HostOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(rules: &[HostOverrideConfig]) -> Result<Self> {
        let mut overrides = Self::new();
        for rule in rules {
            overrides.insert(&rule.host, Target::parse(&rule.target)?);
            info!(host = %rule.host, target = %rule.target, "Host override loaded");
        }
        Ok(overrides)
    }

    pub fn insert(&mut self, host: &str, target: Target) {
        self.rules.insert(host.to_string(), target);
    }

    /// Fixed target for an exact hostname match
    pub fn lookup(&self, hostname: &str) -> Option<&Target> {
        self.rules.get(hostname)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(host: &str, target: &str) -> HostOverrideConfig {
        HostOverrideConfig {
            host: host.to_string(),
            target: target.to_string(),
        }
    }

    #[test]
    fn test_exact_match_only() {
        let overrides = HostOverrides::from_config(&[
            rule("app.example.com", "http://bucket.s3-website.example.com"),
            rule("proj.localhost", "https://proj.vercel.app"),
        ])
        .unwrap();

        assert_eq!(overrides.len(), 2);
        let target = overrides.lookup("proj.localhost").unwrap();
        assert!(target.uses_tls());
        assert_eq!(target.host(), "proj.vercel.app");

        assert!(overrides.lookup("app.example.com").is_some());
        assert!(overrides.lookup("www.app.example.com").is_none());
        assert!(overrides.lookup("APP.example.com").is_none());
        assert!(overrides.lookup("app").is_none());
    }

    #[test]
    fn test_invalid_target_rejected() {
        let result = HostOverrides::from_config(&[rule("app.example.com", "not a url")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty() {
        let overrides = HostOverrides::from_config(&[]).unwrap();
        assert!(overrides.is_empty());
        assert!(overrides.lookup("anything").is_none());
    }
}
