//! Per-request routing decision
//!
//! Turns an inbound Host into either a 404 or a [`ForwardPlan`] holding
//! everything the gateway needs to rewrite the outbound request: target,
//! request path and extra headers. The plan is computed up front so the
//! proxy hooks only apply it.

use crate::backend::{self, BackendClass};
use crate::error::Result;
use crate::overrides::HostOverrides;
use crate::resolver::RouteResolver;
use crate::target::{Target, TargetBuilder};
use config::Config;
use tracing::debug;

/// Body of the response for an unknown subdomain
pub const NOT_FOUND_BODY: &str = "Application not found";

pub const FORWARDED_FOR_HEADER: &str = "X-Forwarded-For";
pub const REAL_IP_HEADER: &str = "X-Real-IP";
pub const PROJECT_PATH_HEADER: &str = "X-Project-Path";

/// How a forwarded request was routed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Literal-hostname bypass
    Override { host: String },
    /// Resolved through the cache or registry
    Resolved { key: String, class: BackendClass },
}

/// Outcome of dispatching one request
#[derive(Debug, Clone)]
pub enum Dispatch {
    Forward(ForwardPlan),
    NotFound { key: Option<String> },
}

/// Target plus the routing facts needed to rewrite the outbound request
#[derive(Debug, Clone)]
pub struct ForwardPlan {
    pub target: Target,
    pub route: Route,
}

impl ForwardPlan {
    pub fn class(&self) -> Option<BackendClass> {
        match &self.route {
            Route::Resolved { class, .. } => Some(*class),
            Route::Override { .. } => None,
        }
    }

    /// Label for logs and counters
    pub fn label(&self) -> &'static str {
        self.class().map_or("override", |c| c.as_str())
    }

    /// Outbound request target for an inbound request target.
    ///
    /// A static site requested at exactly `/` is served its `index.html`.
    pub fn upstream_path(&self, request_target: &str) -> String {
        let mut path = self.target.upstream_path(request_target);
        if self.class() == Some(BackendClass::Static) && request_target == "/" {
            path.push_str("index.html");
        }
        path
    }

    /// Headers to set on the outbound request, replacing inbound values.
    ///
    /// `X-Project-Path` is sent for every resolved class, not only static.
    pub fn upstream_headers(&self, client_ip: Option<&str>) -> Vec<(&'static str, String)> {
        let mut headers = Vec::with_capacity(3);
        if let Some(ip) = client_ip {
            headers.push((FORWARDED_FOR_HEADER, ip.to_string()));
            headers.push((REAL_IP_HEADER, ip.to_string()));
        }
        if let Route::Resolved { key, .. } = &self.route {
            headers.push((PROJECT_PATH_HEADER, format!("/outputs/{}", key)));
        }
        headers
    }
}

/// Routes requests by Host: overrides first, then the resolver
pub struct Dispatcher {
    resolver: RouteResolver,
    targets: TargetBuilder,
    overrides: HostOverrides,
}

impl Dispatcher {
    pub fn new(resolver: RouteResolver, targets: TargetBuilder, overrides: HostOverrides) -> Self {
        Self {
            resolver,
            targets,
            overrides,
        }
    }

    pub fn from_config(config: &Config, resolver: RouteResolver) -> Result<Self> {
        let targets = TargetBuilder::from_config(&config.backends);
        // Surface malformed base URLs at startup rather than per request
        for class in [BackendClass::Static, BackendClass::Serverless, BackendClass::Dynamic] {
            targets.build(class, "probe")?;
        }
        let overrides = HostOverrides::from_config(&config.overrides)?;
        Ok(Self::new(resolver, targets, overrides))
    }

    pub fn resolver(&self) -> &RouteResolver {
        &self.resolver
    }

    /// Decide where a request for `host` goes.
    ///
    /// Errors only when a resolved key yields an unusable target URL.
    pub async fn dispatch(&self, host: Option<&str>) -> Result<Dispatch> {
        let Some(hostname) = host.map(backend::hostname) else {
            debug!("Request without host");
            return Ok(Dispatch::NotFound { key: None });
        };

        if let Some(target) = self.overrides.lookup(hostname) {
            debug!(host = %hostname, target = %target.url(), "Host override");
            return Ok(Dispatch::Forward(ForwardPlan {
                target: target.clone(),
                route: Route::Override {
                    host: hostname.to_string(),
                },
            }));
        }

        let Some(key) = backend::routing_key(hostname) else {
            debug!(host = %hostname, "No usable routing key");
            return Ok(Dispatch::NotFound { key: None });
        };

        let Some(class) = self.resolver.resolve(key).await else {
            return Ok(Dispatch::NotFound {
                key: Some(key.to_string()),
            });
        };

        let target = self.targets.build(class, key)?;
        debug!(
            host = %hostname,
            key = %key,
            class = %class,
            target = %target.url(),
            "Dispatching request"
        );

        Ok(Dispatch::Forward(ForwardPlan {
            target,
            route: Route::Resolved {
                key: key.to_string(),
                class,
            },
        }))
    }
}
