//! subgate-proxy: Subdomain routing for subgate
//!
//! Resolves the first label of the Host header to a backend class through a
//! cache-aside lookup (cache first, then the authoritative registry), builds
//! the upstream target for that class and forwards the request with Pingora.

pub mod backend;
pub mod cache;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod overrides;
pub mod proxy;
pub mod registry;
pub mod resolver;
pub mod target;

#[cfg(test)]
mod testing;

pub use backend::{hostname, routing_key, BackendClass};
pub use cache::{BackendCache, MemoryBackendCache, RedisBackendCache};
pub use dispatch::{Dispatch, Dispatcher, ForwardPlan, Route, NOT_FOUND_BODY};
pub use error::*;
pub use metrics::{metrics, wait_for_connections_drain, MetricsRegistry, RequestTimer};
pub use overrides::HostOverrides;
pub use proxy::SubgateProxy;
pub use registry::{AuthoritativeMapping, BackendRegistry, HttpRegistry};
pub use resolver::{RouteResolver, PRELOAD_TTL, RESOLVED_TTL};
pub use target::{Target, TargetBuilder};
