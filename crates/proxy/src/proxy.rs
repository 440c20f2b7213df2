//! Gateway implementation using Pingora's ProxyHttp trait

use crate::dispatch::{Dispatch, Dispatcher, ForwardPlan, NOT_FOUND_BODY};
use crate::metrics::{metrics, RequestTimer};
use async_trait::async_trait;
use bytes::Bytes;
use config::UpstreamConfig;
use http::StatusCode;
use pingora::prelude::*;
use pingora_http::{RequestHeader, ResponseHeader};
use pingora_proxy::{ProxyHttp, Session};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Per-request context
pub struct RequestCtx {
    /// Routing decision made in `request_filter`
    pub plan: Option<ForwardPlan>,
    pub timer: RequestTimer,
}

impl RequestCtx {
    pub fn new() -> Self {
        Self {
            plan: None,
            timer: RequestTimer::new(),
        }
    }
}

impl Default for RequestCtx {
    fn default() -> Self {
        Self::new()
    }
}

/// Subdomain-routing gateway
#[derive(Clone)]
pub struct SubgateProxy {
    dispatcher: Arc<Dispatcher>,
    upstream: UpstreamConfig,
}

impl SubgateProxy {
    pub fn new(dispatcher: Dispatcher, upstream: UpstreamConfig) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            upstream,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Warm the backend-type cache. Failures are logged, never returned.
    pub async fn preload(&self) -> Option<usize> {
        self.dispatcher.resolver().preload_all().await
    }

    async fn send_not_found(&self, session: &mut Session) -> Result<bool> {
        let mut header = ResponseHeader::build(StatusCode::NOT_FOUND, None)?;
        header.insert_header("Content-Type", "text/plain; charset=utf-8")?;
        header.insert_header("Content-Length", NOT_FOUND_BODY.len().to_string())?;

        session.write_response_header(Box::new(header), false).await?;
        session
            .write_response_body(Some(Bytes::from_static(NOT_FOUND_BODY.as_bytes())), true)
            .await?;

        Ok(true)
    }
}

/// Host used for routing: the Host header, or the URI authority for HTTP/2
pub fn request_host(req: &RequestHeader) -> Option<&str> {
    req.headers
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| req.uri.authority().map(|a| a.as_str()))
}

/// The inbound request target (path and query)
pub fn request_target(req: &RequestHeader) -> &str {
    req.uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
}

/// Rewrite the outbound request line and headers for `plan`.
///
/// The Host header becomes the target's own host, and forwarding headers
/// replace whatever the client sent.
pub fn apply_plan(
    plan: &ForwardPlan,
    request_target: &str,
    client_ip: Option<&str>,
    req: &mut RequestHeader,
) -> Result<()> {
    let path = plan.upstream_path(request_target);
    let uri: http::Uri = path.parse().map_err(|e| {
        Error::because(ErrorType::InternalError, format!("invalid upstream path {}", path), e)
    })?;
    req.set_uri(uri);

    req.insert_header("Host", plan.target.host_header())?;
    for (name, value) in plan.upstream_headers(client_ip) {
        req.insert_header(name, value)?;
    }

    debug!(path = %path, class = plan.label(), "Upstream request prepared");
    Ok(())
}

fn client_ip(session: &Session) -> Option<String> {
    session
        .client_addr()
        .and_then(|addr| addr.as_inet())
        .map(|addr| addr.ip().to_string())
}

#[async_trait]
impl ProxyHttp for SubgateProxy {
    type CTX = RequestCtx;

    fn new_ctx(&self) -> Self::CTX {
        RequestCtx::new()
    }

    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> Result<bool> {
        let host = request_host(session.req_header()).map(str::to_string);

        let dispatch = self.dispatcher.dispatch(host.as_deref()).await.map_err(|e| {
            Error::because(
                ErrorType::HTTPStatus(502),
                "failed to build upstream target",
                e,
            )
        })?;

        match dispatch {
            Dispatch::Forward(plan) => {
                ctx.plan = Some(plan);
                Ok(false)
            }
            Dispatch::NotFound { key } => {
                metrics().not_found.inc();
                info!(host = ?host, key = ?key, "Subdomain not found");
                self.send_not_found(session).await
            }
        }
    }

    async fn upstream_peer(&self, _session: &mut Session, ctx: &mut Self::CTX) -> Result<Box<HttpPeer>> {
        let plan = ctx
            .plan
            .as_ref()
            .ok_or_else(|| Error::explain(ErrorType::InternalError, "no dispatch plan"))?;
        let target = &plan.target;

        let addr = tokio::net::lookup_host((target.host(), target.port()))
            .await
            .map_err(|e| {
                Error::because(
                    ErrorType::ConnectNoRoute,
                    format!("failed to resolve {}", target.host()),
                    e,
                )
            })?
            .next()
            .ok_or_else(|| {
                Error::explain(
                    ErrorType::ConnectNoRoute,
                    format!("no address for {}", target.host()),
                )
            })?;

        // The TLS flag is part of the pool key, so https and http targets
        // reuse connections from separate pools.
        let mut peer = HttpPeer::new(addr, target.uses_tls(), target.host().to_string());

        if let Some(secs) = self.upstream.connect_timeout {
            peer.options.connection_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(secs) = self.upstream.read_timeout {
            peer.options.read_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(secs) = self.upstream.idle_timeout {
            peer.options.idle_timeout = Some(Duration::from_secs(secs));
        }

        debug!(upstream = %addr, tls = target.uses_tls(), "Connecting to upstream");
        Ok(Box::new(peer))
    }

    async fn upstream_request_filter(
        &self,
        session: &mut Session,
        upstream_request: &mut RequestHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()> {
        let Some(plan) = ctx.plan.as_ref() else {
            return Ok(());
        };

        let ip = client_ip(session);
        apply_plan(plan, request_target(session.req_header()), ip.as_deref(), upstream_request)
    }

    async fn logging(&self, session: &mut Session, e: Option<&pingora_core::Error>, ctx: &mut Self::CTX) {
        let status = session
            .response_written()
            .map(|r| r.status.as_u16())
            .unwrap_or(0);

        let method = session.req_header().method.as_str();
        let path = session.req_header().uri.path();
        let host = request_host(session.req_header()).unwrap_or("-");
        let class = ctx.plan.as_ref().map_or("-", |p| p.label());
        let duration_ms = ctx.timer.elapsed().as_millis() as u64;

        metrics().requests_total.inc();
        metrics().requests_by_status.inc(&status.to_string());
        if let Some(plan) = &ctx.plan {
            metrics().requests_by_class.inc(plan.label());
        }

        match e {
            Some(err) => info!(
                method = %method,
                path = %path,
                host = %host,
                class = %class,
                status = %status,
                duration_ms = %duration_ms,
                error = %err,
                "Request failed"
            ),
            None => info!(
                method = %method,
                path = %path,
                host = %host,
                class = %class,
                status = %status,
                duration_ms = %duration_ms,
                "Request completed"
            ),
        }
    }
}
