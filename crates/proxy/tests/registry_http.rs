//! Integration tests for the HTTP registry client and the lookup pipeline
//!
//! The registry is mocked with wiremock.

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use proxy::{
    BackendCache, BackendClass, BackendRegistry, Dispatch, Dispatcher, HostOverrides,
    HttpRegistry, MemoryBackendCache, RouteResolver, TargetBuilder,
};

async fn registry_with(body: serde_json::Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/app-types"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;
    server
}

fn registry(server: &MockServer) -> HttpRegistry {
    HttpRegistry::new(&server.uri(), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_fetch_all_success() {
    let server = registry_with(serde_json::json!({
        "alice": "static",
        "bob": "serverless",
        "carol": "docker"
    }))
    .await;

    let mapping = registry(&server).fetch_all().await.unwrap();
    assert_eq!(mapping.len(), 3);
    assert_eq!(mapping["bob"], "serverless");
}

#[tokio::test]
async fn test_fetch_all_server_error_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/app-types"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    assert!(registry(&server).fetch_all().await.is_none());
}

#[tokio::test]
async fn test_fetch_all_malformed_body_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/app-types"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    assert!(registry(&server).fetch_all().await.is_none());
}

#[tokio::test]
async fn test_fetch_all_unreachable_is_none() {
    let registry = HttpRegistry::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
    assert!(registry.fetch_all().await.is_none());
}

#[tokio::test]
async fn test_fetch_all_timeout_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/app-types"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "alice": "static" }))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let registry = HttpRegistry::new(&server.uri(), Duration::from_millis(50)).unwrap();
    assert!(registry.fetch_all().await.is_none());
}

#[tokio::test]
async fn test_preload_then_resolve_without_refetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/app-types"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "alice": "static" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let cache = Arc::new(MemoryBackendCache::new());
    let resolver = RouteResolver::new(cache.clone(), Arc::new(registry(&server)));

    assert_eq!(resolver.preload_all().await, Some(1));
    assert_eq!(cache.get("alice").await.as_deref(), Some("static"));
    assert_eq!(resolver.resolve("alice").await, Some(BackendClass::Static));
    // MockServer verifies the single expected call on drop
}

#[tokio::test]
async fn test_unknown_subdomain_refetches_every_time() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/app-types"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "alice": "static" })),
        )
        .expect(2)
        .mount(&server)
        .await;

    let cache = Arc::new(MemoryBackendCache::new());
    let resolver = RouteResolver::new(cache.clone(), Arc::new(registry(&server)));
    let dispatcher = Dispatcher::new(
        resolver,
        TargetBuilder::new("https://cdn.example.com", "fn.example.com", "dyn.example.com"),
        HostOverrides::new(),
    );

    for _ in 0..2 {
        let dispatch = dispatcher.dispatch(Some("mallory.example.com")).await.unwrap();
        assert!(matches!(dispatch, Dispatch::NotFound { .. }));
    }
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_failed_preload_still_resolves_later() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/app-types"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/app-types"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "bob": "serverless" })),
        )
        .mount(&server)
        .await;

    let cache = Arc::new(MemoryBackendCache::new());
    let resolver = RouteResolver::new(cache.clone(), Arc::new(registry(&server)));

    assert_eq!(resolver.preload_all().await, None);
    assert_eq!(resolver.resolve("bob").await, Some(BackendClass::Serverless));
    assert!(cache.remaining_ttl("bob").unwrap() > Duration::from_secs(600));
}
