//! Active probing against a local mock API

use std::sync::Arc;

use mockito::Matcher;
use url::Url;

use surfacer::auth::NoAuth;
use surfacer::discovery::{ActiveDiscovery, EndpointRegistry, EndpointSource};

fn prober(registry: &Arc<EndpointRegistry>) -> ActiveDiscovery {
    ActiveDiscovery::new(
        reqwest::Client::new(),
        Arc::new(NoAuth),
        Arc::clone(registry),
        "surfacer-test",
    )
}

#[tokio::test]
async fn common_path_sweep_records_hits() {
    let mut server = mockito::Server::new_async().await;
    // Everything 404s except a health endpoint, a JSON-erroring API root
    // and an auth-guarded admin path.
    server
        .mock("GET", Matcher::Any)
        .with_status(404)
        .create_async()
        .await;
    server
        .mock("GET", "/health")
        .with_status(200)
        .with_body("ok")
        .create_async()
        .await;
    server
        .mock("GET", "/api")
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error":"missing version"}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/admin")
        .with_status(403)
        .create_async()
        .await;

    let registry = Arc::new(EndpointRegistry::new());
    let base = Url::parse(&server.url()).expect("url");
    let found = prober(&registry).probe_common_paths(&base).await;

    let urls: Vec<&str> = found.iter().map(|e| e.url.as_str()).collect();
    assert!(urls.iter().any(|u| u.ends_with("/health")));
    assert!(urls.iter().any(|u| u.ends_with("/api")));
    assert!(urls.iter().any(|u| u.ends_with("/admin")));
    // Plain 404s never become endpoints
    assert!(!urls.iter().any(|u| u.ends_with("/metrics")));
    assert!(found.iter().all(|e| e.source == EndpointSource::Active));
}

#[tokio::test]
async fn graphql_introspection_is_recognized() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", Matcher::Any)
        .with_status(404)
        .create_async()
        .await;
    let graphql = server
        .mock("POST", "/graphql")
        .match_body(Matcher::JsonString(r#"{"query":"{__typename}"}"#.into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"data":{"__typename":"Query"}}"#)
        .create_async()
        .await;

    let registry = Arc::new(EndpointRegistry::new());
    let base = Url::parse(&server.url()).expect("url");
    let found = prober(&registry).probe_graphql(&base).await;

    graphql.assert_async().await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].method, "POST");
    assert_eq!(found[0].source, EndpointSource::ActiveGraphql);
    assert!(found[0].url.ends_with("/graphql"));
}

#[tokio::test]
async fn non_graphql_json_is_not_misrecognized() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"message":"generic endpoint"}"#)
        .create_async()
        .await;

    let registry = Arc::new(EndpointRegistry::new());
    let base = Url::parse(&server.url()).expect("url");
    let found = prober(&registry).probe_graphql(&base).await;
    assert!(found.is_empty());
}

#[tokio::test]
async fn openapi_documents_are_detected() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", Matcher::Any)
        .with_status(404)
        .create_async()
        .await;
    server
        .mock("GET", "/openapi.json")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"openapi":"3.0.0","paths":{"/users":{}}}"#)
        .create_async()
        .await;
    // 200 HTML at a doc path is not an API document
    server
        .mock("GET", "/api-docs")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body("<html><body>marketing splash page</body></html>")
        .create_async()
        .await;

    let registry = Arc::new(EndpointRegistry::new());
    let base = Url::parse(&server.url()).expect("url");
    let found = prober(&registry).probe_openapi(&base).await;

    assert_eq!(found.len(), 1);
    assert!(found[0].url.ends_with("/openapi.json"));
}

#[tokio::test]
async fn method_matrix_skips_rejected_verbs() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/items")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("[]")
        .create_async()
        .await;
    server
        .mock("POST", "/api/items")
        .with_status(201)
        .create_async()
        .await;
    for method in ["PUT", "DELETE", "PATCH", "OPTIONS", "HEAD"] {
        server
            .mock(method, "/api/items")
            .with_status(405)
            .create_async()
            .await;
    }

    let registry = Arc::new(EndpointRegistry::new());
    let target = Url::parse(&format!("{}/api/items", server.url())).expect("url");
    let found = prober(&registry).probe_methods(&target).await;

    let mut methods: Vec<&str> = found.iter().map(|e| e.method.as_str()).collect();
    methods.sort_unstable();
    assert_eq!(methods, ["GET", "POST"]);
    assert!(found
        .iter()
        .all(|e| e.source == EndpointSource::ActiveMethodProbe));
}
