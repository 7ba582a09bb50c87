//! Passive discovery over captured network requests

use std::collections::HashMap;
use std::sync::Arc;

use url::Url;

use surfacer::discovery::{EndpointRegistry, ParamLocation, PassiveDiscovery};
use surfacer::model::NetworkRequest;

fn xhr(url: &str) -> NetworkRequest {
    NetworkRequest {
        url: url.into(),
        method: "GET".into(),
        headers: HashMap::new(),
        body: None,
        resource_type: "xhr".into(),
        captured_at: chrono::Utc::now(),
    }
}

#[tokio::test]
async fn one_visit_merges_parameters_across_captures() {
    let registry = Arc::new(EndpointRegistry::new());
    let passive = PassiveDiscovery::new(Arc::clone(&registry));
    let page = Url::parse("https://app.test/dashboard").expect("url");

    // Two XHRs against the same endpoint with overlapping query keys
    passive.process(
        &[
            xhr("https://app.test/api/users?page=1"),
            xhr("https://app.test/api/users?limit=10&page=2"),
        ],
        &page,
    );

    // Exactly one endpoint keyed GET /api/users
    assert_eq!(registry.len(), 1);
    let endpoint = registry
        .get("GET", "https://app.test/api/users")
        .expect("merged endpoint");
    assert_eq!(endpoint.hits, 2);

    let mut names: Vec<&str> = endpoint.parameters.iter().map(|p| p.name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, ["limit", "page"]);

    let page_param = endpoint
        .parameters
        .iter()
        .find(|p| p.name == "page" && p.location == ParamLocation::Query)
        .expect("page param");
    assert!(page_param.examples.contains(&"1".to_string()));
    assert!(page_param.examples.contains(&"2".to_string()));

    let limit_param = endpoint
        .parameters
        .iter()
        .find(|p| p.name == "limit" && p.location == ParamLocation::Query)
        .expect("limit param");
    assert!(limit_param.examples.contains(&"10".to_string()));
}

#[tokio::test]
async fn post_bodies_contribute_body_parameters() {
    let registry = Arc::new(EndpointRegistry::new());
    let passive = PassiveDiscovery::new(Arc::clone(&registry));
    let page = Url::parse("https://app.test/login").expect("url");

    let mut login = xhr("https://app.test/api/session");
    login.method = "POST".into();
    login.headers.insert(
        "Content-Type".into(),
        "application/json".into(),
    );
    login.body = Some(r#"{"username":"alice","remember":true}"#.into());

    passive.process(&[login], &page);

    let endpoint = registry
        .get("POST", "https://app.test/api/session")
        .expect("endpoint");
    let body_params: Vec<&str> = endpoint
        .parameters
        .iter()
        .filter(|p| p.location == ParamLocation::Body)
        .map(|p| p.name.as_str())
        .collect();
    assert!(body_params.contains(&"username"));
    assert!(body_params.contains(&"remember"));
}
