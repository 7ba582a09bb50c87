//! Passive endpoint discovery
//!
//! Consumes the network requests captured during page visits, keeps the
//! API-like ones and turns them into endpoint records with query, path
//! and body parameters extracted.

use std::sync::Arc;

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::model::NetworkRequest;

use super::endpoints::{
    base_url, Endpoint, EndpointParameter, EndpointRegistry, EndpointSource, ParamLocation,
};

/// Path markers that make a request API-like regardless of resource type
const API_PATH_MARKERS: [&str; 10] = [
    "/api/", "/v1/", "/v2/", "/v3/", "/graphql", "/rest/", "/rpc/", "/ajax/", "/_api/", "/ws/",
];

static UUID_SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .unwrap_or_else(|e| panic!("uuid regex: {e}"))
});
static TOKEN_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{20,}$").unwrap_or_else(|e| panic!("token regex: {e}")));

/// Passive consumer feeding the endpoint registry
pub struct PassiveDiscovery {
    registry: Arc<EndpointRegistry>,
}

impl PassiveDiscovery {
    #[must_use]
    pub fn new(registry: Arc<EndpointRegistry>) -> Self {
        Self { registry }
    }

    /// Process one page visit's captures
    ///
    /// Returns the endpoints whose records were created by this batch (for
    /// `EndpointDiscovered` events); merges into existing records happen
    /// silently.
    pub fn process(&self, requests: &[NetworkRequest], page_url: &Url) -> Vec<Endpoint> {
        let mut fresh = Vec::new();
        for request in requests {
            if !is_api_like(request) {
                continue;
            }
            let Ok(parsed) = page_url.join(&request.url) else {
                continue;
            };
            let endpoint = build_endpoint(request, &parsed, page_url);
            let (merged, created) = self.registry.record(endpoint);
            if created {
                debug!("passive endpoint {} {}", merged.method, merged.url);
                fresh.push(merged);
            }
        }
        fresh
    }
}

/// Whether a captured request looks like an API call
#[must_use]
pub fn is_api_like(request: &NetworkRequest) -> bool {
    let resource = request.resource_type.to_lowercase();
    if resource == "xhr" || resource == "fetch" {
        return true;
    }

    let lowered = request.url.to_lowercase();
    if API_PATH_MARKERS.iter().any(|m| lowered.contains(m)) {
        return true;
    }

    let content_type = request
        .headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
        .map(|(_, v)| v.to_lowercase())
        .unwrap_or_default();
    if content_type.contains("json") || content_type.contains("xml") {
        return true;
    }

    lowered.contains("format=json") || lowered.contains("callback=") || lowered.contains("jsonp=")
}

fn build_endpoint(request: &NetworkRequest, parsed: &Url, page_url: &Url) -> Endpoint {
    let mut endpoint = Endpoint::new(base_url(parsed), &request.method, EndpointSource::Passive);
    let context = page_url.to_string();

    for (name, value) in parsed.query_pairs() {
        let name = name.into_owned();
        let value = value.into_owned();
        // A repeated key in one query string is one parameter, many values
        match endpoint
            .parameters
            .iter_mut()
            .find(|p| p.name == name && p.location == ParamLocation::Query)
        {
            Some(known) => known.add_example(value),
            None => endpoint.parameters.push(EndpointParameter::new(
                name,
                ParamLocation::Query,
                Some(value),
                context.clone(),
            )),
        }
    }

    endpoint.parameters.extend(path_parameters(parsed, &context));

    if let Some(body) = &request.body {
        let content_type = request
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| v.to_lowercase())
            .unwrap_or_default();
        endpoint
            .parameters
            .extend(body_parameters(body, &content_type, &context));
    }

    endpoint
}

/// Heuristic path parameters: digit runs, UUIDs and long token-ish segments
///
/// The suggested name is the previous segment singularized plus `_id`
/// (`/users/42` suggests `user_id`).
#[must_use]
pub fn path_parameters(url: &Url, context: &str) -> Vec<EndpointParameter> {
    let mut params = Vec::new();
    let segments: Vec<&str> = match url.path_segments() {
        Some(segments) => segments.collect(),
        None => return params,
    };

    for (index, segment) in segments.iter().enumerate() {
        if segment.is_empty() || !is_dynamic_segment(segment) {
            continue;
        }
        let name = match index.checked_sub(1).and_then(|i| segments.get(i)) {
            Some(prev) if !prev.is_empty() && !is_dynamic_segment(prev) => {
                format!("{}_id", singularize(prev))
            }
            _ => "id".to_string(),
        };
        params.push(EndpointParameter::new(
            name,
            ParamLocation::Path,
            Some((*segment).to_string()),
            context,
        ));
    }
    params
}

fn is_dynamic_segment(segment: &str) -> bool {
    if segment.chars().all(|c| c.is_ascii_digit()) && !segment.is_empty() {
        return true;
    }
    if UUID_SEGMENT.is_match(segment) {
        return true;
    }
    TOKEN_SEGMENT.is_match(segment)
}

fn singularize(word: &str) -> String {
    let lowered = word.to_lowercase();
    if let Some(stem) = lowered.strip_suffix("ies") {
        return format!("{stem}y");
    }
    if lowered.ends_with("ses") || lowered.ends_with("xes") {
        return lowered[..lowered.len() - 2].to_string();
    }
    if let Some(stem) = lowered.strip_suffix('s') {
        return stem.to_string();
    }
    lowered
}

/// Top-level body parameters for JSON and urlencoded payloads
#[must_use]
pub fn body_parameters(body: &str, content_type: &str, context: &str) -> Vec<EndpointParameter> {
    let mut params = Vec::new();
    if content_type.contains("json") {
        if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(body) {
            for (key, value) in map {
                let example = match &value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                params.push(EndpointParameter::new(
                    key,
                    ParamLocation::Body,
                    Some(example),
                    context,
                ));
            }
        }
    } else if content_type.contains("x-www-form-urlencoded") {
        for (key, value) in url::form_urlencoded::parse(body.as_bytes()) {
            params.push(EndpointParameter::new(
                key.into_owned(),
                ParamLocation::Body,
                Some(value.into_owned()),
                context,
            ));
        }
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn request(url: &str, method: &str, resource_type: &str) -> NetworkRequest {
        NetworkRequest {
            url: url.into(),
            method: method.into(),
            headers: HashMap::new(),
            body: None,
            resource_type: resource_type.into(),
            captured_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn api_likeness_filter() {
        assert!(is_api_like(&request("https://x.test/anything", "GET", "xhr")));
        assert!(is_api_like(&request("https://x.test/api/users", "GET", "document")));
        assert!(is_api_like(&request("https://x.test/page?format=json", "GET", "document")));
        assert!(!is_api_like(&request("https://x.test/about.html", "GET", "document")));

        let mut json = request("https://x.test/data", "POST", "other");
        json.headers
            .insert("Content-Type".into(), "application/json".into());
        assert!(is_api_like(&json));
    }

    #[test]
    fn query_params_merge_across_observations() {
        let registry = Arc::new(EndpointRegistry::new());
        let passive = PassiveDiscovery::new(Arc::clone(&registry));
        let page = Url::parse("https://x.test/app").expect("url");

        let created = passive.process(
            &[
                request("https://x.test/api/users?page=1", "GET", "xhr"),
                request("https://x.test/api/users?limit=10&page=2", "GET", "xhr"),
            ],
            &page,
        );
        // One endpoint key, created once
        assert_eq!(created.len(), 1);
        assert_eq!(registry.len(), 1);

        let merged = registry
            .get("GET", "https://x.test/api/users")
            .expect("merged endpoint");
        assert_eq!(merged.hits, 2);

        let mut names: Vec<&str> = merged.parameters.iter().map(|p| p.name.as_str()).collect();
        names.sort_unstable();
        assert_eq!(names, ["limit", "page"]);
        // Both observed values for page survive, alongside limit's one
        let page_param = merged
            .parameters
            .iter()
            .find(|p| p.name == "page")
            .expect("page param");
        assert_eq!(page_param.examples, ["1", "2"]);
        let limit_param = merged
            .parameters
            .iter()
            .find(|p| p.name == "limit")
            .expect("limit param");
        assert_eq!(limit_param.examples, ["10"]);
    }

    #[test]
    fn repeated_query_key_collects_both_values() {
        let registry = Arc::new(EndpointRegistry::new());
        let passive = PassiveDiscovery::new(Arc::clone(&registry));
        let page = Url::parse("https://x.test/app").expect("url");

        passive.process(
            &[request("https://x.test/api/items?tag=a&tag=b", "GET", "xhr")],
            &page,
        );

        let endpoint = registry
            .get("GET", "https://x.test/api/items")
            .expect("endpoint");
        assert_eq!(endpoint.parameters.len(), 1);
        assert_eq!(endpoint.parameters[0].examples, ["a", "b"]);
    }

    #[test]
    fn path_parameter_heuristics() {
        let url = Url::parse(
            "https://x.test/api/users/42/orders/550e8400-e29b-41d4-a716-446655440000",
        )
        .expect("url");
        let params = path_parameters(&url, "test");
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].name, "user_id");
        assert_eq!(params[0].examples, ["42"]);
        assert_eq!(params[1].name, "order_id");

        let plain = Url::parse("https://x.test/api/users/list").expect("url");
        assert!(path_parameters(&plain, "test").is_empty());

        let token = Url::parse("https://x.test/reset/AbCdEfGh1234567890xyzw").expect("url");
        let params = path_parameters(&token, "test");
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].name, "reset_id");
    }

    #[test]
    fn body_parameter_extraction() {
        let json = body_parameters(
            r#"{"username":"u","nested":{"deep":1},"age":3}"#,
            "application/json",
            "test",
        );
        let mut names: Vec<&str> = json.iter().map(|p| p.name.as_str()).collect();
        names.sort_unstable();
        assert_eq!(names, ["age", "nested", "username"]);

        let form = body_parameters("a=1&b=two", "application/x-www-form-urlencoded", "test");
        assert_eq!(form.len(), 2);
        assert_eq!(form[1].examples, ["two"]);

        assert!(body_parameters("opaque", "text/plain", "test").is_empty());
    }

    #[test]
    fn singularization() {
        assert_eq!(singularize("users"), "user");
        assert_eq!(singularize("companies"), "company");
        assert_eq!(singularize("statuses"), "status");
        assert_eq!(singularize("data"), "data");
    }
}
