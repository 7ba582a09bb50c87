//! Active endpoint discovery
//!
//! Probes a fixed list of well-known paths off the target's base URL,
//! optionally followed by a method matrix over known endpoints, GraphQL
//! introspection and Swagger/OpenAPI document checks. Probes run behind a
//! small semaphore so a misconfigured target is not hammered.

use std::sync::Arc;

use log::{debug, info};
use tokio::sync::Semaphore;
use url::Url;

use crate::auth::AuthProvider;
use crate::errors::CrawlResult;

use super::endpoints::{base_url, Endpoint, EndpointRegistry, EndpointSource};

/// Probes in flight at once
const PROBE_CONCURRENCY: usize = 10;

/// Well-known paths worth one GET each
pub const COMMON_PATHS: [&str; 60] = [
    "/api",
    "/api/v1",
    "/api/v2",
    "/api/v3",
    "/api/users",
    "/api/auth",
    "/api/login",
    "/api/admin",
    "/api/config",
    "/api/status",
    "/api/health",
    "/api/docs",
    "/api/swagger.json",
    "/graphql",
    "/graphiql",
    "/v1",
    "/v2",
    "/v3",
    "/rest",
    "/rest/api",
    "/rpc",
    "/ajax",
    "/_api",
    "/ws",
    "/swagger.json",
    "/swagger/v1/swagger.json",
    "/swagger-ui.html",
    "/openapi.json",
    "/api-docs",
    "/v2/api-docs",
    "/v3/api-docs",
    "/health",
    "/healthz",
    "/ping",
    "/status",
    "/version",
    "/info",
    "/metrics",
    "/debug",
    "/.well-known/openid-configuration",
    "/.well-known/security.txt",
    "/oauth/token",
    "/oauth/authorize",
    "/auth/login",
    "/auth/refresh",
    "/login",
    "/logout",
    "/register",
    "/admin",
    "/admin/api",
    "/actuator",
    "/actuator/health",
    "/actuator/info",
    "/actuator/env",
    "/actuator/mappings",
    "/console",
    "/manage",
    "/internal",
    "/private",
    "/upload",
];

/// HTTP methods tried by the matrix probe
const METHOD_MATRIX: [&str; 7] = ["GET", "POST", "PUT", "DELETE", "PATCH", "OPTIONS", "HEAD"];

/// GraphQL endpoints worth introspecting
const GRAPHQL_PATHS: [&str; 4] = ["/graphql", "/api/graphql", "/v1/graphql", "/query"];

/// Swagger/OpenAPI document locations
const OPENAPI_PATHS: [&str; 6] = [
    "/swagger.json",
    "/openapi.json",
    "/api-docs",
    "/v2/api-docs",
    "/v3/api-docs",
    "/swagger/v1/swagger.json",
];

/// Active prober feeding the endpoint registry
pub struct ActiveDiscovery {
    client: reqwest::Client,
    auth: Arc<dyn AuthProvider>,
    registry: Arc<EndpointRegistry>,
    user_agent: String,
}

impl ActiveDiscovery {
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        auth: Arc<dyn AuthProvider>,
        registry: Arc<EndpointRegistry>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            client,
            auth,
            registry,
            user_agent: user_agent.into(),
        }
    }

    /// GET every well-known path under `base`
    ///
    /// Returns the endpoints newly recorded by this sweep.
    pub async fn probe_common_paths(&self, base: &Url) -> Vec<Endpoint> {
        let semaphore = Arc::new(Semaphore::new(PROBE_CONCURRENCY));
        let probes = COMMON_PATHS.iter().map(|path| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire().await;
                self.probe_path(base, path).await
            }
        });

        let results = futures::future::join_all(probes).await;
        let fresh: Vec<Endpoint> = results.into_iter().flatten().collect();
        info!(
            "active probe of {} found {} endpoints",
            base.host_str().unwrap_or_default(),
            fresh.len()
        );
        fresh
    }

    async fn probe_path(&self, base: &Url, path: &str) -> Option<Endpoint> {
        let target = base.join(path).ok()?;
        let response = self.send("GET", &target, None).await.ok()?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_lowercase();

        if !probe_hit(status, &content_type) {
            return None;
        }

        debug!("probe hit {status} at {target}");
        let mut endpoint = Endpoint::new(base_url(&target), "GET", EndpointSource::Active);
        endpoint.last_status = Some(status);
        let (merged, created) = self.registry.record(endpoint);
        created.then_some(merged)
    }

    /// Try every HTTP method against one known endpoint
    pub async fn probe_methods(&self, target: &Url) -> Vec<Endpoint> {
        let mut fresh = Vec::new();
        for method in METHOD_MATRIX {
            let Ok(response) = self.send(method, target, None).await else {
                continue;
            };
            let status = response.status().as_u16();
            // 405 means the path exists but not this verb; skip recording
            if status == 405 || status == 404 || status >= 500 {
                continue;
            }
            let mut endpoint =
                Endpoint::new(base_url(target), method, EndpointSource::ActiveMethodProbe);
            endpoint.last_status = Some(status);
            let (merged, created) = self.registry.record(endpoint);
            if created {
                fresh.push(merged);
            }
        }
        fresh
    }

    /// Minimal GraphQL introspection (`{__typename}`) over known locations
    pub async fn probe_graphql(&self, base: &Url) -> Vec<Endpoint> {
        let mut fresh = Vec::new();
        for path in GRAPHQL_PATHS {
            let Ok(target) = base.join(path) else {
                continue;
            };
            let body = serde_json::json!({ "query": "{__typename}" });
            let Ok(response) = self.send("POST", &target, Some(body)).await else {
                continue;
            };
            let status = response.status().as_u16();
            let Ok(text) = response.text().await else {
                continue;
            };
            if !text.contains("__typename") {
                continue;
            }
            debug!("graphql endpoint at {target}");
            let mut endpoint =
                Endpoint::new(base_url(&target), "POST", EndpointSource::ActiveGraphql);
            endpoint.last_status = Some(status);
            let (merged, created) = self.registry.record(endpoint);
            if created {
                fresh.push(merged);
            }
        }
        fresh
    }

    /// Check the usual Swagger/OpenAPI document locations
    pub async fn probe_openapi(&self, base: &Url) -> Vec<Endpoint> {
        let mut fresh = Vec::new();
        for path in OPENAPI_PATHS {
            let Ok(target) = base.join(path) else {
                continue;
            };
            let Ok(response) = self.send("GET", &target, None).await else {
                continue;
            };
            let status = response.status().as_u16();
            if status != 200 {
                continue;
            }
            let Ok(text) = response.text().await else {
                continue;
            };
            let lowered = text.to_lowercase();
            if !(lowered.contains("swagger") || lowered.contains("openapi") || lowered.contains("\"paths\"")) {
                continue;
            }
            debug!("openapi document at {target}");
            let mut endpoint = Endpoint::new(base_url(&target), "GET", EndpointSource::Active);
            endpoint.last_status = Some(status);
            let (merged, created) = self.registry.record(endpoint);
            if created {
                fresh.push(merged);
            }
        }
        fresh
    }

    async fn send(
        &self,
        method: &str,
        target: &Url,
        json_body: Option<serde_json::Value>,
    ) -> CrawlResult<reqwest::Response> {
        let method = reqwest::Method::from_bytes(method.as_bytes()).map_err(|e| {
            crate::errors::CrawlError::new(
                crate::errors::ErrorKind::Unknown,
                target.as_str(),
                "active-probe",
                e.to_string(),
            )
        })?;
        let mut request = self
            .client
            .request(method, target.clone())
            .header(reqwest::header::USER_AGENT, &self.user_agent);
        for (name, value) in self.auth.headers_to_inject() {
            request = request.header(name, value);
        }
        let cookies = self.auth.cookies_to_inject();
        if !cookies.is_empty() {
            let header = cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; ");
            request = request.header(reqwest::header::COOKIE, header);
        }
        if let Some(body) = json_body {
            request = request.json(&body);
        }
        request
            .send()
            .await
            .map_err(|e| crate::errors::classify_reqwest(e, target.as_str(), "active-probe"))
    }
}

/// Probe acceptance: 2xx, an auth/method rejection, or a JSON 4xx
#[must_use]
pub fn probe_hit(status: u16, content_type: &str) -> bool {
    match status {
        200..=299 => true,
        401 | 403 | 405 => true,
        400..=499 => content_type.contains("json"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_acceptance_rules() {
        assert!(probe_hit(200, "text/html"));
        assert!(probe_hit(204, ""));
        assert!(probe_hit(401, ""));
        assert!(probe_hit(403, "text/html"));
        assert!(probe_hit(405, ""));
        assert!(probe_hit(400, "application/json"));
        assert!(!probe_hit(400, "text/html"));
        assert!(!probe_hit(404, "text/html"));
        assert!(!probe_hit(500, "application/json"));
    }

    #[test]
    fn path_list_is_deduplicated() {
        let mut seen = std::collections::HashSet::new();
        for path in COMMON_PATHS {
            assert!(seen.insert(path), "duplicate probe path {path}");
        }
    }
}
