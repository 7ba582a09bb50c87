//! Static HTTP fetching
//!
//! One shared keep-alive client serves every worker. Responses are read up
//! to a byte cap; HTML responses additionally run through the extractor.
//! Auth headers and cookies are injected at request time from the active
//! provider, so a refresh between two requests is picked up immediately.

pub mod html;

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::auth::AuthProvider;
use crate::browser::readiness;
use crate::errors::{classify_reqwest, error_for_status, CrawlError, CrawlResult, ErrorKind};
use crate::model::FetchResult;
use crate::retry::Retrier;

/// Response bodies are read up to this many bytes
pub const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

/// Connect timeout for new sockets
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Redirects followed before giving up
const MAX_REDIRECTS: usize = 10;
/// Idle keep-alive connections retained per host
const MAX_IDLE_PER_HOST: usize = 8;

/// Tuning for the shared client
#[derive(Debug, Clone)]
pub struct StaticFetcherConfig {
    pub user_agent: String,
    /// Overall per-request deadline
    pub timeout: Duration,
    /// Skip TLS certificate verification
    pub insecure_tls: bool,
}

impl Default for StaticFetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("surfacer/{}", env!("CARGO_PKG_VERSION")),
            timeout: Duration::from_secs(10),
            insecure_tls: false,
        }
    }
}

/// Build the shared reqwest client used crawl-wide
pub fn build_http_client(config: &StaticFetcherConfig) -> CrawlResult<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(config.timeout)
        .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .danger_accept_invalid_certs(config.insecure_tls)
        .build()
        .map_err(|e| CrawlError::new(ErrorKind::Unknown, "", "http-client", e.to_string()))
}

/// The static HTTP fetch path
pub struct StaticFetcher {
    client: reqwest::Client,
    config: StaticFetcherConfig,
    auth: Arc<dyn AuthProvider>,
}

impl StaticFetcher {
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        config: StaticFetcherConfig,
        auth: Arc<dyn AuthProvider>,
    ) -> Self {
        Self {
            client,
            config,
            auth,
        }
    }

    /// The shared client, for collaborators issuing their own requests
    #[must_use]
    pub fn client(&self) -> reqwest::Client {
        self.client.clone()
    }

    /// GET `url`, returning an extracted [`FetchResult`]
    ///
    /// Error statuses (4xx/5xx) surface as [`CrawlError`]s classified per
    /// the taxonomy; a 429 carries the `Retry-After` advisory when present.
    pub async fn get(&self, cancel: &CancellationToken, url: &Url) -> CrawlResult<FetchResult> {
        let started = Instant::now();
        let request = self.decorated_request(reqwest::Method::GET, url);

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(CrawlError::cancelled(url.as_str(), "static-get"));
            }
            response = request.send() => {
                response.map_err(|e| classify_reqwest(e, url.as_str(), "static-get"))?
            }
        };

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let content_type = header_str(&response, reqwest::header::CONTENT_TYPE);

        if status >= 400 {
            let mut err = error_for_status(status, url.as_str(), "static-get");
            if status == 429 {
                if let Ok(secs) = header_str(&response, reqwest::header::RETRY_AFTER).parse::<u64>()
                {
                    err = err.with_retry_after(Duration::from_secs(secs));
                }
            }
            return Err(err);
        }

        let cookies = response
            .headers()
            .get_all(reqwest::header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|raw| parse_set_cookie(raw, &final_url))
            .collect();

        let body = read_capped(response, MAX_BODY_BYTES).await.map_err(|e| {
            classify_reqwest(e, url.as_str(), "static-get-body")
        })?;

        let mut result = FetchResult::empty(url.clone());
        result.final_url = final_url.clone();
        result.status = status;
        result.content_type = content_type.clone();
        result.cookies = cookies;
        result.duration = started.elapsed();

        if is_html(&content_type) {
            let extract = html::extract(&body, &final_url);
            result.title = extract.title;
            result.links = extract.links;
            result.forms = extract.forms;
            result.scripts = extract.scripts;
            result.websocket_urls = extract.websocket_urls;

            let fingerprint_input = readiness::fingerprint_input_from_html(&body);
            let (soft, reason) = readiness::detect_soft_error_text(
                fingerprint_input.split("||").next().unwrap_or_default(),
            );
            if soft {
                debug!("soft error at {url}: {reason}");
            }
            result.is_soft_error = soft;
            result.fingerprint = Some(readiness::fingerprint(&fingerprint_input));
        }
        result.body = body;

        Ok(result)
    }

    /// GET through the retrier; transport-kind failures re-attempt
    pub async fn get_with_retry(
        &self,
        cancel: &CancellationToken,
        retrier: &Retrier,
        url: &Url,
    ) -> CrawlResult<FetchResult> {
        retrier
            .run(cancel, || self.get(cancel, url))
            .await
            .result
    }

    /// HEAD `url`, returning `(status, content_type)`
    pub async fn head(&self, url: &Url) -> CrawlResult<(u16, String)> {
        let response = self
            .decorated_request(reqwest::Method::HEAD, url)
            .send()
            .await
            .map_err(|e| classify_reqwest(e, url.as_str(), "static-head"))?;
        Ok((
            response.status().as_u16(),
            header_str(&response, reqwest::header::CONTENT_TYPE),
        ))
    }

    /// Fan `urls` out with at most `width` requests in flight
    pub async fn get_batch(
        &self,
        cancel: &CancellationToken,
        urls: &[Url],
        width: usize,
    ) -> Vec<CrawlResult<FetchResult>> {
        let semaphore = Arc::new(Semaphore::new(width.max(1)));
        let futures = urls.iter().map(|url| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire().await;
                self.get(cancel, url).await
            }
        });
        futures::future::join_all(futures).await
    }

    /// Base headers plus whatever the auth provider injects right now
    fn decorated_request(&self, method: reqwest::Method, url: &Url) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .request(method, url.clone())
            .header(reqwest::header::USER_AGENT, &self.config.user_agent)
            .header(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8",
            )
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .header(reqwest::header::CONNECTION, "keep-alive");

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

        request
    }
}

fn is_html(content_type: &str) -> bool {
    let lowered = content_type.to_lowercase();
    lowered.contains("text/html") || lowered.contains("application/xhtml")
}

fn header_str(response: &reqwest::Response, name: reqwest::header::HeaderName) -> String {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Read the body up to `cap` bytes, dropping the rest
async fn read_capped(mut response: reqwest::Response, cap: usize) -> Result<String, reqwest::Error> {
    let mut collected: Vec<u8> = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if collected.len() + chunk.len() > cap {
            let room = cap - collected.len();
            collected.extend_from_slice(&chunk[..room]);
            break;
        }
        collected.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&collected).into_owned())
}

/// Minimal Set-Cookie parse: name, value, and domain/path attributes
fn parse_set_cookie(raw: &str, url: &Url) -> Option<crate::model::CookieRecord> {
    let mut parts = raw.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let mut domain = url.host_str().unwrap_or_default().to_string();
    let mut path = "/".to_string();
    for attr in parts {
        if let Some((key, val)) = attr.split_once('=') {
            match key.trim().to_lowercase().as_str() {
                "domain" => domain = val.trim().trim_start_matches('.').to_string(),
                "path" => path = val.trim().to_string(),
                _ => {}
            }
        }
    }
    Some(crate::model::CookieRecord {
        name: name.trim().to_string(),
        value: value.trim().to_string(),
        domain,
        path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_detection() {
        assert!(is_html("text/html; charset=utf-8"));
        assert!(is_html("application/xhtml+xml"));
        assert!(!is_html("application/json"));
        assert!(!is_html(""));
    }

    #[test]
    fn set_cookie_parsing() {
        let url = Url::parse("https://app.example.com/login").expect("url");
        let cookie =
            parse_set_cookie("sid=abc123; Path=/app; Domain=.example.com; HttpOnly", &url)
                .expect("parsed cookie");
        assert_eq!(cookie.name, "sid");
        assert_eq!(cookie.value, "abc123");
        assert_eq!(cookie.domain, "example.com");
        assert_eq!(cookie.path, "/app");

        let bare = parse_set_cookie("tok=x", &url).expect("parsed cookie");
        assert_eq!(bare.domain, "app.example.com");
        assert_eq!(bare.path, "/");
    }
}
