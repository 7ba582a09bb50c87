//! Shared data model for the crawl pipeline
//!
//! These types flow between the frontier, the fetchers, the extractors and
//! the discovery registries. They are deliberately plain serde records so
//! they can be handed to the reporter sink unchanged.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// Where a frontier item came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoverySource {
    /// Configured seed URL
    Seed,
    /// `<a href>` / `<area>` / `<link>` discovered in page markup
    Link,
    /// Observed XHR/fetch request during a browser visit
    Xhr,
    /// Listed in a sitemap surfaced by robots.txt
    Sitemap,
    /// Hit by the active well-known-path prober
    ActiveProbe,
    /// Reported by a client-side framework router
    FrameworkRoute,
}

/// A unit of crawl work scheduled on the frontier
///
/// At most one item per canonical URL ever reaches the dispatcher; later
/// duplicates are dropped at `Frontier::add`.
#[derive(Debug, Clone)]
pub struct FrontierItem {
    /// Canonical URL (output of [`crate::urlnorm::normalize`])
    pub url: Url,
    /// Distance from the seed set; seeds are depth 0
    pub depth: u32,
    pub source: DiscoverySource,
    /// Page that linked to this URL, if any
    pub parent: Option<Url>,
    /// Scheduling priority, lower runs earlier within a depth band
    pub priority: i32,
}

impl FrontierItem {
    /// Build a depth-0 seed item
    #[must_use]
    pub fn seed(url: Url) -> Self {
        Self {
            url,
            depth: 0,
            source: DiscoverySource::Seed,
            parent: None,
            priority: 0,
        }
    }

    /// Build a child item discovered on `parent`, one level deeper
    #[must_use]
    pub fn child(url: Url, parent: &FrontierItem, source: DiscoverySource) -> Self {
        Self {
            url,
            depth: parent.depth + 1,
            source,
            parent: Some(parent.url.clone()),
            priority: parent.priority,
        }
    }

    /// Host component of the item URL, empty for hostless URLs
    #[must_use]
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }
}

/// A form discovered in page markup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Form {
    /// Action resolved against the page's final URL
    pub action: String,
    /// Uppercased method, GET when the attribute is absent
    pub method: String,
    pub enctype: String,
    pub inputs: Vec<FormInput>,
}

/// A named input belonging to a [`Form`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormInput {
    pub name: String,
    /// The `type` attribute, `text` when absent
    pub input_type: String,
    pub value: Option<String>,
    pub required: bool,
    pub placeholder: Option<String>,
}

/// An XHR/fetch request observed through the CDP network interceptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkRequest {
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    /// Request body truncated to [`NetworkRequest::BODY_CAP`] bytes
    pub body: Option<String>,
    /// CDP resource type (`XHR`, `Fetch`, `Document`, ...)
    pub resource_type: String,
    pub captured_at: chrono::DateTime<chrono::Utc>,
}

impl NetworkRequest {
    /// Captured post bodies are truncated to this many bytes
    pub const BODY_CAP: usize = 4096;
}

/// A cookie snapshotted from the browsing context or a Set-Cookie header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
}

/// Which client-side frameworks a page visit detected
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageFrameworks {
    /// First matching detector, if any
    pub primary: Option<String>,
    /// Every detector that matched
    pub detected: Vec<String>,
    /// Client-side routes contributed by matching detectors
    pub routes: Vec<String>,
}

/// The outcome of fetching one frontier item, whichever fetcher produced it
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub requested_url: Url,
    /// URL after redirects / client-side navigation
    pub final_url: Url,
    pub status: u16,
    pub content_type: String,
    /// Response body, capped at the fetcher's byte limit
    pub body: String,
    pub title: String,
    pub links: Vec<Url>,
    pub forms: Vec<Form>,
    pub scripts: Vec<Url>,
    pub network_requests: Vec<NetworkRequest>,
    pub websocket_urls: Vec<String>,
    pub cookies: Vec<CookieRecord>,
    pub duration: Duration,
    /// HTTP 200 page whose content is semantically an error
    pub is_soft_error: bool,
    /// Stable hash of rendered text + structural outline, for SPA view dedup
    pub fingerprint: Option<u64>,
    pub frameworks: PageFrameworks,
}

impl FetchResult {
    /// An empty result shell for `url`, to be filled in by a fetcher
    #[must_use]
    pub fn empty(url: Url) -> Self {
        Self {
            requested_url: url.clone(),
            final_url: url,
            status: 0,
            content_type: String::new(),
            body: String::new(),
            title: String::new(),
            links: Vec::new(),
            forms: Vec::new(),
            scripts: Vec::new(),
            network_requests: Vec::new(),
            websocket_urls: Vec::new(),
            cookies: Vec::new(),
            duration: Duration::ZERO,
            is_soft_error: false,
            fingerprint: None,
            frameworks: PageFrameworks::default(),
        }
    }
}
