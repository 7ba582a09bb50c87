//! surfacer: crawl engine for dynamic web-application surface discovery
//!
//! Discovers the navigable and programmatic surface of a target site:
//! pages, SPA routes, forms, XHR/fetch endpoints, WebSocket channels and
//! authenticated resources. Three fetch modalities (static HTTP, headless
//! browser, SPA hash-route) drain one shared frontier under per-host
//! politeness, circuit breaking and pluggable authentication.

pub mod auth;
pub mod browser;
pub mod circuit;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod errors;
pub mod events;
pub mod fetch;
pub mod frontier;
pub mod limiter;
pub mod model;
pub mod retry;
pub mod robots;
pub mod urlnorm;

pub use auth::{AuthKind, AuthProvider, AuthSpec};
pub use circuit::{BreakerConfig, BreakerRegistry, CircuitState, HostBreaker};
pub use config::{CrawlConfig, CrawlConfigBuilder};
pub use discovery::{Endpoint, EndpointRegistry, EndpointSource, ParamLocation};
pub use engine::CrawlEngine;
pub use errors::{CrawlError, CrawlResult, ErrorKind};
pub use events::{CrawlEvent, CrawlStats, EventBus};
pub use fetch::StaticFetcher;
pub use frontier::Frontier;
pub use limiter::{HostRateLimiter, RateLimiterConfig};
pub use model::{
    CookieRecord, DiscoverySource, FetchResult, Form, FormInput, FrontierItem, NetworkRequest,
};
pub use retry::{Retrier, RetryPolicy};
pub use robots::{RobotsCache, RobotsRecord};
pub use urlnorm::ScopePolicy;

/// Build an engine for `config` and run the crawl to completion
pub async fn crawl(config: CrawlConfig) -> anyhow::Result<CrawlStats> {
    let engine = CrawlEngine::new(config).await?;
    engine.run().await
}
