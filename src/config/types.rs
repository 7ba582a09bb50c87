//! Crawl configuration
//!
//! One struct carries everything the engine needs: seeds, scope, worker
//! and pool sizing, pacing, timeouts and the auth variant. Construct it
//! through [`super::builder::CrawlConfigBuilder`], which validates seeds
//! and derives the scope.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::AuthSpec;
use crate::circuit::BreakerConfig;
use crate::limiter::RateLimiterConfig;
use crate::retry::RetryPolicy;
use crate::urlnorm::ScopePolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Seed URLs, already validated by the builder
    pub(crate) seeds: Vec<String>,
    /// Hosts the crawl may touch; each entry also covers its subdomains
    pub(crate) allowed_hosts: Vec<String>,
    pub(crate) allowed_path_prefixes: Vec<String>,
    pub(crate) max_depth: u32,
    /// Optional cap on total pages fetched
    pub(crate) max_pages: Option<usize>,
    pub(crate) workers: usize,

    pub(crate) browser_enabled: bool,
    pub(crate) browser_pool_size: usize,
    pub(crate) browser_recycle_after: u32,
    pub(crate) headless: bool,

    pub(crate) per_host_rps: f64,
    pub(crate) per_host_burst: u32,
    pub(crate) global_rps: f64,

    pub(crate) static_timeout_secs: u64,
    pub(crate) browser_visit_timeout_secs: u64,
    pub(crate) robots_ttl_secs: u64,

    pub(crate) auth: AuthSpec,
    pub(crate) user_agent: String,
    pub(crate) insecure_tls: bool,
    /// Client-level default; per-request options win when set
    pub(crate) fast_mode: bool,
    pub(crate) stealth_mode: bool,
    /// Probe well-known paths off each seed origin
    pub(crate) active_discovery: bool,

    pub(crate) breaker_failure_threshold: u32,
    pub(crate) breaker_success_threshold: u32,
    pub(crate) breaker_open_timeout_secs: u64,
    pub(crate) breaker_max_half_open: u32,

    pub(crate) retry_max: u32,
    pub(crate) retry_initial_delay_ms: u64,
    pub(crate) retry_max_delay_ms: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            allowed_hosts: Vec::new(),
            allowed_path_prefixes: Vec::new(),
            max_depth: 3,
            max_pages: None,
            workers: num_cpus::get().clamp(2, 16),
            browser_enabled: true,
            browser_pool_size: 3,
            browser_recycle_after: 40,
            headless: true,
            per_host_rps: 2.0,
            per_host_burst: 2,
            global_rps: 0.0,
            static_timeout_secs: 10,
            browser_visit_timeout_secs: 15,
            robots_ttl_secs: 3600,
            auth: AuthSpec::None,
            user_agent: format!("surfacer/{}", env!("CARGO_PKG_VERSION")),
            insecure_tls: false,
            fast_mode: false,
            stealth_mode: false,
            active_discovery: true,
            breaker_failure_threshold: 5,
            breaker_success_threshold: 2,
            breaker_open_timeout_secs: 30,
            breaker_max_half_open: 1,
            retry_max: 2,
            retry_initial_delay_ms: 500,
            retry_max_delay_ms: 10_000,
        }
    }
}

impl CrawlConfig {
    #[must_use]
    pub fn builder() -> super::builder::CrawlConfigBuilder {
        super::builder::CrawlConfigBuilder::default()
    }

    #[must_use]
    pub fn seeds(&self) -> &[String] {
        &self.seeds
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    #[must_use]
    pub fn max_pages(&self) -> Option<usize> {
        self.max_pages
    }

    #[must_use]
    pub fn browser_enabled(&self) -> bool {
        self.browser_enabled
    }

    #[must_use]
    pub fn fast_mode(&self) -> bool {
        self.fast_mode
    }

    #[must_use]
    pub fn stealth_mode(&self) -> bool {
        self.stealth_mode
    }

    #[must_use]
    pub fn active_discovery(&self) -> bool {
        self.active_discovery
    }

    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    #[must_use]
    pub fn auth(&self) -> &AuthSpec {
        &self.auth
    }

    #[must_use]
    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    #[must_use]
    pub fn static_timeout(&self) -> Duration {
        Duration::from_secs(self.static_timeout_secs)
    }

    #[must_use]
    pub fn browser_visit_timeout(&self) -> Duration {
        Duration::from_secs(self.browser_visit_timeout_secs)
    }

    #[must_use]
    pub fn robots_ttl(&self) -> Duration {
        Duration::from_secs(self.robots_ttl_secs)
    }

    /// The scope policy implied by this config
    #[must_use]
    pub fn scope(&self) -> ScopePolicy {
        let mut scope = ScopePolicy::for_hosts(self.allowed_hosts.clone(), self.max_depth);
        scope.allowed_path_prefixes = self.allowed_path_prefixes.clone();
        scope
    }

    #[must_use]
    pub fn rate_limits(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            per_host_rps: self.per_host_rps,
            per_host_burst: self.per_host_burst,
            global_rps: self.global_rps,
            global_burst: self.per_host_burst.max(4),
        }
    }

    #[must_use]
    pub fn breaker(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.breaker_failure_threshold,
            success_threshold: self.breaker_success_threshold,
            timeout: Duration::from_secs(self.breaker_open_timeout_secs),
            max_half_open: self.breaker_max_half_open,
        }
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry_max,
            initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            ..RetryPolicy::default()
        }
    }

    #[must_use]
    pub fn browser_pool(&self) -> crate::browser::BrowserPoolConfig {
        crate::browser::BrowserPoolConfig {
            pool_size: self.browser_pool_size,
            recycle_after: self.browser_recycle_after,
            headless: self.headless,
        }
    }

    #[must_use]
    pub fn static_fetcher(&self) -> crate::fetch::StaticFetcherConfig {
        crate::fetch::StaticFetcherConfig {
            user_agent: self.user_agent.clone(),
            timeout: self.static_timeout(),
            insecure_tls: self.insecure_tls,
        }
    }
}
