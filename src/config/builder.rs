//! Builder for [`CrawlConfig`]
//!
//! Validates and normalizes the seed list at build time and derives the
//! allowed-host set from the seeds when the caller did not pin one.

use anyhow::{bail, Context, Result};

use crate::auth::AuthSpec;
use crate::urlnorm;

use super::types::CrawlConfig;

#[derive(Debug, Default)]
pub struct CrawlConfigBuilder {
    seeds: Vec<String>,
    allowed_hosts: Option<Vec<String>>,
    allowed_path_prefixes: Vec<String>,
    max_depth: Option<u32>,
    max_pages: Option<usize>,
    workers: Option<usize>,
    browser_enabled: Option<bool>,
    browser_pool_size: Option<usize>,
    browser_recycle_after: Option<u32>,
    headless: Option<bool>,
    per_host_rps: Option<f64>,
    per_host_burst: Option<u32>,
    global_rps: Option<f64>,
    static_timeout_secs: Option<u64>,
    browser_visit_timeout_secs: Option<u64>,
    robots_ttl_secs: Option<u64>,
    auth: Option<AuthSpec>,
    user_agent: Option<String>,
    insecure_tls: Option<bool>,
    fast_mode: Option<bool>,
    stealth_mode: Option<bool>,
    active_discovery: Option<bool>,
    breaker_failure_threshold: Option<u32>,
    breaker_open_timeout_secs: Option<u64>,
    retry_max: Option<u32>,
}

impl CrawlConfigBuilder {
    #[must_use]
    pub fn seed(mut self, url: impl Into<String>) -> Self {
        self.seeds.push(url.into());
        self
    }

    #[must_use]
    pub fn seeds<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.seeds.extend(urls.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn allowed_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_hosts = Some(hosts.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn allowed_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.allowed_path_prefixes.push(prefix.into());
        self
    }

    #[must_use]
    pub fn max_depth(mut self, depth: u32) -> Self {
        self.max_depth = Some(depth);
        self
    }

    #[must_use]
    pub fn max_pages(mut self, pages: usize) -> Self {
        self.max_pages = Some(pages);
        self
    }

    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    #[must_use]
    pub fn browser_enabled(mut self, enabled: bool) -> Self {
        self.browser_enabled = Some(enabled);
        self
    }

    #[must_use]
    pub fn browser_pool_size(mut self, size: usize) -> Self {
        self.browser_pool_size = Some(size);
        self
    }

    #[must_use]
    pub fn browser_recycle_after(mut self, visits: u32) -> Self {
        self.browser_recycle_after = Some(visits);
        self
    }

    #[must_use]
    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = Some(headless);
        self
    }

    #[must_use]
    pub fn per_host_rps(mut self, rps: f64) -> Self {
        self.per_host_rps = Some(rps);
        self
    }

    #[must_use]
    pub fn per_host_burst(mut self, burst: u32) -> Self {
        self.per_host_burst = Some(burst);
        self
    }

    #[must_use]
    pub fn global_rps(mut self, rps: f64) -> Self {
        self.global_rps = Some(rps);
        self
    }

    #[must_use]
    pub fn static_timeout_secs(mut self, secs: u64) -> Self {
        self.static_timeout_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn browser_visit_timeout_secs(mut self, secs: u64) -> Self {
        self.browser_visit_timeout_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn robots_ttl_secs(mut self, secs: u64) -> Self {
        self.robots_ttl_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn auth(mut self, auth: AuthSpec) -> Self {
        self.auth = Some(auth);
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    #[must_use]
    pub fn insecure_tls(mut self, insecure: bool) -> Self {
        self.insecure_tls = Some(insecure);
        self
    }

    #[must_use]
    pub fn fast_mode(mut self, fast: bool) -> Self {
        self.fast_mode = Some(fast);
        self
    }

    #[must_use]
    pub fn stealth_mode(mut self, stealth: bool) -> Self {
        self.stealth_mode = Some(stealth);
        self
    }

    #[must_use]
    pub fn active_discovery(mut self, enabled: bool) -> Self {
        self.active_discovery = Some(enabled);
        self
    }

    #[must_use]
    pub fn breaker_failure_threshold(mut self, threshold: u32) -> Self {
        self.breaker_failure_threshold = Some(threshold);
        self
    }

    #[must_use]
    pub fn breaker_open_timeout_secs(mut self, secs: u64) -> Self {
        self.breaker_open_timeout_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn retry_max(mut self, retries: u32) -> Self {
        self.retry_max = Some(retries);
        self
    }

    /// Validate seeds, derive scope and produce the config
    pub fn build(self) -> Result<CrawlConfig> {
        if self.seeds.is_empty() {
            bail!("at least one seed URL is required");
        }

        let mut seeds = Vec::with_capacity(self.seeds.len());
        let mut derived_hosts = Vec::new();
        for raw in &self.seeds {
            let normalized = urlnorm::normalize_str(raw, None)
                .with_context(|| format!("invalid seed URL {raw:?}"))?;
            if let Some(host) = normalized.host_str() {
                let host = host.to_lowercase();
                if !derived_hosts.contains(&host) {
                    derived_hosts.push(host);
                }
            }
            seeds.push(normalized.to_string());
        }

        let defaults = CrawlConfig::default();
        let config = CrawlConfig {
            seeds,
            allowed_hosts: self.allowed_hosts.unwrap_or(derived_hosts),
            allowed_path_prefixes: self.allowed_path_prefixes,
            max_depth: self.max_depth.unwrap_or(defaults.max_depth),
            max_pages: self.max_pages,
            workers: self.workers.unwrap_or(defaults.workers).max(1),
            browser_enabled: self.browser_enabled.unwrap_or(defaults.browser_enabled),
            browser_pool_size: self
                .browser_pool_size
                .unwrap_or(defaults.browser_pool_size)
                .max(1),
            browser_recycle_after: self
                .browser_recycle_after
                .unwrap_or(defaults.browser_recycle_after)
                .max(1),
            headless: self.headless.unwrap_or(defaults.headless),
            per_host_rps: self.per_host_rps.unwrap_or(defaults.per_host_rps),
            per_host_burst: self.per_host_burst.unwrap_or(defaults.per_host_burst),
            global_rps: self.global_rps.unwrap_or(defaults.global_rps),
            static_timeout_secs: self
                .static_timeout_secs
                .unwrap_or(defaults.static_timeout_secs),
            browser_visit_timeout_secs: self
                .browser_visit_timeout_secs
                .unwrap_or(defaults.browser_visit_timeout_secs),
            robots_ttl_secs: self.robots_ttl_secs.unwrap_or(defaults.robots_ttl_secs),
            auth: self.auth.unwrap_or(defaults.auth),
            user_agent: self.user_agent.unwrap_or(defaults.user_agent),
            insecure_tls: self.insecure_tls.unwrap_or(defaults.insecure_tls),
            fast_mode: self.fast_mode.unwrap_or(defaults.fast_mode),
            stealth_mode: self.stealth_mode.unwrap_or(defaults.stealth_mode),
            active_discovery: self.active_discovery.unwrap_or(defaults.active_discovery),
            breaker_failure_threshold: self
                .breaker_failure_threshold
                .unwrap_or(defaults.breaker_failure_threshold),
            breaker_success_threshold: defaults.breaker_success_threshold,
            breaker_open_timeout_secs: self
                .breaker_open_timeout_secs
                .unwrap_or(defaults.breaker_open_timeout_secs),
            breaker_max_half_open: defaults.breaker_max_half_open,
            retry_max: self.retry_max.unwrap_or(defaults.retry_max),
            retry_initial_delay_ms: defaults.retry_initial_delay_ms,
            retry_max_delay_ms: defaults.retry_max_delay_ms,
        };

        if config.per_host_rps <= 0.0 {
            bail!("per_host_rps must be positive");
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_requires_a_seed() {
        assert!(CrawlConfig::builder().build().is_err());
    }

    #[test]
    fn seeds_are_normalized_and_hosts_derived() {
        let config = CrawlConfig::builder()
            .seed("HTTP://Example.COM:80/App/")
            .seed("https://api.example.org/")
            .build()
            .expect("valid config");

        assert_eq!(
            config.seeds(),
            ["http://example.com/App", "https://api.example.org/"]
        );
        assert_eq!(config.allowed_hosts, ["example.com", "api.example.org"]);
    }

    #[test]
    fn explicit_hosts_override_derivation() {
        let config = CrawlConfig::builder()
            .seed("https://example.com/")
            .allowed_hosts(["example.com", "cdn.example.net"])
            .build()
            .expect("valid config");
        assert_eq!(config.allowed_hosts, ["example.com", "cdn.example.net"]);
    }

    #[test]
    fn invalid_seed_is_rejected() {
        assert!(CrawlConfig::builder().seed("ftp://example.com/").build().is_err());
        assert!(CrawlConfig::builder().seed("not a url").build().is_err());
    }

    #[test]
    fn zero_rate_is_rejected() {
        let result = CrawlConfig::builder()
            .seed("https://example.com/")
            .per_host_rps(0.0)
            .build();
        assert!(result.is_err());
    }
}
