//! Per-host politeness rate limiting
//!
//! Token bucket per host plus an optional global bucket capping aggregate
//! throughput. `acquire` blocks until a token is available, honoring
//! cancellation. Robots `Crawl-delay` directives and 429 `Retry-After`
//! advisories tighten a host's pace at runtime.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::debug;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::errors::{CrawlError, CrawlResult};

/// Rates and burst sizes for the crawl
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Steady-state requests per second per host
    pub per_host_rps: f64,
    /// Extra requests a host may absorb at once
    pub per_host_burst: u32,
    /// Aggregate requests per second across all hosts, 0 disables the cap
    pub global_rps: f64,
    pub global_burst: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            per_host_rps: 2.0,
            per_host_burst: 2,
            global_rps: 0.0,
            global_burst: 8,
        }
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    rate: f64,
    burst: f64,
    last_refill: Instant,
    /// Advisory hold from a 429 Retry-After
    blocked_until: Option<Instant>,
}

impl TokenBucket {
    fn new(rate: f64, burst: f64) -> Self {
        Self {
            tokens: burst,
            rate,
            burst,
            last_refill: Instant::now(),
            blocked_until: None,
        }
    }

    /// Take one token, or report how long until one accrues
    fn try_take(&mut self) -> Result<(), Duration> {
        let now = Instant::now();
        if let Some(until) = self.blocked_until {
            if now < until {
                return Err(until - now);
            }
            self.blocked_until = None;
        }

        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else if self.rate > 0.0 {
            Err(Duration::from_secs_f64((1.0 - self.tokens) / self.rate))
        } else {
            Err(Duration::from_secs(1))
        }
    }
}

/// Blocking per-host + global rate limiter
#[derive(Debug)]
pub struct HostRateLimiter {
    config: RateLimiterConfig,
    hosts: DashMap<String, Arc<Mutex<TokenBucket>>>,
    global: Option<Mutex<TokenBucket>>,
}

impl HostRateLimiter {
    #[must_use]
    pub fn new(config: RateLimiterConfig) -> Self {
        let global = if config.global_rps > 0.0 {
            Some(Mutex::new(TokenBucket::new(
                config.global_rps,
                f64::from(config.global_burst).max(1.0),
            )))
        } else {
            None
        };
        Self {
            config,
            hosts: DashMap::new(),
            global,
        }
    }

    /// Block until both the host bucket and the global bucket yield a token
    pub async fn acquire(&self, cancel: &CancellationToken, host: &str) -> CrawlResult<()> {
        let bucket = self.bucket_for(host);
        loop {
            let wait = { bucket.lock().try_take().err() };
            match wait {
                None => break,
                Some(wait) => {
                    debug!("rate limit: {host} waiting {wait:?}");
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => {
                            return Err(CrawlError::cancelled(host, "rate-acquire"));
                        }
                        () = tokio::time::sleep(wait) => {}
                    }
                }
            }
        }

        if let Some(global) = &self.global {
            loop {
                let wait = { global.lock().try_take().err() };
                match wait {
                    None => break,
                    Some(wait) => {
                        tokio::select! {
                            biased;
                            () = cancel.cancelled() => {
                                return Err(CrawlError::cancelled(host, "rate-acquire"));
                            }
                            () = tokio::time::sleep(wait) => {}
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Lower-bound a host's request interval (robots `Crawl-delay`)
    ///
    /// Only ever slows a host down; a delay shorter than the configured
    /// pace is ignored.
    pub fn apply_min_interval(&self, host: &str, interval: Duration) {
        if interval.is_zero() {
            return;
        }
        let implied_rate = 1.0 / interval.as_secs_f64();
        let bucket = self.bucket_for(host);
        let mut bucket = bucket.lock();
        if implied_rate < bucket.rate {
            debug!("crawl-delay floors {host} to {implied_rate:.3} req/s");
            bucket.rate = implied_rate;
            bucket.burst = bucket.burst.min(1.0);
            bucket.tokens = bucket.tokens.min(bucket.burst);
        }
    }

    /// Push a 429 `Retry-After` advisory: the host issues nothing until then
    pub fn apply_retry_after(&self, host: &str, delay: Duration) {
        let bucket = self.bucket_for(host);
        let mut bucket = bucket.lock();
        let until = Instant::now() + delay;
        let later = match bucket.blocked_until {
            Some(existing) => existing.max(until),
            None => until,
        };
        bucket.blocked_until = Some(later);
        debug!("retry-after holds {host} for {delay:?}");
    }

    fn bucket_for(&self, host: &str) -> Arc<Mutex<TokenBucket>> {
        Arc::clone(
            self.hosts
                .entry(host.to_string())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(TokenBucket::new(
                        self.config.per_host_rps.max(0.001),
                        f64::from(self.config.per_host_burst).max(1.0),
                    )))
                })
                .value(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(rps: f64, burst: u32) -> HostRateLimiter {
        HostRateLimiter::new(RateLimiterConfig {
            per_host_rps: rps,
            per_host_burst: burst,
            global_rps: 0.0,
            global_burst: 1,
        })
    }

    #[tokio::test]
    async fn burst_is_immediate_then_paced() {
        let limiter = limiter(20.0, 2);
        let cancel = CancellationToken::new();

        let start = Instant::now();
        limiter.acquire(&cancel, "example.com").await.expect("token");
        limiter.acquire(&cancel, "example.com").await.expect("token");
        assert!(start.elapsed() < Duration::from_millis(20));

        limiter.acquire(&cancel, "example.com").await.expect("token");
        // Third token had to accrue at 20 req/s, roughly 50 ms
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn hosts_are_independent() {
        let limiter = limiter(1.0, 1);
        let cancel = CancellationToken::new();

        let start = Instant::now();
        limiter.acquire(&cancel, "a.test").await.expect("token");
        limiter.acquire(&cancel, "b.test").await.expect("token");
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn cancellation_interrupts_wait() {
        let limiter = limiter(0.1, 1);
        let cancel = CancellationToken::new();

        limiter.acquire(&cancel, "a.test").await.expect("token");

        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            cancel_clone.cancel();
        });

        let start = Instant::now();
        let err = limiter
            .acquire(&cancel, "a.test")
            .await
            .expect_err("cancelled");
        assert_eq!(err.kind, crate::errors::ErrorKind::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn crawl_delay_only_slows_down() {
        let limiter = limiter(10.0, 1);
        // 200 ms floor beats the configured 100 ms interval
        limiter.apply_min_interval("a.test", Duration::from_millis(200));

        let cancel = CancellationToken::new();
        let start = Instant::now();
        limiter.acquire(&cancel, "a.test").await.expect("token");
        limiter.acquire(&cancel, "a.test").await.expect("token");
        assert!(start.elapsed() >= Duration::from_millis(150));

        // A floor looser than the configured pace changes nothing
        let fast = limiter_with_floor(Duration::from_millis(10));
        let start = Instant::now();
        fast.acquire(&cancel, "b.test").await.expect("token");
        fast.acquire(&cancel, "b.test").await.expect("token");
        fast.acquire(&cancel, "b.test").await.expect("token");
        assert!(start.elapsed() >= Duration::from_millis(15));
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    fn limiter_with_floor(floor: Duration) -> HostRateLimiter {
        let l = limiter(20.0, 1);
        l.apply_min_interval("b.test", floor);
        l
    }

    #[tokio::test]
    async fn retry_after_holds_the_host() {
        let limiter = limiter(100.0, 5);
        let cancel = CancellationToken::new();

        limiter.acquire(&cancel, "a.test").await.expect("token");
        limiter.apply_retry_after("a.test", Duration::from_millis(80));

        let start = Instant::now();
        limiter.acquire(&cancel, "a.test").await.expect("token");
        assert!(start.elapsed() >= Duration::from_millis(60));
    }
}
