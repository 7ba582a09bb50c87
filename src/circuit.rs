//! Per-host circuit breaker
//!
//! Tracks host health across three states and short-circuits requests to
//! hosts that keep failing, preventing retry storms:
//! - Closed: normal operation, every call admitted
//! - Open: rejecting calls until the cooldown elapses
//! - `HalfOpen`: admitting a bounded number of probes after cooldown

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::errors::{CrawlError, CrawlResult, ErrorKind};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, calls admitted
    Closed,
    /// Rejecting calls until the cooldown elapses
    Open,
    /// Probing after cooldown, limited calls admitted
    HalfOpen,
}

/// Thresholds and timing for a [`HostBreaker`]
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again
    pub success_threshold: u32,
    /// Cooldown before an open circuit admits probes
    pub timeout: Duration,
    /// Probes admitted concurrently while half-open
    pub max_half_open: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
            max_half_open: 1,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    half_open_in_flight: u32,
    opened_at: Option<Instant>,
}

/// Circuit breaker guarding a single host
///
/// Every admitted call must report back exactly once via `record_success`
/// or `record_failure`; [`HostBreaker::execute`] wraps that dance.
#[derive(Debug)]
pub struct HostBreaker {
    host: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl HostBreaker {
    #[must_use]
    pub fn new(host: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            host: host.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                half_open_in_flight: 0,
                opened_at: None,
            }),
        }
    }

    /// Request admission for one call
    ///
    /// Open circuits transition to `HalfOpen` here once the cooldown has
    /// elapsed; the transitioning call counts as the first probe.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed());
                if elapsed.is_some_and(|e| e >= self.config.timeout) {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                    inner.half_open_in_flight = 1;
                    info!(
                        "circuit half-open for {} after {:?} cooldown",
                        self.host, elapsed
                    );
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight < self.config.max_half_open {
                    inner.half_open_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Report a successful call previously admitted by [`HostBreaker::allow`]
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.opened_at = None;
                    info!("circuit closed for {}", self.host);
                } else {
                    debug!(
                        "circuit half-open success for {} ({}/{})",
                        self.host, inner.half_open_successes, self.config.success_threshold
                    );
                }
            }
            // A straggler reporting after the circuit re-opened
            CircuitState::Open => {}
        }
    }

    /// Report a failed call previously admitted by [`HostBreaker::allow`]
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    inner.half_open_successes = 0;
                    inner.half_open_in_flight = 0;
                    warn!(
                        "circuit open for {} after {} consecutive failures",
                        self.host, inner.consecutive_failures
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.half_open_successes = 0;
                inner.half_open_in_flight = 0;
                warn!("circuit re-open for {}: half-open probe failed", self.host);
            }
            CircuitState::Open => {}
        }
    }

    /// Current state, transitioning Open→`HalfOpen` is NOT triggered here
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Admit, run `op`, and report the outcome in one step
    pub async fn execute<T, F, Fut>(&self, op: F) -> CrawlResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = CrawlResult<T>>,
    {
        if !self.allow() {
            return Err(CrawlError::new(
                ErrorKind::CircuitOpen,
                format!("https://{}/", self.host),
                "circuit-admit",
                format!("circuit open for host {}", self.host),
            ));
        }
        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }
}

/// Lazily-created breaker per hostname
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<HostBreaker>>,
    config: BreakerConfig,
}

impl BreakerRegistry {
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
        }
    }

    /// Fetch the breaker for `host`, creating it on first use
    #[must_use]
    pub fn for_host(&self, host: &str) -> Arc<HostBreaker> {
        if let Some(existing) = self.breakers.get(host) {
            return Arc::clone(existing.value());
        }
        // Entry re-checks under the shard lock, so racing creators converge
        Arc::clone(
            self.breakers
                .entry(host.to_string())
                .or_insert_with(|| Arc::new(HostBreaker::new(host, self.config.clone())))
                .value(),
        )
    }

    /// Hosts whose circuit currently admits calls without probing
    #[must_use]
    pub fn recovered_hosts(&self) -> Vec<String> {
        self.breakers
            .iter()
            .filter(|entry| entry.value().allow_peek())
            .map(|entry| entry.key().clone())
            .collect()
    }
}

impl HostBreaker {
    /// Non-mutating admission check used when draining parked items
    ///
    /// Unlike [`HostBreaker::allow`], does not consume a half-open probe
    /// slot, but does perform the Open→`HalfOpen` cooldown transition.
    pub(crate) fn allow_peek(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => inner.half_open_in_flight < self.config.max_half_open,
            CircuitState::Open => {
                if inner.opened_at.is_some_and(|t| t.elapsed() >= self.config.timeout) {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                    inner.half_open_in_flight = 0;
                    info!("circuit half-open for {} (cooldown elapsed)", self.host);
                    true
                } else {
                    false
                }
            }
        }
    }
}
