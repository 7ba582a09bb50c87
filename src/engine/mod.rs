//! Crawl orchestration: worker pool, dispatch and shutdown
//!
//! Workers drain the shared frontier through the politeness gauntlet
//! (scope, robots, rate limit, circuit breaker), dispatch each item to a
//! fetch modality, feed discoveries back into the frontier and stream
//! events to the reporter.

mod worker;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use dashmap::{DashMap, DashSet};
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::auth::{build_provider, AuthProvider};
use crate::browser::BrowserPool;
use crate::circuit::BreakerRegistry;
use crate::config::CrawlConfig;
use crate::discovery::{ActiveDiscovery, EndpointRegistry, PassiveDiscovery};
use crate::events::{CrawlEvent, CrawlStats, EventBus};
use crate::fetch::{build_http_client, StaticFetcher};
use crate::frontier::Frontier;
use crate::limiter::HostRateLimiter;
use crate::model::{DiscoverySource, FrontierItem};
use crate::retry::Retrier;
use crate::robots::RobotsCache;
use crate::urlnorm::{self, ScopePolicy};

/// The assembled crawl engine
pub struct CrawlEngine {
    pub(crate) config: CrawlConfig,
    pub(crate) scope: ScopePolicy,
    pub(crate) frontier: Arc<Frontier>,
    pub(crate) limiter: Arc<HostRateLimiter>,
    pub(crate) robots: Arc<RobotsCache>,
    pub(crate) breakers: Arc<BreakerRegistry>,
    pub(crate) auth: Arc<dyn AuthProvider>,
    pub(crate) fetcher: Arc<StaticFetcher>,
    pub(crate) retrier: Retrier,
    pub(crate) browser_pool: Option<Arc<BrowserPool>>,
    pub(crate) endpoints: Arc<EndpointRegistry>,
    pub(crate) passive: PassiveDiscovery,
    pub(crate) events: Arc<EventBus>,
    pub(crate) cancel: CancellationToken,

    /// Queued plus in-flight items; zero means the crawl is drained
    pub(crate) pending: AtomicUsize,
    /// Hosts observed to need JS rendering (skeletal static responses)
    pub(crate) js_hosts: DashSet<String>,
    /// Circuit-rejected items parked per host for one re-attempt
    pub(crate) parked: DashMap<String, Vec<FrontierItem>>,
    pub(crate) parked_once: DashSet<String>,

    pub(crate) pages_visited: AtomicU64,
    pub(crate) endpoints_found: AtomicU64,
    pub(crate) forms_found: AtomicU64,
    pub(crate) websockets_found: AtomicU64,
    pub(crate) error_count: AtomicU64,
}

impl CrawlEngine {
    /// Assemble the engine: HTTP client, auth provider, browser pool
    ///
    /// The browser pool is launched only when the config enables it.
    pub async fn new(config: CrawlConfig) -> Result<Arc<Self>> {
        let client = build_http_client(&config.static_fetcher())
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        let auth = build_provider(config.auth(), client.clone());

        let browser_pool = if config.browser_enabled() {
            match BrowserPool::start(config.browser_pool()).await {
                Ok(pool) => Some(pool),
                Err(e) => {
                    warn!("browser pool unavailable, static-only crawl: {e:#}");
                    None
                }
            }
        } else {
            None
        };

        let fetcher = Arc::new(StaticFetcher::new(
            client.clone(),
            config.static_fetcher(),
            Arc::clone(&auth),
        ));
        let robots = Arc::new(RobotsCache::new(
            client,
            config.user_agent(),
            Some(config.robots_ttl()),
        ));
        let endpoints = Arc::new(EndpointRegistry::new());

        Ok(Arc::new(Self {
            scope: config.scope(),
            frontier: Arc::new(Frontier::new()),
            limiter: Arc::new(HostRateLimiter::new(config.rate_limits())),
            robots,
            breakers: Arc::new(BreakerRegistry::new(config.breaker())),
            fetcher,
            retrier: Retrier::new(config.retry_policy()),
            browser_pool,
            passive: PassiveDiscovery::new(Arc::clone(&endpoints)),
            endpoints,
            events: Arc::new(EventBus::default()),
            cancel: CancellationToken::new(),
            pending: AtomicUsize::new(0),
            js_hosts: DashSet::new(),
            parked: DashMap::new(),
            parked_once: DashSet::new(),
            pages_visited: AtomicU64::new(0),
            endpoints_found: AtomicU64::new(0),
            forms_found: AtomicU64::new(0),
            websockets_found: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            auth,
            config,
        }))
    }

    /// The event stream fed by this crawl
    #[must_use]
    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    /// Token cancelling the whole crawl
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Endpoint registry snapshot access
    #[must_use]
    pub fn endpoints(&self) -> Arc<EndpointRegistry> {
        Arc::clone(&self.endpoints)
    }

    /// Run the crawl to completion (frontier drained, cancelled, or page
    /// cap reached) and return the aggregate stats.
    ///
    /// A failure during initial authentication aborts the crawl: a crawl
    /// that was asked to authenticate must not run unauthenticated.
    pub async fn run(self: &Arc<Self>) -> Result<CrawlStats> {
        let started = Instant::now();

        self.auth
            .authenticate(self.browser_pool.as_ref())
            .await
            .map_err(|e| anyhow::anyhow!("initial authentication failed: {e}"))
            .context("refusing to crawl without the requested credentials")?;

        for seed in self.config.seeds() {
            let url = urlnorm::normalize_str(seed, None)
                .map_err(|e| anyhow::anyhow!("seed rejected: {e}"))?;
            self.enqueue(FrontierItem::seed(url));
        }

        // Active probing runs before the workers so its frontier additions
        // cannot race crawl completion.
        if self.config.active_discovery() {
            self.run_active_discovery().await;
        }

        let workers: Vec<_> = (0..self.config.workers())
            .map(|id| {
                let engine = Arc::clone(self);
                tokio::spawn(async move { worker::worker_loop(engine, id).await })
            })
            .collect();

        for handle in workers {
            if let Err(e) = handle.await {
                warn!("worker task failed: {e}");
            }
        }

        let stats = CrawlStats {
            pages_visited: self.pages_visited.load(Ordering::Relaxed),
            endpoints_discovered: self.endpoints_found.load(Ordering::Relaxed),
            forms_discovered: self.forms_found.load(Ordering::Relaxed),
            websockets_discovered: self.websockets_found.load(Ordering::Relaxed),
            errors: self.error_count.load(Ordering::Relaxed),
            duration: started.elapsed(),
        };
        info!(
            "crawl complete: {} pages, {} endpoints, {} errors in {:?}",
            stats.pages_visited, stats.endpoints_discovered, stats.errors, stats.duration
        );
        self.events.publish(CrawlEvent::CrawlComplete(stats.clone()));

        if let Some(pool) = &self.browser_pool {
            pool.shutdown().await;
        }
        Ok(stats)
    }

    /// Probe each seed origin's well-known surface
    async fn run_active_discovery(self: &Arc<Self>) {
        let active = ActiveDiscovery::new(
            self.fetcher.client(),
            Arc::clone(&self.auth),
            Arc::clone(&self.endpoints),
            self.config.user_agent(),
        );

        let mut origins = Vec::new();
        for seed in self.config.seeds() {
            if let Ok(url) = url::Url::parse(seed) {
                let origin = url.origin().ascii_serialization();
                if !origins.contains(&origin) {
                    origins.push(origin);
                }
            }
        }

        for origin in origins {
            let Ok(base) = url::Url::parse(&origin) else {
                continue;
            };
            let mut found = active.probe_common_paths(&base).await;
            found.extend(active.probe_graphql(&base).await);
            found.extend(active.probe_openapi(&base).await);

            for endpoint in found {
                self.endpoints_found.fetch_add(1, Ordering::Relaxed);
                // Probed URLs that answered are navigable surface too
                if let Ok(url) = urlnorm::normalize_str(&endpoint.url, None) {
                    if self.scope.is_in_scope(&url) {
                        self.enqueue(FrontierItem {
                            url,
                            depth: 1,
                            source: DiscoverySource::ActiveProbe,
                            parent: None,
                            priority: 10,
                        });
                    }
                }
                self.events.publish(CrawlEvent::EndpointDiscovered(endpoint));
            }
        }
    }

    /// Add one item, tracking it in the pending count on success
    pub(crate) fn enqueue(&self, item: FrontierItem) -> bool {
        if self.frontier.add(item) {
            self.pending.fetch_add(1, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    /// One processed item done; close the frontier when fully drained
    pub(crate) fn finish_item(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            debug!("frontier drained, closing");
            self.frontier.close();
        }
    }

    /// Park a circuit-rejected item for one re-attempt after the cooldown
    ///
    /// The first rejection parks; the pending count keeps the crawl alive
    /// until the drain re-queues the item. A second rejection drops it.
    pub(crate) fn park_for_recovery(self: &Arc<Self>, item: FrontierItem) -> bool {
        let key = urlnorm::canonical_key(&item.url);
        if !self.parked_once.insert(key) {
            return false;
        }
        let host = item.host().to_string();
        self.pending.fetch_add(1, Ordering::SeqCst);

        let schedule_drain = {
            let mut entry = self.parked.entry(host.clone()).or_default();
            entry.push(item);
            entry.len() == 1
        };

        if schedule_drain {
            let engine = Arc::clone(self);
            let cooldown = self.config.breaker().timeout + std::time::Duration::from_millis(250);
            tokio::spawn(async move {
                tokio::select! {
                    () = engine.cancel.cancelled() => {}
                    () = tokio::time::sleep(cooldown) => {}
                }
                if let Some((_, items)) = engine.parked.remove(&host) {
                    info!("re-queueing {} parked URLs for {host}", items.len());
                    for item in items {
                        engine.frontier.readd(item);
                    }
                }
            });
        }
        true
    }
}
