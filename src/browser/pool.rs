//! Bounded pool of long-lived headless browsers
//!
//! A counted semaphore of size `pool_size` governs access. Browsers are
//! reused across page visits and recycled (closed and relaunched) after
//! `recycle_after` uses so leaky pages cannot degrade the whole crawl.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chromiumoxide::browser::Browser;
use log::{debug, info, warn};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::errors::{CrawlError, ErrorKind};

use super::setup::launch_browser;

/// Pool sizing and recycling knobs
#[derive(Debug, Clone)]
pub struct BrowserPoolConfig {
    /// Browsers kept alive concurrently
    pub pool_size: usize,
    /// Page visits before a browser is closed and replaced
    pub recycle_after: u32,
    pub headless: bool,
}

impl Default for BrowserPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 3,
            recycle_after: 40,
            headless: true,
        }
    }
}

/// A launched browser with its handler task and bookkeeping
struct PooledBrowser {
    id: u64,
    browser: Browser,
    handler: JoinHandle<()>,
    profile_dir: PathBuf,
    visits: u32,
}

impl PooledBrowser {
    async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("closing browser {}: {e}", self.id);
        }
        let _ = self.browser.wait().await;
        self.handler.abort();
        if let Err(e) = std::fs::remove_dir_all(&self.profile_dir) {
            debug!("removing profile dir {}: {e}", self.profile_dir.display());
        }
    }
}

/// Fixed-size browser pool with recycle-after-N semantics
pub struct BrowserPool {
    config: BrowserPoolConfig,
    /// Idle browsers; never holds more than `pool_size`
    idle: Arc<Mutex<Vec<PooledBrowser>>>,
    /// One permit per pool slot; closed on shutdown to wake acquirers
    permits: Arc<Semaphore>,
    next_id: AtomicU64,
}

impl BrowserPool {
    /// Launch `pool_size` browsers up front
    pub async fn start(config: BrowserPoolConfig) -> Result<Arc<Self>> {
        let pool = Arc::new(Self {
            permits: Arc::new(Semaphore::new(config.pool_size)),
            idle: Arc::new(Mutex::new(Vec::with_capacity(config.pool_size))),
            next_id: AtomicU64::new(0),
            config,
        });

        {
            let mut idle = pool.idle.lock().await;
            for _ in 0..pool.config.pool_size {
                let browser = pool.launch_one().await?;
                idle.push(browser);
            }
        }

        info!("browser pool started with {} instances", pool.config.pool_size);
        Ok(pool)
    }

    /// Block for a pool slot and hand out a browser
    ///
    /// If the chosen browser has reached its recycle budget (or its CDP
    /// connection died) it is replaced before being handed out. The guard
    /// returns the browser to the pool on drop.
    pub async fn acquire(self: &Arc<Self>) -> Result<BrowserGuard, CrawlError> {
        let permit = self.permits.clone().acquire_owned().await.map_err(|_| {
            CrawlError::new(ErrorKind::Browser, "", "pool-acquire", "browser pool closed")
        })?;

        let mut slot = self.idle.lock().await.pop();

        let needs_replacement = match &mut slot {
            Some(pooled) => {
                pooled.visits >= self.config.recycle_after
                    || pooled.browser.version().await.is_err()
            }
            None => true,
        };

        if needs_replacement {
            if let Some(worn) = slot.take() {
                debug!("recycling browser {} after {} visits", worn.id, worn.visits);
                worn.close().await;
            }
            slot = Some(self.launch_one().await.map_err(|e| {
                CrawlError::new(ErrorKind::Browser, "", "pool-launch", e.to_string())
            })?);
        }

        let mut pooled = match slot {
            Some(pooled) => pooled,
            None => unreachable!("slot populated above"),
        };
        pooled.visits += 1;

        Ok(BrowserGuard {
            pooled: Some(pooled),
            idle: Arc::clone(&self.idle),
            permit: Some(permit),
        })
    }

    /// Close every browser and wake blocked acquirers with an error
    pub async fn shutdown(&self) {
        self.permits.close();
        let mut idle = self.idle.lock().await;
        while let Some(browser) = idle.pop() {
            browser.close().await;
        }
        info!("browser pool shut down");
    }

    async fn launch_one(&self) -> Result<PooledBrowser> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (browser, handler, profile_dir) = launch_browser(self.config.headless)
            .await
            .with_context(|| format!("launching pooled browser {id}"))?;
        debug!("launched pooled browser {id}");
        Ok(PooledBrowser {
            id,
            browser,
            handler,
            profile_dir,
            visits: 0,
        })
    }
}

/// RAII handle to a pooled browser; returns it to the pool on drop
pub struct BrowserGuard {
    pooled: Option<PooledBrowser>,
    idle: Arc<Mutex<Vec<PooledBrowser>>>,
    permit: Option<OwnedSemaphorePermit>,
}

impl BrowserGuard {
    /// The underlying browser connection
    #[must_use]
    pub fn browser(&self) -> &Browser {
        match self.pooled.as_ref() {
            Some(pooled) => &pooled.browser,
            None => unreachable!("guard holds a browser until dropped"),
        }
    }
}

impl Drop for BrowserGuard {
    fn drop(&mut self) {
        if let Some(pooled) = self.pooled.take() {
            let idle = Arc::clone(&self.idle);
            let permit = self.permit.take();
            let id = pooled.id;
            // The permit is released only after the browser is back in the
            // idle list, so a woken waiter always finds it there.
            tokio::spawn(async move {
                idle.lock().await.push(pooled);
                drop(permit);
                debug!("returned browser {id} to pool");
            });
        }
    }
}
