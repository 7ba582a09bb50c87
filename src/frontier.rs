//! Deduplicated, depth-ordered crawl frontier
//!
//! The frontier is the single work queue every fetch modality drains.
//! Canonical URLs are admitted once, ever: re-adding a URL that was already
//! queued (or already crawled) is a no-op. Items at lower depth strictly
//! precede deeper ones; within a depth band order is FIFO.

use std::collections::{BTreeMap, VecDeque};

use dashmap::DashSet;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::model::FrontierItem;
use crate::urlnorm;

/// The shared crawl frontier
#[derive(Debug)]
pub struct Frontier {
    /// Canonical URLs ever admitted; never shrinks during a crawl
    seen: DashSet<String>,
    /// Depth → FIFO bucket
    buckets: Mutex<BTreeMap<u32, VecDeque<FrontierItem>>>,
    /// One permit per queued item; closing it wakes blocked consumers
    available: Semaphore,
}

impl Frontier {
    #[must_use]
    pub fn new() -> Self {
        Self {
            seen: DashSet::new(),
            buckets: Mutex::new(BTreeMap::new()),
            available: Semaphore::new(0),
        }
    }

    /// Queue `item` unless its canonical URL was already admitted
    ///
    /// Returns whether the item was accepted. The first add for a URL wins;
    /// its depth and source are the ones recorded.
    pub fn add(&self, item: FrontierItem) -> bool {
        if !self.seen.insert(urlnorm::canonical_key(&item.url)) {
            return false;
        }
        self.buckets
            .lock()
            .entry(item.depth)
            .or_default()
            .push_back(item);
        self.available.add_permits(1);
        true
    }

    /// Pop the next item, blocking until one is queued
    ///
    /// Returns `None` once the frontier is closed or `cancel` fires. The
    /// same canonical URL is never returned twice across the crawl.
    pub async fn next(&self, cancel: &CancellationToken) -> Option<FrontierItem> {
        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => return None,
            permit = self.available.acquire() => permit.ok()?,
        };
        permit.forget();

        let mut buckets = self.buckets.lock();
        // A permit guarantees one queued item
        let (&depth, _) = buckets.iter().next()?;
        let bucket = buckets.get_mut(&depth)?;
        let item = bucket.pop_front();
        if bucket.is_empty() {
            buckets.remove(&depth);
        }
        item
    }

    /// Re-queue an item that was already consumed once
    ///
    /// Bypasses the dedup set; used by the engine when a circuit-rejected
    /// item is given its one recovery attempt.
    pub(crate) fn readd(&self, item: FrontierItem) {
        self.buckets
            .lock()
            .entry(item.depth)
            .or_default()
            .push_back(item);
        self.available.add_permits(1);
    }

    /// Items currently queued (not counting in-flight work)
    #[must_use]
    pub fn size(&self) -> usize {
        self.buckets.lock().values().map(VecDeque::len).sum()
    }

    /// Whether `url` was ever admitted
    #[must_use]
    pub fn has_seen(&self, url: &url::Url) -> bool {
        self.seen.contains(&urlnorm::canonical_key(url))
    }

    /// Wake every blocked consumer; subsequent `next` calls return `None`
    pub fn close(&self) {
        self.available.close();
    }
}

impl Default for Frontier {
    fn default() -> Self {
        Self::new()
    }
}
