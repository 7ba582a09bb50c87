//! Crawl event stream
//!
//! Everything the engine learns flows to the reporter as events over a
//! broadcast bus. Publishing is best-effort: with no subscriber attached
//! events are counted and dropped, never blocking the crawl.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::auth::AuthKind;
use crate::discovery::Endpoint;
use crate::errors::ErrorKind;
use crate::model::{FetchResult, Form};

/// Aggregate figures carried by [`CrawlEvent::CrawlComplete`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlStats {
    pub pages_visited: u64,
    pub endpoints_discovered: u64,
    pub forms_discovered: u64,
    pub websockets_discovered: u64,
    pub errors: u64,
    pub duration: Duration,
}

/// One event emitted to the reporter sink
#[derive(Debug, Clone)]
pub enum CrawlEvent {
    /// A page (static or browser-rendered) finished processing
    PageVisited(Box<FetchResult>),
    /// A new endpoint record was created
    EndpointDiscovered(Endpoint),
    /// A form was found on `page_url`
    FormDiscovered { form: Form, page_url: String },
    /// A WebSocket channel was observed
    WebSocketDiscovered { url: String, discovered_from: String },
    /// The auth provider refreshed its credential
    AuthRefreshed(AuthKind),
    /// A URL failed; the crawl continues
    Error {
        url: String,
        kind: ErrorKind,
        message: String,
        retryable: bool,
    },
    /// The crawl drained its frontier (or was cancelled)
    CrawlComplete(CrawlStats),
}

/// Delivery counters for the bus
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventBusMetrics {
    pub published: u64,
    pub dropped: u64,
}

/// Broadcast bus carrying [`CrawlEvent`]s to any number of subscribers
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<CrawlEvent>,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl EventBus {
    /// `capacity` bounds the per-subscriber backlog
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(16));
        Self {
            sender,
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Subscribe to the live event stream
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CrawlEvent> {
        self.sender.subscribe()
    }

    /// Publish one event; drops (and counts) when nobody listens
    pub fn publish(&self, event: CrawlEvent) {
        match self.sender.send(event) {
            Ok(_) => {
                self.published.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Snapshot of the delivery counters
    #[must_use]
    pub fn metrics(&self) -> EventBusMetrics {
        EventBusMetrics {
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
