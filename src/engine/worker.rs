//! Per-worker dispatch loop
//!
//! Each worker pulls one frontier item at a time through the gauntlet:
//! scope, robots, rate limit, circuit breaker, auth refresh, then the
//! fetch modality chosen for the item. Discoveries feed back into the
//! frontier; results and failures stream out as events.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::{debug, warn};

use crate::browser::{visit_hash_route, visit_page, VisitOptions};
use crate::discovery::{endpoints, Endpoint, EndpointSource};
use crate::errors::{CrawlError, CrawlResult, ErrorKind};
use crate::events::CrawlEvent;
use crate::model::{DiscoverySource, FetchResult, FrontierItem};
use crate::urlnorm;

use super::CrawlEngine;

/// Body text below this with a mount node marks a skeletal document
const SKELETAL_TEXT_THRESHOLD: usize = 200;

pub(crate) async fn worker_loop(engine: Arc<CrawlEngine>, worker_id: usize) {
    debug!("worker {worker_id} started");
    loop {
        let Some(item) = engine.frontier.next(&engine.cancel).await else {
            break;
        };
        process_item(&engine, item).await;
        engine.finish_item();
    }
    debug!("worker {worker_id} exiting");
}

async fn process_item(engine: &Arc<CrawlEngine>, item: FrontierItem) {
    if let Some(limit) = engine.config.max_pages() {
        if engine.pages_visited.load(Ordering::Relaxed) >= limit as u64 {
            engine.cancel.cancel();
            return;
        }
    }

    if !engine.scope.is_in_scope(&item.url) || !engine.scope.depth_allowed(item.depth) {
        debug!("out of scope: {}", item.url);
        return;
    }

    if !engine.robots.is_allowed(&item.url).await {
        debug!("robots disallows {}", item.url);
        return;
    }
    // A Crawl-delay directive floors this host's pace from now on
    let robots_record = engine.robots.record_for(&item.url).await;
    let host = item.host().to_string();
    if let Some(delay) = robots_record.crawl_delay {
        engine.limiter.apply_min_interval(&host, delay);
    }

    if engine.limiter.acquire(&engine.cancel, &host).await.is_err() {
        return;
    }

    let breaker = engine.breakers.for_host(&host);
    if !breaker.allow() {
        let parked = engine.park_for_recovery(item.clone());
        if parked {
            debug!("circuit open for {host}, parked {}", item.url);
        }
        emit_error(
            engine,
            &item.url.to_string(),
            &CrawlError::new(
                ErrorKind::CircuitOpen,
                item.url.as_str(),
                "dispatch",
                format!("circuit open for host {host}"),
            ),
        );
        return;
    }

    if engine.auth.refresh_if_needed().await {
        engine
            .events
            .publish(CrawlEvent::AuthRefreshed(engine.auth.kind()));
    }

    let mut outcome = dispatch_fetch(engine, &item).await;

    // A credential rejection gets one forced refresh, ignoring the expiry
    // window, and one retry against the fresh credential.
    if matches!(&outcome, Err(err) if err.kind == ErrorKind::Auth) {
        if engine.auth.force_refresh().await {
            engine
                .events
                .publish(CrawlEvent::AuthRefreshed(engine.auth.kind()));
            outcome = dispatch_fetch(engine, &item).await;
        }
    }

    let result = match outcome {
        Ok(result) => {
            breaker.record_success();
            result
        }
        Err(err) if err.kind == ErrorKind::Cancelled => {
            // Shutdown path: the admission must still be balanced
            breaker.record_success();
            return;
        }
        Err(mut err) => {
            breaker.record_failure();
            if err.kind == ErrorKind::Auth {
                // Still rejected after the forced refresh: keep the guarded
                // endpoint on record with its 401/403 and stop claiming the
                // credential works. Later items re-attempt their own refresh.
                record_guarded_endpoint(engine, &item, &err);
                engine.auth.mark_unauthenticated();
            }
            if err.kind == ErrorKind::RateLimit {
                let delay = err
                    .retry_after
                    .unwrap_or(std::time::Duration::from_secs(5));
                engine.limiter.apply_retry_after(&host, delay);
            }
            err.url = item.url.to_string();
            emit_error(engine, &item.url.to_string(), &err);
            return;
        }
    };

    engine.pages_visited.fetch_add(1, Ordering::Relaxed);
    process_result(engine, &item, result);
}

/// Pick the fetch modality for `item` and run it
///
/// Hash-route discoveries always take the SPA fetcher. With fast mode off
/// the browser renders everything it can; with fast mode on the static
/// fetcher leads, upgrading to the browser for hosts whose documents came
/// back skeletal.
async fn dispatch_fetch(engine: &Arc<CrawlEngine>, item: &FrontierItem) -> CrawlResult<FetchResult> {
    let is_hash_route = item
        .url
        .fragment()
        .is_some_and(urlnorm::is_hash_route);

    if let Some(pool) = &engine.browser_pool {
        if is_hash_route {
            return browser_visit(engine, pool, item, true).await;
        }
        let host_needs_js = engine.js_hosts.contains(item.host());
        if !engine.config.fast_mode() || host_needs_js {
            return browser_visit(engine, pool, item, false).await;
        }
    }

    let result = engine
        .fetcher
        .get_with_retry(&engine.cancel, &engine.retrier, &item.url)
        .await?;

    // Static-then-upgrade: a skeletal document means this host renders
    // client-side, so re-fetch through the browser and remember the host.
    if looks_skeletal(&result) {
        if let Some(pool) = &engine.browser_pool {
            debug!("skeletal document at {}, upgrading to browser", item.url);
            engine.js_hosts.insert(item.host().to_string());
            return browser_visit(engine, pool, item, false).await;
        }
    }

    Ok(result)
}

async fn browser_visit(
    engine: &Arc<CrawlEngine>,
    pool: &Arc<crate::browser::BrowserPool>,
    item: &FrontierItem,
    hash_route: bool,
) -> CrawlResult<FetchResult> {
    let guard = pool.acquire().await?;

    let options = VisitOptions {
        headers: engine.auth.headers_to_inject(),
        cookies: engine.auth.cookies_to_inject(),
        user_agent: engine.config.user_agent().to_string(),
        stealth: engine.config.stealth_mode(),
        fast_mode: engine.config.fast_mode(),
        ..VisitOptions::default()
    };

    let visit = async {
        if hash_route {
            let fragment = item.url.fragment().unwrap_or_default().to_string();
            let mut base = item.url.clone();
            base.set_fragment(None);
            visit_hash_route(&engine.cancel, guard.browser(), &base, &fragment, &options).await
        } else {
            visit_page(&engine.cancel, guard.browser(), &item.url, &options).await
        }
    };

    match tokio::time::timeout(engine.config.browser_visit_timeout(), visit).await {
        Ok(result) => result,
        Err(_) => Err(CrawlError::new(
            ErrorKind::Timeout,
            item.url.as_str(),
            "browser-visit",
            format!(
                "visit exceeded {:?}",
                engine.config.browser_visit_timeout()
            ),
        )),
    }
}

/// Feed one result's discoveries back into the pipeline
fn process_result(engine: &Arc<CrawlEngine>, item: &FrontierItem, result: FetchResult) {
    // Soft-error pages are reported but never grow the frontier
    if !result.is_soft_error {
        for link in &result.links {
            add_child(engine, item, link.as_str(), DiscoverySource::Link);
        }

        // Framework routes become hash-route views of the final URL
        for route in &result.frameworks.routes {
            let mut view = result.final_url.clone();
            let fragment = route.strip_prefix('#').unwrap_or(route);
            if fragment.starts_with('/') || fragment.starts_with('!') {
                view.set_fragment(Some(fragment));
            } else {
                view.set_fragment(Some(&format!("/{fragment}")));
            }
            add_child(engine, item, view.as_str(), DiscoverySource::FrameworkRoute);
        }
    }

    let page_url = item.url.to_string();

    for endpoint in engine
        .passive
        .process(&result.network_requests, &result.final_url)
    {
        engine.endpoints_found.fetch_add(1, Ordering::Relaxed);
        engine
            .events
            .publish(CrawlEvent::EndpointDiscovered(endpoint));
    }

    for form in &result.forms {
        engine.forms_found.fetch_add(1, Ordering::Relaxed);
        engine.events.publish(CrawlEvent::FormDiscovered {
            form: form.clone(),
            page_url: page_url.clone(),
        });
    }

    for ws in &result.websocket_urls {
        engine.websockets_found.fetch_add(1, Ordering::Relaxed);
        engine.events.publish(CrawlEvent::WebSocketDiscovered {
            url: ws.clone(),
            discovered_from: page_url.clone(),
        });
    }

    engine
        .events
        .publish(CrawlEvent::PageVisited(Box::new(result)));
}

fn add_child(
    engine: &Arc<CrawlEngine>,
    parent: &FrontierItem,
    raw_url: &str,
    source: DiscoverySource,
) {
    let Ok(url) = urlnorm::normalize_str(raw_url, Some(&parent.url)) else {
        return;
    };
    // Out-of-scope URLs are silently dropped here, before they ever queue
    if !engine.scope.is_in_scope(&url) {
        return;
    }
    let child = FrontierItem::child(url, parent, source);
    if !engine.scope.depth_allowed(child.depth) {
        return;
    }
    engine.enqueue(child);
}

/// An auth-rejected URL is surface worth keeping: record the endpoint with
/// the 401/403 it answered
fn record_guarded_endpoint(engine: &Arc<CrawlEngine>, item: &FrontierItem, err: &CrawlError) {
    let mut endpoint = Endpoint::new(
        endpoints::base_url(&item.url),
        "GET",
        EndpointSource::Passive,
    );
    endpoint.last_status = err.status.or(Some(401));
    let (merged, created) = engine.endpoints.record(endpoint);
    if created {
        engine.endpoints_found.fetch_add(1, Ordering::Relaxed);
        engine
            .events
            .publish(CrawlEvent::EndpointDiscovered(merged));
    }
}

fn emit_error(engine: &Arc<CrawlEngine>, url: &str, err: &CrawlError) {
    engine.error_count.fetch_add(1, Ordering::Relaxed);
    if err.kind != ErrorKind::CircuitOpen {
        warn!("{} failed: {} ({})", url, err.message, err.kind.as_str());
    }
    engine.events.publish(CrawlEvent::Error {
        url: url.to_string(),
        kind: err.kind,
        message: err.message.clone(),
        retryable: err.is_retryable(),
    });
}

/// Heuristic for documents that render entirely client-side: a framework
/// mount node or bundle script with almost no visible text.
fn looks_skeletal(result: &FetchResult) -> bool {
    if result.body.is_empty() {
        return false;
    }
    let has_mount = result.body.contains("id=\"root\"")
        || result.body.contains("id=\"app\"")
        || result.body.contains("data-reactroot")
        || result.body.contains("ng-app");
    let has_bundle = result.scripts.iter().any(|s| {
        let path = s.path().to_lowercase();
        path.contains("bundle") || path.contains("chunk") || path.contains("main.")
    });
    if !has_mount && !has_bundle {
        return false;
    }

    let text_len = visible_text_len(&result.body);
    text_len < SKELETAL_TEXT_THRESHOLD
}

/// Rough visible-text length: byte length outside tags, scripts stripped
fn visible_text_len(html: &str) -> usize {
    let mut len = 0;
    let mut in_tag = false;
    let mut in_script = false;
    let lowered = html.to_lowercase();
    let bytes = lowered.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if !in_tag && bytes[i] == b'<' {
            in_tag = true;
            if lowered[i..].starts_with("<script") {
                in_script = true;
            } else if lowered[i..].starts_with("</script") {
                in_script = false;
            }
        } else if in_tag && bytes[i] == b'>' {
            in_tag = false;
        } else if !in_tag && !in_script && !bytes[i].is_ascii_whitespace() {
            len += 1;
        }
        i += 1;
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn result_with(body: &str, scripts: &[&str]) -> FetchResult {
        let mut result = FetchResult::empty(Url::parse("https://example.com/").expect("url"));
        result.body = body.to_string();
        result.scripts = scripts
            .iter()
            .map(|s| Url::parse(s).expect("script url"))
            .collect();
        result
    }

    #[test]
    fn skeletal_spa_shell_is_detected() {
        let shell = r#"<html><body><div id="root"></div>
            <script src="/static/js/main.8f3a.js"></script></body></html>"#;
        let result = result_with(shell, &["https://example.com/static/js/main.8f3a.js"]);
        assert!(looks_skeletal(&result));
    }

    #[test]
    fn content_rich_page_is_not_skeletal() {
        let mut page = String::from("<html><body><div id=\"app\">");
        page.push_str(&"Plenty of real server-rendered text here. ".repeat(20));
        page.push_str("</div></body></html>");
        let result = result_with(&page, &[]);
        assert!(!looks_skeletal(&result));
    }

    #[test]
    fn plain_page_without_mount_is_not_skeletal() {
        let result = result_with("<html><body><p>tiny</p></body></html>", &[]);
        assert!(!looks_skeletal(&result));
    }

    #[test]
    fn visible_text_ignores_tags_and_scripts() {
        let html = "<p>abc</p><script>var xxxxxxxxxx = 1;</script><b>de</b>";
        assert_eq!(visible_text_len(html), 5);
    }
}
