//! Browser-driven page visits
//!
//! A visit renders the page end to end: network interception, payload
//! injection, framework detection and readiness, extraction, fingerprint
//! and cookie snapshot. The page is closed on every exit path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chromiumoxide::browser::Browser;
use chromiumoxide::cdp;
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, EventRequestWillBeSent, EventResponseReceived, ResourceType,
};
use chromiumoxide::Page;
use futures::StreamExt;
use log::{debug, warn};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::errors::{classify_browser, CrawlError, CrawlResult, ErrorKind};
use crate::fetch::html as html_extract;
use crate::model::{CookieRecord, FetchResult, NetworkRequest, PageFrameworks};

use super::eval;
use super::framework::{detector_registry, FrameworkDetector};
use super::js;
use super::readiness::{self, ReadinessConfig};

/// Per-visit options assembled by the dispatcher
#[derive(Debug, Clone)]
pub struct VisitOptions {
    /// Extra request headers (auth injection)
    pub headers: Vec<(String, String)>,
    /// Cookies to set on the browsing context before navigation
    pub cookies: Vec<CookieRecord>,
    pub user_agent: String,
    pub viewport: (i64, i64),
    pub stealth: bool,
    /// Skip framework wait, AJAX probing and readiness polling
    pub fast_mode: bool,
    /// Run the SPA readiness detector after load
    pub spa_mode: bool,
    pub readiness: ReadinessConfig,
    /// Grace period when fast mode skips the framework wait
    pub load_grace: Duration,
}

impl Default for VisitOptions {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            cookies: Vec::new(),
            user_agent: super::setup::BROWSER_USER_AGENT.to_string(),
            viewport: (1366, 900),
            stealth: false,
            fast_mode: false,
            spa_mode: true,
            readiness: ReadinessConfig::default(),
            load_grace: Duration::from_millis(500),
        }
    }
}

/// Apply a deadline to one page operation
async fn with_deadline<T, F>(operation: F, deadline: Duration, label: &str) -> CrawlResult<T>
where
    F: std::future::Future<Output = CrawlResult<T>>,
{
    match tokio::time::timeout(deadline, operation).await {
        Ok(result) => result,
        Err(_) => Err(CrawlError::new(
            ErrorKind::Timeout,
            "",
            label,
            format!("{label} exceeded {deadline:?}"),
        )),
    }
}

/// Visit `url` in a fresh page on `browser`
///
/// Honors `cancel` throughout; the page and the capture task are torn
/// down on every exit path.
pub async fn visit_page(
    cancel: &CancellationToken,
    browser: &Browser,
    url: &Url,
    options: &VisitOptions,
) -> CrawlResult<FetchResult> {
    let page = browser
        .new_page("about:blank")
        .await
        .map_err(|e| classify_browser(e.to_string(), url.as_str(), "browser-new-page"))?;

    let result = tokio::select! {
        biased;
        () = cancel.cancelled() => Err(CrawlError::cancelled(url.as_str(), "browser-visit")),
        result = run_visit(&page, url, options, None) => result,
    };

    if let Err(e) = page.close().await {
        debug!("closing visited page: {e}");
    }
    result
}

/// Visit `<base>#<hash>`: a hash-route view of an already-known document
///
/// AngularJS pages get a digest nudge after the hash change so the router
/// actually renders the new view before extraction.
pub async fn visit_hash_route(
    cancel: &CancellationToken,
    browser: &Browser,
    base: &Url,
    hash_route: &str,
    options: &VisitOptions,
) -> CrawlResult<FetchResult> {
    let mut target = base.clone();
    target.set_fragment(Some(hash_route));

    let page = browser
        .new_page("about:blank")
        .await
        .map_err(|e| classify_browser(e.to_string(), target.as_str(), "browser-new-page"))?;

    let result = tokio::select! {
        biased;
        () = cancel.cancelled() => Err(CrawlError::cancelled(target.as_str(), "browser-hash-visit")),
        result = run_visit(&page, &target, options, Some(hash_route)) => result,
    };

    if let Err(e) = page.close().await {
        debug!("closing hash-route page: {e}");
    }
    result
}

async fn run_visit(
    page: &Page,
    url: &Url,
    options: &VisitOptions,
    hash_route: Option<&str>,
) -> CrawlResult<FetchResult> {
    let started = Instant::now();
    let label = url.as_str();

    prepare_page(page, url, options).await?;

    // Network interception: capture XHR/fetch (and WebSocket upgrades)
    // in browser emission order.
    let captured: Arc<Mutex<Vec<NetworkRequest>>> = Arc::new(Mutex::new(Vec::new()));
    let ws_urls: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let capture_task = {
        let mut events = page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(|e| classify_browser(e.to_string(), label, "browser-interceptor"))?;
        let captured = Arc::clone(&captured);
        let ws_urls = Arc::clone(&ws_urls);
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let resource_type = event.r#type.clone();
                if matches!(resource_type, Some(ResourceType::WebSocket)) {
                    ws_urls.lock().push(event.request.url.clone());
                    continue;
                }
                if !matches!(
                    resource_type,
                    Some(ResourceType::Xhr) | Some(ResourceType::Fetch)
                ) {
                    continue;
                }
                let headers = event
                    .request
                    .headers
                    .inner()
                    .as_object()
                    .map(|o| {
                        o.iter()
                            .filter_map(|(k, v)| {
                                v.as_str().map(|s| (k.clone(), s.to_string()))
                            })
                            .collect::<HashMap<_, _>>()
                    })
                    .unwrap_or_default();
                captured.lock().push(NetworkRequest {
                    url: event.request.url.clone(),
                    method: event.request.method.clone(),
                    headers,
                    body: event.request.post_data.clone().map(|b| {
                        b.chars().take(NetworkRequest::BODY_CAP).collect()
                    }),
                    resource_type: "xhr".to_string(),
                    captured_at: chrono::Utc::now(),
                });
            }
        })
    };

    // The main document's status comes from its response event
    let document_status: Arc<Mutex<Option<u16>>> = Arc::new(Mutex::new(None));
    let status_task = {
        let mut events = page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|e| classify_browser(e.to_string(), label, "browser-interceptor"))?;
        let document_status = Arc::clone(&document_status);
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if event.r#type != ResourceType::Document {
                    continue;
                }
                let mut status = document_status.lock();
                if status.is_none() {
                    *status = Some(event.response.status as u16);
                }
            }
        })
    };

    let visit = build_result(page, url, options, hash_route, started).await;
    capture_task.abort();
    status_task.abort();

    let mut result = visit?;
    if let Some(status) = *document_status.lock() {
        result.status = status;
    }
    result.network_requests = captured.lock().clone();
    result
        .websocket_urls
        .extend(ws_urls.lock().iter().cloned());
    result.websocket_urls.dedup();
    Ok(result)
}

/// Viewport, user agent, headers, cookies and pre-navigation payloads
async fn prepare_page(page: &Page, url: &Url, options: &VisitOptions) -> CrawlResult<()> {
    let label = url.as_str();

    page.execute(
        cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams::builder()
            .width(options.viewport.0)
            .height(options.viewport.1)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(|e| CrawlError::new(ErrorKind::Browser, label, "browser-viewport", e))?,
    )
    .await
    .map_err(|e| classify_browser(e.to_string(), label, "browser-viewport"))?;

    page.execute(cdp::browser_protocol::network::SetUserAgentOverrideParams {
        user_agent: options.user_agent.clone(),
        accept_language: Some("en-US,en".to_string()),
        platform: None,
        user_agent_metadata: None,
    })
    .await
    .map_err(|e| classify_browser(e.to_string(), label, "browser-user-agent"))?;

    if !options.headers.is_empty() {
        let mut header_map = serde_json::Map::new();
        for (name, value) in &options.headers {
            header_map.insert(name.clone(), serde_json::Value::String(value.clone()));
        }
        page.execute(cdp::browser_protocol::network::SetExtraHttpHeadersParams {
            headers: cdp::browser_protocol::network::Headers::new(serde_json::Value::Object(
                header_map,
            )),
        })
        .await
        .map_err(|e| classify_browser(e.to_string(), label, "browser-headers"))?;
    }

    if !options.cookies.is_empty() {
        let params: Vec<CookieParam> = options
            .cookies
            .iter()
            .filter_map(|cookie| {
                let domain = if cookie.domain.is_empty() {
                    url.host_str().unwrap_or_default().to_string()
                } else {
                    cookie.domain.clone()
                };
                CookieParam::builder()
                    .name(cookie.name.clone())
                    .value(cookie.value.clone())
                    .domain(domain)
                    .path(if cookie.path.is_empty() {
                        "/".to_string()
                    } else {
                        cookie.path.clone()
                    })
                    .build()
                    .ok()
            })
            .collect();
        if !params.is_empty() {
            page.set_cookies(params)
                .await
                .map_err(|e| classify_browser(e.to_string(), label, "browser-cookies"))?;
        }
    }

    let mut payloads = vec![js::NETWORK_MONITOR_SCRIPT];
    if options.stealth {
        payloads.push(js::STEALTH_SHIM_SCRIPT);
    }
    for payload in payloads {
        page.execute(
            cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams {
                source: payload.to_string(),
                include_command_line_api: None,
                world_name: None,
                run_immediately: None,
            },
        )
        .await
        .map_err(|e| classify_browser(e.to_string(), label, "browser-payload"))?;
    }

    Ok(())
}

async fn build_result(
    page: &Page,
    url: &Url,
    options: &VisitOptions,
    hash_route: Option<&str>,
    started: Instant,
) -> CrawlResult<FetchResult> {
    let label = url.as_str();

    with_deadline(
        async {
            page.goto(url.as_str())
                .await
                .map(|_| ())
                .map_err(|e| classify_browser(e.to_string(), label, "browser-goto"))
        },
        Duration::from_secs(20),
        "browser-goto",
    )
    .await?;

    with_deadline(
        async {
            page.wait_for_navigation()
                .await
                .map(|_| ())
                .map_err(|e| classify_browser(e.to_string(), label, "browser-load"))
        },
        Duration::from_secs(20),
        "browser-load",
    )
    .await?;

    // Framework detection and readiness
    let registry = detector_registry();
    let mut frameworks = PageFrameworks::default();
    let mut primary: Option<&FrameworkDetector> = None;

    if options.fast_mode {
        tokio::time::sleep(options.load_grace).await;
    } else {
        for detector in &registry {
            if detector.detect(page).await {
                if frameworks.primary.is_none() {
                    frameworks.primary = Some(detector.name.to_string());
                    primary = Some(detector);
                }
                frameworks.detected.push(detector.name.to_string());
            }
        }

        if let Some(detector) = primary {
            let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
            while tokio::time::Instant::now() < deadline {
                if detector.is_ready(page).await {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        } else {
            tokio::time::sleep(options.load_grace).await;
        }
    }

    // Hash-route views on AngularJS need the digest nudged before the
    // router renders the new view.
    if hash_route.is_some() {
        if let Some(detector) = primary {
            if detector.needs_digest_nudge() {
                detector.nudge_digest(page).await;
                tokio::time::sleep(Duration::from_millis(400)).await;
            }
        }
    }

    if options.spa_mode && !options.fast_mode {
        let ready = readiness::wait_until_ready(page, &options.readiness).await;
        if !ready {
            debug!("readiness budget exhausted for {url}");
        }
    }

    // Merge routes and links from every matching detector
    if !options.fast_mode {
        for detector in &registry {
            if !frameworks.detected.iter().any(|d| d == detector.name) {
                continue;
            }
            match detector.extract_routes(page).await {
                Ok(routes) => frameworks.routes.extend(routes),
                Err(e) => debug!("{} route extraction failed: {}", detector.name, e.message),
            }
        }
        frameworks.routes.sort();
        frameworks.routes.dedup();
    }

    let final_url = page
        .url()
        .await
        .ok()
        .flatten()
        .and_then(|u| Url::parse(&u).ok())
        .unwrap_or_else(|| url.clone());

    let html = page
        .content()
        .await
        .map_err(|e| classify_browser(e.to_string(), label, "browser-content"))?;

    let mut result = FetchResult::empty(url.clone());
    result.final_url = final_url.clone();
    result.status = 200;
    result.content_type = "text/html".to_string();
    result.frameworks = frameworks.clone();

    let extract = html_extract::extract(&html, &final_url);
    result.title = extract.title;
    result.links = extract.links;
    result.forms = extract.forms;
    result.scripts = extract.scripts;
    result.websocket_urls = extract.websocket_urls;

    // Framework-rendered links come from the live DOM, not the markup
    for detector in &registry {
        if !frameworks.detected.iter().any(|d| d == detector.name) {
            continue;
        }
        if let Ok(links) = detector.extract_links(page).await {
            for link in links {
                if let Ok(resolved) = final_url.join(&link) {
                    if !result.links.contains(&resolved) {
                        result.links.push(resolved);
                    }
                }
            }
        }
    }

    if !options.fast_mode {
        enrich_with_ajax(page, &mut result).await;
    }

    match eval::content_hash_input(page).await {
        Ok(input) => result.fingerprint = Some(readiness::fingerprint(&input)),
        Err(e) => debug!("content hash failed for {url}: {}", e.message),
    }

    match eval::soft_error(page).await {
        Ok(verdict) => {
            if verdict.is_error {
                debug!("soft error at {url}: {}", verdict.reason);
            }
            result.is_soft_error = verdict.is_error;
        }
        Err(e) => debug!("soft-error probe failed for {url}: {}", e.message),
    }

    match page.get_cookies().await {
        Ok(cookies) => {
            result.cookies = cookies
                .into_iter()
                .map(|c| CookieRecord {
                    name: c.name,
                    value: c.value,
                    domain: c.domain,
                    path: c.path,
                })
                .collect();
        }
        Err(e) => warn!("cookie snapshot failed for {url}: {e}"),
    }

    result.body = html;
    result.duration = started.elapsed();
    Ok(result)
}

/// AJAX interception, triggering and extraction for the dynamic surface
async fn enrich_with_ajax(page: &Page, result: &mut FetchResult) {
    let url = &result.requested_url;

    if let Err(e) = page.evaluate(js::AJAX_INTERCEPTOR_SCRIPT).await {
        debug!("ajax interceptor injection failed for {url}: {e}");
        return;
    }
    if let Err(e) = page.evaluate(js::AJAX_TRIGGER_SCRIPT).await {
        debug!("ajax trigger failed for {url}: {e}");
    }
    if let Err(e) = page.evaluate(js::ajax_wait_script(3000).as_str()).await {
        debug!("ajax wait failed for {url}: {e}");
    }

    match eval::ajax_captured(page).await {
        Ok(captured) => {
            for req in captured {
                if let Ok(absolute) = result.final_url.join(&req.url) {
                    result.network_requests.push(NetworkRequest {
                        url: absolute.to_string(),
                        method: req.method,
                        headers: HashMap::new(),
                        body: req.data,
                        resource_type: req.kind,
                        captured_at: chrono::Utc::now(),
                    });
                }
            }
        }
        Err(e) => debug!("ajax capture read failed for {url}: {}", e.message),
    }

    match eval::ajax_endpoints(page).await {
        Ok(endpoints) => {
            for endpoint in endpoints {
                if let Ok(absolute) = result.final_url.join(&endpoint.url) {
                    result.network_requests.push(NetworkRequest {
                        url: absolute.to_string(),
                        method: endpoint.method,
                        headers: HashMap::new(),
                        body: None,
                        resource_type: "script-scan".to_string(),
                        captured_at: chrono::Utc::now(),
                    });
                }
            }
        }
        Err(e) => debug!("ajax endpoint scan failed for {url}: {}", e.message),
    }

    match eval::ajax_forms(page).await {
        Ok(forms) => {
            for ajax_form in forms {
                let action = ajax_form
                    .action
                    .or(ajax_form.callback_url)
                    .unwrap_or_default();
                let action = if action.is_empty() {
                    result.final_url.to_string()
                } else {
                    result
                        .final_url
                        .join(&action)
                        .map(|u| u.to_string())
                        .unwrap_or(action)
                };
                result.forms.push(crate::model::Form {
                    action,
                    method: ajax_form.method,
                    enctype: "application/x-www-form-urlencoded".to_string(),
                    inputs: ajax_form
                        .inputs
                        .into_iter()
                        .map(|input| crate::model::FormInput {
                            name: input.name,
                            input_type: input.input_type,
                            value: None,
                            required: false,
                            placeholder: None,
                        })
                        .collect(),
                });
            }
        }
        Err(e) => debug!("ajax form scan failed for {url}: {}", e.message),
    }

    match eval::shadow_dom_findings(page).await {
        Ok(findings) => {
            for finding in findings {
                if finding.kind == "link" {
                    if let Ok(resolved) = result.final_url.join(&finding.value) {
                        if !result.links.contains(&resolved) {
                            result.links.push(resolved);
                        }
                    }
                }
            }
        }
        Err(e) => debug!("shadow DOM walk failed for {url}: {}", e.message),
    }
}
