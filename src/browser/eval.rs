//! Typed helpers over the page eval bridge
//!
//! One helper per payload: the script stays opaque, the return shape is a
//! serde record. Nothing outside this module touches raw
//! `serde_json::Value` lookups from page evaluation.

use chromiumoxide::Page;
use serde::Deserialize;

use crate::errors::{classify_browser, CrawlResult};

use super::js;

/// What the AJAX interceptor recorded for one request
#[derive(Debug, Clone, Deserialize)]
pub struct AjaxCapturedRequest {
    pub method: String,
    pub url: String,
    pub data: Option<String>,
    /// `xhr` or `fetch`
    #[serde(rename = "type")]
    pub kind: String,
    pub trigger: Option<String>,
    pub timestamp: f64,
}

/// An AJAX call site found in script text
#[derive(Debug, Clone, Deserialize)]
pub struct AjaxEndpoint {
    pub url: String,
    pub method: String,
    pub source: String,
    #[serde(default)]
    pub parameters: Vec<String>,
}

/// A form wired to AJAX submission
#[derive(Debug, Clone, Deserialize)]
pub struct AjaxForm {
    pub id: Option<String>,
    pub name: Option<String>,
    pub action: Option<String>,
    pub method: String,
    #[serde(rename = "submitType")]
    pub submit_type: String,
    #[serde(default)]
    pub inputs: Vec<AjaxFormInput>,
    #[serde(rename = "callbackURL")]
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AjaxFormInput {
    pub name: String,
    #[serde(rename = "type")]
    pub input_type: String,
}

/// Soft-error verdict from the in-page heuristic
#[derive(Debug, Clone, Deserialize)]
pub struct SoftErrorVerdict {
    #[serde(rename = "isError")]
    pub is_error: bool,
    pub reason: String,
}

/// A link or form surfaced from a shadow root
#[derive(Debug, Clone, Deserialize)]
pub struct ShadowDomFinding {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

/// One readiness-probe sample
#[derive(Debug, Clone, Deserialize)]
pub struct ReadinessSample {
    #[serde(rename = "spinnerVisible")]
    pub spinner_visible: bool,
    #[serde(rename = "contentReady")]
    pub content_ready: bool,
    #[serde(rename = "textLength")]
    pub text_length: u64,
    pub pending: i64,
}

/// Evaluate `script` and deserialize its return value into `T`
pub async fn eval_typed<T: serde::de::DeserializeOwned>(
    page: &Page,
    script: &str,
    operation: &str,
) -> CrawlResult<T> {
    let url = page_url_label(page).await;
    let evaluated = page
        .evaluate(script)
        .await
        .map_err(|e| classify_browser(e.to_string(), &url, operation))?;
    let value: serde_json::Value = evaluated
        .into_value()
        .map_err(|e| classify_browser(e.to_string(), &url, operation))?;
    serde_json::from_value(value).map_err(|e| classify_browser(e.to_string(), &url, operation))
}

/// Evaluate a script returning a boolean
pub async fn eval_bool(page: &Page, script: &str) -> CrawlResult<bool> {
    eval_typed(page, script, "eval-bool").await
}

/// Evaluate a script returning a list of strings
pub async fn eval_string_vec(page: &Page, script: &str) -> CrawlResult<Vec<String>> {
    eval_typed(page, script, "eval-strings").await
}

/// Current value of `window.__pendingRequests`
pub async fn pending_requests(page: &Page) -> CrawlResult<i64> {
    eval_typed(page, "window.__pendingRequests || 0", "pending-requests").await
}

/// Everything the AJAX interceptor captured so far
pub async fn ajax_captured(page: &Page) -> CrawlResult<Vec<AjaxCapturedRequest>> {
    eval_typed(
        page,
        "(window.__ajaxCapture && window.__ajaxCapture.requests) || []",
        "ajax-capture",
    )
    .await
}

/// Run the AJAX call-site extractor
pub async fn ajax_endpoints(page: &Page) -> CrawlResult<Vec<AjaxEndpoint>> {
    eval_typed(page, js::AJAX_ENDPOINT_EXTRACTOR_SCRIPT, "ajax-endpoints").await
}

/// Run the AJAX form extractor
pub async fn ajax_forms(page: &Page) -> CrawlResult<Vec<AjaxForm>> {
    eval_typed(page, js::AJAX_FORM_EXTRACTOR_SCRIPT, "ajax-forms").await
}

/// Content-hash input string (normalized text + outline)
pub async fn content_hash_input(page: &Page) -> CrawlResult<String> {
    eval_typed(page, js::CONTENT_HASH_SCRIPT, "content-hash").await
}

/// Soft-error verdict for the rendered page
pub async fn soft_error(page: &Page) -> CrawlResult<SoftErrorVerdict> {
    eval_typed(page, js::SOFT_ERROR_SCRIPT, "soft-error").await
}

/// Shadow-DOM links and forms
pub async fn shadow_dom_findings(page: &Page) -> CrawlResult<Vec<ShadowDomFinding>> {
    eval_typed(page, js::SHADOW_DOM_SCRIPT, "shadow-dom").await
}

/// One readiness sample for the given selector lists
pub async fn readiness_sample(
    page: &Page,
    spinner_selectors: &[String],
    content_selectors: &[String],
) -> CrawlResult<ReadinessSample> {
    let script = js::readiness_probe_script(spinner_selectors, content_selectors);
    eval_typed(page, &script, "readiness-probe").await
}

async fn page_url_label(page: &Page) -> String {
    match page.url().await {
        Ok(Some(url)) => url,
        _ => String::new(),
    }
}
