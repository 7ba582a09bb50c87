//! SPA readiness detection, soft-error heuristics and content fingerprints
//!
//! Readiness is polled through one eval round trip per tick; a page is
//! ready when no spinner is visible, some content selector has real text,
//! the body passes the minimum length and the network is idle.

use std::time::Duration;

use chromiumoxide::Page;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use xxhash_rust::xxh3::xxh3_64;

use super::eval;

/// Selector lists and thresholds for the readiness detector
#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    pub spinner_selectors: Vec<String>,
    pub content_selectors: Vec<String>,
    /// Minimum visible body text length for a view to count as rendered
    pub min_content_length: u64,
    pub max_wait: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            spinner_selectors: [
                ".spinner",
                ".loading",
                ".loader",
                "[class*=\"loading\"]",
                "[class*=\"spinner\"]",
                ".progress-bar",
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
            content_selectors: ["main", "#content", ".content", "article", "[role=\"main\"]"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            min_content_length: 50,
            max_wait: Duration::from_secs(8),
        }
    }
}

/// Poll interval between readiness samples
const POLL_INTERVAL: Duration = Duration::from_millis(200);
/// Final grace period absorbing last-moment renders
const FINAL_GRACE: Duration = Duration::from_millis(100);

/// Poll until the page satisfies every readiness condition or the budget
/// runs out. Returns whether the page became ready.
pub async fn wait_until_ready(page: &Page, config: &ReadinessConfig) -> bool {
    let deadline = tokio::time::Instant::now() + config.max_wait;
    let mut ready = false;

    while tokio::time::Instant::now() < deadline {
        match eval::readiness_sample(page, &config.spinner_selectors, &config.content_selectors)
            .await
        {
            Ok(sample) => {
                if !sample.spinner_visible
                    && sample.content_ready
                    && sample.text_length >= config.min_content_length
                    && sample.pending <= 0
                {
                    ready = true;
                    break;
                }
            }
            Err(e) => {
                debug!("readiness probe failed: {}", e.message);
            }
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    tokio::time::sleep(FINAL_GRACE).await;
    ready
}

static SOFT_ERROR_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"page not found",
        r"\b404\b",
        r"\bnot found\b",
        r"access denied",
        r"\bforbidden\b",
        r"something went wrong",
        r"an error (has )?occurred",
        r"server error",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){p}")).unwrap_or_else(|e| panic!("bad pattern {p}: {e}")))
    .collect()
});

/// Text-side soft-error heuristic shared with the static fetch path
///
/// Long pages that merely mention an error phrase in prose are not errors;
/// the signal is a short page dominated by one.
#[must_use]
pub fn detect_soft_error_text(body_text: &str) -> (bool, String) {
    let trimmed = body_text.trim();
    if trimmed.len() >= 2000 {
        return (false, String::new());
    }
    for pattern in SOFT_ERROR_PATTERNS.iter() {
        if pattern.is_match(trimmed) {
            return (true, format!("text match: {}", pattern.as_str()));
        }
    }
    (false, String::new())
}

/// Hash a fingerprint input produced by the content-hash payload (or the
/// static equivalent). Equal fingerprints mean the same rendered view.
#[must_use]
pub fn fingerprint(input: &str) -> u64 {
    xxh3_64(input.as_bytes())
}

/// Build the fingerprint input from raw HTML, mirroring what the in-page
/// content-hash payload produces for rendered documents.
#[must_use]
pub fn fingerprint_input_from_html(html: &str) -> String {
    let document = scraper::Html::parse_document(html);

    static SKIP: Lazy<scraper::Selector> = Lazy::new(|| {
        scraper::Selector::parse("script, style, noscript, svg, iframe")
            .unwrap_or_else(|e| panic!("selector: {e}"))
    });
    static OUTLINE: Lazy<scraper::Selector> = Lazy::new(|| {
        scraper::Selector::parse("h1, h2, h3, a[href], img[src], form")
            .unwrap_or_else(|e| panic!("selector: {e}"))
    });

    let skipped: std::collections::HashSet<_> = document
        .select(&SKIP)
        .flat_map(|el| el.descendants().map(|n| n.id()))
        .collect();

    let mut text = String::new();
    for node in document.root_element().descendants() {
        if skipped.contains(&node.id()) {
            continue;
        }
        if let Some(fragment) = node.value().as_text() {
            text.push_str(fragment);
            text.push(' ');
        }
    }
    let collapsed: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let head: String = collapsed.chars().take(5000).collect();

    let mut outline = Vec::new();
    for el in document.select(&OUTLINE) {
        let tag = el.value().name();
        let label = el
            .text()
            .collect::<String>()
            .trim()
            .chars()
            .take(20)
            .collect::<String>();
        let label = if label.is_empty() {
            el.value()
                .attr("src")
                .or_else(|| el.value().attr("href"))
                .unwrap_or("")
                .chars()
                .take(20)
                .collect()
        } else {
            label
        };
        outline.push(format!("{tag}:{label}"));
    }

    format!("{head}||{}", outline.join("|"))
}
