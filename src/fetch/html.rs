//! HTML extraction for static fetches and rendered browser documents
//!
//! Pulls links, forms, script sources, inline WebSocket URLs and the title
//! out of a parsed document, resolving everything against the final URL
//! (honoring `<base href>` when present).

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::model::{Form, FormInput};

fn selector(src: &str) -> Selector {
    Selector::parse(src).unwrap_or_else(|e| panic!("selector {src:?}: {e}"))
}

static BASE: Lazy<Selector> = Lazy::new(|| selector("base[href]"));
static ANCHORS: Lazy<Selector> = Lazy::new(|| selector("a[href], area[href]"));
static LINK_TAGS: Lazy<Selector> = Lazy::new(|| selector("link[href]"));
static FORMS: Lazy<Selector> = Lazy::new(|| selector("form"));
static FORM_FIELDS: Lazy<Selector> =
    Lazy::new(|| selector("input[name], textarea[name], select[name]"));
static SCRIPTS_SRC: Lazy<Selector> = Lazy::new(|| selector("script[src]"));
static SCRIPTS_INLINE: Lazy<Selector> = Lazy::new(|| selector("script:not([src])"));
static TITLE: Lazy<Selector> = Lazy::new(|| selector("title"));

static WS_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"wss?://[^\s"'`<>\\]+"#).unwrap_or_else(|e| panic!("ws regex: {e}"))
});

/// Everything the extractor pulls from one document
#[derive(Debug, Default, Clone)]
pub struct HtmlExtract {
    pub title: String,
    pub links: Vec<Url>,
    pub forms: Vec<Form>,
    pub scripts: Vec<Url>,
    pub websocket_urls: Vec<String>,
}

/// Parse `html` and extract against `final_url`
#[must_use]
pub fn extract(html: &str, final_url: &Url) -> HtmlExtract {
    let document = Html::parse_document(html);

    // <base href> shifts resolution for every relative reference
    let base_url = document
        .select(&BASE)
        .next()
        .and_then(|el| el.value().attr("href"))
        .and_then(|href| final_url.join(href).ok())
        .unwrap_or_else(|| final_url.clone());

    let mut extract = HtmlExtract {
        title: document
            .select(&TITLE)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default(),
        ..HtmlExtract::default()
    };

    let mut seen_links = std::collections::HashSet::new();
    for el in document.select(&ANCHORS) {
        if let Some(link) = resolve_link(el.value().attr("href"), &base_url) {
            if seen_links.insert(link.to_string()) {
                extract.links.push(link);
            }
        }
    }
    for el in document.select(&LINK_TAGS) {
        let href = el.value().attr("href");
        if href.is_some_and(|h| h.to_lowercase().ends_with(".css")) {
            continue;
        }
        // Only navigable link relations matter; stylesheets/icons are noise
        let rel = el.value().attr("rel").unwrap_or_default().to_lowercase();
        if rel.contains("stylesheet") || rel.contains("icon") || rel.contains("preload") {
            continue;
        }
        if let Some(link) = resolve_link(href, &base_url) {
            if seen_links.insert(link.to_string()) {
                extract.links.push(link);
            }
        }
    }

    for el in document.select(&FORMS) {
        extract.forms.push(extract_form(el, &base_url));
    }

    for el in document.select(&SCRIPTS_SRC) {
        if let Some(src) = el.value().attr("src") {
            if let Ok(resolved) = base_url.join(src) {
                extract.scripts.push(resolved);
            }
        }
    }

    let mut seen_ws = std::collections::HashSet::new();
    for el in document.select(&SCRIPTS_INLINE) {
        let text = el.text().collect::<String>();
        for found in WS_URL.find_iter(&text) {
            let ws = found.as_str().trim_end_matches(['.', ',', ';']).to_string();
            if seen_ws.insert(ws.clone()) {
                extract.websocket_urls.push(ws);
            }
        }
    }

    extract
}

/// Resolve one href, rejecting pseudo-schemes and bare fragments
fn resolve_link(href: Option<&str>, base: &Url) -> Option<Url> {
    let href = href?.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let lowered = href.to_lowercase();
    for scheme in ["javascript:", "mailto:", "tel:", "data:"] {
        if lowered.starts_with(scheme) {
            return None;
        }
    }
    let resolved = base.join(href).ok()?;
    if !matches!(resolved.scheme(), "http" | "https") {
        return None;
    }
    Some(resolved)
}

fn extract_form(el: ElementRef<'_>, base: &Url) -> Form {
    let action = el
        .value()
        .attr("action")
        .and_then(|a| base.join(a).ok())
        .unwrap_or_else(|| base.clone());
    let method = el
        .value()
        .attr("method")
        .unwrap_or("GET")
        .to_uppercase();
    let enctype = el
        .value()
        .attr("enctype")
        .unwrap_or("application/x-www-form-urlencoded")
        .to_string();

    let inputs = el
        .select(&FORM_FIELDS)
        .filter_map(|field| {
            let name = field.value().attr("name")?.to_string();
            Some(FormInput {
                name,
                input_type: field
                    .value()
                    .attr("type")
                    .unwrap_or(match field.value().name() {
                        "textarea" => "textarea",
                        "select" => "select",
                        _ => "text",
                    })
                    .to_string(),
                value: field.value().attr("value").map(str::to_string),
                required: field.value().attr("required").is_some(),
                placeholder: field.value().attr("placeholder").map(str::to_string),
            })
        })
        .collect();

    Form {
        action: action.to_string(),
        method,
        enctype,
        inputs,
    }
}
