//! URL canonicalization and scope enforcement
//!
//! Every URL entering the frontier is reduced to a canonical form first;
//! two URLs are the same crawl target iff their canonical forms are equal.
//! Fragments are stripped except hash routes (`#/...` or `#!...`), which
//! SPA crawling treats as distinct views.

use url::Url;

use crate::errors::{CrawlError, CrawlResult, ErrorKind};

/// Fragment query keys that encode transient UI state, not routes
const UI_STATE_PARAMS: [&str; 4] = ["modal", "tab", "scroll", "timestamp"];

/// File extensions never worth fetching (images, fonts, archives, media)
pub const DEFAULT_EXCLUDED_EXTENSIONS: [&str; 27] = [
    ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".webp", ".bmp", ".tiff", ".woff", ".woff2",
    ".ttf", ".eot", ".otf", ".zip", ".tar", ".gz", ".rar", ".7z", ".mp4", ".mp3", ".avi", ".mov",
    ".webm", ".wav", ".flac", ".css",
];

/// Canonicalize `raw`, resolving it against `base` when relative
///
/// Rejects non-http(s) schemes. The result is idempotent:
/// `normalize(normalize(u)) == normalize(u)`.
pub fn normalize_str(raw: &str, base: Option<&Url>) -> CrawlResult<Url> {
    let parsed = match base {
        Some(base) => base.join(raw),
        None => Url::parse(raw),
    }
    .map_err(|e| {
        CrawlError::new(ErrorKind::Parse, raw, "url-normalize", e.to_string())
    })?;
    normalize(&parsed)
}

/// Canonicalize an already-parsed URL
pub fn normalize(url: &Url) -> CrawlResult<Url> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(CrawlError::new(
            ErrorKind::Scope,
            url.as_str(),
            "url-normalize",
            format!("unsupported scheme {}", url.scheme()),
        ));
    }
    let host = url.host_str().ok_or_else(|| {
        CrawlError::new(ErrorKind::Parse, url.as_str(), "url-normalize", "URL has no host")
    })?;

    // The url crate already lower-cases scheme/host, resolves dot segments
    // and drops default ports at parse time; what remains is a stable
    // re-encode of path and query plus fragment policy.
    let mut out = String::with_capacity(url.as_str().len());
    out.push_str(url.scheme());
    out.push_str("://");
    out.push_str(host);
    if let Some(port) = url.port() {
        out.push(':');
        out.push_str(&port.to_string());
    }
    out.push_str(&canonical_path(url.path()));

    if let Some(query) = url.query() {
        let sorted = sorted_query(query);
        if !sorted.is_empty() {
            out.push('?');
            out.push_str(&sorted);
        }
    }

    if let Some(fragment) = url.fragment() {
        if is_hash_route(fragment) {
            out.push('#');
            out.push_str(&canonical_hash_route(fragment));
        }
    }

    Url::parse(&out).map_err(|e| {
        CrawlError::new(ErrorKind::Parse, url.as_str(), "url-normalize", e.to_string())
    })
}

/// The dedup key: the canonical URL as a string
#[must_use]
pub fn canonical_key(url: &Url) -> String {
    url.as_str().to_string()
}

/// Whether `fragment` encodes a client-side route (`#/...` or `#!...`)
#[must_use]
pub fn is_hash_route(fragment: &str) -> bool {
    fragment.starts_with('/') || fragment.starts_with('!')
}

/// Percent-decode then re-encode each path segment, drop the trailing slash
fn canonical_path(path: &str) -> String {
    if path.is_empty() || path == "/" {
        return "/".to_string();
    }
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    let mut out = String::with_capacity(trimmed.len());
    for segment in trimmed.split('/').skip(1) {
        out.push('/');
        let decoded = urlencoding::decode(segment)
            .map(|d| d.into_owned())
            .unwrap_or_else(|_| segment.to_string());
        out.push_str(&encode_path_segment(&decoded));
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Re-encode a decoded path segment, keeping the characters servers expect raw
fn encode_path_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for ch in segment.chars() {
        match ch {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' | '.' | '~' | '@' | ':' | '+' | ','
            | '(' | ')' => out.push(ch),
            _ => out.push_str(&urlencoding::encode(&ch.to_string())),
        }
    }
    out
}

/// Decode query pairs, sort by key then value, re-serialize stably
fn sorted_query(query: &str) -> String {
    let mut pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in pairs {
        serializer.append_pair(&k, &v);
    }
    serializer.finish()
}

/// Keep the route part of a hash fragment, dropping UI-state query params
fn canonical_hash_route(fragment: &str) -> String {
    let (route, query) = match fragment.split_once('?') {
        Some((route, query)) => (route, Some(query)),
        None => (fragment, None),
    };
    let mut out = route.to_string();
    if let Some(query) = query {
        let mut pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .filter(|(k, _)| !UI_STATE_PARAMS.contains(&k.as_str()))
            .collect();
        if !pairs.is_empty() {
            pairs.sort();
            let mut serializer = url::form_urlencoded::Serializer::new(String::new());
            for (k, v) in pairs {
                serializer.append_pair(&k, &v);
            }
            out.push('?');
            out.push_str(&serializer.finish());
        }
    }
    out
}

/// What the crawl is allowed to touch
#[derive(Debug, Clone)]
pub struct ScopePolicy {
    /// Exact hostnames; each also matches its subdomains
    pub allowed_hosts: Vec<String>,
    /// Path prefixes; empty means every path
    pub allowed_path_prefixes: Vec<String>,
    /// Beyond this depth, non-seed items are dropped
    pub max_depth: u32,
    /// Lower-case extensions to skip, dot included
    pub excluded_extensions: Vec<String>,
}

impl ScopePolicy {
    /// Scope covering `seed_hosts` with the default extension excludes
    #[must_use]
    pub fn for_hosts(allowed_hosts: Vec<String>, max_depth: u32) -> Self {
        Self {
            allowed_hosts,
            allowed_path_prefixes: Vec::new(),
            max_depth,
            excluded_extensions: DEFAULT_EXCLUDED_EXTENSIONS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }

    /// Host + path + extension check; depth is enforced by the scheduler
    #[must_use]
    pub fn is_in_scope(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        if !self.host_allowed(host) {
            return false;
        }
        let path = url.path().to_lowercase();
        if self
            .excluded_extensions
            .iter()
            .any(|ext| path.ends_with(ext.as_str()))
        {
            return false;
        }
        if self.allowed_path_prefixes.is_empty() {
            return true;
        }
        self.allowed_path_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Depth gate; depth-0 seeds are always admitted
    #[must_use]
    pub fn depth_allowed(&self, depth: u32) -> bool {
        depth == 0 || depth <= self.max_depth
    }

    fn host_allowed(&self, host: &str) -> bool {
        let host = host.to_lowercase();
        self.allowed_hosts.iter().any(|allowed| {
            let allowed = allowed.to_lowercase();
            host == allowed || host.ends_with(&format!(".{allowed}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn norm(s: &str) -> String {
        normalize_str(s, None)
            .expect("normalizable URL")
            .to_string()
    }

    #[test]
    fn lowercases_and_drops_default_ports() {
        assert_eq!(norm("HTTP://Example.COM:80/A"), "http://example.com/A");
        assert_eq!(norm("https://example.com:443/a"), "https://example.com/a");
        assert_eq!(norm("https://example.com:8443/a"), "https://example.com:8443/a");
    }

    #[test]
    fn sorts_query_pairs() {
        assert_eq!(
            norm("https://example.com/a?b=2&a=1&b=1"),
            "https://example.com/a?a=1&b=1&b=2"
        );
    }

    #[test]
    fn drops_trailing_slash_except_root() {
        assert_eq!(norm("https://example.com/a/"), "https://example.com/a");
        assert_eq!(norm("https://example.com/"), "https://example.com/");
        assert_eq!(norm("https://example.com"), "https://example.com/");
    }

    #[test]
    fn strips_plain_fragment_keeps_hash_route() {
        assert_eq!(norm("https://example.com/a#section"), "https://example.com/a");
        assert_eq!(
            norm("https://example.com/a#/users/1"),
            "https://example.com/a#/users/1"
        );
        assert_eq!(
            norm("https://example.com/a#!legacy"),
            "https://example.com/a#!legacy"
        );
    }

    #[test]
    fn hash_route_drops_ui_state_params() {
        assert_eq!(
            norm("https://example.com/a#/users?modal=edit&id=3&tab=2"),
            "https://example.com/a#/users?id=3"
        );
        assert_eq!(
            norm("https://example.com/a#/users?modal=edit"),
            "https://example.com/a#/users"
        );
    }

    #[test]
    fn collapses_dot_segments() {
        assert_eq!(
            norm("https://example.com/a/b/../c/./d"),
            "https://example.com/a/c/d"
        );
    }

    #[test]
    fn rejects_non_http_schemes() {
        assert!(normalize_str("ftp://example.com/a", None).is_err());
        assert!(normalize_str("javascript:alert(1)", None).is_err());
        assert!(normalize_str("mailto:x@example.com", None).is_err());
    }

    #[test]
    fn resolves_relative_against_base() {
        let base = Url::parse("https://example.com/dir/page").expect("base URL");
        assert_eq!(
            normalize_str("../other?z=1&a=2", Some(&base))
                .expect("joinable")
                .to_string(),
            "https://example.com/other?a=2&z=1"
        );
    }

    #[test]
    fn scope_host_suffix_matching() {
        let scope = ScopePolicy::for_hosts(vec!["example.com".into()], 3);
        let inside = Url::parse("https://app.example.com/x").expect("url");
        let outside = Url::parse("https://evilexample.com/x").expect("url");
        assert!(scope.is_in_scope(&inside));
        assert!(!scope.is_in_scope(&outside));
    }

    #[test]
    fn scope_excludes_extensions_and_honors_prefixes() {
        let mut scope = ScopePolicy::for_hosts(vec!["example.com".into()], 3);
        let image = Url::parse("https://example.com/logo.png").expect("url");
        assert!(!scope.is_in_scope(&image));

        scope.allowed_path_prefixes = vec!["/app".into()];
        let inside = Url::parse("https://example.com/app/page").expect("url");
        let outside = Url::parse("https://example.com/other").expect("url");
        assert!(scope.is_in_scope(&inside));
        assert!(!scope.is_in_scope(&outside));
    }

    #[test]
    fn depth_zero_always_admitted() {
        let scope = ScopePolicy::for_hosts(vec!["example.com".into()], 0);
        assert!(scope.depth_allowed(0));
        assert!(!scope.depth_allowed(1));
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(
            host in "[a-z][a-z0-9]{1,10}\\.(com|org|test)",
            path in "(/[a-zA-Z0-9._~-]{0,8}){0,4}/?",
            query in "([a-z]{1,4}=[a-z0-9]{0,4}(&[a-z]{1,4}=[a-z0-9]{0,4}){0,3})?",
        ) {
            let mut raw = format!("https://{host}{path}");
            if !query.is_empty() {
                raw.push('?');
                raw.push_str(&query);
            }
            if let Ok(once) = normalize_str(&raw, None) {
                let twice = normalize(&once).expect("canonical form re-normalizes");
                prop_assert_eq!(once.as_str(), twice.as_str());
            }
        }
    }
}
