//! robots.txt fetching, parsing and caching
//!
//! Records are fetched once per origin and cached for a TTL. Fetch failures
//! and non-200 responses cache an allow-all record so an unreachable
//! robots.txt is not re-requested for every URL. Matching follows the glob
//! dialect: `*` is a wildcard, a trailing `$` anchors to the end of the
//! path, the longest matching rule wins and Allow beats Disallow on ties.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::{debug, warn};
use regex::Regex;
use url::Url;

/// Crawl-delay values above this are clamped so a hostile robots.txt
/// cannot stall a host's bucket indefinitely.
const MAX_CRAWL_DELAY: Duration = Duration::from_secs(60);

/// One Allow/Disallow pattern compiled for matching
#[derive(Debug, Clone)]
struct RobotsRule {
    /// Raw pattern text, its length is the rule's specificity
    pattern: String,
    regex: Regex,
}

impl RobotsRule {
    fn compile(pattern: &str) -> Option<Self> {
        if pattern.is_empty() {
            return None;
        }
        let anchored_end = pattern.ends_with('$');
        let body = if anchored_end {
            &pattern[..pattern.len() - 1]
        } else {
            pattern
        };
        let mut regex_src = String::from("^");
        for ch in body.chars() {
            if ch == '*' {
                regex_src.push_str(".*");
            } else {
                regex_src.push_str(&regex::escape(&ch.to_string()));
            }
        }
        if anchored_end {
            regex_src.push('$');
        }
        match Regex::new(&regex_src) {
            Ok(regex) => Some(Self {
                pattern: pattern.to_string(),
                regex,
            }),
            Err(e) => {
                warn!("unparseable robots pattern {pattern:?}: {e}");
                None
            }
        }
    }

    fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

/// Parsed rules for one origin, as they apply to our user-agent
#[derive(Debug)]
pub struct RobotsRecord {
    allow: Vec<RobotsRule>,
    disallow: Vec<RobotsRule>,
    /// Lower bound on the interval between requests to this origin
    pub crawl_delay: Option<Duration>,
    /// Sitemap URLs listed in the file
    pub sitemaps: Vec<String>,
    fetched_at: Instant,
}

impl RobotsRecord {
    /// A record admitting every path (used for missing/failed robots.txt)
    #[must_use]
    pub fn allow_all() -> Self {
        Self {
            allow: Vec::new(),
            disallow: Vec::new(),
            crawl_delay: None,
            sitemaps: Vec::new(),
            fetched_at: Instant::now(),
        }
    }

    /// Parse `body`, keeping the group for `user_agent` (falling back to `*`)
    #[must_use]
    pub fn parse(body: &str, user_agent: &str) -> Self {
        let ua = user_agent.to_lowercase();

        #[derive(Default)]
        struct Group {
            allow: Vec<RobotsRule>,
            disallow: Vec<RobotsRule>,
            crawl_delay: Option<Duration>,
        }

        let mut specific = Group::default();
        let mut wildcard = Group::default();
        let mut sitemaps = Vec::new();
        let mut specific_seen = false;

        // Which groups the current User-agent run selects
        let mut in_specific = false;
        let mut in_wildcard = false;
        // Consecutive User-agent lines share one group
        let mut last_was_agent = false;

        for raw_line in body.lines() {
            let line = match raw_line.split_once('#') {
                Some((before, _)) => before,
                None => raw_line,
            }
            .trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    if !last_was_agent {
                        in_specific = false;
                        in_wildcard = false;
                    }
                    let agent = value.to_lowercase();
                    if agent == "*" {
                        in_wildcard = true;
                    } else if ua.contains(&agent) || agent.contains(&ua) {
                        in_specific = true;
                        specific_seen = true;
                    }
                    last_was_agent = true;
                    continue;
                }
                "sitemap" => {
                    // Sitemap lines are global, independent of groups
                    if !value.is_empty() {
                        sitemaps.push(value.to_string());
                    }
                }
                "allow" => {
                    if let Some(rule) = RobotsRule::compile(value) {
                        if in_specific {
                            specific.allow.push(rule.clone());
                        }
                        if in_wildcard {
                            wildcard.allow.push(rule);
                        }
                    }
                }
                "disallow" => {
                    if let Some(rule) = RobotsRule::compile(value) {
                        if in_specific {
                            specific.disallow.push(rule.clone());
                        }
                        if in_wildcard {
                            wildcard.disallow.push(rule);
                        }
                    }
                }
                "crawl-delay" => {
                    if let Ok(secs) = value.parse::<f64>() {
                        if secs > 0.0 {
                            let delay = Duration::from_secs_f64(secs).min(MAX_CRAWL_DELAY);
                            if in_specific {
                                specific.crawl_delay = Some(delay);
                            }
                            if in_wildcard {
                                wildcard.crawl_delay = Some(delay);
                            }
                        }
                    }
                }
                _ => {}
            }
            last_was_agent = false;
        }

        let group = if specific_seen { specific } else { wildcard };
        Self {
            allow: group.allow,
            disallow: group.disallow,
            crawl_delay: group.crawl_delay,
            sitemaps,
            fetched_at: Instant::now(),
        }
    }

    /// Longest-match decision over `path` (query string included)
    #[must_use]
    pub fn is_allowed(&self, path: &str) -> bool {
        let best_allow = self
            .allow
            .iter()
            .filter(|r| r.matches(path))
            .map(|r| r.pattern.len())
            .max();
        let best_disallow = self
            .disallow
            .iter()
            .filter(|r| r.matches(path))
            .map(|r| r.pattern.len())
            .max();
        match (best_allow, best_disallow) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(a), Some(d)) => a >= d,
        }
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

/// Per-origin robots.txt cache
pub struct RobotsCache {
    client: reqwest::Client,
    user_agent: String,
    ttl: Duration,
    records: DashMap<String, Arc<RobotsRecord>>,
}

impl RobotsCache {
    /// `ttl` defaults to one hour when `None`
    #[must_use]
    pub fn new(client: reqwest::Client, user_agent: impl Into<String>, ttl: Option<Duration>) -> Self {
        Self {
            client,
            user_agent: user_agent.into(),
            ttl: ttl.unwrap_or(Duration::from_secs(3600)),
            records: DashMap::new(),
        }
    }

    /// Whether `url` may be fetched, consulting (and populating) the cache
    pub async fn is_allowed(&self, url: &Url) -> bool {
        let record = self.record_for(url).await;
        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }
        record.is_allowed(&path)
    }

    /// The cached record for `url`'s origin, fetching it when absent or stale
    pub async fn record_for(&self, url: &Url) -> Arc<RobotsRecord> {
        let origin = url.origin().ascii_serialization();
        if let Some(existing) = self.records.get(&origin) {
            if existing.is_fresh(self.ttl) {
                return Arc::clone(existing.value());
            }
        }

        let record = Arc::new(self.fetch(&origin).await);
        self.records.insert(origin, Arc::clone(&record));
        record
    }

    async fn fetch(&self, origin: &str) -> RobotsRecord {
        let robots_url = format!("{origin}/robots.txt");
        debug!("fetching {robots_url}");
        let response = self
            .client
            .get(&robots_url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .timeout(Duration::from_secs(10))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(body) => RobotsRecord::parse(&body, &self.user_agent),
                Err(e) => {
                    debug!("robots body read failed for {origin}: {e}");
                    RobotsRecord::allow_all()
                }
            },
            Ok(resp) => {
                debug!("robots fetch for {origin} returned {}", resp.status());
                RobotsRecord::allow_all()
            }
            Err(e) => {
                debug!("robots fetch failed for {origin}: {e}");
                RobotsRecord::allow_all()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC: &str = "\
# global rules
User-agent: *
Disallow: /private/
Allow: /private/public.html
Crawl-delay: 2
Sitemap: https://example.com/sitemap.xml
";

    #[test]
    fn disallow_and_allow_exception() {
        let record = RobotsRecord::parse(BASIC, "surfacer");
        assert!(!record.is_allowed("/private/secret.html"));
        assert!(record.is_allowed("/private/public.html"));
        assert!(record.is_allowed("/open/page"));
    }

    #[test]
    fn crawl_delay_and_sitemaps_surface() {
        let record = RobotsRecord::parse(BASIC, "surfacer");
        assert_eq!(record.crawl_delay, Some(Duration::from_secs(2)));
        assert_eq!(record.sitemaps, vec!["https://example.com/sitemap.xml"]);
    }

    #[test]
    fn wildcard_and_end_anchor() {
        let body = "\
User-agent: *
Disallow: /*.php$
Disallow: /tmp*
";
        let record = RobotsRecord::parse(body, "surfacer");
        assert!(!record.is_allowed("/index.php"));
        assert!(record.is_allowed("/index.php.html"));
        assert!(!record.is_allowed("/tmp/session"));
        assert!(!record.is_allowed("/tmpfile"));
        assert!(record.is_allowed("/team"));
    }

    #[test]
    fn specific_agent_group_wins_over_star() {
        let body = "\
User-agent: *
Disallow: /

User-agent: surfacer
Allow: /
Disallow: /admin/
";
        let record = RobotsRecord::parse(body, "surfacer/0.3");
        assert!(record.is_allowed("/anything"));
        assert!(!record.is_allowed("/admin/panel"));
    }

    #[test]
    fn shared_group_for_consecutive_agents() {
        let body = "\
User-agent: surfacer
User-agent: otherbot
Disallow: /both/
";
        let record = RobotsRecord::parse(body, "surfacer");
        assert!(!record.is_allowed("/both/x"));
        assert!(record.is_allowed("/else"));
    }

    #[test]
    fn longest_match_wins_allow_on_tie() {
        let body = "\
User-agent: *
Allow: /dir/page
Disallow: /dir/
";
        let record = RobotsRecord::parse(body, "surfacer");
        // Allow pattern is longer than the Disallow
        assert!(record.is_allowed("/dir/page.html"));
        assert!(!record.is_allowed("/dir/other"));
    }

    #[test]
    fn empty_disallow_means_allow_all() {
        let body = "\
User-agent: *
Disallow:
";
        let record = RobotsRecord::parse(body, "surfacer");
        assert!(record.is_allowed("/anything"));
    }

    #[test]
    fn comments_are_stripped() {
        let body = "\
User-agent: * # applies to everyone
Disallow: /hidden # keep out
";
        let record = RobotsRecord::parse(body, "surfacer");
        assert!(!record.is_allowed("/hidden/x"));
    }

    #[test]
    fn oversized_crawl_delay_is_clamped() {
        let body = "\
User-agent: *
Crawl-delay: 86400
";
        let record = RobotsRecord::parse(body, "surfacer");
        assert_eq!(record.crawl_delay, Some(Duration::from_secs(60)));
    }
}
