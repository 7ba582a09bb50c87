//! Endpoint records and the merge registry
//!
//! Endpoints are keyed by `(method, canonical URL without query)`.
//! Repeated observations merge parameter sets and bump the hit count;
//! records are append-only within a crawl run.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// How an endpoint was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndpointSource {
    /// Observed XHR/fetch during a page visit
    Passive,
    /// Well-known path probe
    Active,
    /// HTTP method matrix probe
    ActiveMethodProbe,
    /// GraphQL introspection probe
    ActiveGraphql,
}

/// Where a parameter travels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParamLocation {
    Query,
    Path,
    Body,
    Header,
}

/// One observed parameter of an endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointParameter {
    pub name: String,
    pub location: ParamLocation,
    /// Distinct values seen in the wild, in observation order
    pub examples: Vec<String>,
    /// Where the observation came from (page URL, probe label)
    pub context: String,
}

impl EndpointParameter {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        location: ParamLocation,
        example: Option<String>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            location,
            examples: example.into_iter().collect(),
            context: context.into(),
        }
    }

    /// Record one more observed value, keeping the list distinct
    pub fn add_example(&mut self, value: impl Into<String>) {
        let value = value.into();
        if !self.examples.contains(&value) {
            self.examples.push(value);
        }
    }
}

/// A discovered API endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    /// Canonical URL without its query string
    pub url: String,
    pub method: String,
    pub source: EndpointSource,
    pub parameters: Vec<EndpointParameter>,
    pub first_seen: DateTime<Utc>,
    /// Status of the most recent observation, when known
    pub last_status: Option<u16>,
    pub hits: u64,
}

impl Endpoint {
    #[must_use]
    pub fn new(url: impl Into<String>, method: impl Into<String>, source: EndpointSource) -> Self {
        Self {
            url: url.into(),
            method: method.into().to_uppercase(),
            source,
            parameters: Vec::new(),
            first_seen: Utc::now(),
            last_status: None,
            hits: 1,
        }
    }

    /// Registry key: method and base URL
    #[must_use]
    pub fn key(&self) -> (String, String) {
        (self.method.clone(), self.url.clone())
    }
}

/// Strip the query and fragment off a URL, keeping the canonical base
#[must_use]
pub fn base_url(url: &url::Url) -> String {
    let mut base = url.clone();
    base.set_query(None);
    base.set_fragment(None);
    base.to_string()
}

/// Concurrent endpoint registry with in-place merging
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    endpoints: DashMap<(String, String), Endpoint>,
}

impl EndpointRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or merge one observation
    ///
    /// Returns the merged record (clone) and whether the key was new.
    /// Merging unions parameters by `(name, location)`, accumulates every
    /// distinct example value, keeps the earliest `first_seen` and bumps
    /// `hits`.
    pub fn record(&self, observed: Endpoint) -> (Endpoint, bool) {
        let key = observed.key();
        let mut created = false;
        let merged = self
            .endpoints
            .entry(key)
            .and_modify(|existing| {
                existing.hits += 1;
                if observed.last_status.is_some() {
                    existing.last_status = observed.last_status;
                }
                for param in &observed.parameters {
                    match existing
                        .parameters
                        .iter_mut()
                        .find(|p| p.name == param.name && p.location == param.location)
                    {
                        Some(known) => {
                            for example in &param.examples {
                                known.add_example(example.clone());
                            }
                        }
                        None => existing.parameters.push(param.clone()),
                    }
                }
            })
            .or_insert_with(|| {
                created = true;
                observed
            })
            .clone();
        (merged, created)
    }

    /// Snapshot of every endpoint, cloned out of the registry
    #[must_use]
    pub fn all(&self) -> Vec<Endpoint> {
        self.endpoints.iter().map(|e| e.value().clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Look one endpoint up by method and base URL
    #[must_use]
    pub fn get(&self, method: &str, url: &str) -> Option<Endpoint> {
        self.endpoints
            .get(&(method.to_uppercase(), url.to_string()))
            .map(|e| e.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(name: &str, location: ParamLocation, example: &str) -> EndpointParameter {
        EndpointParameter::new(name, location, Some(example.into()), "test")
    }

    #[test]
    fn repeated_observations_merge_parameters_and_hits() {
        let registry = EndpointRegistry::new();

        let mut first = Endpoint::new("https://api.test/users", "GET", EndpointSource::Passive);
        first.parameters.push(param("page", ParamLocation::Query, "1"));
        let (_, created) = registry.record(first);
        assert!(created);

        let mut second = Endpoint::new("https://api.test/users", "get", EndpointSource::Passive);
        second.parameters.push(param("page", ParamLocation::Query, "2"));
        second.parameters.push(param("limit", ParamLocation::Query, "10"));
        let (merged, created) = registry.record(second);
        assert!(!created);

        assert_eq!(merged.hits, 2);
        let mut names: Vec<&str> = merged.parameters.iter().map(|p| p.name.as_str()).collect();
        names.sort_unstable();
        assert_eq!(names, ["limit", "page"]);
        // Every distinct observed value survives the merge
        let page = merged
            .parameters
            .iter()
            .find(|p| p.name == "page")
            .expect("page param");
        assert_eq!(page.examples, ["1", "2"]);
    }

    #[test]
    fn duplicate_example_values_are_not_repeated() {
        let registry = EndpointRegistry::new();

        let mut first = Endpoint::new("https://api.test/users", "GET", EndpointSource::Passive);
        first.parameters.push(param("page", ParamLocation::Query, "1"));
        registry.record(first);

        let mut second = Endpoint::new("https://api.test/users", "GET", EndpointSource::Passive);
        second.parameters.push(param("page", ParamLocation::Query, "1"));
        let (merged, _) = registry.record(second);

        let page = merged
            .parameters
            .iter()
            .find(|p| p.name == "page")
            .expect("page param");
        assert_eq!(page.examples, ["1"]);
    }

    #[test]
    fn different_methods_are_distinct_endpoints() {
        let registry = EndpointRegistry::new();
        registry.record(Endpoint::new("https://api.test/users", "GET", EndpointSource::Passive));
        registry.record(Endpoint::new("https://api.test/users", "POST", EndpointSource::Passive));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn base_url_strips_query_and_fragment() {
        let url = url::Url::parse("https://api.test/users?page=1#frag").expect("url");
        assert_eq!(base_url(&url), "https://api.test/users");
    }
}
