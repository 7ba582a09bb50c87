//! API-key authentication via arbitrary request headers

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::browser::BrowserPool;
use crate::errors::{CrawlError, CrawlResult, ErrorKind};
use crate::model::CookieRecord;

use super::{AuthKind, AuthProvider};

#[derive(Debug)]
pub struct ApiKeyAuth {
    headers: HashMap<String, String>,
    /// Set when the target rejected the key; static keys cannot refresh
    /// themselves, so the flag sticks
    rejected: AtomicBool,
}

impl ApiKeyAuth {
    #[must_use]
    pub fn new(headers: HashMap<String, String>) -> Self {
        Self {
            headers,
            rejected: AtomicBool::new(false),
        }
    }

    /// Defensive copy of the configured header map
    #[must_use]
    pub fn headers(&self) -> HashMap<String, String> {
        self.headers.clone()
    }
}

#[async_trait]
impl AuthProvider for ApiKeyAuth {
    async fn authenticate(&self, _browser_pool: Option<&Arc<BrowserPool>>) -> CrawlResult<()> {
        if self.headers.is_empty() {
            return Err(CrawlError::new(
                ErrorKind::Auth,
                "",
                "api-key-auth",
                "no API key headers configured",
            ));
        }
        Ok(())
    }

    fn headers_to_inject(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn cookies_to_inject(&self) -> Vec<CookieRecord> {
        Vec::new()
    }

    async fn refresh_if_needed(&self) -> bool {
        false
    }

    fn mark_unauthenticated(&self) {
        self.rejected.store(true, Ordering::Relaxed);
    }

    fn is_authenticated(&self) -> bool {
        !self.headers.is_empty() && !self.rejected.load(Ordering::Relaxed)
    }

    fn kind(&self) -> AuthKind {
        AuthKind::ApiKey
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injects_every_configured_header() {
        let auth = ApiKeyAuth::new(HashMap::from([
            ("X-Api-Key".to_string(), "k1".to_string()),
            ("X-Client-Id".to_string(), "c1".to_string()),
        ]));
        assert!(auth.is_authenticated());
        let mut injected = auth.headers_to_inject();
        injected.sort();
        assert_eq!(
            injected,
            [
                ("X-Api-Key".to_string(), "k1".to_string()),
                ("X-Client-Id".to_string(), "c1".to_string()),
            ]
        );
    }

    #[test]
    fn empty_map_is_unauthenticated() {
        let auth = ApiKeyAuth::new(HashMap::new());
        assert!(!auth.is_authenticated());
    }

    #[test]
    fn rejection_marks_unauthenticated() {
        let auth = ApiKeyAuth::new(HashMap::from([(
            "X-Api-Key".to_string(),
            "k1".to_string(),
        )]));
        auth.mark_unauthenticated();
        assert!(!auth.is_authenticated());
    }
}
