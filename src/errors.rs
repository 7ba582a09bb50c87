//! Error taxonomy shared by every component of the crawl engine
//!
//! Each error carries a [`ErrorKind`] that drives the three propagation
//! policies: retried locally, logged-and-dropped, or surfaced to the caller.

use thiserror::Error;

/// Classification of a crawl failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Unknown,
    /// Socket, DNS or connection-level failure
    Network,
    Timeout,
    /// HTTP 429 or equivalent throttling signal
    RateLimit,
    /// HTTP 401/403 or credential failure
    Auth,
    NotFound,
    /// HTTP 5xx
    ServerError,
    /// HTTP 4xx other than auth/not-found/rate-limit
    ClientError,
    Parse,
    /// Headless browser / CDP failure
    Browser,
    /// URL rejected by the scope policy
    Scope,
    Cancelled,
    /// Rejected by an open per-host circuit breaker
    CircuitOpen,
}

impl ErrorKind {
    /// Whether the retrier may re-attempt an operation failing with this kind
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::RateLimit | Self::ServerError
        )
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::RateLimit => "rate-limit",
            Self::Auth => "auth",
            Self::NotFound => "not-found",
            Self::ServerError => "server-error",
            Self::ClientError => "client-error",
            Self::Parse => "parse",
            Self::Browser => "browser",
            Self::Scope => "scope",
            Self::Cancelled => "cancelled",
            Self::CircuitOpen => "circuit-open",
        }
    }
}

/// A structured crawl error: kind, URL, operation label and optional cause
#[derive(Debug, Error)]
#[error("{operation} {url}: {message}")]
pub struct CrawlError {
    pub kind: ErrorKind,
    pub url: String,
    /// Short label of the failing operation, e.g. `static-get`
    pub operation: String,
    pub message: String,
    /// HTTP status when the failure came from a response
    pub status: Option<u16>,
    /// Advisory delay from a `Retry-After` header on a 429
    pub retry_after: Option<std::time::Duration>,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl CrawlError {
    #[must_use]
    pub fn new(
        kind: ErrorKind,
        url: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            url: url.into(),
            operation: operation.into(),
            message: message.into(),
            status: None,
            retry_after: None,
            source: None,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_retry_after(mut self, delay: std::time::Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for a [`ErrorKind::Cancelled`] error
    #[must_use]
    pub fn cancelled(url: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, url, operation, "operation cancelled")
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Convenience alias used throughout the engine
pub type CrawlResult<T> = Result<T, CrawlError>;

/// Classify an HTTP status code into an [`ErrorKind`]
///
/// Returns `None` for statuses that are not errors (1xx-3xx and 2xx).
#[must_use]
pub fn kind_for_status(status: u16) -> Option<ErrorKind> {
    match status {
        401 | 403 => Some(ErrorKind::Auth),
        404 => Some(ErrorKind::NotFound),
        429 => Some(ErrorKind::RateLimit),
        500..=599 => Some(ErrorKind::ServerError),
        400..=499 => Some(ErrorKind::ClientError),
        _ => None,
    }
}

/// Build a [`CrawlError`] for a failing HTTP response
#[must_use]
pub fn error_for_status(
    status: u16,
    url: impl Into<String>,
    operation: impl Into<String>,
) -> CrawlError {
    let kind = kind_for_status(status).unwrap_or(ErrorKind::Unknown);
    CrawlError::new(kind, url, operation, format!("HTTP status {status}")).with_status(status)
}

/// Classify a reqwest transport error
pub fn classify_reqwest(
    err: reqwest::Error,
    url: impl Into<String>,
    operation: impl Into<String>,
) -> CrawlError {
    let kind = if err.is_timeout() {
        ErrorKind::Timeout
    } else if err.is_connect() || err.is_request() {
        ErrorKind::Network
    } else if err.is_decode() || err.is_body() {
        ErrorKind::Parse
    } else {
        classify_message(&err.to_string())
    };
    CrawlError::new(kind, url, operation, err.to_string()).with_source(err)
}

/// Classify a browser/CDP error message
pub fn classify_browser(
    message: impl Into<String>,
    url: impl Into<String>,
    operation: impl Into<String>,
) -> CrawlError {
    let message = message.into();
    let kind = match classify_message(&message) {
        ErrorKind::Unknown => ErrorKind::Browser,
        other => other,
    };
    CrawlError::new(kind, url, operation, message)
}

/// Fallback classification by message pattern
///
/// Mirrors the transport layer's wording: timeouts first, then socket/DNS
/// failures, then throttling language.
#[must_use]
pub fn classify_message(message: &str) -> ErrorKind {
    let msg = message.to_lowercase();
    if msg.contains("cancel") {
        return ErrorKind::Cancelled;
    }
    if msg.contains("timeout") || msg.contains("timed out") || msg.contains("deadline exceeded") {
        return ErrorKind::Timeout;
    }
    if msg.contains("connection refused")
        || msg.contains("connection reset")
        || msg.contains("dns")
        || msg.contains("unreachable")
        || msg.contains("broken pipe")
        || msg.contains("network")
    {
        return ErrorKind::Network;
    }
    if msg.contains("429") || msg.contains("too many requests") || msg.contains("rate limit") {
        return ErrorKind::RateLimit;
    }
    ErrorKind::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(ErrorKind::Network.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(ErrorKind::RateLimit.is_retryable());
        assert!(ErrorKind::ServerError.is_retryable());
        assert!(!ErrorKind::Auth.is_retryable());
        assert!(!ErrorKind::NotFound.is_retryable());
        assert!(!ErrorKind::Cancelled.is_retryable());
        assert!(!ErrorKind::CircuitOpen.is_retryable());
    }

    #[test]
    fn status_classification() {
        assert_eq!(kind_for_status(401), Some(ErrorKind::Auth));
        assert_eq!(kind_for_status(403), Some(ErrorKind::Auth));
        assert_eq!(kind_for_status(404), Some(ErrorKind::NotFound));
        assert_eq!(kind_for_status(429), Some(ErrorKind::RateLimit));
        assert_eq!(kind_for_status(503), Some(ErrorKind::ServerError));
        assert_eq!(kind_for_status(418), Some(ErrorKind::ClientError));
        assert_eq!(kind_for_status(200), None);
        assert_eq!(kind_for_status(301), None);
    }

    #[test]
    fn message_classification() {
        assert_eq!(classify_message("operation timed out"), ErrorKind::Timeout);
        assert_eq!(classify_message("deadline exceeded"), ErrorKind::Timeout);
        assert_eq!(
            classify_message("connection refused by peer"),
            ErrorKind::Network
        );
        assert_eq!(classify_message("dns lookup failed"), ErrorKind::Network);
        assert_eq!(classify_message("429 Too Many Requests"), ErrorKind::RateLimit);
        assert_eq!(classify_message("something odd"), ErrorKind::Unknown);
    }

    #[test]
    fn error_display_carries_operation_and_url() {
        let err = CrawlError::new(
            ErrorKind::ServerError,
            "https://example.com/a",
            "static-get",
            "HTTP status 500",
        )
        .with_status(500);
        let rendered = err.to_string();
        assert!(rendered.contains("static-get"));
        assert!(rendered.contains("https://example.com/a"));
        assert_eq!(err.status, Some(500));
    }
}
