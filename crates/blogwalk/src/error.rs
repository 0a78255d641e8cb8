// ABOUTME: Error types for blogwalk including the ErrorCode enum, CrawlError struct and SelectorError.
// ABOUTME: Provides categorized errors with convenience constructors, boolean helpers and retry classification.

use std::fmt;

/// Error codes representing the categories of crawl failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidUrl,
    Selector,
    Fetch,
    Timeout,
    Parse,
    CycleDetected,
    Cancelled,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::InvalidUrl => "invalid URL",
            ErrorCode::Selector => "selector error",
            ErrorCode::Fetch => "fetch error",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Parse => "parse error",
            ErrorCode::CycleDetected => "pagination cycle detected",
            ErrorCode::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// The error type for fetch, parse and crawl operations.
#[derive(Debug, thiserror::Error)]
pub struct CrawlError {
    pub code: ErrorCode,
    pub url: String,
    pub op: String,
    #[source]
    pub source: Option<anyhow::Error>,
}

impl fmt::Display for CrawlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blogwalk: {} {}: {}", self.op, self.url, self.code)?;
        if let Some(ref src) = self.source {
            write!(f, ": {}", src)?;
        }
        Ok(())
    }
}

impl CrawlError {
    fn with_code(
        code: ErrorCode,
        url: impl Into<String>,
        op: impl Into<String>,
        source: Option<anyhow::Error>,
    ) -> Self {
        Self {
            code,
            url: url.into(),
            op: op.into(),
            source,
        }
    }

    /// Create an InvalidUrl error.
    pub fn invalid_url(
        url: impl Into<String>,
        op: impl Into<String>,
        source: Option<anyhow::Error>,
    ) -> Self {
        Self::with_code(ErrorCode::InvalidUrl, url, op, source)
    }

    /// Create a Selector error.
    pub fn selector(
        url: impl Into<String>,
        op: impl Into<String>,
        source: Option<anyhow::Error>,
    ) -> Self {
        Self::with_code(ErrorCode::Selector, url, op, source)
    }

    /// Create a Fetch error.
    pub fn fetch(
        url: impl Into<String>,
        op: impl Into<String>,
        source: Option<anyhow::Error>,
    ) -> Self {
        Self::with_code(ErrorCode::Fetch, url, op, source)
    }

    /// Create a Timeout error.
    pub fn timeout(
        url: impl Into<String>,
        op: impl Into<String>,
        source: Option<anyhow::Error>,
    ) -> Self {
        Self::with_code(ErrorCode::Timeout, url, op, source)
    }

    /// Create a Parse error.
    pub fn parse(
        url: impl Into<String>,
        op: impl Into<String>,
        source: Option<anyhow::Error>,
    ) -> Self {
        Self::with_code(ErrorCode::Parse, url, op, source)
    }

    /// Create a CycleDetected error for a pagination link that re-enters a visited page.
    pub fn cycle(url: impl Into<String>, op: impl Into<String>) -> Self {
        Self::with_code(ErrorCode::CycleDetected, url, op, None)
    }

    /// Create a Cancelled error.
    pub fn cancelled(url: impl Into<String>, op: impl Into<String>) -> Self {
        Self::with_code(ErrorCode::Cancelled, url, op, None)
    }

    /// Replace the URL this error refers to.
    pub fn at(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Returns true if the retry policy may attempt the operation again.
    ///
    /// Only transport and document failures are transient; invalid URLs,
    /// selector bugs, cycles and cancellation are surfaced immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::Fetch | ErrorCode::Timeout | ErrorCode::Parse
        )
    }

    /// Returns true if this is an InvalidUrl error.
    pub fn is_invalid_url(&self) -> bool {
        self.code == ErrorCode::InvalidUrl
    }

    /// Returns true if this is a Selector error.
    pub fn is_selector(&self) -> bool {
        self.code == ErrorCode::Selector
    }

    /// Returns true if this is a Fetch error.
    pub fn is_fetch(&self) -> bool {
        self.code == ErrorCode::Fetch
    }

    /// Returns true if this is a Timeout error.
    pub fn is_timeout(&self) -> bool {
        self.code == ErrorCode::Timeout
    }

    /// Returns true if this is a Parse error.
    pub fn is_parse(&self) -> bool {
        self.code == ErrorCode::Parse
    }

    /// Returns true if this is a CycleDetected error.
    pub fn is_cycle(&self) -> bool {
        self.code == ErrorCode::CycleDetected
    }

    /// Returns true if this is a Cancelled error.
    pub fn is_cancelled(&self) -> bool {
        self.code == ErrorCode::Cancelled
    }
}

/// Errors raised while constructing a selector.
///
/// A malformed expression is a configuration bug, so these are reported when the
/// selector is built rather than when it is first matched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectorError {
    /// The expression was empty or blank.
    #[error("empty {kind} selector expression")]
    Empty { kind: &'static str },

    /// A class token selector contained whitespace and can never match a single token.
    #[error("class token {0:?} must not contain whitespace")]
    InvalidClassToken(String),

    /// The path query could not be parsed.
    #[error("malformed path query {expression:?} at offset {offset}: {message}")]
    Syntax {
        expression: String,
        offset: usize,
        message: String,
    },
}

impl SelectorError {
    /// Leads every deserialization message that carries a `SelectorError`.
    pub(crate) const DESERIALIZE_PREFIX: &'static str = "invalid selector: ";

    /// Wraps this error for a serde deserializer.
    pub(crate) fn into_de_error<E: serde::de::Error>(self) -> E {
        E::custom(format_args!("{}{}", Self::DESERIALIZE_PREFIX, self))
    }

    pub(crate) fn is_deserialize_message(message: &str) -> bool {
        message.starts_with(Self::DESERIALIZE_PREFIX)
    }

    pub(crate) fn syntax(
        expression: impl Into<String>,
        offset: usize,
        message: impl Into<String>,
    ) -> Self {
        SelectorError::Syntax {
            expression: expression.into(),
            offset,
            message: message.into(),
        }
    }
}

impl From<SelectorError> for CrawlError {
    fn from(err: SelectorError) -> Self {
        CrawlError::with_code(
            ErrorCode::Selector,
            String::new(),
            "Schema",
            Some(anyhow::Error::new(err)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_error_marker_survives_serde() {
        let err: serde_json::Error = SelectorError::Empty { kind: "id" }.into_de_error();
        let message = err.to_string();
        assert!(SelectorError::is_deserialize_message(&message), "{message}");
        assert!(message.contains("empty id selector expression"));

        let other = <serde_json::Error as serde::de::Error>::custom("unknown variant `by_tag`");
        assert!(!SelectorError::is_deserialize_message(&other.to_string()));
    }

    #[test]
    fn display_includes_op_url_and_source() {
        let err = CrawlError::fetch(
            "https://blog.example.com/",
            "Fetch",
            Some(anyhow::anyhow!("HTTP status 503")),
        );
        assert_eq!(
            err.to_string(),
            "blogwalk: Fetch https://blog.example.com/: fetch error: HTTP status 503"
        );
    }

    #[test]
    fn retry_classification() {
        assert!(CrawlError::fetch("u", "Fetch", None).is_retryable());
        assert!(CrawlError::timeout("u", "Fetch", None).is_retryable());
        assert!(CrawlError::parse("u", "Parse", None).is_retryable());
        assert!(!CrawlError::cycle("u", "Advance").is_retryable());
        assert!(!CrawlError::cancelled("u", "Fetch").is_retryable());
        assert!(!CrawlError::invalid_url("u", "Crawl", None).is_retryable());
    }

    #[test]
    fn selector_error_converts_to_selector_code() {
        let err: CrawlError = SelectorError::InvalidClassToken("a b".into()).into();
        assert!(err.is_selector());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("must not contain whitespace"));
    }

    #[test]
    fn at_rewrites_url() {
        let err = CrawlError::parse("", "Parse", None).at("https://x.test/p");
        assert_eq!(err.url, "https://x.test/p");
        assert!(err.is_parse());
    }
}
