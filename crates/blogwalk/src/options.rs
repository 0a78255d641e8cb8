// ABOUTME: Configuration for crawls: Direction, FailurePolicy, CrawlOptions and the CrawlerBuilder.
// ABOUTME: CrawlerBuilder provides a fluent API for constructing Crawler instances with custom settings.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::blog::BlogSchema;
use crate::crawl::retry::RetryPolicy;
use crate::crawl::Crawler;
use crate::error::CrawlError;
use crate::resource::{HttpSource, PageSource};
use crate::schema::Schema;

/// Which pager link the crawl follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Follow `next` links.
    #[default]
    Forward,
    /// Follow `prev` links.
    Reverse,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Direction::Forward => "forward",
            Direction::Reverse => "reverse",
        };
        write!(f, "{}", s)
    }
}

impl From<&str> for Direction {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "reverse" | "prev" | "backward" => Direction::Reverse,
            _ => Direction::Forward,
        }
    }
}

/// What happens when a page is still failing after every retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop the crawl with the page's error.
    #[default]
    Abort,
    /// Follow the pager of the failed response when it still renders one.
    SkipAndContinue,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailurePolicy::Abort => "abort",
            FailurePolicy::SkipAndContinue => "skip",
        };
        write!(f, "{}", s)
    }
}

impl From<&str> for FailurePolicy {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "skip" | "skip_and_continue" | "continue" => FailurePolicy::SkipAndContinue,
            _ => FailurePolicy::Abort,
        }
    }
}

/// Configuration options for a crawl.
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub timeout: Duration,
    pub user_agent: String,
    pub headers: HashMap<String, String>,
    pub retry: RetryPolicy,
    pub max_pages: Option<usize>,
    pub direction: Direction,
    pub failure_policy: FailurePolicy,
    pub prefetch: bool,
    pub http_client: Option<reqwest::Client>,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: "blogwalk/0.1".to_string(),
            headers: HashMap::new(),
            retry: RetryPolicy::default(),
            max_pages: None,
            direction: Direction::Forward,
            failure_policy: FailurePolicy::Abort,
            prefetch: false,
            http_client: None,
        }
    }
}

/// Builder for constructing Crawler instances with custom configuration.
#[derive(Clone, Default)]
pub struct CrawlerBuilder {
    opts: CrawlOptions,
    source: Option<Arc<dyn PageSource>>,
    schema: Option<BlogSchema>,
}

impl fmt::Debug for CrawlerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrawlerBuilder")
            .field("opts", &self.opts)
            .field("source", &self.source.as_ref().map(|_| "<dyn PageSource>"))
            .field("schema", &self.schema.as_ref().map(|s| s.schema().name.as_str()))
            .finish()
    }
}

impl CrawlerBuilder {
    /// Create a new CrawlerBuilder with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing set of options.
    pub fn with_options(opts: CrawlOptions) -> Self {
        Self {
            opts,
            ..Self::default()
        }
    }

    /// Set the per-fetch timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.opts.timeout = timeout;
        self
    }

    /// Set the User-Agent header.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.opts.user_agent = user_agent.into();
        self
    }

    /// Add a custom header to all requests.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.opts.headers.insert(key.into(), value.into());
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.opts.retry = retry;
        self
    }

    /// Stop cleanly after this many pages.
    pub fn max_pages(mut self, max_pages: usize) -> Self {
        self.opts.max_pages = Some(max_pages);
        self
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.opts.direction = direction;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.opts.failure_policy = policy;
        self
    }

    /// Fetch the next page while the current one is being extracted.
    pub fn prefetch(mut self, enabled: bool) -> Self {
        self.opts.prefetch = enabled;
        self
    }

    /// Use a custom HTTP client for the default source.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.opts.http_client = Some(client);
        self
    }

    /// Use a custom page source instead of HTTP.
    pub fn source(mut self, source: impl PageSource + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Use a shared page source instead of HTTP.
    pub fn shared_source(mut self, source: Arc<dyn PageSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Use a custom blog schema.
    pub fn schema(mut self, schema: BlogSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Use a custom schema given as JSON.
    pub fn schema_json(self, json: &str) -> Result<Self, CrawlError> {
        let schema = Schema::from_json(json)?;
        Ok(self.schema(BlogSchema::from(schema)))
    }

    /// Build the Crawler with the configured options.
    pub fn build(self) -> Result<Crawler, CrawlError> {
        let source = match self.source {
            Some(source) => source,
            None => Arc::new(HttpSource::from_options(&self.opts)?),
        };
        let schema = self.schema.unwrap_or_else(|| BlogSchema::blogger().clone());
        Ok(Crawler::new(self.opts, source, schema))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = CrawlOptions::default();
        assert_eq!(opts.timeout, Duration::from_secs(30));
        assert_eq!(opts.user_agent, "blogwalk/0.1");
        assert_eq!(opts.retry.max_attempts, 3);
        assert_eq!(opts.max_pages, None);
        assert_eq!(opts.direction, Direction::Forward);
        assert_eq!(opts.failure_policy, FailurePolicy::Abort);
        assert!(!opts.prefetch);
    }

    #[test]
    fn parse_from_strings() {
        assert_eq!(Direction::from("Reverse"), Direction::Reverse);
        assert_eq!(Direction::from("prev"), Direction::Reverse);
        assert_eq!(Direction::from("anything"), Direction::Forward);
        assert_eq!(FailurePolicy::from("skip"), FailurePolicy::SkipAndContinue);
        assert_eq!(FailurePolicy::from("abort"), FailurePolicy::Abort);
        assert_eq!(Direction::Reverse.to_string(), "reverse");
        assert_eq!(FailurePolicy::SkipAndContinue.to_string(), "skip");
    }

    #[test]
    fn builder_sets_options() {
        let crawler = CrawlerBuilder::new()
            .timeout(Duration::from_secs(5))
            .user_agent("x")
            .header("accept", "text/html")
            .max_pages(4)
            .direction(Direction::Reverse)
            .failure_policy(FailurePolicy::SkipAndContinue)
            .prefetch(true)
            .retry(RetryPolicy::none())
            .build()
            .unwrap();
        let opts = crawler.options();
        assert_eq!(opts.timeout, Duration::from_secs(5));
        assert_eq!(opts.user_agent, "x");
        assert_eq!(opts.headers.get("accept").map(String::as_str), Some("text/html"));
        assert_eq!(opts.max_pages, Some(4));
        assert_eq!(opts.direction, Direction::Reverse);
        assert_eq!(opts.failure_policy, FailurePolicy::SkipAndContinue);
        assert!(opts.prefetch);
        assert_eq!(opts.retry.attempts(), 1);
    }

    #[test]
    fn schema_json_reports_selector_errors() {
        let json = r#"{"name":"x","root":{"selector":{"kind":"by_id","expression":""}}}"#;
        let err = CrawlerBuilder::new().schema_json(json).unwrap_err();
        assert!(err.is_selector());
    }
}
