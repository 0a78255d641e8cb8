// ABOUTME: Page sources: the PageSource trait and its reqwest-backed HttpSource implementation.
// ABOUTME: Handles HTTP fetching with custom headers, content-length limits and non-2xx passthrough.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::CrawlError;
use crate::options::CrawlOptions;

/// Maximum allowed content length (10 MB).
pub const MAX_CONTENT_LENGTH: usize = 10 * 1024 * 1024;

/// Options for fetching a resource.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub headers: HashMap<String, String>,
}

/// A fetched response. Non-2xx statuses are returned as results, not errors.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub status: u16,
    pub url: String,
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Server errors, 408 and 429 may succeed on a later attempt; other statuses won't.
    pub fn is_transient(&self) -> bool {
        self.status >= 500 || self.status == 408 || self.status == 429
    }

    pub fn was_redirected(&self) -> bool {
        self.url != self.final_url
    }
}

/// Anything that can turn a URL into a response.
///
/// The crawl driver only talks to this trait, so tests and alternative
/// transports plug in without touching the state machine.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchResult, CrawlError>;
}

/// [`PageSource`] over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    opts: FetchOptions,
}

impl HttpSource {
    pub fn new(client: reqwest::Client, opts: FetchOptions) -> Self {
        Self { client, opts }
    }

    /// Builds a source from crawl options, reusing `opts.http_client` when set.
    pub fn from_options(opts: &CrawlOptions) -> Result<Self, CrawlError> {
        let client = match &opts.http_client {
            Some(client) => client.clone(),
            None => reqwest::Client::builder()
                .user_agent(&opts.user_agent)
                .timeout(opts.timeout)
                .gzip(true)
                .brotli(true)
                .deflate(true)
                .build()
                .map_err(|e| {
                    CrawlError::fetch(
                        "",
                        "Client",
                        Some(anyhow::anyhow!("failed to build HTTP client: {}", e)),
                    )
                })?,
        };
        Ok(Self::new(
            client,
            FetchOptions {
                headers: opts.headers.clone(),
            },
        ))
    }
}

#[async_trait]
impl PageSource for HttpSource {
    async fn fetch(&self, url: &str) -> Result<FetchResult, CrawlError> {
        fetch(&self.client, url, &self.opts).await
    }
}

/// Fetch a resource from the given URL.
pub async fn fetch(
    client: &reqwest::Client,
    url: &str,
    opts: &FetchOptions,
) -> Result<FetchResult, CrawlError> {
    if url.is_empty() {
        return Err(CrawlError::invalid_url(url, "Fetch", None));
    }

    let parsed_url = url::Url::parse(url).map_err(|e| {
        CrawlError::invalid_url(url, "Fetch", Some(anyhow::anyhow!("invalid URL: {}", e)))
    })?;

    let scheme = parsed_url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(CrawlError::invalid_url(
            url,
            "Fetch",
            Some(anyhow::anyhow!("scheme must be http or https")),
        ));
    }

    let mut request = client.get(parsed_url);
    for (key, value) in &opts.headers {
        request = request.header(key, value);
    }

    let response = request.send().await.map_err(|e| transport_error(url, "request failed", e))?;

    // Check Content-Length header before reading body
    let content_length = response.content_length().or_else(|| {
        response
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
    });

    if let Some(len) = content_length {
        if len as usize > MAX_CONTENT_LENGTH {
            return Err(CrawlError::fetch(
                url,
                "Fetch",
                Some(anyhow::anyhow!("content too large")),
            ));
        }
    }

    let status = response.status().as_u16();
    let final_url = response.url().to_string();
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_lowercase());

    let body = response
        .bytes()
        .await
        .map_err(|e| transport_error(url, "failed to read body", e))?;

    if body.len() > MAX_CONTENT_LENGTH {
        return Err(CrawlError::fetch(
            url,
            "Fetch",
            Some(anyhow::anyhow!("content too large")),
        ));
    }

    Ok(FetchResult {
        status,
        url: url.to_string(),
        final_url,
        content_type,
        body,
    })
}

fn transport_error(url: &str, what: &str, e: reqwest::Error) -> CrawlError {
    let source = Some(anyhow::anyhow!("{}: {}", what, e));
    if e.is_timeout() {
        CrawlError::timeout(url, "Fetch", source)
    } else {
        CrawlError::fetch(url, "Fetch", source)
    }
}
