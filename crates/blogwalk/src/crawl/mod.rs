// ABOUTME: Pagination-driven crawl state machine: fetch, extract, advance until the pager runs out.
// ABOUTME: Handles retries with backoff, timeouts, cancellation, cycle detection, page caps and optional prefetch.

//! Crawl driver.
//!
//! A crawl walks one site along its pager links:
//!
//! ```text
//! AtPage(url) -> Extracting -> Advancing -> AtPage(next) ...
//!      |                           |
//!      +-> Failed(err)             +-> Done(reason) | Failed(CycleDetected)
//! ```
//!
//! Pages are strictly sequential because each page's URL comes from the
//! previous page's pager. With prefetch enabled, the fetch of the next page is
//! started as soon as the current pager has been read. Results gathered before
//! a failure are always returned.

pub mod normalize;
pub mod retry;
pub mod sink;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::blog::{BlogSchema, PageRecord, Pager, Post};
use crate::document::Document;
use crate::error::CrawlError;
use crate::options::{CrawlOptions, CrawlerBuilder, FailurePolicy};
use crate::resource::{FetchResult, PageSource};

use self::normalize::{is_http, normalize_url, parse_start, resolve};
use self::sink::{Discard, PostSink};

/// Why a crawl stopped cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The last page had no usable link in the crawl direction.
    PagerExhausted,
    /// The configured page cap was reached.
    MaxPagesExceeded,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::PagerExhausted => "pager exhausted",
            StopReason::MaxPagesExceeded => "max pages exceeded",
        };
        write!(f, "{}", s)
    }
}

/// Terminal state of a crawl.
#[derive(Debug)]
pub enum CrawlStatus {
    Done(StopReason),
    Failed(CrawlError),
}

/// Everything a crawl produced, whether it finished or failed.
#[derive(Debug)]
pub struct CrawlOutcome {
    /// Posts in crawl order.
    pub posts: Vec<Post>,
    /// Normalized URLs of every page fetched, in visit order.
    pub visited: Vec<String>,
    pub status: CrawlStatus,
}

impl CrawlOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self.status, CrawlStatus::Done(_))
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        match self.status {
            CrawlStatus::Done(reason) => Some(reason),
            CrawlStatus::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&CrawlError> {
        match &self.status {
            CrawlStatus::Done(_) => None,
            CrawlStatus::Failed(err) => Some(err),
        }
    }

    /// Number of pages visited.
    pub fn pages(&self) -> usize {
        self.visited.len()
    }

    /// Serializes posts, visited pages and status to pretty JSON.
    pub fn to_json(&self) -> Result<String, CrawlError> {
        let status = match &self.status {
            CrawlStatus::Done(reason) => serde_json::json!({
                "state": "done",
                "reason": reason,
            }),
            CrawlStatus::Failed(err) => serde_json::json!({
                "state": "failed",
                "code": err.code.to_string(),
                "url": err.url,
                "error": err.to_string(),
            }),
        };
        let value = serde_json::json!({
            "posts": self.posts,
            "visited": self.visited,
            "pages": self.pages(),
            "status": status,
        });
        serde_json::to_string_pretty(&value)
            .map_err(|e| CrawlError::parse("", "Outcome", Some(anyhow::Error::new(e))))
    }
}

#[derive(Debug, Default)]
struct CrawlState {
    visited: HashSet<String>,
    order: Vec<String>,
    results: Vec<Post>,
}

impl CrawlState {
    fn visit(&mut self, url: &Url) {
        if self.visited.insert(url.as_str().to_string()) {
            self.order.push(url.as_str().to_string());
        }
    }

    fn has_visited(&self, url: &Url) -> bool {
        self.visited.contains(url.as_str())
    }
}

enum Step {
    AtPage(Url),
    Extracting { base: Url, page: PageRecord },
    Advancing { base: Url, pager: Pager },
    Done(StopReason),
    Failed(CrawlError),
}

enum Next {
    Page(Url),
    Stop(StopReason),
    Cycle(Url),
}

struct Loaded {
    base: Url,
    page: PageRecord,
}

struct PageFailure {
    error: CrawlError,
    last_response: Option<FetchResult>,
}

struct Prefetch {
    url: Url,
    handle: JoinHandle<Result<FetchResult, CrawlError>>,
}

/// Walks a blog along its pager and collects posts.
#[derive(Clone)]
pub struct Crawler {
    opts: CrawlOptions,
    source: Arc<dyn PageSource>,
    schema: Arc<BlogSchema>,
}

impl fmt::Debug for Crawler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Crawler")
            .field("opts", &self.opts)
            .field("schema", &self.schema.schema().name)
            .finish_non_exhaustive()
    }
}

impl Crawler {
    /// Create a new CrawlerBuilder for configuring the crawler.
    pub fn builder() -> CrawlerBuilder {
        CrawlerBuilder::new()
    }

    pub(crate) fn new(opts: CrawlOptions, source: Arc<dyn PageSource>, schema: BlogSchema) -> Self {
        Self {
            opts,
            source,
            schema: Arc::new(schema),
        }
    }

    pub fn options(&self) -> &CrawlOptions {
        &self.opts
    }

    pub fn schema(&self) -> &BlogSchema {
        &self.schema
    }

    /// Extracts one page without crawling. Pager links are resolved against `url`.
    pub fn extract_html(&self, html: &str, url: &str) -> Result<PageRecord, CrawlError> {
        let base = parse_start(url)?;
        let mut page = self.schema.extract_html(html);
        let absolute = |href: Option<String>| {
            href.map(|h| resolve(&base, &h).map(|u| u.to_string()).unwrap_or(h))
        };
        page.pager.prev = absolute(page.pager.prev.take());
        page.pager.next = absolute(page.pager.next.take());
        Ok(page)
    }

    /// Crawls from `start` until the pager runs out, a limit is hit or a page fails.
    pub async fn crawl(&self, start: &str) -> CrawlOutcome {
        self.crawl_with(start, &mut Discard, &CancellationToken::new())
            .await
    }

    /// Crawls from `start`, streaming posts into `sink` as each page is extracted.
    pub async fn crawl_with<S>(
        &self,
        start: &str,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> CrawlOutcome
    where
        S: PostSink + Send + ?Sized,
    {
        let mut state = CrawlState::default();
        let mut prefetch: Option<Prefetch> = None;

        let mut step = match parse_start(start) {
            Err(err) => Step::Failed(err),
            Ok(_) if self.opts.max_pages == Some(0) => Step::Done(StopReason::MaxPagesExceeded),
            Ok(url) => Step::AtPage(url),
        };
        info!(start, direction = %self.opts.direction, "starting crawl");

        let status = loop {
            step = match step {
                Step::AtPage(url) => {
                    if cancel.is_cancelled() {
                        Step::Failed(CrawlError::cancelled(url.as_str(), "Crawl"))
                    } else {
                        state.visit(&url);
                        info!(url = %url, page = state.order.len(), "fetching page");
                        match self.load_page(&url, &state, &mut prefetch, cancel).await {
                            Ok(Loaded { base, page }) => Step::Extracting { base, page },
                            Err(failure) => self.on_page_failure(&url, failure),
                        }
                    }
                }
                Step::Extracting { base, page } => {
                    debug!(url = %base, posts = page.posts.len(), "extracted page");
                    for post in &page.posts {
                        sink.accept(post);
                    }
                    state.results.extend(page.posts);
                    Step::Advancing {
                        base,
                        pager: page.pager,
                    }
                }
                Step::Advancing { base, pager } => match self.next_target(&base, &pager, &state) {
                    Next::Page(next) => Step::AtPage(next),
                    Next::Stop(reason) => Step::Done(reason),
                    Next::Cycle(next) => {
                        warn!(from = %base, to = %next, "pager links back to a visited page");
                        Step::Failed(CrawlError::cycle(next.as_str(), "Advance"))
                    }
                },
                Step::Done(reason) => {
                    info!(%reason, pages = state.order.len(), posts = state.results.len(), "crawl finished");
                    break CrawlStatus::Done(reason);
                }
                Step::Failed(err) => {
                    warn!(error = %err, pages = state.order.len(), posts = state.results.len(), "crawl failed");
                    break CrawlStatus::Failed(err);
                }
            };
        };

        if let Some(pending) = prefetch.take() {
            pending.handle.abort();
        }

        CrawlOutcome {
            posts: state.results,
            visited: state.order,
            status,
        }
    }

    /// Fetches and processes one page, retrying transient failures.
    async fn load_page(
        &self,
        url: &Url,
        state: &CrawlState,
        prefetch: &mut Option<Prefetch>,
        cancel: &CancellationToken,
    ) -> Result<Loaded, PageFailure> {
        let policy = &self.opts.retry;
        let attempts = policy.attempts();
        let mut last_error = None;
        let mut last_response = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay = policy.backoff(attempt - 1);
                debug!(url = %url, attempt, delay_ms = delay.as_millis() as u64, "backing off");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(PageFailure {
                            error: CrawlError::cancelled(url.as_str(), "Backoff"),
                            last_response,
                        });
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let result = match prefetch.take() {
                Some(pending) if pending.url == *url => {
                    debug!(url = %url, "using prefetched response");
                    self.await_prefetch(pending, cancel).await
                }
                Some(stale) => {
                    stale.handle.abort();
                    self.fetch_once(url, cancel).await
                }
                None => self.fetch_once(url, cancel).await,
            };

            let (error, retry) = match result {
                Ok(resp) if resp.is_success() => match self.process(url, &resp, state) {
                    Ok((loaded, next)) => {
                        *prefetch = next;
                        return Ok(loaded);
                    }
                    Err(err) => {
                        last_response = Some(resp);
                        let retry = err.is_retryable();
                        (err, retry)
                    }
                },
                Ok(resp) => {
                    let err = CrawlError::fetch(
                        url.as_str(),
                        "Fetch",
                        Some(anyhow::anyhow!("HTTP status {}", resp.status)),
                    );
                    let retry = resp.is_transient();
                    last_response = Some(resp);
                    (err, retry)
                }
                Err(err) => {
                    let retry = err.is_retryable();
                    (err, retry)
                }
            };

            if !retry {
                return Err(PageFailure {
                    error,
                    last_response,
                });
            }
            warn!(url = %url, attempt, max_attempts = attempts, error = %error, "page attempt failed");
            last_error = Some(error);
        }

        Err(PageFailure {
            error: last_error.unwrap_or_else(|| CrawlError::fetch(url.as_str(), "Fetch", None)),
            last_response,
        })
    }

    async fn fetch_once(&self, url: &Url, cancel: &CancellationToken) -> Result<FetchResult, CrawlError> {
        let timeout = self.opts.timeout;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CrawlError::cancelled(url.as_str(), "Fetch")),
            res = tokio::time::timeout(timeout, self.source.fetch(url.as_str())) => match res {
                Ok(fetched) => fetched,
                Err(_) => Err(CrawlError::timeout(
                    url.as_str(),
                    "Fetch",
                    Some(anyhow::anyhow!("no response within {:?}", timeout)),
                )),
            },
        }
    }

    async fn await_prefetch(
        &self,
        pending: Prefetch,
        cancel: &CancellationToken,
    ) -> Result<FetchResult, CrawlError> {
        let Prefetch { url, mut handle } = pending;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                handle.abort();
                Err(CrawlError::cancelled(url.as_str(), "Fetch"))
            }
            joined = &mut handle => match joined {
                Ok(fetched) => fetched,
                Err(e) => Err(CrawlError::fetch(url.as_str(), "Prefetch", Some(anyhow::Error::new(e)))),
            },
        }
    }

    fn spawn_prefetch(&self, url: Url) -> Prefetch {
        debug!(url = %url, "prefetching next page");
        let source = Arc::clone(&self.source);
        let timeout = self.opts.timeout;
        let target = url.to_string();
        let handle = tokio::spawn(async move {
            match tokio::time::timeout(timeout, source.fetch(&target)).await {
                Ok(fetched) => fetched,
                Err(_) => Err(CrawlError::timeout(
                    target.as_str(),
                    "Fetch",
                    Some(anyhow::anyhow!("no response within {:?}", timeout)),
                )),
            }
        });
        Prefetch { url, handle }
    }

    /// Parses a successful response, reads the pager, starts the prefetch and extracts posts.
    fn process(
        &self,
        url: &Url,
        resp: &FetchResult,
        state: &CrawlState,
    ) -> Result<(Loaded, Option<Prefetch>), CrawlError> {
        let document = Document::from_fetch(resp)?;
        if resp.was_redirected() {
            debug!(from = %resp.url, to = %resp.final_url, "page redirected");
        }
        let base = Url::parse(&resp.final_url).unwrap_or_else(|_| url.clone());

        let pager = self.schema.extract_pager(&document);
        let prefetch = if self.opts.prefetch {
            match self.next_target(&base, &pager, state) {
                Next::Page(next) => Some(self.spawn_prefetch(next)),
                Next::Stop(_) | Next::Cycle(_) => None,
            }
        } else {
            None
        };

        let posts = self.schema.extract_posts(&document);
        Ok((
            Loaded {
                base,
                page: PageRecord { posts, pager },
            },
            prefetch,
        ))
    }

    fn on_page_failure(&self, url: &Url, failure: PageFailure) -> Step {
        let PageFailure {
            error,
            last_response,
        } = failure;
        if error.is_cancelled() || self.opts.failure_policy == FailurePolicy::Abort {
            return Step::Failed(error);
        }

        let recovered = last_response.as_ref().and_then(|resp| {
            let document = Document::from_fetch(resp).ok()?;
            let pager = self.schema.extract_pager(&document);
            pager.link(self.opts.direction)?;
            let base = Url::parse(&resp.final_url).unwrap_or_else(|_| url.clone());
            Some((base, pager))
        });

        match recovered {
            Some((base, pager)) => {
                warn!(url = %url, error = %error, "skipping failed page");
                Step::Advancing { base, pager }
            }
            None => Step::Failed(error),
        }
    }

    fn next_target(&self, base: &Url, pager: &Pager, state: &CrawlState) -> Next {
        let Some(href) = pager.link(self.opts.direction) else {
            return Next::Stop(StopReason::PagerExhausted);
        };
        let next = match resolve(base, href) {
            Some(next) if is_http(&next) => normalize_url(&next),
            _ => {
                debug!(href, "ignoring unusable pager link");
                return Next::Stop(StopReason::PagerExhausted);
            }
        };
        if state.has_visited(&next) {
            return Next::Cycle(next);
        }
        match self.opts.max_pages {
            Some(max) if state.order.len() >= max => Next::Stop(StopReason::MaxPagesExceeded),
            _ => Next::Page(next),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::retry::RetryPolicy;
    use crate::options::Direction;
    use async_trait::async_trait;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;

    const ROOT: &str = "https://b.test/";

    #[derive(Clone)]
    enum Scripted {
        Page {
            status: u16,
            content_type: &'static str,
            body: String,
        },
        Fail,
        Hang,
    }

    fn ok(body: String) -> Scripted {
        Scripted::Page {
            status: 200,
            content_type: "text/html; charset=utf-8",
            body,
        }
    }

    /// Serves scripted responses per URL; the last response for a URL repeats.
    #[derive(Default)]
    struct MemorySource {
        pages: Mutex<HashMap<String, VecDeque<Scripted>>>,
        calls: Mutex<Vec<String>>,
    }

    impl MemorySource {
        fn with(mut self, url: &str, responses: Vec<Scripted>) -> Self {
            self.pages
                .get_mut()
                .unwrap()
                .insert(url.to_string(), responses.into());
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn calls_to(&self, url: &str) -> usize {
            self.calls().iter().filter(|c| *c == url).count()
        }
    }

    #[async_trait]
    impl PageSource for MemorySource {
        async fn fetch(&self, url: &str) -> Result<FetchResult, CrawlError> {
            self.calls.lock().unwrap().push(url.to_string());
            let scripted = {
                let mut pages = self.pages.lock().unwrap();
                match pages.get_mut(url) {
                    Some(queue) if queue.len() > 1 => queue.pop_front(),
                    Some(queue) => queue.front().cloned(),
                    None => None,
                }
            };
            match scripted {
                Some(Scripted::Page {
                    status,
                    content_type,
                    body,
                }) => Ok(FetchResult {
                    status,
                    url: url.to_string(),
                    final_url: url.to_string(),
                    content_type: Some(content_type.to_string()),
                    body: Bytes::from(body),
                }),
                Some(Scripted::Fail) => Err(CrawlError::fetch(
                    url,
                    "Fetch",
                    Some(anyhow::anyhow!("connection reset")),
                )),
                Some(Scripted::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(CrawlError::fetch(url, "Fetch", None))
                }
                None => Ok(FetchResult {
                    status: 404,
                    url: url.to_string(),
                    final_url: url.to_string(),
                    content_type: Some("text/html".into()),
                    body: Bytes::from_static(b"<html><body>not found</body></html>"),
                }),
            }
        }
    }

    fn page(ids: &[&str], newer: Option<&str>, older: Option<&str>) -> String {
        let mut html = String::from("<html><body><div class=\"blog-posts\">");
        for id in ids {
            html.push_str(&format!(
                r#"<div class="post hentry">
                     <meta itemprop="blogId" content="7"><meta itemprop="postId" content="{id}">
                     <h3 itemprop="name"><a href="https://b.test/p/{id}.html">Post {id}</a></h3>
                     <div itemprop="description articleBody">Body {id} <a href="https://x.test/{id}">x</a></div>
                     <span class="post-labels"><a rel="tag" href="https://b.test/search/label/t{id}">t{id}</a></span>
                   </div>"#
            ));
        }
        html.push_str("</div><div id=\"blog-pager\">");
        if let Some(href) = newer {
            html.push_str(&format!(
                r#"<span id="blog-pager-newer-link"><a href="{href}">Newer</a></span>"#
            ));
        }
        if let Some(href) = older {
            html.push_str(&format!(
                r#"<span id="blog-pager-older-link"><a href="{href}">Older</a></span>"#
            ));
        }
        html.push_str("</div></body></html>");
        html
    }

    fn three_pages() -> MemorySource {
        MemorySource::default()
            .with(ROOT, vec![ok(page(&["1", "2"], Some("/page/2"), None))])
            .with(
                "https://b.test/page/2",
                vec![ok(page(&["3", "4"], Some("/page/3"), Some("/")))],
            )
            .with(
                "https://b.test/page/3",
                vec![ok(page(&["5", "6"], None, Some("/page/2")))],
            )
    }

    /// Two attempts per page with a negligible backoff.
    fn quick() -> CrawlerBuilder {
        Crawler::builder().retry(RetryPolicy::fixed(2, Duration::from_millis(1)))
    }

    fn crawler(source: &Arc<MemorySource>, builder: CrawlerBuilder) -> Crawler {
        builder.shared_source(source.clone()).build().unwrap()
    }

    fn post_ids(posts: &[Post]) -> Vec<&str> {
        posts
            .iter()
            .map(|p| p.post_id.as_deref().unwrap_or("?"))
            .collect()
    }

    #[tokio::test]
    async fn crawls_three_pages_in_order() {
        let source = Arc::new(three_pages());
        let crawler = crawler(&source, quick());
        let mut sink: Vec<Post> = Vec::new();
        let outcome = crawler
            .crawl_with(ROOT, &mut sink, &CancellationToken::new())
            .await;

        assert_eq!(outcome.stop_reason(), Some(StopReason::PagerExhausted));
        assert_eq!(post_ids(&outcome.posts), vec!["1", "2", "3", "4", "5", "6"]);
        assert_eq!(sink, outcome.posts);
        assert_eq!(
            outcome.visited,
            vec![ROOT, "https://b.test/page/2", "https://b.test/page/3"]
        );
        assert_eq!(outcome.pages(), 3);
        assert_eq!(outcome.posts[2].labels.tags[0].name.as_deref(), Some("t3"));
        assert_eq!(source.calls().len(), 3);
    }

    #[tokio::test]
    async fn failing_page_keeps_earlier_results() {
        let source = Arc::new(three_pages().with("https://b.test/page/2", vec![Scripted::Fail]));
        let outcome = crawler(&source, quick()).crawl(ROOT).await;

        let err = outcome.error().expect("crawl should fail");
        assert!(err.is_fetch());
        assert_eq!(err.url, "https://b.test/page/2");
        assert_eq!(post_ids(&outcome.posts), vec!["1", "2"]);
        assert_eq!(source.calls_to("https://b.test/page/2"), 2);
        assert_eq!(source.calls_to("https://b.test/page/3"), 0);
    }

    #[tokio::test]
    async fn cycle_is_detected_without_refetching() {
        let source = Arc::new(three_pages().with(
            "https://b.test/page/3",
            vec![ok(page(&["5", "6"], Some("/page/2#again"), None))],
        ));
        let outcome = crawler(&source, quick()).crawl(ROOT).await;

        let err = outcome.error().expect("cycle should fail the crawl");
        assert!(err.is_cycle());
        assert_eq!(err.url, "https://b.test/page/2");
        assert_eq!(post_ids(&outcome.posts), vec!["1", "2", "3", "4", "5", "6"]);
        assert_eq!(source.calls_to("https://b.test/page/2"), 1);
    }

    #[tokio::test]
    async fn self_link_through_tracking_params_is_a_cycle() {
        let source = Arc::new(MemorySource::default().with(
            ROOT,
            vec![ok(page(&["1"], Some("https://B.TEST/?utm_source=feed#top"), None))],
        ));
        let outcome = crawler(&source, quick()).crawl(ROOT).await;
        assert!(outcome.error().unwrap().is_cycle());
        assert_eq!(outcome.posts.len(), 1);
        assert_eq!(source.calls().len(), 1);
    }

    #[tokio::test]
    async fn max_pages_stops_cleanly() {
        let source = Arc::new(three_pages());
        let outcome = crawler(&source, quick().max_pages(2))
            .crawl(ROOT)
            .await;
        assert_eq!(outcome.stop_reason(), Some(StopReason::MaxPagesExceeded));
        assert_eq!(post_ids(&outcome.posts), vec!["1", "2", "3", "4"]);
        assert_eq!(source.calls_to("https://b.test/page/3"), 0);

        let outcome = crawler(&source, quick().max_pages(0))
            .crawl(ROOT)
            .await;
        assert_eq!(outcome.stop_reason(), Some(StopReason::MaxPagesExceeded));
        assert_eq!(outcome.pages(), 0);
    }

    #[tokio::test]
    async fn reverse_follows_prev_links() {
        let source = Arc::new(three_pages());
        let outcome = crawler(&source, quick().direction(Direction::Reverse))
            .crawl("https://b.test/page/3")
            .await;
        assert!(outcome.is_done());
        assert_eq!(post_ids(&outcome.posts), vec!["5", "6", "3", "4", "1", "2"]);
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let source = Arc::new(three_pages().with(
            "https://b.test/page/2",
            vec![
                Scripted::Fail,
                ok(page(&["3", "4"], Some("/page/3"), None)),
            ],
        ));
        let outcome = crawler(&source, quick()).crawl(ROOT).await;
        assert!(outcome.is_done());
        assert_eq!(outcome.posts.len(), 6);
        assert_eq!(source.calls_to("https://b.test/page/2"), 2);
    }

    #[tokio::test]
    async fn skip_and_continue_follows_error_page_pager() {
        let error_page = Scripted::Page {
            status: 500,
            content_type: "text/html",
            body: page(&[], Some("/page/3"), None),
        };
        let source = Arc::new(three_pages().with("https://b.test/page/2", vec![error_page]));

        let skipping = crawler(
            &source,
            quick().failure_policy(FailurePolicy::SkipAndContinue),
        );
        let outcome = skipping.crawl(ROOT).await;
        assert!(outcome.is_done());
        assert_eq!(post_ids(&outcome.posts), vec!["1", "2", "5", "6"]);
        assert_eq!(outcome.pages(), 3);

        let aborting = crawler(&source, quick());
        let outcome = aborting.crawl(ROOT).await;
        assert!(outcome.error().unwrap().is_fetch());
        assert_eq!(outcome.posts.len(), 2);
    }

    #[tokio::test]
    async fn skip_without_recoverable_pager_fails() {
        let source = Arc::new(three_pages().with("https://b.test/page/2", vec![Scripted::Fail]));
        let outcome = crawler(
            &source,
            quick().failure_policy(FailurePolicy::SkipAndContinue),
        )
        .crawl(ROOT)
        .await;
        assert!(outcome.error().unwrap().is_fetch());
        assert_eq!(outcome.posts.len(), 2);
    }

    #[tokio::test]
    async fn pre_cancelled_crawl_fetches_nothing() {
        let source = Arc::new(three_pages());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = crawler(&source, quick())
            .crawl_with(ROOT, &mut Discard, &cancel)
            .await;
        assert!(outcome.error().unwrap().is_cancelled());
        assert!(source.calls().is_empty());
        assert!(outcome.posts.is_empty());
    }

    struct CancelAfterFirst {
        token: CancellationToken,
        seen: Vec<Post>,
    }

    impl PostSink for CancelAfterFirst {
        fn accept(&mut self, post: &Post) {
            self.seen.push(post.clone());
            self.token.cancel();
        }
    }

    #[tokio::test]
    async fn cancellation_mid_crawl_keeps_results() {
        let source = Arc::new(three_pages());
        let token = CancellationToken::new();
        let mut sink = CancelAfterFirst {
            token: token.clone(),
            seen: Vec::new(),
        };
        let outcome = crawler(&source, quick())
            .crawl_with(ROOT, &mut sink, &token)
            .await;
        assert!(outcome.error().unwrap().is_cancelled());
        assert_eq!(post_ids(&outcome.posts), vec!["1", "2"]);
        assert_eq!(sink.seen.len(), 2);
        assert_eq!(source.calls().len(), 1);
    }

    #[tokio::test]
    async fn prefetch_fetches_each_page_once() {
        let source = Arc::new(three_pages());
        let outcome = crawler(&source, quick().prefetch(true))
            .crawl(ROOT)
            .await;
        assert!(outcome.is_done());
        assert_eq!(outcome.posts.len(), 6);
        for url in [ROOT, "https://b.test/page/2", "https://b.test/page/3"] {
            assert_eq!(source.calls_to(url), 1, "{url}");
        }

        let capped = Arc::new(three_pages());
        let outcome = crawler(&capped, quick().prefetch(true).max_pages(2))
            .crawl(ROOT)
            .await;
        assert_eq!(outcome.stop_reason(), Some(StopReason::MaxPagesExceeded));
        assert_eq!(capped.calls_to("https://b.test/page/3"), 0);
    }

    #[tokio::test]
    async fn failed_prefetch_counts_as_first_attempt() {
        let source = Arc::new(three_pages().with(
            "https://b.test/page/2",
            vec![
                Scripted::Fail,
                ok(page(&["3", "4"], Some("/page/3"), Some("/"))),
            ],
        ));
        let outcome = crawler(&source, quick().prefetch(true)).crawl(ROOT).await;
        assert!(outcome.is_done());
        assert_eq!(post_ids(&outcome.posts), vec!["1", "2", "3", "4", "5", "6"]);
        assert_eq!(source.calls_to("https://b.test/page/2"), 2);
        assert_eq!(source.calls_to("https://b.test/page/3"), 1);
    }

    #[tokio::test]
    async fn hanging_prefetch_times_out_and_is_retried() {
        let source = Arc::new(three_pages().with(
            "https://b.test/page/2",
            vec![
                Scripted::Hang,
                ok(page(&["3", "4"], Some("/page/3"), Some("/"))),
            ],
        ));
        let outcome = crawler(
            &source,
            quick().prefetch(true).timeout(Duration::from_millis(50)),
        )
        .crawl(ROOT)
        .await;
        assert!(outcome.is_done());
        assert_eq!(outcome.posts.len(), 6);
        assert_eq!(source.calls_to("https://b.test/page/2"), 2);

        let exhausted = Arc::new(three_pages().with("https://b.test/page/2", vec![Scripted::Hang]));
        let outcome = crawler(
            &exhausted,
            quick().prefetch(true).timeout(Duration::from_millis(30)),
        )
        .crawl(ROOT)
        .await;
        assert!(outcome.error().unwrap().is_timeout());
        assert_eq!(outcome.posts.len(), 2);
    }

    #[tokio::test]
    async fn client_error_status_is_not_retried() {
        let gone = Scripted::Page {
            status: 404,
            content_type: "text/html",
            body: page(&[], Some("/page/3"), None),
        };
        let source = Arc::new(three_pages().with("https://b.test/page/2", vec![gone]));
        let outcome = crawler(&source, quick()).crawl(ROOT).await;
        assert!(outcome.error().unwrap().is_fetch());
        assert_eq!(source.calls_to("https://b.test/page/2"), 1);

        // The error page's pager still lets a skipping crawl continue.
        let outcome = crawler(
            &source,
            quick().failure_policy(FailurePolicy::SkipAndContinue),
        )
        .crawl(ROOT)
        .await;
        assert!(outcome.is_done());
        assert_eq!(post_ids(&outcome.posts), vec!["1", "2", "5", "6"]);
    }

    #[tokio::test]
    async fn invalid_start_url_fails_without_fetching() {
        let source = Arc::new(three_pages());
        let outcome = crawler(&source, quick()).crawl("ftp://b.test/").await;
        assert!(outcome.error().unwrap().is_invalid_url());
        assert!(source.calls().is_empty());
    }

    #[tokio::test]
    async fn non_markup_response_is_a_parse_failure() {
        let source = Arc::new(MemorySource::default().with(
            ROOT,
            vec![Scripted::Page {
                status: 200,
                content_type: "image/png",
                body: "PNG".into(),
            }],
        ));
        let outcome = crawler(&source, quick()).crawl(ROOT).await;
        assert!(outcome.error().unwrap().is_parse());
        assert_eq!(source.calls().len(), 2);
    }

    #[tokio::test]
    async fn hanging_fetch_times_out() {
        let source = Arc::new(MemorySource::default().with(ROOT, vec![Scripted::Hang]));
        let outcome = crawler(
            &source,
            quick()
                .timeout(Duration::from_millis(30))
                .retry(RetryPolicy::none()),
        )
        .crawl(ROOT)
        .await;
        assert!(outcome.error().unwrap().is_timeout());
    }

    #[tokio::test]
    async fn non_http_pager_link_ends_crawl() {
        let source = Arc::new(MemorySource::default().with(
            ROOT,
            vec![ok(page(&["1"], Some("javascript:void(0)"), None))],
        ));
        let outcome = crawler(&source, quick()).crawl(ROOT).await;
        assert_eq!(outcome.stop_reason(), Some(StopReason::PagerExhausted));
        assert_eq!(outcome.posts.len(), 1);
    }

    #[tokio::test]
    async fn channel_sink_streams_posts() {
        let source = Arc::new(three_pages());
        let (mut tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Post>();
        let outcome = crawler(&source, quick())
            .crawl_with(ROOT, &mut tx, &CancellationToken::new())
            .await;
        drop(tx);
        let mut streamed = Vec::new();
        while let Some(post) = rx.recv().await {
            streamed.push(post);
        }
        assert_eq!(streamed, outcome.posts);
    }

    #[test]
    fn extract_html_resolves_pager_links() {
        let source = Arc::new(MemorySource::default());
        let crawler = crawler(&source, quick());
        let page = crawler
            .extract_html(&page(&["9"], Some("/page/2"), Some("?older=1")), "https://b.test/page/1")
            .unwrap();
        assert_eq!(page.posts.len(), 1);
        assert_eq!(page.pager.next.as_deref(), Some("https://b.test/page/2"));
        assert_eq!(page.pager.prev.as_deref(), Some("https://b.test/page/1?older=1"));
        assert!(crawler.extract_html("<p/>", "mailto:x@b.test").is_err());
    }

    #[tokio::test]
    async fn outcome_serializes_to_json() {
        let source = Arc::new(three_pages().with("https://b.test/page/2", vec![Scripted::Fail]));
        let outcome = crawler(&source, quick()).crawl(ROOT).await;
        let value: serde_json::Value = serde_json::from_str(&outcome.to_json().unwrap()).unwrap();
        assert_eq!(value["pages"], 2);
        assert_eq!(value["status"]["state"], "failed");
        assert_eq!(value["status"]["code"], "fetch error");
        assert_eq!(value["posts"][0]["postId"], "1");
        assert_eq!(value["posts"][0]["body"]["links"][0]["href"], "https://x.test/1");
    }
}
