// ABOUTME: Main library entry point for blogwalk, a declarative extractor and pagination crawler for template blogs.
// ABOUTME: Re-exports the public API: selectors, schemas, records, the blog schema, Crawler and its options.

//! blogwalk - Extract structured posts from template-driven blogs and walk their pagers.
//!
//! Extraction is declared as a tree of selector-bound nodes ([`Field`],
//! [`Group`], [`Composite`]) and evaluated against a parsed [`Document`]. The
//! [`Crawler`] repeats fetch, extract and advance along the page's pager links
//! until the trail ends, never visiting a page twice.
//!
//! # Example
//!
//! ```no_run
//! use blogwalk::{Crawler, CrawlError, Direction};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), CrawlError> {
//!     let crawler = Crawler::builder()
//!         .direction(Direction::Reverse)
//!         .max_pages(10)
//!         .build()?;
//!     let outcome = crawler.crawl("https://example.blogspot.com/").await;
//!     for post in &outcome.posts {
//!         println!("{:?} {:?}", post.post_id, post.title);
//!     }
//!     if let Some(err) = outcome.error() {
//!         eprintln!("stopped early: {err}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod blog;
pub mod crawl;
pub mod document;
pub mod error;
pub mod options;
pub mod resource;
pub mod schema;
pub mod selector;

pub use crate::blog::{BlogSchema, Embed, Labels, Link, PageRecord, Pager, Post, PostBody, Tag};
pub use crate::crawl::retry::RetryPolicy;
pub use crate::crawl::sink::{Discard, PostSink};
pub use crate::crawl::{CrawlOutcome, CrawlStatus, Crawler, StopReason};
pub use crate::document::Document;
pub use crate::error::{CrawlError, ErrorCode, SelectorError};
pub use crate::options::{CrawlOptions, CrawlerBuilder, Direction, FailurePolicy};
pub use crate::resource::{FetchOptions, FetchResult, HttpSource, PageSource};
pub use crate::schema::loader::load_builtin_schema;
pub use crate::schema::{Composite, CompositeBuilder, Evaluable, Extract, Field, Group, Record, Schema};
pub use crate::selector::{Selector, SelectorKind};
pub use tokio_util::sync::CancellationToken;
