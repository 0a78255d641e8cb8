// ABOUTME: Blog template schema (posts and pager) and the typed Post and Pager records it produces.
// ABOUTME: The built-in schema is embedded JSON; BlogSchema::new re-anchors a copy on custom post and pager selectors.

//! Blog page schema.
//!
//! A page evaluates to `{posts: [Post], pager: {prev, next}}`. Each post reads
//! `itemprop` tokens from the template markup:
//!
//! | key | source |
//! |---|---|
//! | `blogId`, `postId` | `content` of the `blogId` / `postId` item |
//! | `title` | text of the `name` item |
//! | `url` | `href` of the anchor inside the `name` item |
//! | `body` | markup, anchors and embeds of the `description` item |
//! | `labels` | `a[@rel='tag']` inside `.post-labels` |
//!
//! The pager's `prev` is the older-posts link and `next` the newer-posts link.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::options::Direction;
use crate::schema::loader::load_builtin_schema;
use crate::schema::{Record, Schema};
use crate::selector::Selector;

static BLOGGER: Lazy<BlogSchema> = Lazy::new(|| BlogSchema {
    schema: load_builtin_schema(),
});

/// Page schema with a `posts` group and a `pager` composite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlogSchema {
    schema: Schema,
}

impl BlogSchema {
    /// The built-in blog template schema.
    ///
    /// # Panics
    ///
    /// Panics on first use if the embedded schema JSON is invalid.
    pub fn blogger() -> &'static BlogSchema {
        &BLOGGER
    }

    /// The built-in record shape with custom anchors for posts and the pager.
    ///
    /// The built-in schema is `new(by_class("post"), by_id("blog-pager"))`.
    pub fn new(post: Selector, pager: Selector) -> Self {
        let mut schema = BLOGGER.schema.clone();
        if let Some(posts) = schema.root.child_mut("posts") {
            posts.set_selector(post);
        }
        if let Some(node) = schema.root.child_mut("pager") {
            node.set_selector(pager);
        }
        Self { schema }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Evaluates the whole page.
    pub fn extract(&self, document: &Document) -> PageRecord {
        let record = self.schema.evaluate(document);
        PageRecord::from_record(&record)
    }

    pub fn extract_posts(&self, document: &Document) -> Vec<Post> {
        self.schema
            .evaluate_child("posts", document)
            .map(|r| r.as_list().iter().map(Post::from_record).collect())
            .unwrap_or_default()
    }

    pub fn extract_pager(&self, document: &Document) -> Pager {
        self.schema
            .evaluate_child("pager", document)
            .map(|r| Pager::from_record(&r))
            .unwrap_or_default()
    }

    /// Parses and evaluates a page given as markup.
    pub fn extract_html(&self, html: &str) -> PageRecord {
        self.extract(&Document::from_html(html))
    }
}

impl From<Schema> for BlogSchema {
    fn from(schema: Schema) -> Self {
        Self { schema }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub href: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    pub src: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: Option<String>,
    pub href: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostBody {
    /// Raw inner markup of the post body.
    #[serde(rename = "self")]
    pub markup: Option<String>,
    pub links: Vec<Link>,
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Labels {
    pub tags: Vec<Tag>,
}

/// One extracted post.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub blog_id: Option<String>,
    pub post_id: Option<String>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub body: PostBody,
    pub labels: Labels,
}

impl Post {
    /// Reads a post out of a record tree; missing keys become `None` or empty lists.
    pub fn from_record(record: &Record) -> Self {
        let body = record.get("body");
        Post {
            blog_id: record.get("blogId").to_owned_string(),
            post_id: record.get("postId").to_owned_string(),
            title: record.get("title").to_owned_string(),
            url: record.get("url").to_owned_string(),
            body: PostBody {
                markup: body.get("self").to_owned_string(),
                links: body
                    .get("links")
                    .as_list()
                    .iter()
                    .map(|l| Link {
                        href: l.get("href").to_owned_string(),
                    })
                    .collect(),
                embeds: body
                    .get("embeds")
                    .as_list()
                    .iter()
                    .map(|e| Embed {
                        src: e.get("src").to_owned_string(),
                    })
                    .collect(),
            },
            labels: Labels {
                tags: record
                    .path("labels.tags")
                    .as_list()
                    .iter()
                    .map(|t| Tag {
                        name: t.get("name").to_owned_string(),
                        href: t.get("href").to_owned_string(),
                    })
                    .collect(),
            },
        }
    }
}

/// Pagination links of a page, unresolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pager {
    pub prev: Option<String>,
    pub next: Option<String>,
}

impl Pager {
    pub fn from_record(record: &Record) -> Self {
        Pager {
            prev: record.get("prev").to_owned_string(),
            next: record.get("next").to_owned_string(),
        }
    }

    /// The link a crawl in `direction` follows.
    pub fn link(&self, direction: Direction) -> Option<&str> {
        match direction {
            Direction::Forward => self.next.as_deref(),
            Direction::Reverse => self.prev.as_deref(),
        }
    }
}

/// Posts and pager of one page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    pub posts: Vec<Post>,
    pub pager: Pager,
}

impl PageRecord {
    pub fn from_record(record: &Record) -> Self {
        PageRecord {
            posts: record
                .get("posts")
                .as_list()
                .iter()
                .map(Post::from_record)
                .collect(),
            pager: Pager::from_record(record.get("pager")),
        }
    }
}
