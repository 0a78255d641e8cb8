// ABOUTME: Declarative extraction model: Field, Group and Composite nodes bound to selectors.
// ABOUTME: Evaluates a schema tree against a document context into a shape-preserving Record tree.

//! Declarative schemas.
//!
//! A schema is a finite tree of [`Evaluable`] nodes. Each node owns a
//! [`Selector`] that is resolved relative to the context its parent hands it:
//!
//! - [`Field`] extracts one optional scalar from the first match.
//! - [`Group`] evaluates its inner node once per match, in document order.
//! - [`Composite`] evaluates its named children against its first match.
//!
//! Evaluation is a pure function of `(schema, document)`. A node that matches
//! nothing still produces a record of the declared shape, so an absent block
//! never removes keys from the output.

pub mod loader;
pub mod record;

use scraper::ElementRef;
use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::selector::{normalize_whitespace, Selector};

pub use record::Record;

/// What a [`Field`] reads from the node it matched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Extract {
    /// Whitespace-normalized text content.
    #[default]
    Text,
    /// Trimmed value of the named attribute.
    Attr(String),
    /// Raw inner markup.
    Markup,
}

/// A leaf node producing an optional scalar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub selector: Selector,
    #[serde(default)]
    pub extract: Extract,
}

impl Field {
    pub fn new(selector: Selector, extract: Extract) -> Self {
        Self { selector, extract }
    }

    pub fn text(selector: Selector) -> Self {
        Self::new(selector, Extract::Text)
    }

    pub fn attr(selector: Selector, name: impl Into<String>) -> Self {
        Self::new(selector, Extract::Attr(name.into()))
    }

    pub fn markup(selector: Selector) -> Self {
        Self::new(selector, Extract::Markup)
    }

    pub fn evaluate(&self, ctx: ElementRef<'_>) -> Record {
        let Some(node) = self.selector.first(ctx) else {
            return Record::Absent;
        };
        let value = match &self.extract {
            Extract::Text => normalize_whitespace(&node.text().collect::<String>()),
            Extract::Attr(name) => node
                .value()
                .attr(name)
                .map(|v| v.trim().to_string())
                .unwrap_or_default(),
            Extract::Markup => {
                let html = node.inner_html();
                if html.trim().is_empty() {
                    String::new()
                } else {
                    html
                }
            }
        };
        if value.is_empty() {
            Record::Absent
        } else {
            Record::Scalar(value)
        }
    }
}

/// A repeated node: one inner record per match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub selector: Selector,
    pub inner: Box<Evaluable>,
}

impl Group {
    pub fn new(selector: Selector, inner: impl Into<Evaluable>) -> Self {
        Self {
            selector,
            inner: Box::new(inner.into()),
        }
    }

    pub fn evaluate(&self, ctx: ElementRef<'_>) -> Record {
        Record::List(
            self.selector
                .select(ctx)
                .into_iter()
                .map(|el| self.inner.evaluate(el))
                .collect(),
        )
    }
}

/// A named child of a [`Composite`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Child {
    pub name: String,
    pub node: Evaluable,
}

/// A record-shaped node with named children in registration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "CompositeDef")]
pub struct Composite {
    pub selector: Selector,
    children: Vec<Child>,
}

#[derive(Deserialize)]
struct CompositeDef {
    selector: Selector,
    #[serde(default)]
    children: Vec<Child>,
}

impl From<CompositeDef> for Composite {
    fn from(def: CompositeDef) -> Self {
        def.children
            .into_iter()
            .fold(Composite::builder(def.selector), |b, c| b.child(c.name, c.node))
            .build()
    }
}

/// Builder for [`Composite`] nodes.
#[derive(Debug, Clone)]
pub struct CompositeBuilder {
    selector: Selector,
    children: Vec<Child>,
}

impl CompositeBuilder {
    /// Registers a named child. Re-registering a name replaces the earlier
    /// node but keeps its original position.
    pub fn child(mut self, name: impl Into<String>, node: impl Into<Evaluable>) -> Self {
        let name = name.into();
        let node = node.into();
        match self.children.iter_mut().find(|c| c.name == name) {
            Some(existing) => existing.node = node,
            None => self.children.push(Child { name, node }),
        }
        self
    }

    pub fn build(self) -> Composite {
        Composite {
            selector: self.selector,
            children: self.children,
        }
    }
}

impl Composite {
    pub fn builder(selector: Selector) -> CompositeBuilder {
        CompositeBuilder {
            selector,
            children: Vec::new(),
        }
    }

    pub fn children(&self) -> &[Child] {
        &self.children
    }

    /// The child registered under `name`.
    pub fn child(&self, name: &str) -> Option<&Evaluable> {
        self.children
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.node)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Evaluable> {
        self.children
            .iter_mut()
            .find(|c| c.name == name)
            .map(|c| &mut c.node)
    }

    pub fn evaluate(&self, ctx: ElementRef<'_>) -> Record {
        match self.selector.first(ctx) {
            Some(scope) => Record::Object(
                self.children
                    .iter()
                    .map(|c| (c.name.clone(), c.node.evaluate(scope)))
                    .collect(),
            ),
            None => self.empty_record(),
        }
    }

    /// Evaluates a single named child against this composite's first match.
    ///
    /// Returns `None` when no child has that name.
    pub fn evaluate_child(&self, name: &str, ctx: ElementRef<'_>) -> Option<Record> {
        let node = self.child(name)?;
        Some(match self.selector.first(ctx) {
            Some(scope) => node.evaluate(scope),
            None => node.empty_record(),
        })
    }

    pub fn empty_record(&self) -> Record {
        Record::Object(
            self.children
                .iter()
                .map(|c| (c.name.clone(), c.node.empty_record()))
                .collect(),
        )
    }
}

/// Closed set of schema node kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Evaluable {
    Field(Field),
    Group(Group),
    Composite(Composite),
}

impl Evaluable {
    pub fn selector(&self) -> &Selector {
        match self {
            Evaluable::Field(f) => &f.selector,
            Evaluable::Group(g) => &g.selector,
            Evaluable::Composite(c) => &c.selector,
        }
    }

    /// Re-anchors this node; children and extraction are kept.
    pub fn set_selector(&mut self, selector: Selector) {
        match self {
            Evaluable::Field(f) => f.selector = selector,
            Evaluable::Group(g) => g.selector = selector,
            Evaluable::Composite(c) => c.selector = selector,
        }
    }

    pub fn evaluate(&self, ctx: ElementRef<'_>) -> Record {
        match self {
            Evaluable::Field(f) => f.evaluate(ctx),
            Evaluable::Group(g) => g.evaluate(ctx),
            Evaluable::Composite(c) => c.evaluate(ctx),
        }
    }

    /// The record this node yields when its context is missing.
    pub fn empty_record(&self) -> Record {
        match self {
            Evaluable::Field(_) => Record::Absent,
            Evaluable::Group(_) => Record::List(Vec::new()),
            Evaluable::Composite(c) => c.empty_record(),
        }
    }

    fn collect_paths(&self, prefix: &str, out: &mut Vec<String>) {
        match self {
            Evaluable::Field(_) => out.push(prefix.to_string()),
            Evaluable::Group(g) => g.inner.collect_paths(&format!("{}[]", prefix), out),
            Evaluable::Composite(c) => {
                for child in &c.children {
                    let path = if prefix.is_empty() {
                        child.name.clone()
                    } else {
                        format!("{}.{}", prefix, child.name)
                    };
                    child.node.collect_paths(&path, out);
                }
            }
        }
    }
}

impl From<Field> for Evaluable {
    fn from(f: Field) -> Self {
        Evaluable::Field(f)
    }
}

impl From<Group> for Evaluable {
    fn from(g: Group) -> Self {
        Evaluable::Group(g)
    }
}

impl From<Composite> for Evaluable {
    fn from(c: Composite) -> Self {
        Evaluable::Composite(c)
    }
}

/// A named schema rooted at a page-level composite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    pub root: Composite,
}

impl Schema {
    pub fn new(name: impl Into<String>, root: Composite) -> Self {
        Self {
            name: name.into(),
            root,
        }
    }

    pub fn evaluate(&self, document: &Document) -> Record {
        self.root.evaluate(document.root())
    }

    /// Evaluates one top-level child, e.g. only the pager of a page.
    pub fn evaluate_child(&self, name: &str, document: &Document) -> Option<Record> {
        self.root.evaluate_child(name, document.root())
    }

    /// Dotted leaf paths of the declared shape; `[]` marks a list.
    pub fn field_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        Evaluable::Composite(self.root.clone()).collect_paths("", &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PAGE: &str = r#"
        <html><body>
          <div class="entry" id="e1">
            <h2>  First
               entry </h2>
            <a class="link" href=" /one ">one</a>
            <a class="link" href="/two">two</a>
          </div>
          <div class="entry" id="e2">
            <h2>Second</h2>
          </div>
          <div id="footer"><b>bold</b> text</div>
        </body></html>
    "#;

    fn path(expr: &str) -> Selector {
        Selector::path(expr).unwrap()
    }

    fn entry_schema() -> Schema {
        let link = Composite::builder(Selector::context())
            .child("href", Field::attr(Selector::context(), "href"))
            .build();
        let entry = Composite::builder(Selector::context())
            .child("id", Field::attr(Selector::context(), "id"))
            .child("title", Field::text(path("./h2")))
            .child("links", Group::new(Selector::by_class("link").unwrap(), link))
            .build();
        let footer = Composite::builder(Selector::by_id("footer").unwrap())
            .child("markup", Field::markup(Selector::context()))
            .child("bold", Field::text(path("./b")))
            .build();
        let root = Composite::builder(Selector::context())
            .child("entries", Group::new(Selector::by_class("entry").unwrap(), entry))
            .child("footer", footer)
            .build();
        Schema::new("entries", root)
    }

    #[test]
    fn evaluates_nested_shape() {
        let doc = Document::from_html(PAGE);
        let rec = entry_schema().evaluate(&doc);

        let entries = rec.get("entries").as_list();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].get("title").as_str(), Some("First entry"));
        assert_eq!(entries[0].get("id").as_str(), Some("e1"));
        let hrefs: Vec<_> = entries[0]
            .get("links")
            .as_list()
            .iter()
            .map(|l| l.get("href").as_str().unwrap_or_default())
            .collect();
        assert_eq!(hrefs, vec!["/one", "/two"]);
        assert_eq!(entries[1].get("links"), &Record::List(vec![]));

        assert_eq!(
            rec.path("footer.markup").as_str(),
            Some("<b>bold</b> text")
        );
        assert_eq!(rec.path("footer.bold").as_str(), Some("bold"));
    }

    #[test]
    fn unmatched_composite_keeps_shape() {
        let doc = Document::from_html("<html><body><p>nothing</p></body></html>");
        let rec = entry_schema().evaluate(&doc);
        assert_eq!(
            rec,
            Record::Object(vec![
                ("entries".into(), Record::List(vec![])),
                (
                    "footer".into(),
                    Record::Object(vec![
                        ("markup".into(), Record::Absent),
                        ("bold".into(), Record::Absent),
                    ])
                ),
            ])
        );
    }

    #[test]
    fn absent_field_does_not_affect_siblings() {
        let doc = Document::from_html(r#"<div class="entry"><a class="link" href="/x">x</a></div>"#);
        let rec = entry_schema().evaluate(&doc);
        let entry = &rec.get("entries").as_list()[0];
        assert!(entry.get("title").is_absent());
        assert!(entry.get("id").is_absent());
        assert_eq!(entry.get("links").as_list().len(), 1);
    }

    #[test]
    fn field_takes_first_match_and_treats_empty_as_absent() {
        let doc = Document::from_html(
            r#"<p class="a">first</p><p class="a">second</p><p class="e">   </p><i title="  ">x</i>"#,
        );
        let root = doc.root();
        assert_eq!(
            Field::text(Selector::by_class("a").unwrap()).evaluate(root),
            Record::Scalar("first".into())
        );
        assert!(Field::text(Selector::by_class("e").unwrap())
            .evaluate(root)
            .is_absent());
        assert!(Field::attr(path(".//i"), "title").evaluate(root).is_absent());
        assert!(Field::attr(path(".//i"), "missing").evaluate(root).is_absent());
    }

    #[test]
    fn evaluation_is_idempotent() {
        let doc = Document::from_html(PAGE);
        let schema = entry_schema();
        assert_eq!(schema.evaluate(&doc), schema.evaluate(&doc));
    }

    #[test]
    fn builder_replaces_duplicate_child_in_place() {
        let c = Composite::builder(Selector::context())
            .child("a", Field::text(path("./x")))
            .child("b", Field::text(path("./y")))
            .child("a", Field::text(path("./z")))
            .build();
        let names: Vec<_> = c.children().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(c.child("a").unwrap().selector().expression(), "./z");
    }

    #[test]
    fn field_paths_describe_shape() {
        assert_eq!(
            entry_schema().field_paths(),
            vec![
                "entries[].id",
                "entries[].title",
                "entries[].links[].href",
                "footer.markup",
                "footer.bold",
            ]
        );
    }

    #[test]
    fn evaluate_child_only_touches_one_branch() {
        let doc = Document::from_html(PAGE);
        let schema = entry_schema();
        let footer = schema.evaluate_child("footer", &doc).unwrap();
        assert_eq!(footer.get("bold").as_str(), Some("bold"));
        assert!(schema.evaluate_child("nope", &doc).is_none());
    }
}
