// ABOUTME: Selector values and the matching primitive every schema node is built on.
// ABOUTME: Matches by element id, by whole class token, or by path query relative to a context node.

//! Selectors.
//!
//! A [`Selector`] is an immutable `(kind, expression)` pair. Path queries are
//! compiled when the selector is constructed, so a malformed expression is
//! reported up front as a [`SelectorError`] instead of silently matching nothing.
//!
//! Matching is always relative to a context element and returns elements in
//! document order without duplicates.

pub mod compiled;
pub mod path;

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use ego_tree::NodeRef;
use scraper::{ElementRef, Node};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::SelectorError;
use crate::selector::compiled::get_or_compile;
use crate::selector::path::PathExpr;

/// How a selector expression is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorKind {
    ById,
    ByClassToken,
    ByPathQuery,
}

impl fmt::Display for SelectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SelectorKind::ById => "id",
            SelectorKind::ByClassToken => "class",
            SelectorKind::ByPathQuery => "path",
        };
        write!(f, "{}", s)
    }
}

/// An immutable, compiled selector. Equality and hashing use `(kind, expression)`.
#[derive(Clone, Serialize)]
#[serde(into = "SelectorDef")]
pub struct Selector {
    kind: SelectorKind,
    expression: String,
    matcher: Matcher,
}

#[derive(Clone)]
enum Matcher {
    Id(String),
    ClassToken(String),
    Path(Arc<PathExpr>),
}

/// Serialized form of a selector.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SelectorDef {
    kind: SelectorKind,
    expression: String,
}

impl<'de> Deserialize<'de> for Selector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let def = SelectorDef::deserialize(deserializer)?;
        Selector::new(def.kind, def.expression).map_err(SelectorError::into_de_error)
    }
}

impl From<Selector> for SelectorDef {
    fn from(selector: Selector) -> Self {
        SelectorDef {
            kind: selector.kind,
            expression: selector.expression,
        }
    }
}

impl Selector {
    /// Builds a selector, validating (and for path queries, compiling) the expression.
    pub fn new(kind: SelectorKind, expression: impl Into<String>) -> Result<Self, SelectorError> {
        let expression = expression.into();
        let matcher = match kind {
            SelectorKind::ById => {
                let id = expression.trim();
                if id.is_empty() {
                    return Err(SelectorError::Empty { kind: "id" });
                }
                Matcher::Id(id.to_string())
            }
            SelectorKind::ByClassToken => {
                let token = expression.trim();
                if token.is_empty() {
                    return Err(SelectorError::Empty { kind: "class" });
                }
                if token.contains(char::is_whitespace) {
                    return Err(SelectorError::InvalidClassToken(token.to_string()));
                }
                Matcher::ClassToken(token.to_string())
            }
            SelectorKind::ByPathQuery => {
                if expression.trim().is_empty() {
                    return Err(SelectorError::Empty { kind: "path" });
                }
                Matcher::Path(get_or_compile(&expression)?)
            }
        };
        Ok(Self {
            kind,
            expression,
            matcher,
        })
    }

    /// Selector matching the element with this `id`.
    pub fn by_id(id: impl Into<String>) -> Result<Self, SelectorError> {
        Self::new(SelectorKind::ById, id)
    }

    /// Selector matching every element carrying `token` in its class list.
    pub fn by_class(token: impl Into<String>) -> Result<Self, SelectorError> {
        Self::new(SelectorKind::ByClassToken, token)
    }

    /// Selector evaluating a path query relative to the context node.
    pub fn path(expression: impl Into<String>) -> Result<Self, SelectorError> {
        Self::new(SelectorKind::ByPathQuery, expression)
    }

    /// The `.` path query, which selects the context node itself.
    pub fn context() -> Self {
        Self {
            kind: SelectorKind::ByPathQuery,
            expression: ".".to_string(),
            matcher: Matcher::Path(Arc::new(PathExpr::context())),
        }
    }

    pub fn kind(&self) -> SelectorKind {
        self.kind
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Returns the elements this selector matches relative to `context`.
    ///
    /// Id and class selectors search the context subtree including the context
    /// itself, so a composite anchored on the same selector as its enclosing
    /// group re-selects the element it was handed.
    pub fn select<'a>(&self, context: ElementRef<'a>) -> Vec<ElementRef<'a>> {
        match &self.matcher {
            Matcher::Id(id) => find_by_id(*context, id)
                .and_then(ElementRef::wrap)
                .into_iter()
                .collect(),
            Matcher::ClassToken(token) => context
                .descendants()
                .filter_map(ElementRef::wrap)
                .filter(|el| el.value().classes().any(|c| c == token.as_str()))
                .collect(),
            Matcher::Path(expr) => expr
                .select(*context)
                .into_iter()
                .filter_map(ElementRef::wrap)
                .collect(),
        }
    }

    /// Returns the first match in document order, if any.
    pub fn first<'a>(&self, context: ElementRef<'a>) -> Option<ElementRef<'a>> {
        match &self.matcher {
            Matcher::Id(id) => find_by_id(*context, id).and_then(ElementRef::wrap),
            Matcher::ClassToken(token) => context
                .descendants()
                .filter_map(ElementRef::wrap)
                .find(|el| el.value().classes().any(|c| c == token.as_str())),
            Matcher::Path(_) => self.select(context).into_iter().next(),
        }
    }
}

impl PartialEq for Selector {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.expression == other.expression
    }
}

impl Eq for Selector {}

impl Hash for Selector {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.expression.hash(state);
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("kind", &self.kind)
            .field("expression", &self.expression)
            .finish()
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.expression)
    }
}

// ----------------------------------------------------------------------------
// Tree helpers shared with the path evaluator
// ----------------------------------------------------------------------------

/// Normalizes whitespace in a string by collapsing runs of whitespace into single spaces.
pub(crate) fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The document node at the top of the tree containing `node`.
pub(crate) fn tree_root(node: NodeRef<'_, Node>) -> NodeRef<'_, Node> {
    node.ancestors().last().unwrap_or(node)
}

/// First element in `scope` (inclusive, document order) whose `id` equals `id`.
pub(crate) fn find_by_id<'a>(scope: NodeRef<'a, Node>, id: &str) -> Option<NodeRef<'a, Node>> {
    scope
        .descendants()
        .find(|n| n.value().as_element().and_then(|el| el.id()) == Some(id))
}

/// Concatenated text of every text node under `node`.
pub(crate) fn string_value(node: NodeRef<'_, Node>) -> String {
    let mut out = String::new();
    for n in node.descendants() {
        if let Some(text) = n.value().as_text() {
            out.push_str(text);
        }
    }
    out
}

/// Sorts nodes into document order and drops duplicates.
pub(crate) fn document_order(nodes: &mut Vec<NodeRef<'_, Node>>) {
    if nodes.len() < 2 {
        return;
    }
    let wanted: HashSet<_> = nodes.iter().map(|n| n.id()).collect();
    let root = tree_root(nodes[0]);
    *nodes = root
        .descendants()
        .filter(|n| wanted.contains(&n.id()))
        .collect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use scraper::Html;

    const SAMPLE_HTML: &str = r#"
        <html><body>
            <div id="outer" class="post hentry">
                <div class="post-body">body</div>
                <div class="posts">not a post</div>
                <div class="hentry post" id="inner">nested</div>
            </div>
            <span id="outer">duplicate id</span>
        </body></html>
    "#;

    fn element_ids(found: &[ElementRef<'_>]) -> Vec<String> {
        found
            .iter()
            .map(|el| el.value().id().unwrap_or("-").to_string())
            .collect()
    }

    #[test]
    fn by_id_returns_first_match_only() {
        let doc = Html::parse_document(SAMPLE_HTML);
        let sel = Selector::by_id("outer").unwrap();
        let found = sel.select(doc.root_element());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value().name(), "div");
        assert!(Selector::by_id("nope")
            .unwrap()
            .select(doc.root_element())
            .is_empty());
    }

    #[test]
    fn by_class_matches_whole_tokens_including_context() {
        let doc = Html::parse_document(SAMPLE_HTML);
        let sel = Selector::by_class("post").unwrap();
        let found = sel.select(doc.root_element());
        assert_eq!(element_ids(&found), vec!["outer", "inner"]);

        // The context element itself is a candidate.
        let outer = found[0];
        let again = sel.select(outer);
        assert_eq!(again[0].id(), outer.id());
    }

    #[test]
    fn path_selector_is_relative_to_context() {
        let doc = Html::parse_document(SAMPLE_HTML);
        let outer = Selector::by_id("outer").unwrap().select(doc.root_element())[0];
        let children = Selector::path("./div").unwrap().select(outer);
        assert_eq!(children.len(), 3);
        let itself = Selector::context().select(outer);
        assert_eq!(itself[0].id(), outer.id());
    }

    #[test]
    fn invalid_expressions_are_rejected_at_construction() {
        assert_eq!(
            Selector::by_id("  ").unwrap_err(),
            SelectorError::Empty { kind: "id" }
        );
        assert_eq!(
            Selector::by_class("post hentry").unwrap_err(),
            SelectorError::InvalidClassToken("post hentry".to_string())
        );
        assert!(matches!(
            Selector::path(".//a[").unwrap_err(),
            SelectorError::Syntax { .. }
        ));
        assert_eq!(
            Selector::path("").unwrap_err(),
            SelectorError::Empty { kind: "path" }
        );
    }

    #[test]
    fn equality_is_by_value() {
        let a = Selector::path(".//a").unwrap();
        let b = Selector::path(".//a").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, Selector::path(".//b").unwrap());
        assert_ne!(
            Selector::by_id("x").unwrap(),
            Selector::by_class("x").unwrap()
        );
        assert_eq!(Selector::context(), Selector::path(".").unwrap());
    }

    #[test]
    fn serde_roundtrip_recompiles() {
        let sel = Selector::path(".//a[@rel='tag']").unwrap();
        let json = serde_json::to_string(&sel).unwrap();
        assert_eq!(
            json,
            r#"{"kind":"by_path_query","expression":".//a[@rel='tag']"}"#
        );
        let back: Selector = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sel);

        let bad = serde_json::from_str::<Selector>(r#"{"kind":"by_path_query","expression":"a["}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  hello   world  "), "hello world");
        assert_eq!(normalize_whitespace("no\textra\nspaces"), "no extra spaces");
        assert_eq!(normalize_whitespace(""), "");
    }
}
