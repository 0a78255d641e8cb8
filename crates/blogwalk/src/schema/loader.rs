// ABOUTME: Loads schemas from JSON, including the built-in blog template schema embedded at compile time.
// ABOUTME: Selector compilation errors surface here as CrawlError values with the Selector code.

//! Schema loader.
//!
//! Schemas serialize as plain JSON trees. Every selector inside is compiled
//! while deserializing, so a schema that loads successfully can never fail
//! during evaluation.

use crate::error::{CrawlError, SelectorError};
use crate::schema::Schema;

/// Embedded JSON for the blog template page schema.
pub(crate) const BLOGGER_SCHEMA_JSON: &str = include_str!("../../data/blogger_schema.json");

impl Schema {
    /// Parses a schema from JSON.
    ///
    /// A malformed path query or class token is reported with
    /// [`ErrorCode::Selector`](crate::ErrorCode::Selector); other JSON problems
    /// are reported as parse errors.
    pub fn from_json(json: &str) -> Result<Schema, CrawlError> {
        serde_json::from_str(json).map_err(|e| {
            if is_selector_failure(&e) {
                CrawlError::selector("", "Schema", Some(anyhow::Error::new(e)))
            } else {
                CrawlError::parse("", "Schema", Some(anyhow::Error::new(e)))
            }
        })
    }

    /// Serializes the schema to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, CrawlError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| CrawlError::parse("", "Schema", Some(anyhow::Error::new(e))))
    }
}

fn is_selector_failure(err: &serde_json::Error) -> bool {
    err.is_data() && SelectorError::is_deserialize_message(&err.to_string())
}

/// Loads the built-in blog template schema.
///
/// # Panics
///
/// Panics if the embedded JSON is malformed or contains an invalid selector.
pub fn load_builtin_schema() -> Schema {
    Schema::from_json(BLOGGER_SCHEMA_JSON).expect("failed to parse builtin blog schema")
}
