// ABOUTME: Process-wide cache of compiled path queries keyed by expression text.
// ABOUTME: Schemas share one compiled query per distinct expression, including cached failures.

//! Path-query caching.
//!
//! Blog schemas reuse a small set of expressions (`.//a`, the `itemprop`
//! token tests) across many nodes and many schema instances. Each distinct
//! expression is parsed once and shared behind an `Arc`.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use once_cell::sync::Lazy;

use crate::error::SelectorError;
use crate::selector::path::PathExpr;

type Compiled = Result<Arc<PathExpr>, SelectorError>;

static PATH_CACHE: Lazy<RwLock<HashMap<String, Compiled>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Gets or compiles a path query, caching the result.
///
/// Malformed expressions are cached too, so repeated construction of the same
/// broken selector reports the same `SelectorError` without reparsing.
pub fn get_or_compile(expression: &str) -> Compiled {
    {
        let cache = PATH_CACHE.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = cache.get(expression) {
            return cached.clone();
        }
    }

    let compiled = PathExpr::parse(expression).map(Arc::new);
    let mut cache = PATH_CACHE.write().unwrap_or_else(PoisonError::into_inner);
    // Another thread may have won the race while we were parsing.
    cache
        .entry(expression.to_string())
        .or_insert(compiled)
        .clone()
}
