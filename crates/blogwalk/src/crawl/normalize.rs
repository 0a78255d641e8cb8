// ABOUTME: URL parsing, resolution and normalization used to key the visited set.
// ABOUTME: Drops fragments, tracking parameters and trailing slashes so equivalent pager links compare equal.

use url::Url;

use crate::error::CrawlError;

/// Query parameters that never change which page is served.
const TRACKING_PARAMS: [&str; 6] = ["fbclid", "gclid", "mc_cid", "mc_eid", "_ga", "ref_src"];

fn is_tracking(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

/// Parses the crawl's start URL. Only http and https are accepted.
pub fn parse_start(raw: &str) -> Result<Url, CrawlError> {
    let url = Url::parse(raw.trim()).map_err(|e| {
        CrawlError::invalid_url(raw, "Crawl", Some(anyhow::anyhow!("invalid URL: {}", e)))
    })?;
    if !is_http(&url) {
        return Err(CrawlError::invalid_url(
            raw,
            "Crawl",
            Some(anyhow::anyhow!("scheme must be http or https")),
        ));
    }
    Ok(normalize_url(&url))
}

pub fn is_http(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

/// Resolves a pager href against the page it was found on.
pub fn resolve(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    base.join(href).ok()
}

/// Canonical form of a page URL.
///
/// Scheme and host case and default ports are already canonical after
/// parsing. The query is only re-serialized when a tracking parameter is
/// removed, so encoded pager cursors are kept byte for byte otherwise.
pub fn normalize_url(url: &Url) -> Url {
    let mut out = url.clone();
    out.set_fragment(None);

    if let Some(query) = out.query() {
        if query.is_empty() {
            out.set_query(None);
        } else {
            let pairs: Vec<(String, String)> = out.query_pairs().into_owned().collect();
            let kept: Vec<(String, String)> = pairs
                .iter()
                .filter(|(k, _)| !is_tracking(k))
                .cloned()
                .collect();
            if kept.is_empty() {
                out.set_query(None);
            } else if kept.len() != pairs.len() {
                out.query_pairs_mut().clear().extend_pairs(kept);
            }
        }
    }

    let path = out.path();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/');
        let trimmed = if trimmed.is_empty() { "/" } else { trimmed }.to_string();
        out.set_path(&trimmed);
    }
    out
}
