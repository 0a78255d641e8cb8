// ABOUTME: Parsed HTML document wrapper plus the charset detection and decoding used before parsing.
// ABOUTME: Rejects empty bodies and non-markup content types with Parse errors.

use scraper::{ElementRef, Html};

use crate::error::CrawlError;
use crate::resource::FetchResult;

/// Content types accepted as markup.
const MARKUP_TYPES: [&str; 4] = [
    "text/html",
    "application/xhtml+xml",
    "text/xml",
    "application/xml",
];

/// A parsed page. Lives for one crawl step.
#[derive(Debug)]
pub struct Document {
    html: Html,
}

impl Document {
    /// Parses already-decoded markup.
    pub fn from_html(html: &str) -> Self {
        Self {
            html: Html::parse_document(html),
        }
    }

    /// Decodes `bytes` with the given charset label (or a detected one) and parses it.
    pub fn parse(bytes: &[u8], charset: Option<&str>) -> Result<Self, CrawlError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(CrawlError::parse(
                "",
                "Parse",
                Some(anyhow::anyhow!("empty document body")),
            ));
        }
        let text = decode_with_label(bytes, charset);
        Ok(Self::from_html(&text))
    }

    /// Parses a fetched response, using the charset from its `Content-Type`.
    pub fn from_fetch(result: &FetchResult) -> Result<Self, CrawlError> {
        if let Some(ct) = result.content_type.as_deref() {
            if !is_markup(ct) {
                return Err(CrawlError::parse(
                    &result.final_url,
                    "Parse",
                    Some(anyhow::anyhow!("unsupported content type {}", ct)),
                ));
            }
        }
        let charset = result.content_type.as_deref().and_then(extract_charset);
        Self::parse(&result.body, charset.as_deref()).map_err(|e| e.at(&result.final_url))
    }

    /// The document element, used as the context for page-level schemas.
    pub fn root(&self) -> ElementRef<'_> {
        self.html.root_element()
    }
}

fn is_markup(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    MARKUP_TYPES.contains(&mime.as_str())
}

fn decode_with_label(body: &[u8], label: Option<&str>) -> String {
    if let Some(encoding) = label.and_then(|l| encoding_rs::Encoding::for_label(l.as_bytes())) {
        let (decoded, _, _) = encoding.decode(body);
        return decoded.into_owned();
    }

    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(body, true);
    let encoding = detector.guess(None, true);
    let (decoded, _, _) = encoding.decode(body);
    decoded.into_owned()
}

/// Extract charset value from Content-Type header.
fn extract_charset(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|part| {
        let (key, value) = part.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        let value = value.trim().trim_matches('"').trim_matches('\'');
        (!value.is_empty()).then(|| value.to_ascii_lowercase())
    })
}
