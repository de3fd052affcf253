//! HTML extraction for fetched pages
//!
//! This module turns raw HTML into:
//! - The page title
//! - Headings (`h1`..`h6`) and emphasis spans (`em`, `strong`, `i`, `b`)
//! - In-scope outbound links with their anchor text
//!
//! Everything here is a pure function. A document with none of these
//! elements yields empty results, never an error.

use crate::storage::{DiscoveredLink, MetadataEntry};
use crate::url::is_in_scope;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeSet;
use url::Url;

const HEADING_TAGS: [&str; 6] = ["h1", "h2", "h3", "h4", "h5", "h6"];

const EMPHASIS_TAGS: [&str; 4] = ["em", "strong", "i", "b"];

/// Everything extracted from one page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedPage {
    pub title: Option<String>,
    pub headings: BTreeSet<MetadataEntry>,
    pub emphasis: BTreeSet<MetadataEntry>,
    pub links: BTreeSet<DiscoveredLink>,
}

impl ExtractedPage {
    /// Headings and emphasis spans merged into the page metadata list
    pub fn metadata(&self) -> Vec<MetadataEntry> {
        self.headings
            .iter()
            .chain(self.emphasis.iter())
            .cloned()
            .collect()
    }

    /// Outbound links in a stable order, ready for the frontier
    pub fn link_batch(&self) -> Vec<DiscoveredLink> {
        self.links.iter().cloned().collect()
    }
}

/// Extracts title, metadata and in-scope links from one parse of `html`
///
/// # Example
///
/// ```
/// use crawl_frontier::crawler::extract_page;
/// use url::Url;
///
/// let html = r#"<html><head><title>Test</title></head>
///     <body><h1>Hello</h1><a href="/page">Link</a></body></html>"#;
/// let base = Url::parse("https://example.com/").unwrap();
/// let page = extract_page(html, &base, "example.com");
///
/// assert_eq!(page.title.as_deref(), Some("Test"));
/// assert_eq!(page.links.len(), 1);
/// ```
pub fn extract_page(html: &str, base_url: &Url, scope: &str) -> ExtractedPage {
    let document = Html::parse_document(html);

    ExtractedPage {
        title: title_of(&document),
        headings: tagged_text(&document, &HEADING_TAGS),
        emphasis: tagged_text(&document, &EMPHASIS_TAGS),
        links: links_of(&document, base_url, scope),
    }
}

/// Extracts the page title
pub fn extract_title(html: &str) -> Option<String> {
    title_of(&Html::parse_document(html))
}

/// Extracts headings as (`h1`..`h6`, text) pairs
pub fn extract_headings(html: &str) -> BTreeSet<MetadataEntry> {
    tagged_text(&Html::parse_document(html), &HEADING_TAGS)
}

/// Extracts emphasis spans as (tag, text) pairs
pub fn extract_emphasis(html: &str) -> BTreeSet<MetadataEntry> {
    tagged_text(&Html::parse_document(html), &EMPHASIS_TAGS)
}

/// Extracts outbound links whose host is within `scope`
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` tags, resolved against `base_url` (relative and
///   protocol-relative forms included)
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` links
/// - Data URIs
/// - Fragment-only links
/// - Links outside `scope`
pub fn extract_links(html: &str, base_url: &Url, scope: &str) -> BTreeSet<DiscoveredLink> {
    links_of(&Html::parse_document(html), base_url, scope)
}

fn title_of(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(collapse_whitespace)
        .filter(|s| !s.is_empty())
}

fn tagged_text(document: &Html, tags: &[&str]) -> BTreeSet<MetadataEntry> {
    let mut entries = BTreeSet::new();

    for tag in tags {
        let Ok(selector) = Selector::parse(tag) else {
            continue;
        };

        for element in document.select(&selector) {
            let text = collapse_whitespace(element);
            if !text.is_empty() {
                entries.insert(MetadataEntry::new(*tag, text));
            }
        }
    }

    entries
}

fn links_of(document: &Html, base_url: &Url, scope: &str) -> BTreeSet<DiscoveredLink> {
    let mut links = BTreeSet::new();

    let Ok(a_selector) = Selector::parse("a[href]") else {
        return links;
    };

    for element in document.select(&a_selector) {
        if element.value().attr("download").is_some() {
            continue;
        }

        let Some(href) = element.value().attr("href") else {
            continue;
        };

        match resolve_link(href, base_url) {
            Some(url) if is_in_scope(&url, scope) => {
                let anchor_text = collapse_whitespace(element);
                links.insert(DiscoveredLink::new(url.to_string(), anchor_text));
            }
            Some(url) => tracing::trace!("Dropping out-of-scope link {}", url),
            None => {}
        }
    }

    links
}

/// Resolves a link href to an absolute URL and validates it
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - Fragment-only links
/// - Invalid URLs
/// - Non-HTTP(S) URLs after resolution
fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lowered = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lowered.starts_with(scheme))
    {
        return None;
    }

    let absolute_url = base_url.join(href).ok()?;
    match absolute_url.scheme() {
        "http" | "https" => Some(absolute_url),
        _ => None,
    }
}

fn collapse_whitespace(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
