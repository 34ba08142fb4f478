//! Article-link extraction from Wikipedia page HTML.
//!
//! Only anchors inside the main content container count; navigation chrome,
//! sidebars and footers link to articles too but are not part of the
//! article's link set.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use scraper::{Html, Selector};

static CONTENT_LINKS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("#mw-content-text a[href^='/wiki/']").unwrap());

/// Colon-prefixes that mark meta-namespace pages rather than articles.
const EXCLUDED_NAMESPACES: &[&str] = &[
    "Wikipedia",
    "Help",
    "File",
    "Category",
    "Template",
    "Template talk",
    "Portal",
    "Special",
    "Talk",
    "User",
    "User talk",
    "Wikipedia talk",
    "MediaWiki",
    "Draft",
    "Module",
];

/// Extract outbound article titles from a page body, in first-seen document
/// order, deduplicated.
pub fn extract_article_links(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for el in document.select(&CONTENT_LINKS) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let Some(title) = title_from_wiki_path(href) else {
            continue;
        };
        if seen.insert(title.clone()) {
            links.push(title);
        }
    }
    links
}

/// Turn a `/wiki/...` path into a canonical article title: trim the fragment,
/// percent-decode, map underscores back to spaces, and reject
/// meta-namespace and disambiguation targets.
pub fn title_from_wiki_path(path: &str) -> Option<String> {
    let raw = path.strip_prefix("/wiki/")?;
    let raw = match raw.split_once('#') {
        Some((before, _)) => before,
        None => raw,
    };
    let decoded = urlencoding::decode(raw).ok()?;
    let title = decoded.replace('_', " ");
    if title.is_empty() {
        return None;
    }
    if let Some((prefix, _)) = title.split_once(':') {
        if EXCLUDED_NAMESPACES.contains(&prefix) {
            return None;
        }
    }
    if title.ends_with(" (disambiguation)") {
        return None;
    }
    Some(title)
}
