pub mod links;

pub use links::{extract_article_links, title_from_wiki_path};

use sha2::{Digest, Sha256};

/// Max bytes to parse (5 MB). Larger pages are truncated before parsing;
/// the digest still covers the full body.
const MAX_PARSE_SIZE: usize = 5 * 1024 * 1024;

/// Links and content digest extracted from one article body.
#[derive(Debug, Clone)]
pub struct ParsedArticle {
    pub content_hash: String,
    pub links: Vec<String>,
}

pub fn parse_article(body: &[u8]) -> ParsedArticle {
    let slice = if body.len() > MAX_PARSE_SIZE {
        &body[..MAX_PARSE_SIZE]
    } else {
        body
    };
    let html = String::from_utf8_lossy(slice);
    let links = links::extract_article_links(&html);

    let mut hasher = Sha256::new();
    hasher.update(body);
    let content_hash = format!("{:x}", hasher.finalize());

    ParsedArticle {
        content_hash,
        links,
    }
}
