use thiserror::Error;

/// Failures surfaced while fetching article pages and writing them back.
#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("unfetchable title {0:?}")]
    InvalidTitle(String),

    #[error("wikipedia request failed: {0}")]
    Network(String),

    #[error("no response after {0}s")]
    Timeout(u64),

    #[error("unparseable page: {0}")]
    Parse(String),

    #[error("page store failure: {0}")]
    Storage(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CrawlError {
    /// Transient failures leave the page eligible for a later re-crawl;
    /// everything else is a caller bug or an operator problem.
    pub fn is_transient(&self) -> bool {
        matches!(self, CrawlError::Network(_) | CrawlError::Timeout(_))
    }
}
