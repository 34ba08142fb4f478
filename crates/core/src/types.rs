use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::error::CrawlError;

/// Lifecycle of a page in the repository. `Pending` pages form the crawl
/// frontier; the other four are terminal for a given fetch round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    Pending,
    Success,
    Redirect,
    NotFound,
    Error,
}

impl PageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageStatus::Pending => "pending",
            PageStatus::Success => "success",
            PageStatus::Redirect => "redirect",
            PageStatus::NotFound => "not_found",
            PageStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<PageStatus> {
        match s {
            "pending" => Some(PageStatus::Pending),
            "success" => Some(PageStatus::Success),
            "redirect" => Some(PageStatus::Redirect),
            "not_found" => Some(PageStatus::NotFound),
            "error" => Some(PageStatus::Error),
            _ => None,
        }
    }

    /// Statuses that carry a fetch timestamp. `error` deliberately does not:
    /// an errored page was never successfully retrieved.
    pub fn records_fetch_time(&self) -> bool {
        matches!(
            self,
            PageStatus::Success | PageStatus::Redirect | PageStatus::NotFound
        )
    }
}

impl fmt::Display for PageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored article page.
#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub id: i64,
    /// Wikipedia-canonical title: spaces, not underscores.
    pub title: String,
    pub status: PageStatus,
    pub content_hash: Option<String>,
    pub redirect_to: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What one fetch of one title produced.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub title: String,
    pub status_code: u16,
    pub outcome: FetchOutcome,
}

#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Success {
        final_title: String,
        content_hash: String,
        /// Outbound article links in first-seen document order, deduplicated.
        links: Vec<String>,
    },
    /// The server redirected to a different article path.
    Redirect { to: String },
    NotFound,
}

/// Retrieves one article politely. Implementations own the rate limiting;
/// transient failures and cancellation come back as `CrawlError`s.
#[async_trait]
pub trait ArticleFetcher: Send + Sync + 'static {
    async fn fetch_article(
        &self,
        title: &str,
        cancel: &CancelToken,
    ) -> Result<FetchResult, CrawlError>;
}

/// Bulk extraction of the stored graph: every edge whose source page is
/// `success`, plus success pages with no outgoing links at all.
#[derive(Debug, Clone, Default)]
pub struct GraphData {
    pub edges: Vec<(String, String)>,
    pub isolated: Vec<String>,
}

/// Counters reported at the end of a crawl run.
#[derive(Debug, Clone, Default)]
pub struct CrawlStats {
    pub pages_fetched: u64,
    /// 404s and redirects. They consume page budget but add no content.
    pub pages_skipped: u64,
    pub pages_errored: u64,
    pub links_found: u64,
    pub rounds: u32,
    pub duration_ms: u64,
    pub cancelled: bool,
}

impl CrawlStats {
    pub fn pages_processed(&self) -> u64 {
        self.pages_fetched + self.pages_skipped + self.pages_errored
    }
}
