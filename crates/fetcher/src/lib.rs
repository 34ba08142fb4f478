//! Polite Wikipedia article fetcher.
//!
//! One shared HTTP client behind a process-wide token bucket. Every worker
//! waits on the same bucket, so the aggregate request rate stays at the
//! configured ceiling no matter how many fetches are in flight. The bucket
//! wait and the HTTP call are both cancellable.

use std::time::Duration;

use async_trait::async_trait;
use leaky_bucket::RateLimiter;
use tracing::debug;
use url::Url;

use wikigraph_core::{
    ArticleFetcher, CancelToken, CrawlError, FetchOutcome, FetchResult, FetcherConfig,
};

/// Token-bucket burst ceiling. A short burst is fine; a sustained one is not.
const MAX_BURST: usize = 50;

pub struct WikipediaFetcher {
    client: reqwest::Client,
    limiter: RateLimiter,
    base_url: Url,
    timeout_secs: u64,
}

impl WikipediaFetcher {
    pub fn new(config: &FetcherConfig) -> Result<Self, CrawlError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| CrawlError::Config(format!("bad base_url {:?}: {e}", config.base_url)))?;
        if base_url.host_str().is_none() {
            return Err(CrawlError::Config(format!(
                "base_url {:?} has no host",
                config.base_url
            )));
        }

        let rate = config.requests_per_second;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(CrawlError::Config(
                "requests_per_second must be positive".to_string(),
            ));
        }
        // round down so the burst never exceeds the configured rate
        let burst = (rate.floor() as usize).clamp(1, MAX_BURST);
        let limiter = RateLimiter::builder()
            .max(burst)
            .initial(burst)
            .refill(1)
            .interval(Duration::from_secs_f64(1.0 / rate))
            .build();

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| CrawlError::Config(e.to_string()))?;

        Ok(Self {
            client,
            limiter,
            base_url,
            timeout_secs: config.request_timeout_seconds,
        })
    }

    /// `/wiki/<title>` with spaces mapped to underscores and the rest
    /// percent-encoded.
    fn article_url(&self, title: &str) -> Result<Url, CrawlError> {
        if title.trim().is_empty() {
            return Err(CrawlError::InvalidTitle(title.to_string()));
        }
        let encoded = urlencoding::encode(&title.replace(' ', "_")).into_owned();
        self.base_url
            .join(&format!("/wiki/{encoded}"))
            .map_err(|e| CrawlError::InvalidTitle(format!("{title:?}: {e}")))
    }

    fn classify(&self, e: reqwest::Error) -> CrawlError {
        if e.is_timeout() {
            CrawlError::Timeout(self.timeout_secs)
        } else {
            CrawlError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl ArticleFetcher for WikipediaFetcher {
    async fn fetch_article(
        &self,
        title: &str,
        cancel: &CancelToken,
    ) -> Result<FetchResult, CrawlError> {
        // politeness gate first, so a cancelled crawl never spends a token
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CrawlError::Cancelled),
            _ = self.limiter.acquire_one() => {}
        }

        let url = self.article_url(title)?;
        debug!(title, url = %url, "fetching article");

        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CrawlError::Cancelled),
            r = self.client.get(url.clone()).send() => r.map_err(|e| self.classify(e))?,
        };

        let status_code = resp.status().as_u16();
        if status_code == 404 {
            return Ok(FetchResult {
                title: title.to_string(),
                status_code,
                outcome: FetchOutcome::NotFound,
            });
        }
        if !resp.status().is_success() {
            return Err(CrawlError::Network(format!(
                "unexpected status {status_code} for {title:?}"
            )));
        }

        // The client follows redirects transparently; stay on our host.
        if resp.url().host_str() != self.base_url.host_str() {
            return Err(CrawlError::Network(format!(
                "redirected off-host to {}",
                resp.url()
            )));
        }

        // A changed final path means the article redirected; the final path
        // carries the canonical title. Compare decoded titles rather than
        // raw paths so encoding normalization does not read as a redirect.
        let final_path = resp.url().path().to_string();
        let final_title = title_from_path(&final_path).ok_or_else(|| {
            CrawlError::Parse(format!("unintelligible final path {final_path:?}"))
        })?;
        if final_title != title {
            return Ok(FetchResult {
                title: title.to_string(),
                status_code,
                outcome: FetchOutcome::Redirect { to: final_title },
            });
        }

        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CrawlError::Cancelled),
            b = resp.bytes() => b.map_err(|e| self.classify(e))?,
        };

        let parsed = wikigraph_parser::parse_article(&body);
        debug!(title, links = parsed.links.len(), "article parsed");
        Ok(FetchResult {
            title: title.to_string(),
            status_code,
            outcome: FetchOutcome::Success {
                final_title: title.to_string(),
                content_hash: parsed.content_hash,
                links: parsed.links,
            },
        })
    }
}

/// Canonical title from a final `/wiki/...` path: percent-decode and map
/// underscores to spaces. No namespace filtering here; redirects land where
/// they land.
fn title_from_path(path: &str) -> Option<String> {
    let raw = path.strip_prefix("/wiki/")?;
    let raw = match raw.split_once('#') {
        Some((before, _)) => before,
        None => raw,
    };
    let decoded = urlencoding::decode(raw).ok()?;
    let title = decoded.replace('_', " ");
    (!title.is_empty()).then_some(title)
}
