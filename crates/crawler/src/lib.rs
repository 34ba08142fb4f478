//! Round-based crawl engine.
//!
//! The pages table is the frontier: seeds go in as `pending`, each round
//! pulls a FIFO batch of pending pages, workers fetch them in parallel, and
//! link targets are written back as new pending pages for the next round.
//! Rounds (not graph hops) bound the crawl, together with the page budget.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Result};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use wikigraph_core::{
    ArticleFetcher, CancelToken, CrawlError, CrawlStats, CrawlerConfig, FetchOutcome, Page,
    PageStatus,
};
use wikigraph_storage::Storage;

pub struct CrawlEngine {
    storage: Storage,
    fetcher: Arc<dyn ArticleFetcher>,
    config: CrawlerConfig,
}

#[derive(Default)]
struct Counters {
    fetched: AtomicU64,
    skipped: AtomicU64,
    errored: AtomicU64,
    links: AtomicU64,
}

impl Counters {
    fn processed(&self) -> u64 {
        self.fetched.load(Ordering::Relaxed)
            + self.skipped.load(Ordering::Relaxed)
            + self.errored.load(Ordering::Relaxed)
    }
}

impl CrawlEngine {
    pub fn new(storage: Storage, fetcher: Arc<dyn ArticleFetcher>, config: CrawlerConfig) -> Self {
        Self {
            storage,
            fetcher,
            config,
        }
    }

    /// Crawl from `seeds` until the round limit, the page budget, an empty
    /// frontier, or cancellation stops it. Partial state is durable at every
    /// page boundary; a cancelled crawl still reports its stats.
    pub async fn run(&self, seeds: &[String], cancel: CancelToken) -> Result<CrawlStats> {
        let started = Instant::now();

        for seed in seeds {
            self.storage.get_or_create_page(seed).await?;
        }
        info!(seeds = seeds.len(), "crawl starting");

        let counters = Arc::new(Counters::default());
        let abort = Arc::new(AtomicBool::new(false));
        let first_error: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

        let mut rounds = 0u32;
        for round in 0..self.config.max_depth {
            if cancel.is_cancelled() {
                break;
            }

            let budget = (self.config.max_pages as u64).saturating_sub(counters.processed());
            if budget == 0 {
                info!("page budget exhausted");
                break;
            }
            let pull = self.config.batch_size.min(budget as usize);
            let batch = self.storage.get_pending_pages(pull).await?;
            if batch.is_empty() {
                info!(round, "frontier empty");
                break;
            }
            rounds += 1;
            debug!(round, pages = batch.len(), "round starting");

            let queue = Arc::new(Mutex::new(VecDeque::from(batch)));
            let workers = self.config.workers.max(1);
            let mut handles = Vec::with_capacity(workers);
            for worker_id in 0..workers {
                let storage = self.storage.clone();
                let fetcher = Arc::clone(&self.fetcher);
                let queue = Arc::clone(&queue);
                let counters = Arc::clone(&counters);
                let abort = Arc::clone(&abort);
                let first_error = Arc::clone(&first_error);
                let cancel = cancel.clone();
                let stop_on_error = self.config.stop_on_error;

                handles.push(tokio::spawn(async move {
                    loop {
                        if cancel.is_cancelled() || abort.load(Ordering::Relaxed) {
                            break;
                        }
                        let Some(page) = queue.lock().await.pop_front() else {
                            break;
                        };
                        if let Err(e) =
                            process_page(&storage, fetcher.as_ref(), &page, &counters, &cancel)
                                .await
                        {
                            if matches!(e, CrawlError::Cancelled) {
                                break;
                            }
                            counters.errored.fetch_add(1, Ordering::Relaxed);
                            warn!(worker_id, title = %page.title, "page failed: {e}");
                            if stop_on_error {
                                let mut slot = first_error.lock().await;
                                if slot.is_none() {
                                    *slot = Some(format!("{} ({})", e, page.title));
                                }
                                abort.store(true, Ordering::Relaxed);
                                break;
                            }
                        }
                    }
                }));
            }
            for handle in handles {
                let _ = handle.await;
            }

            if abort.load(Ordering::Relaxed) {
                break;
            }
        }

        let stats = CrawlStats {
            pages_fetched: counters.fetched.load(Ordering::Relaxed),
            pages_skipped: counters.skipped.load(Ordering::Relaxed),
            pages_errored: counters.errored.load(Ordering::Relaxed),
            links_found: counters.links.load(Ordering::Relaxed),
            rounds,
            duration_ms: started.elapsed().as_millis() as u64,
            cancelled: cancel.is_cancelled(),
        };

        if let Some(message) = first_error.lock().await.take() {
            bail!("crawl aborted on error: {message}");
        }

        info!(
            fetched = stats.pages_fetched,
            skipped = stats.pages_skipped,
            errored = stats.pages_errored,
            links = stats.links_found,
            rounds = stats.rounds,
            duration_ms = stats.duration_ms,
            cancelled = stats.cancelled,
            "crawl finished"
        );
        Ok(stats)
    }
}

/// Handle one pending page end to end. A failed fetch marks the page
/// `error` before the failure propagates; the worker decides whether the
/// crawl survives it.
async fn process_page(
    storage: &Storage,
    fetcher: &dyn ArticleFetcher,
    page: &Page,
    counters: &Counters,
    cancel: &CancelToken,
) -> Result<(), CrawlError> {
    let result = match fetcher.fetch_article(&page.title, cancel).await {
        Ok(result) => result,
        Err(CrawlError::Cancelled) => return Err(CrawlError::Cancelled),
        Err(e) => {
            // transient failure: terminal for this round, re-crawlable after
            // an operator reset
            if let Err(se) = storage
                .update_page_status(&page.title, PageStatus::Error, None, None)
                .await
            {
                warn!(title = %page.title, "could not mark page errored: {se}");
            }
            debug!(title = %page.title, "marked error: {e}");
            return Err(e);
        }
    };

    match result.outcome {
        FetchOutcome::NotFound => {
            storage
                .update_page_status(&page.title, PageStatus::NotFound, None, None)
                .await
                .map_err(|e| CrawlError::Storage(e.to_string()))?;
            counters.skipped.fetch_add(1, Ordering::Relaxed);
        }
        FetchOutcome::Redirect { to } => {
            // the canonical article must become crawlable before we mark
            // the alias done
            storage
                .get_or_create_page(&to)
                .await
                .map_err(|e| CrawlError::Storage(e.to_string()))?;
            storage
                .update_page_status(&page.title, PageStatus::Redirect, None, Some(&to))
                .await
                .map_err(|e| CrawlError::Storage(e.to_string()))?;
            counters.skipped.fetch_add(1, Ordering::Relaxed);
        }
        FetchOutcome::Success {
            content_hash,
            links,
            ..
        } => {
            storage
                .replace_links(page.id, &links)
                .await
                .map_err(|e| CrawlError::Storage(e.to_string()))?;
            storage
                .ensure_pages_exist(&links)
                .await
                .map_err(|e| CrawlError::Storage(e.to_string()))?;
            storage
                .update_page_status(&page.title, PageStatus::Success, Some(&content_hash), None)
                .await
                .map_err(|e| CrawlError::Storage(e.to_string()))?;
            counters.fetched.fetch_add(1, Ordering::Relaxed);
            counters
                .links
                .fetch_add(links.len() as u64, Ordering::Relaxed);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use wikigraph_core::{cancel_pair, FetchResult};

    /// Canned outcomes keyed by title; unknown titles act like transient
    /// failures.
    struct MockFetcher {
        outcomes: HashMap<String, FetchOutcome>,
        calls: AtomicU64,
    }

    impl MockFetcher {
        fn new(outcomes: Vec<(&str, FetchOutcome)>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: outcomes
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
                calls: AtomicU64::new(0),
            })
        }
    }

    fn success(links: &[&str]) -> FetchOutcome {
        FetchOutcome::Success {
            final_title: String::new(),
            content_hash: "deadbeef".to_string(),
            links: links.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[async_trait]
    impl ArticleFetcher for MockFetcher {
        async fn fetch_article(
            &self,
            title: &str,
            cancel: &CancelToken,
        ) -> Result<FetchResult, CrawlError> {
            if cancel.is_cancelled() {
                return Err(CrawlError::Cancelled);
            }
            self.calls.fetch_add(1, Ordering::Relaxed);
            match self.outcomes.get(title) {
                Some(outcome) => Ok(FetchResult {
                    title: title.to_string(),
                    status_code: 200,
                    outcome: outcome.clone(),
                }),
                None => Err(CrawlError::Network(format!("no mock for {title:?}"))),
            }
        }
    }

    fn config(max_depth: u32, max_pages: usize) -> CrawlerConfig {
        CrawlerConfig {
            max_depth,
            batch_size: 10,
            max_pages,
            workers: 2,
            stop_on_error: false,
        }
    }

    async fn storage() -> Storage {
        let s = Storage::in_memory().await.unwrap();
        s.run_migrations().await.unwrap();
        s
    }

    #[tokio::test]
    async fn test_crawl_follows_links_across_rounds() {
        let s = storage().await;
        let fetcher = MockFetcher::new(vec![
            ("A", success(&["B"])),
            ("B", success(&[])),
        ]);
        let engine = CrawlEngine::new(s.clone(), fetcher, config(5, 100));

        let (_handle, token) = cancel_pair();
        let stats = engine.run(&["A".to_string()], token).await.unwrap();

        assert_eq!(stats.pages_fetched, 2);
        assert_eq!(stats.pages_errored, 0);
        assert_eq!(stats.links_found, 1);
        assert_eq!(stats.rounds, 2);
        assert!(!stats.cancelled);

        let a = s.get_page("A").await.unwrap().unwrap();
        let b = s.get_page("B").await.unwrap().unwrap();
        assert_eq!(a.status, PageStatus::Success);
        assert_eq!(b.status, PageStatus::Success);
        assert_eq!(s.get_page_links("A").await.unwrap(), vec!["B".to_string()]);
    }

    #[tokio::test]
    async fn test_redirect_enqueues_canonical_title() {
        let s = storage().await;
        let fetcher = MockFetcher::new(vec![(
            "Einstein",
            FetchOutcome::Redirect {
                to: "Albert Einstein".to_string(),
            },
        )]);
        let engine = CrawlEngine::new(s.clone(), fetcher, config(1, 100));

        let (_handle, token) = cancel_pair();
        let stats = engine.run(&["Einstein".to_string()], token).await.unwrap();

        assert_eq!(stats.pages_skipped, 1);
        assert_eq!(stats.pages_fetched, 0);

        let alias = s.get_page("Einstein").await.unwrap().unwrap();
        assert_eq!(alias.status, PageStatus::Redirect);
        assert_eq!(alias.redirect_to.as_deref(), Some("Albert Einstein"));
        let canonical = s.get_page("Albert Einstein").await.unwrap().unwrap();
        assert_eq!(canonical.status, PageStatus::Pending);
    }

    #[tokio::test]
    async fn test_not_found_counts_as_skipped() {
        let s = storage().await;
        let fetcher = MockFetcher::new(vec![("Ghost", FetchOutcome::NotFound)]);
        let engine = CrawlEngine::new(s.clone(), fetcher, config(1, 100));

        let (_handle, token) = cancel_pair();
        let stats = engine.run(&["Ghost".to_string()], token).await.unwrap();
        assert_eq!(stats.pages_skipped, 1);
        let page = s.get_page("Ghost").await.unwrap().unwrap();
        assert_eq!(page.status, PageStatus::NotFound);
        assert!(page.fetched_at.is_some());
    }

    #[tokio::test]
    async fn test_transient_error_marks_page_and_continues() {
        let s = storage().await;
        let fetcher = MockFetcher::new(vec![("Good", success(&[]))]);
        let engine = CrawlEngine::new(s.clone(), fetcher, config(1, 100));

        let (_handle, token) = cancel_pair();
        let stats = engine
            .run(&["Bad".to_string(), "Good".to_string()], token)
            .await
            .unwrap();

        assert_eq!(stats.pages_errored, 1);
        assert_eq!(stats.pages_fetched, 1);
        let bad = s.get_page("Bad").await.unwrap().unwrap();
        assert_eq!(bad.status, PageStatus::Error);
        assert!(bad.fetched_at.is_none());
    }

    #[tokio::test]
    async fn test_stop_on_error_aborts() {
        let s = storage().await;
        let fetcher = MockFetcher::new(vec![]);
        let mut cfg = config(3, 100);
        cfg.stop_on_error = true;
        cfg.workers = 1;
        let engine = CrawlEngine::new(s.clone(), fetcher, cfg);

        let (_handle, token) = cancel_pair();
        let err = engine
            .run(&["Doomed".to_string()], token)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("aborted"));
    }

    #[tokio::test]
    async fn test_max_pages_budget() {
        let s = storage().await;
        // every page links to two fresh ones; the budget must cut this off
        let fetcher = MockFetcher::new(vec![
            ("A", success(&["B", "C"])),
            ("B", success(&["D", "E"])),
            ("C", success(&["F", "G"])),
            ("D", success(&[])),
            ("E", success(&[])),
            ("F", success(&[])),
            ("G", success(&[])),
        ]);
        let engine = CrawlEngine::new(s.clone(), fetcher, config(10, 3));

        let (_handle, token) = cancel_pair();
        let stats = engine.run(&["A".to_string()], token).await.unwrap();
        assert!(stats.pages_fetched + stats.pages_skipped <= 3);
        assert_eq!(stats.pages_processed(), 3);
    }

    #[tokio::test]
    async fn test_round_limit() {
        let s = storage().await;
        let fetcher = MockFetcher::new(vec![
            ("A", success(&["B"])),
            ("B", success(&["C"])),
            ("C", success(&[])),
        ]);
        let engine = CrawlEngine::new(s.clone(), fetcher, config(2, 100));

        let (_handle, token) = cancel_pair();
        let stats = engine.run(&["A".to_string()], token).await.unwrap();
        assert_eq!(stats.rounds, 2);
        // C was discovered but never fetched
        let c = s.get_page("C").await.unwrap().unwrap();
        assert_eq!(c.status, PageStatus::Pending);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let s = storage().await;
        let fetcher = MockFetcher::new(vec![("A", success(&[]))]);
        let engine = CrawlEngine::new(s.clone(), fetcher, config(5, 100));

        let (handle, token) = cancel_pair();
        handle.cancel();
        let stats = engine.run(&["A".to_string()], token).await.unwrap();
        assert!(stats.cancelled);
        assert_eq!(stats.pages_fetched, 0);
        // seed stays durable and pending
        let a = s.get_page("A").await.unwrap().unwrap();
        assert_eq!(a.status, PageStatus::Pending);
    }
}
