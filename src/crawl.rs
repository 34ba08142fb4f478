use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tracing::{info, warn};

use wikigraph_core::{cancel_pair, AppConfig};
use wikigraph_crawler::CrawlEngine;
use wikigraph_fetcher::WikipediaFetcher;
use wikigraph_storage::Storage;

use crate::seeds::DEFAULT_SEEDS;

pub async fn run_crawl(
    config: AppConfig,
    seeds: Option<String>,
    seed: Option<String>,
    depth: Option<u32>,
    max_pages: Option<usize>,
) -> Result<()> {
    let mut crawler_config = config.crawler.clone();
    if let Some(depth) = depth {
        crawler_config.max_depth = depth;
    }
    if let Some(max_pages) = max_pages {
        crawler_config.max_pages = max_pages;
    }

    let storage = Storage::new(&config.database.path).await?;
    storage.run_migrations().await?;

    // Collect seed titles
    let mut seed_titles: Vec<String> = Vec::new();
    if let Some(s) = seed {
        seed_titles.push(s);
    }
    if let Some(seeds_arg) = seeds {
        if std::path::Path::new(&seeds_arg).exists() {
            let content = std::fs::read_to_string(&seeds_arg)?;
            seed_titles.extend(
                content
                    .lines()
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty()),
            );
        } else {
            seed_titles.extend(
                seeds_arg
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
            );
        }
    }
    if seed_titles.is_empty() {
        seed_titles.extend(DEFAULT_SEEDS.iter().map(|s| s.to_string()));
        info!("no seeds provided, using default seeds");
    }
    info!(count = seed_titles.len(), "seeds loaded");

    let fetcher = Arc::new(WikipediaFetcher::new(&config.fetcher)?);
    let engine = CrawlEngine::new(storage, fetcher, crawler_config);

    let (cancel, token) = cancel_pair();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("shutdown signal received, finishing in-flight pages");
            cancel.cancel();
        }
    });

    let stats = engine.run(&seed_titles, token).await?;
    info!(
        fetched = stats.pages_fetched,
        skipped = stats.pages_skipped,
        errored = stats.pages_errored,
        links = stats.links_found,
        rounds = stats.rounds,
        duration_ms = stats.duration_ms,
        cancelled = stats.cancelled,
        "crawl complete"
    );
    Ok(())
}
