mod cli;
mod commands;
mod crawl;
mod seeds;

use anyhow::Result;
use clap::Parser;
use tracing::warn;

// The in-memory graph is a sea of small allocations; mimalloc keeps the
// resident size sane where glibc malloc would not give memory back.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use wikigraph_core::AppConfig;

use crate::cli::{Cli, Commands};
use crate::crawl::run_crawl;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config_str = std::fs::read_to_string(&cli.config).unwrap_or_else(|_| {
        warn!(path = %cli.config, "config file not found, using defaults");
        include_str!("../config/default.toml").to_string()
    });
    let mut config: AppConfig = toml::from_str(&config_str)?;

    // Environment overrides for the knobs that change per deployment
    if let Ok(v) = std::env::var("WIKIGRAPH_DB") {
        config.database.path = v;
    }
    if let Ok(v) = std::env::var("WIKIGRAPH_SNAPSHOT") {
        config.graph.snapshot_path = v;
    }
    if let Ok(v) = std::env::var("WIKIGRAPH_RATE_LIMIT") {
        match v.parse::<f64>() {
            Ok(rate) if rate > 0.0 => config.fetcher.requests_per_second = rate,
            _ => warn!(value = %v, "ignoring bad WIKIGRAPH_RATE_LIMIT"),
        }
    }
    if let Ok(v) = std::env::var("WIKIGRAPH_WORKERS") {
        match v.parse::<usize>() {
            Ok(n) if n > 0 && n <= 128 => config.crawler.workers = n,
            _ => warn!(value = %v, "ignoring bad WIKIGRAPH_WORKERS"),
        }
    }

    match cli.command {
        Commands::Crawl {
            seeds,
            seed,
            depth,
            max_pages,
        } => {
            run_crawl(config, seeds, seed, depth, max_pages).await?;
        }
        Commands::Serve { bind } => {
            commands::serve::run(config, bind).await?;
        }
        Commands::Status => {
            commands::status::run(config).await?;
        }
    }

    Ok(())
}
