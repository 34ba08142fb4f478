use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "wikigraph", about = "Wikipedia link-graph crawler & path-finding service")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Crawl articles breadth-first from seed titles
    Crawl {
        /// Seed titles (comma-separated, or a path to a file with one per line)
        #[arg(short, long)]
        seeds: Option<String>,

        /// Single seed title
        #[arg(long)]
        seed: Option<String>,

        /// Maximum crawl rounds
        #[arg(short, long)]
        depth: Option<u32>,

        /// Page budget for this run
        #[arg(long)]
        max_pages: Option<usize>,
    },
    /// Serve the graph query API
    Serve {
        /// Listen address (overrides the config file)
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Show crawl progress and database stats
    Status,
}
