use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub crawler: CrawlerConfig,
    pub fetcher: FetcherConfig,
    pub database: DatabaseConfig,
    pub graph: GraphConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrawlerConfig {
    /// Maximum number of fetch rounds per crawl (not graph hops).
    pub max_depth: u32,
    /// Pending pages pulled per round.
    pub batch_size: usize,
    /// Total page budget for one crawl run.
    pub max_pages: usize,
    /// Concurrent fetch workers. The rate limiter throttles the aggregate.
    pub workers: usize,
    #[serde(default)]
    pub stop_on_error: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetcherConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub requests_per_second: f64,
    pub request_timeout_seconds: u64,
    pub user_agent: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GraphConfig {
    pub snapshot_path: String,
    /// Snapshots older than this are ignored on startup.
    pub max_cache_age_seconds: u64,
    /// Incremental refresh interval. Zero disables the refresh task.
    #[serde(default)]
    pub refresh_interval_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
}

fn default_base_url() -> String {
    "https://en.wikipedia.org".to_string()
}

fn default_shutdown_grace() -> u64 {
    10
}
