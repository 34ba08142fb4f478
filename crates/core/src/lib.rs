pub mod cancel;
pub mod config;
pub mod error;
pub mod types;

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use config::{
    AppConfig, CrawlerConfig, DatabaseConfig, FetcherConfig, GraphConfig, ServerConfig,
};
pub use error::CrawlError;
pub use types::*;
