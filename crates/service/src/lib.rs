pub mod loader;
pub mod service;
pub mod snapshot;

pub use loader::GraphLoader;
pub use service::{GraphService, GraphServiceError, GraphState};
