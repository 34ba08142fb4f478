//! HTTP surface over the graph service: health, per-page lookups, shortest
//! paths, bounded neighborhoods, and crawl job submission.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use wikigraph_core::{cancel_pair, AppConfig, ArticleFetcher, CrawlerConfig};
use wikigraph_crawler::CrawlEngine;
use wikigraph_fetcher::WikipediaFetcher;
use wikigraph_graph::{bfs_shortest_path, bidirectional_shortest_path, neighborhood, Graph};
use wikigraph_service::{GraphLoader, GraphService, GraphState};
use wikigraph_storage::Storage;

#[derive(Clone)]
struct AppState {
    service: Arc<GraphService>,
    storage: Storage,
    fetcher: Arc<dyn ArticleFetcher>,
    crawler_config: CrawlerConfig,
    jobs: Arc<DashMap<String, String>>,
    job_seq: Arc<AtomicU64>,
}

pub async fn run(config: AppConfig, bind_override: Option<String>) -> Result<()> {
    let storage = Storage::new(&config.database.path).await?;
    storage.run_migrations().await?;

    let loader = GraphLoader::new(
        storage.clone(),
        config.graph.snapshot_path.clone(),
        config.graph.max_cache_age_seconds,
    );
    let service = Arc::new(GraphService::new(
        storage.clone(),
        loader,
        Duration::from_secs(config.graph.refresh_interval_seconds),
    ));
    service.start().await;

    let fetcher: Arc<dyn ArticleFetcher> = Arc::new(WikipediaFetcher::new(&config.fetcher)?);
    let state = AppState {
        service: Arc::clone(&service),
        storage,
        fetcher,
        crawler_config: config.crawler.clone(),
        jobs: Arc::new(DashMap::new()),
        job_seq: Arc::new(AtomicU64::new(0)),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/page/:title", get(page))
        .route("/path", get(shortest_path))
        .route("/connections/:title", get(connections))
        .route("/crawl", post(start_crawl))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let bind = bind_override.unwrap_or_else(|| config.server.bind.clone());
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(addr = %bind, "serving graph API");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let grace = Duration::from_secs(config.server.shutdown_grace_seconds);
    if tokio::time::timeout(grace, service.stop()).await.is_err() {
        warn!("graph service did not stop within the shutdown grace period");
    }
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

async fn health(State(state): State<AppState>) -> Response {
    let (graph_state, load_error) = state.service.state().await;
    let (nodes, edges) = state.service.graph_stats().await;
    let status = match graph_state {
        GraphState::Uninitialized => "initializing",
        GraphState::Loading => "loading",
        GraphState::Ready => "healthy",
        GraphState::Error => "error",
    };
    let mut body = json!({
        "status": status,
        "graph": { "nodes": nodes, "edges": edges },
        "graph_ready": graph_state == GraphState::Ready,
        "embeddings_enabled": false,
    });
    if let Some(load_error) = load_error {
        body["error"] = json!(load_error);
    }
    let code = if graph_state == GraphState::Error {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(body)).into_response()
}

/// Query endpoints serve only a ready graph; anything else gets a 503 with
/// a retry hint and the current stage.
async fn ready_graph(state: &AppState) -> Result<Arc<RwLock<Graph>>, Response> {
    match state.service.graph().await {
        Ok(graph) => Ok(graph),
        Err(_) => {
            let (graph_state, _) = state.service.state().await;
            let mut resp = (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "graph_loading", "stage": graph_state.as_str() })),
            )
                .into_response();
            resp.headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("2"));
            Err(resp)
        }
    }
}

async fn page(Path(title): Path<String>, State(state): State<AppState>) -> Response {
    let graph = match ready_graph(&state).await {
        Ok(g) => g,
        Err(resp) => return resp,
    };
    let g = graph.read().await;
    let Some(id) = g.get(&title) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "page_not_found", "title": title })),
        )
            .into_response();
    };
    let links = g.out_titles(id);
    let in_links = g.in_titles(id);
    Json(json!({
        "title": g.title(id),
        "links": links,
        "link_count": links.len(),
        "in_links": in_links,
        "in_link_count": in_links.len(),
        "cached": true,
    }))
    .into_response()
}

#[derive(Deserialize)]
struct PathParams {
    from: String,
    to: String,
    algorithm: Option<String>,
    max_depth: Option<u32>,
}

async fn shortest_path(
    Query(params): Query<PathParams>,
    State(state): State<AppState>,
) -> Response {
    let graph = match ready_graph(&state).await {
        Ok(g) => g,
        Err(resp) => return resp,
    };
    let algorithm = params.algorithm.as_deref().unwrap_or("bfs");
    if !matches!(algorithm, "bfs" | "bidirectional") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "unknown algorithm", "algorithm": algorithm })),
        )
            .into_response();
    }
    let max_depth = params.max_depth.unwrap_or(6).clamp(1, 20);

    let started = Instant::now();
    let g = graph.read().await;
    let result = match algorithm {
        "bidirectional" => {
            bidirectional_shortest_path(&g, &params.from, &params.to, Some(max_depth))
        }
        _ => bfs_shortest_path(&g, &params.from, &params.to, Some(max_depth)),
    };
    drop(g);
    let duration_ms = started.elapsed().as_millis() as u64;

    let mut body = json!({
        "found": result.found,
        "from": params.from,
        "to": params.to,
        "hops": result.hops,
        "explored": result.explored,
        "algorithm": algorithm,
        "duration_ms": duration_ms,
    });
    if result.found {
        body["path"] = json!(result.path);
    }
    Json(body).into_response()
}

#[derive(Deserialize)]
struct ConnectionsParams {
    depth: Option<u32>,
    max_nodes: Option<usize>,
}

async fn connections(
    Path(title): Path<String>,
    Query(params): Query<ConnectionsParams>,
    State(state): State<AppState>,
) -> Response {
    let graph = match ready_graph(&state).await {
        Ok(g) => g,
        Err(resp) => return resp,
    };
    let depth = params.depth.unwrap_or(2).clamp(1, 5);
    let max_nodes = params.max_nodes.unwrap_or(1000).clamp(1, 10_000);

    let g = graph.read().await;
    let Some(sub) = neighborhood(&g, &title, depth, max_nodes) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "page_not_found", "title": title })),
        )
            .into_response();
    };
    drop(g);

    Json(json!({
        "center": sub.center,
        "depth": depth,
        "nodes": sub.nodes,
        "edges": sub.edges,
        "node_count": sub.nodes.len(),
        "edge_count": sub.edges.len(),
    }))
    .into_response()
}

#[derive(Deserialize)]
struct CrawlRequest {
    title: String,
    depth: Option<u32>,
    max_pages: Option<usize>,
}

async fn start_crawl(State(state): State<AppState>, Json(req): Json<CrawlRequest>) -> Response {
    if req.title.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "title must not be empty" })),
        )
            .into_response();
    }

    let mut cfg = state.crawler_config.clone();
    cfg.max_depth = req.depth.unwrap_or(cfg.max_depth).clamp(1, 50);
    cfg.max_pages = req.max_pages.unwrap_or(cfg.max_pages).clamp(1, 500_000);

    let job_id = format!(
        "crawl-{}-{}",
        Utc::now().timestamp_millis(),
        state.job_seq.fetch_add(1, Ordering::Relaxed)
    );
    state.jobs.insert(job_id.clone(), "running".to_string());

    let engine = CrawlEngine::new(state.storage.clone(), Arc::clone(&state.fetcher), cfg);
    let jobs = Arc::clone(&state.jobs);
    let job = job_id.clone();
    let title = req.title.clone();
    let (cancel, token) = cancel_pair();
    tokio::spawn(async move {
        let _cancel = cancel; // keeps the crawl cancellable-in-principle alive
        match engine.run(&[title], token).await {
            Ok(stats) => {
                info!(
                    job = %job,
                    fetched = stats.pages_fetched,
                    skipped = stats.pages_skipped,
                    errored = stats.pages_errored,
                    "crawl job finished"
                );
                jobs.insert(job, "completed".to_string());
            }
            Err(e) => {
                error!(job = %job, "crawl job failed: {e:#}");
                jobs.insert(job, "failed".to_string());
            }
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "job_id": job_id,
            "status": "started",
            "message": format!("crawl of '{}' started", req.title),
        })),
    )
        .into_response()
}
