//! Graph service state machine.
//!
//! The HTTP surface needs to come up immediately, so loading happens in a
//! background task: uninitialized → loading → ready | error, with ready →
//! loading again on a forced rebuild. Readers get the graph only in
//! `ready`; the swap on load completion happens under the exclusive lock,
//! so a reader sees the old graph or the new one, never a half-built one.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use wikigraph_core::{cancel_pair, CancelHandle, CancelToken, PageStatus};
use wikigraph_graph::Graph;
use wikigraph_storage::Storage;

use crate::loader::GraphLoader;
use crate::snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    Uninitialized,
    Loading,
    Ready,
    Error,
}

impl GraphState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GraphState::Uninitialized => "uninitialized",
            GraphState::Loading => "loading",
            GraphState::Ready => "ready",
            GraphState::Error => "error",
        }
    }
}

#[derive(Debug, Error)]
pub enum GraphServiceError {
    #[error("graph not initialized")]
    Uninitialized,

    #[error("graph is loading")]
    Loading,

    #[error("graph load failed: {0}")]
    Failed(String),

    #[error("a reload is already in progress")]
    ReloadInProgress,
}

struct StateCell {
    state: GraphState,
    error: Option<String>,
}

struct Inner {
    graph: Arc<RwLock<Graph>>,
    state: Mutex<StateCell>,
    loader: GraphLoader,
    storage: Storage,
    last_refresh: Mutex<DateTime<Utc>>,
}

pub struct GraphService {
    inner: Arc<Inner>,
    refresh_interval: Duration,
    tasks: Mutex<Option<Tasks>>,
}

struct Tasks {
    cancel: CancelHandle,
    handles: Vec<JoinHandle<()>>,
}

impl GraphService {
    pub fn new(storage: Storage, loader: GraphLoader, refresh_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                graph: Arc::new(RwLock::new(Graph::new())),
                state: Mutex::new(StateCell {
                    state: GraphState::Uninitialized,
                    error: None,
                }),
                loader,
                storage,
                last_refresh: Mutex::new(Utc::now()),
            }),
            refresh_interval,
            tasks: Mutex::new(None),
        }
    }

    /// Kick off the background load (and the periodic refresh when enabled).
    /// Subsequent calls are no-ops.
    pub async fn start(&self) {
        {
            let mut cell = self.inner.state.lock().await;
            if cell.state != GraphState::Uninitialized {
                warn!(state = cell.state.as_str(), "start() called twice, ignoring");
                return;
            }
            cell.state = GraphState::Loading;
            cell.error = None;
        }

        let (cancel, token) = cancel_pair();
        let mut handles = Vec::new();

        handles.push(tokio::spawn(run_load(
            Arc::clone(&self.inner),
            false,
            token.clone(),
        )));

        if !self.refresh_interval.is_zero() {
            handles.push(tokio::spawn(run_refresh(
                Arc::clone(&self.inner),
                self.refresh_interval,
                token,
            )));
        }

        *self.tasks.lock().await = Some(Tasks { cancel, handles });
    }

    pub async fn state(&self) -> (GraphState, Option<String>) {
        let cell = self.inner.state.lock().await;
        (cell.state, cell.error.clone())
    }

    /// The shared graph handle, only while `ready`.
    pub async fn graph(&self) -> Result<Arc<RwLock<Graph>>, GraphServiceError> {
        let cell = self.inner.state.lock().await;
        match cell.state {
            GraphState::Ready => Ok(Arc::clone(&self.inner.graph)),
            GraphState::Uninitialized => Err(GraphServiceError::Uninitialized),
            GraphState::Loading => Err(GraphServiceError::Loading),
            GraphState::Error => Err(GraphServiceError::Failed(
                cell.error.clone().unwrap_or_else(|| "unknown".to_string()),
            )),
        }
    }

    /// Node and edge counts of whatever graph is currently swapped in
    /// (zeros before the first load completes).
    pub async fn graph_stats(&self) -> (usize, u64) {
        let g = self.inner.graph.read().await;
        (g.node_count(), g.edge_count())
    }

    /// Rebuild from the repository, ignoring any snapshot. Rejected while a
    /// load is already running; allowed from both `ready` and `error`.
    pub async fn force_reload(&self) -> Result<(), GraphServiceError> {
        {
            let mut cell = self.inner.state.lock().await;
            match cell.state {
                GraphState::Loading => return Err(GraphServiceError::ReloadInProgress),
                GraphState::Uninitialized => return Err(GraphServiceError::Uninitialized),
                GraphState::Ready | GraphState::Error => {}
            }
            cell.state = GraphState::Loading;
            cell.error = None;
        }

        let mut tasks = self.tasks.lock().await;
        let slot = tasks.get_or_insert_with(|| {
            // tasks can be gone after stop(); reloading is still legal
            let (cancel, _token) = cancel_pair();
            Tasks {
                cancel,
                handles: Vec::new(),
            }
        });
        let token = slot.cancel.token();
        slot.handles
            .push(tokio::spawn(run_load(Arc::clone(&self.inner), true, token)));
        info!("forced graph rebuild started");
        Ok(())
    }

    /// Cancel background tasks and wait for them to wind down.
    pub async fn stop(&self) {
        let Some(tasks) = self.tasks.lock().await.take() else {
            return;
        };
        tasks.cancel.cancel();
        for handle in tasks.handles {
            let _ = handle.await;
        }
        info!("graph service stopped");
    }
}

async fn run_load(inner: Arc<Inner>, force_rebuild: bool, cancel: CancelToken) {
    let result = tokio::select! {
        r = inner.loader.load(force_rebuild) => r,
        _ = cancel.cancelled() => {
            info!("graph load cancelled");
            return;
        }
    };

    match result {
        Ok(graph) => {
            let nodes = graph.node_count();
            let edges = graph.edge_count();
            {
                let mut slot = inner.graph.write().await;
                *slot = graph;
            }
            *inner.last_refresh.lock().await = Utc::now();
            let mut cell = inner.state.lock().await;
            cell.state = GraphState::Ready;
            cell.error = None;
            info!(nodes, edges, "graph ready");
        }
        Err(e) => {
            error!("graph load failed: {e:#}");
            let mut cell = inner.state.lock().await;
            cell.state = GraphState::Error;
            cell.error = Some(format!("{e:#}"));
        }
    }
}

async fn run_refresh(inner: Arc<Inner>, interval: Duration, cancel: CancelToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // the first tick fires immediately; skip it
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => break,
        }
        if let Err(e) = refresh_once(&inner).await {
            warn!("incremental refresh failed: {e:#}");
        }
    }
}

/// One incremental refresh pass: pull pages updated since the watermark,
/// splice their link sets into the live graph under the write lock, then
/// persist a best-effort snapshot.
async fn refresh_once(inner: &Inner) -> Result<()> {
    {
        let cell = inner.state.lock().await;
        if cell.state != GraphState::Ready {
            return Ok(());
        }
    }

    let since = *inner.last_refresh.lock().await;
    let now = Utc::now();
    let updates = inner.storage.get_updated_pages(since).await?;
    if updates.is_empty() {
        *inner.last_refresh.lock().await = now;
        return Ok(());
    }

    // read the new link sets before taking the write lock, so queries stall
    // only for the splice itself
    let mut link_sets: Vec<(String, Option<Vec<String>>)> = Vec::with_capacity(updates.len());
    for page in &updates {
        let targets = if page.status == PageStatus::Success {
            Some(inner.storage.get_page_links(&page.title).await?)
        } else {
            None
        };
        link_sets.push((page.title.clone(), targets));
    }

    {
        let mut graph = inner.graph.write().await;
        for (title, targets) in &link_sets {
            graph.remove_out_links(title);
            if let Some(targets) = targets {
                graph.add_node(title);
                for target in targets {
                    graph.add_edge(title, target);
                }
            }
        }
    }

    {
        let graph = inner.graph.read().await;
        if let Err(e) = snapshot::save(&graph, inner.loader.snapshot_path()) {
            warn!("snapshot persist after refresh failed: {e:#}");
        }
    }

    *inner.last_refresh.lock().await = now;
    info!(updated = updates.len(), "incremental refresh applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded_storage() -> Storage {
        let s = Storage::in_memory().await.unwrap();
        s.run_migrations().await.unwrap();
        let a = s.get_or_create_page("A").await.unwrap();
        s.add_links(a.id, &["B".to_string()]).await.unwrap();
        s.update_page_status("A", PageStatus::Success, Some("h1"), None)
            .await
            .unwrap();
        s
    }

    fn service(storage: Storage, dir: &tempfile::TempDir) -> GraphService {
        let loader = GraphLoader::new(storage.clone(), dir.path().join("graph.snapshot"), 3600);
        GraphService::new(storage, loader, Duration::ZERO)
    }

    async fn wait_until_settled(svc: &GraphService) -> GraphState {
        for _ in 0..100 {
            let (state, _) = svc.state().await;
            if state == GraphState::Ready || state == GraphState::Error {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("service never left loading");
    }

    #[tokio::test]
    async fn test_graph_gated_until_ready() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(seeded_storage().await, &dir);
        assert!(matches!(
            svc.graph().await,
            Err(GraphServiceError::Uninitialized)
        ));

        svc.start().await;
        assert_eq!(wait_until_settled(&svc).await, GraphState::Ready);

        let graph = svc.graph().await.unwrap();
        let g = graph.read().await;
        assert_eq!(g.node_count(), 2);
        assert_eq!(g.edge_count(), 1);
        drop(g);
        svc.stop().await;
    }

    #[tokio::test]
    async fn test_load_failure_sets_error_and_force_reload_recovers() {
        let dir = tempfile::tempdir().unwrap();
        // no migrations: the first load fails on the missing tables
        let storage = Storage::in_memory().await.unwrap();
        let svc = service(storage.clone(), &dir);

        svc.start().await;
        assert_eq!(wait_until_settled(&svc).await, GraphState::Error);
        assert!(matches!(
            svc.graph().await,
            Err(GraphServiceError::Failed(_))
        ));

        storage.run_migrations().await.unwrap();
        svc.force_reload().await.unwrap();
        assert_eq!(wait_until_settled(&svc).await, GraphState::Ready);
        svc.stop().await;
    }

    #[tokio::test]
    async fn test_force_reload_rejected_while_loading() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(seeded_storage().await, &dir);
        assert!(matches!(
            svc.force_reload().await,
            Err(GraphServiceError::Uninitialized)
        ));
        svc.start().await;
        wait_until_settled(&svc).await;

        svc.force_reload().await.unwrap();
        // the service is now loading again; a second force must bounce
        // (unless the reload already finished, which is fine too)
        match svc.force_reload().await {
            Err(GraphServiceError::ReloadInProgress) | Ok(()) => {}
            other => panic!("unexpected {other:?}"),
        }
        wait_until_settled(&svc).await;
        svc.stop().await;
    }

    #[tokio::test]
    async fn test_refresh_applies_deltas() {
        let dir = tempfile::tempdir().unwrap();
        let storage = seeded_storage().await;
        let svc = service(storage.clone(), &dir);
        svc.start().await;
        assert_eq!(wait_until_settled(&svc).await, GraphState::Ready);

        // B gets fetched after the initial load
        tokio::time::sleep(Duration::from_millis(5)).await;
        let b = storage.get_or_create_page("B").await.unwrap();
        storage.add_links(b.id, &["C".to_string()]).await.unwrap();
        storage
            .update_page_status("B", PageStatus::Success, Some("h2"), None)
            .await
            .unwrap();

        refresh_once(&svc.inner).await.unwrap();

        let graph = svc.graph().await.unwrap();
        let g = graph.read().await;
        assert_eq!(g.edge_count(), 2);
        assert!(g.contains("C"));
        drop(g);

        // second refresh with no changes is a no-op
        refresh_once(&svc.inner).await.unwrap();
        let (nodes, edges) = svc.graph_stats().await;
        assert_eq!((nodes, edges), (3, 2));
        svc.stop().await;
    }

    #[tokio::test]
    async fn test_refresh_removes_stale_links() {
        let dir = tempfile::tempdir().unwrap();
        let storage = seeded_storage().await;
        let svc = service(storage.clone(), &dir);
        svc.start().await;
        wait_until_settled(&svc).await;

        // A is re-fetched and now links to C instead of B
        tokio::time::sleep(Duration::from_millis(5)).await;
        let a = storage.get_page("A").await.unwrap().unwrap();
        storage
            .replace_links(a.id, &["C".to_string()])
            .await
            .unwrap();
        storage
            .update_page_status("A", PageStatus::Success, Some("h1b"), None)
            .await
            .unwrap();

        refresh_once(&svc.inner).await.unwrap();

        let graph = svc.graph().await.unwrap();
        let g = graph.read().await;
        let a_id = g.get("A").unwrap();
        assert_eq!(g.out_titles(a_id), vec!["C".to_string()]);
        drop(g);
        svc.stop().await;
    }
}
