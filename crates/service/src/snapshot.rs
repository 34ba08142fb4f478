//! Binary on-disk snapshot of the in-memory graph.
//!
//! The file is self-describing: a version constant, the write timestamp and
//! the edge count, then every node with its out- and in-neighbor titles.
//! Being keyed by title rather than node index keeps the format stable
//! across rebuilds that assign different indices.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use wikigraph_graph::Graph;

/// Bump to invalidate every snapshot written by older builds.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    /// UTC epoch seconds at write time.
    saved_at: i64,
    edge_count: u64,
    nodes: Vec<SnapshotNode>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotNode {
    title: String,
    out: Vec<String>,
    inc: Vec<String>,
}

/// Serialize `graph` to `path` atomically: write `<path>.tmp`, fsync,
/// rename. On any failure the temp file is removed and the previous
/// snapshot, if any, is left untouched.
pub fn save(graph: &Graph, path: &Path) -> Result<()> {
    let file = SnapshotFile {
        version: SNAPSHOT_VERSION,
        saved_at: Utc::now().timestamp(),
        edge_count: graph.edge_count(),
        nodes: graph
            .node_ids()
            .map(|id| SnapshotNode {
                title: graph.title(id).to_string(),
                out: graph.out_titles(id),
                inc: graph.in_titles(id),
            })
            .collect(),
    };
    let bytes = bincode::serialize(&file).context("snapshot serialization failed")?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating snapshot directory {parent:?}"))?;
        }
    }

    let tmp = tmp_path(path);
    let result = write_and_rename(&bytes, &tmp, path);
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_and_rename(bytes: &[u8], tmp: &Path, path: &Path) -> Result<()> {
    let mut file = File::create(tmp).with_context(|| format!("creating {tmp:?}"))?;
    file.write_all(bytes).context("writing snapshot")?;
    file.sync_all().context("fsync snapshot")?;
    drop(file);
    fs::rename(tmp, path).with_context(|| format!("renaming {tmp:?} -> {path:?}"))?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".tmp");
    PathBuf::from(s)
}

/// Deserialize a snapshot and rebuild the graph in two passes: all nodes
/// first, then the edges. An out-neighbor title missing from the node set is
/// skipped rather than fatal, so minor corruption degrades instead of
/// wiping the cache. Returns the graph and its write time.
pub fn load(path: &Path) -> Result<(Graph, DateTime<Utc>)> {
    let bytes = fs::read(path).with_context(|| format!("reading snapshot {path:?}"))?;
    let file: SnapshotFile =
        bincode::deserialize(&bytes).context("snapshot deserialization failed")?;
    if file.version != SNAPSHOT_VERSION {
        bail!(
            "snapshot version {} does not match current {}",
            file.version,
            SNAPSHOT_VERSION
        );
    }
    let saved_at = Utc
        .timestamp_opt(file.saved_at, 0)
        .single()
        .with_context(|| format!("bad snapshot timestamp {}", file.saved_at))?;

    let mut graph = Graph::new();
    for node in &file.nodes {
        graph.add_node(&node.title);
    }
    for node in &file.nodes {
        for target in &node.out {
            if !graph.contains(target) {
                continue;
            }
            graph.add_edge(&node.title, target);
        }
    }

    if graph.edge_count() != file.edge_count {
        warn!(
            expected = file.edge_count,
            actual = graph.edge_count(),
            "snapshot edge count mismatch after restore"
        );
    }
    Ok((graph, saved_at))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_graph() -> Graph {
        let mut g = Graph::new();
        g.add_edge("A", "B");
        g.add_edge("A", "C");
        g.add_edge("B", "C");
        g.add_node("Isolated");
        g
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.snapshot");
        let g = sample_graph();
        save(&g, &path).unwrap();

        let (restored, saved_at) = load(&path).unwrap();
        assert_eq!(restored.node_count(), g.node_count());
        assert_eq!(restored.edge_count(), g.edge_count());
        assert!(saved_at <= Utc::now());

        for id in g.node_ids() {
            let title = g.title(id);
            let rid = restored.get(title).unwrap();
            assert_eq!(restored.out_titles(rid), g.out_titles(id));
            assert_eq!(restored.in_titles(rid), g.in_titles(id));
        }
    }

    #[test]
    fn test_no_tmp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.snapshot");
        save(&sample_graph(), &path).unwrap();
        assert!(path.exists());
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.snapshot");
        let file = SnapshotFile {
            version: SNAPSHOT_VERSION + 1,
            saved_at: Utc::now().timestamp(),
            edge_count: 0,
            nodes: Vec::new(),
        };
        fs::write(&path, bincode::serialize(&file).unwrap()).unwrap();
        assert!(load(&path).is_err());
    }

    #[test]
    fn test_garbage_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.snapshot");
        fs::write(&path, b"not a snapshot").unwrap();
        assert!(load(&path).is_err());
    }

    #[test]
    fn test_missing_neighbor_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.snapshot");
        let file = SnapshotFile {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now().timestamp(),
            edge_count: 2,
            nodes: vec![SnapshotNode {
                title: "A".to_string(),
                out: vec!["A-missing".to_string()],
                inc: vec![],
            }],
        };
        fs::write(&path, bincode::serialize(&file).unwrap()).unwrap();
        let (g, _) = load(&path).unwrap();
        assert_eq!(g.node_count(), 1);
        assert_eq!(g.edge_count(), 0);
    }
}
