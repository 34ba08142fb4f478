//! Page repository over SQLite.
//!
//! SQLite allows exactly one concurrent writer, so all mutations go through
//! a dedicated single-connection pool while reads run on a wider pool over
//! the same WAL-mode file. Every multi-row write is a single transaction.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::info;

use wikigraph_core::{GraphData, Page, PageStatus};

/// Rows per INSERT statement in bulk writes. Keeps bind counts comfortably
/// under SQLite's variable limit.
const INSERT_BATCH_SIZE: usize = 500;

#[derive(Clone)]
pub struct Storage {
    read_pool: SqlitePool,
    write_pool: SqlitePool,
}

impl Storage {
    /// Open (creating if missing) the database at `path`.
    pub async fn new(path: &str) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .with_context(|| format!("invalid database path {path:?}"))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let write_pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts.clone())
            .await?;
        let read_pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(opts)
            .await?;

        info!(path, "opened sqlite database");
        Ok(Self {
            read_pool,
            write_pool,
        })
    }

    /// Ephemeral in-memory store. A single shared connection serves both
    /// roles, since each `:memory:` connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;
        Ok(Self {
            read_pool: pool.clone(),
            write_pool: pool,
        })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../migrations/001_init.sql"))
            .execute(&self.write_pool)
            .await?;
        info!("migrations complete");
        Ok(())
    }

    pub async fn check_connectivity(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.read_pool).await?;
        Ok(())
    }

    pub async fn get_page(&self, title: &str) -> Result<Option<Page>> {
        let row = sqlx::query("SELECT * FROM pages WHERE title = ?")
            .bind(title)
            .fetch_optional(&self.read_pool)
            .await?;
        row.as_ref().map(page_from_row).transpose()
    }

    /// Idempotent insert; new pages start `pending`.
    pub async fn get_or_create_page(&self, title: &str) -> Result<Page> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO pages (title, status, created_at, updated_at)
             VALUES (?, 'pending', ?, ?)
             ON CONFLICT (title) DO NOTHING",
        )
        .bind(title)
        .bind(now)
        .bind(now)
        .execute(&self.write_pool)
        .await?;

        self.get_page(title)
            .await?
            .ok_or_else(|| anyhow!("page {title:?} missing after insert"))
    }

    /// Move a page to a terminal (or back to pending) status. `fetched_at`
    /// is stamped for success/redirect/not_found and cleared otherwise;
    /// `content_hash` and `redirect_to` are kept only when their status
    /// invariant says they exist.
    pub async fn update_page_status(
        &self,
        title: &str,
        status: PageStatus,
        content_hash: Option<&str>,
        redirect_to: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now();
        let fetched_at = status.records_fetch_time().then_some(now);
        let content_hash = match status {
            PageStatus::Success => {
                Some(content_hash.ok_or_else(|| anyhow!("success status requires a content hash"))?)
            }
            _ => None,
        };
        let redirect_to = match status {
            PageStatus::Redirect => {
                Some(redirect_to.ok_or_else(|| anyhow!("redirect status requires a target"))?)
            }
            _ => None,
        };

        let result = sqlx::query(
            "UPDATE pages
             SET status = ?, content_hash = ?, redirect_to = ?, fetched_at = ?, updated_at = ?
             WHERE title = ?",
        )
        .bind(status.as_str())
        .bind(content_hash)
        .bind(redirect_to)
        .bind(fetched_at)
        .bind(now)
        .bind(title)
        .execute(&self.write_pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!("cannot update unknown page {title:?}");
        }
        Ok(())
    }

    /// FIFO crawl frontier: oldest pending pages first, id as the tiebreak
    /// so same-timestamp inserts stay in insertion order.
    pub async fn get_pending_pages(&self, limit: usize) -> Result<Vec<Page>> {
        let rows = sqlx::query(
            "SELECT * FROM pages WHERE status = 'pending'
             ORDER BY created_at ASC, id ASC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.read_pool)
        .await?;
        rows.iter().map(page_from_row).collect()
    }

    /// Bulk link insert; duplicates are silently ignored. Returns the number
    /// of rows actually inserted.
    pub async fn add_links(&self, source_id: i64, targets: &[String]) -> Result<u64> {
        let mut tx = self.write_pool.begin().await?;
        let inserted = insert_links(&mut tx, source_id, targets).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    /// Atomic delete-then-insert of a page's whole link set, for re-fetches
    /// whose links changed.
    pub async fn replace_links(&self, source_id: i64, targets: &[String]) -> Result<()> {
        let mut tx = self.write_pool.begin().await?;
        sqlx::query("DELETE FROM links WHERE source_id = ?")
            .bind(source_id)
            .execute(&mut *tx)
            .await?;
        insert_links(&mut tx, source_id, targets).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Make sure every title exists as a page (pending if new) so that link
    /// targets become crawlable. Returns the number of pages created.
    pub async fn ensure_pages_exist(&self, titles: &[String]) -> Result<u64> {
        if titles.is_empty() {
            return Ok(0);
        }
        let now = Utc::now();
        let mut tx = self.write_pool.begin().await?;
        let mut created = 0u64;
        for chunk in titles.chunks(INSERT_BATCH_SIZE) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO pages (title, status, created_at, updated_at) ",
            );
            qb.push_values(chunk, |mut b, title| {
                b.push_bind(title.as_str())
                    .push_bind("pending")
                    .push_bind(now)
                    .push_bind(now);
            });
            created += qb.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(created)
    }

    /// Everything the graph loader needs in two queries: all edges whose
    /// source page is `success`, and the success pages with no outgoing
    /// links (so they still appear as nodes).
    pub async fn get_graph_data(&self) -> Result<GraphData> {
        let edge_rows = sqlx::query(
            "SELECT p.title AS source, l.target_title AS target
             FROM links l
             JOIN pages p ON p.id = l.source_id
             WHERE p.status = 'success'
             ORDER BY l.source_id, l.id",
        )
        .fetch_all(&self.read_pool)
        .await?;
        let edges = edge_rows
            .iter()
            .map(|row| Ok((row.try_get("source")?, row.try_get("target")?)))
            .collect::<Result<Vec<(String, String)>>>()?;

        let isolated_rows = sqlx::query(
            "SELECT p.title FROM pages p
             WHERE p.status = 'success'
               AND NOT EXISTS (SELECT 1 FROM links l WHERE l.source_id = p.id)
             ORDER BY p.id",
        )
        .fetch_all(&self.read_pool)
        .await?;
        let isolated = isolated_rows
            .iter()
            .map(|row| Ok(row.try_get("title")?))
            .collect::<Result<Vec<String>>>()?;

        Ok(GraphData { edges, isolated })
    }

    /// Pages whose `updated_at` is strictly after `since`, for the
    /// incremental graph refresh.
    pub async fn get_updated_pages(&self, since: DateTime<Utc>) -> Result<Vec<Page>> {
        let rows = sqlx::query("SELECT * FROM pages WHERE updated_at > ? ORDER BY updated_at ASC")
            .bind(since)
            .fetch_all(&self.read_pool)
            .await?;
        rows.iter().map(page_from_row).collect()
    }

    /// Current stored outgoing link targets of one page, in insertion order.
    pub async fn get_page_links(&self, title: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT l.target_title FROM links l
             JOIN pages p ON p.id = l.source_id
             WHERE p.title = ?
             ORDER BY l.id",
        )
        .bind(title)
        .fetch_all(&self.read_pool)
        .await?;
        rows.iter()
            .map(|row| Ok(row.try_get("target_title")?))
            .collect()
    }

    /// Delete a page; its outgoing links go with it via the cascade.
    pub async fn delete_page(&self, title: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM pages WHERE title = ?")
            .bind(title)
            .execute(&self.write_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_pages(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pages")
            .fetch_one(&self.read_pool)
            .await?;
        Ok(row.0)
    }

    pub async fn count_pages_with_status(&self, status: PageStatus) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pages WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.read_pool)
            .await?;
        Ok(row.0)
    }

    pub async fn count_links(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM links")
            .fetch_one(&self.read_pool)
            .await?;
        Ok(row.0)
    }
}

async fn insert_links(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    source_id: i64,
    targets: &[String],
) -> Result<u64> {
    let mut inserted = 0u64;
    for chunk in targets.chunks(INSERT_BATCH_SIZE) {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT OR IGNORE INTO links (source_id, target_title) ");
        qb.push_values(chunk, |mut b, target| {
            b.push_bind(source_id).push_bind(target.as_str());
        });
        inserted += qb.build().execute(&mut **tx).await?.rows_affected();
    }
    Ok(inserted)
}

fn page_from_row(row: &SqliteRow) -> Result<Page> {
    let status_str: String = row.try_get("status")?;
    let status = PageStatus::parse(&status_str)
        .ok_or_else(|| anyhow!("unknown page status {status_str:?}"))?;
    Ok(Page {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        status,
        content_hash: row.try_get("content_hash")?,
        redirect_to: row.try_get("redirect_to")?,
        fetched_at: row.try_get("fetched_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
