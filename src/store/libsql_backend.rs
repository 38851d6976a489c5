//! libSQL backend — async `Store` trait implementation.
//!
//! Supports local file and in-memory databases. One connection is reused
//! for all operations; `libsql::Connection` is `Send + Sync` and safe for
//! concurrent async use, and the engine serializes individual writes.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;

use crate::error::StoreError;
use crate::store::traits::{OverflowEntry, PendingReview, Reviewer, Source, SourcePolicy, Store};
use crate::transport::{CandidateId, ReviewerId, SourceId};

/// libSQL store backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and initialize the schema.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Open(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        self.conn
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS sources (
                    id INTEGER PRIMARY KEY,
                    policy INTEGER NOT NULL,
                    chance INTEGER NOT NULL,
                    posts_taken INTEGER NOT NULL DEFAULT 0
                );
                CREATE TABLE IF NOT EXISTS reviewers (
                    id INTEGER PRIMARY KEY,
                    menu_cursor INTEGER,
                    subscribed INTEGER NOT NULL DEFAULT 0,
                    elevated INTEGER NOT NULL DEFAULT 0
                );
                CREATE TABLE IF NOT EXISTS settings (
                    name TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS pending_reviews (
                    candidate TEXT NOT NULL,
                    reviewer INTEGER NOT NULL,
                    notification INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_pending_reviews_candidate
                    ON pending_reviews(candidate);
                CREATE TABLE IF NOT EXISTS overflow_queue (
                    source INTEGER NOT NULL,
                    message INTEGER NOT NULL,
                    enqueued_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_overflow_queue_enqueued
                    ON overflow_queue(enqueued_at);
                CREATE TABLE IF NOT EXISTS seen_hashes (
                    hash TEXT PRIMARY KEY,
                    first_seen TEXT NOT NULL
                );
                "#,
            )
            .await
            .map_err(|e| StoreError::Open(format!("Failed to create schema: {e}")))?;
        Ok(())
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn query_err(e: libsql::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

/// Convert `Option<i64>` to libsql Value.
fn opt_int(v: Option<i64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Integer(v),
        None => libsql::Value::Null,
    }
}

/// Parse an RFC 3339 string into `DateTime<Utc>`.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn row_to_source(row: &libsql::Row) -> Result<Source, libsql::Error> {
    let id: i64 = row.get(0)?;
    let policy: i64 = row.get(1)?;
    let chance: i64 = row.get(2)?;
    let posts_taken: i64 = row.get(3)?;
    Ok(Source {
        id,
        policy: SourcePolicy::from_i64(policy),
        chance: chance.clamp(1, 100) as u8,
        posts_taken: posts_taken.max(0) as u64,
    })
}

fn row_to_reviewer(row: &libsql::Row) -> Result<Reviewer, libsql::Error> {
    let id: i64 = row.get(0)?;
    let menu_cursor: Option<i64> = row.get::<i64>(1).ok();
    let subscribed: i64 = row.get(2)?;
    let elevated: i64 = row.get(3)?;
    Ok(Reviewer {
        id,
        menu_cursor,
        subscribed: subscribed != 0,
        elevated: elevated != 0,
    })
}

fn row_to_pending_review(row: &libsql::Row) -> Result<Option<PendingReview>, libsql::Error> {
    let candidate: String = row.get(0)?;
    let reviewer: i64 = row.get(1)?;
    let notification: i64 = row.get(2)?;
    Ok(CandidateId::parse(&candidate).map(|candidate| PendingReview {
        candidate,
        reviewer,
        notification,
    }))
}

fn row_to_overflow(row: &libsql::Row) -> Result<OverflowEntry, libsql::Error> {
    let source: i64 = row.get(0)?;
    let message: i64 = row.get(1)?;
    let enqueued_at: String = row.get(2)?;
    Ok(OverflowEntry {
        source,
        message,
        enqueued_at: parse_datetime(&enqueued_at),
    })
}

// ── Store implementation ────────────────────────────────────────────

#[async_trait]
impl Store for LibSqlBackend {
    async fn insert_source(&self, source: &Source) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO sources (id, policy, chance, posts_taken) VALUES (?1, ?2, ?3, ?4)",
                params![
                    source.id,
                    source.policy.as_i64(),
                    source.chance as i64,
                    source.posts_taken as i64
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn delete_source(&self, id: SourceId) -> Result<(), StoreError> {
        self.conn()
            .execute("DELETE FROM sources WHERE id = ?1", params![id])
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn source(&self, id: SourceId) -> Result<Option<Source>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, policy, chance, posts_taken FROM sources WHERE id = ?1 LIMIT 1",
                params![id],
            )
            .await
            .map_err(query_err)?;
        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_source(&row).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    async fn sources(&self) -> Result<Vec<Source>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, policy, chance, posts_taken FROM sources ORDER BY id",
                (),
            )
            .await
            .map_err(query_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            out.push(row_to_source(&row).map_err(query_err)?);
        }
        Ok(out)
    }

    async fn update_source_policy(
        &self,
        id: SourceId,
        policy: SourcePolicy,
    ) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "UPDATE sources SET policy = ?1 WHERE id = ?2",
                params![policy.as_i64(), id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn update_source_chance(&self, id: SourceId, chance: u8) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "UPDATE sources SET chance = ?1 WHERE id = ?2",
                params![chance as i64, id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn bump_posts_taken(&self, id: SourceId) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "UPDATE sources SET posts_taken = posts_taken + 1 WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn insert_reviewer(&self, reviewer: &Reviewer) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO reviewers (id, menu_cursor, subscribed, elevated) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    reviewer.id,
                    opt_int(reviewer.menu_cursor),
                    reviewer.subscribed as i64,
                    reviewer.elevated as i64
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn delete_reviewer(&self, id: ReviewerId) -> Result<(), StoreError> {
        self.conn()
            .execute("DELETE FROM reviewers WHERE id = ?1", params![id])
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn reviewer(&self, id: ReviewerId) -> Result<Option<Reviewer>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, menu_cursor, subscribed, elevated FROM reviewers \
                 WHERE id = ?1 LIMIT 1",
                params![id],
            )
            .await
            .map_err(query_err)?;
        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_reviewer(&row).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    async fn reviewers(&self) -> Result<Vec<Reviewer>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, menu_cursor, subscribed, elevated FROM reviewers ORDER BY id",
                (),
            )
            .await
            .map_err(query_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            out.push(row_to_reviewer(&row).map_err(query_err)?);
        }
        Ok(out)
    }

    async fn update_menu_cursor(
        &self,
        id: ReviewerId,
        cursor: Option<i64>,
    ) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "UPDATE reviewers SET menu_cursor = ?1 WHERE id = ?2",
                params![opt_int(cursor), id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn update_subscribed(&self, id: ReviewerId, subscribed: bool) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "UPDATE reviewers SET subscribed = ?1 WHERE id = ?2",
                params![subscribed as i64, id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn update_elevated(&self, id: ReviewerId, elevated: bool) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "UPDATE reviewers SET elevated = ?1 WHERE id = ?2",
                params![elevated as i64, id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn setting(&self, name: &str) -> Result<Option<String>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT value FROM settings WHERE name = ?1 LIMIT 1",
                params![name],
            )
            .await
            .map_err(query_err)?;
        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row.get::<String>(0).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    async fn put_setting(&self, name: &str, value: &str) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO settings (name, value) VALUES (?1, ?2) \
                 ON CONFLICT(name) DO UPDATE SET value = excluded.value",
                params![name, value],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn insert_pending_review(&self, review: &PendingReview) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO pending_reviews (candidate, reviewer, notification) \
                 VALUES (?1, ?2, ?3)",
                params![
                    review.candidate.to_string(),
                    review.reviewer,
                    review.notification
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn pending_reviews(
        &self,
        candidate: CandidateId,
    ) -> Result<Vec<PendingReview>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT candidate, reviewer, notification FROM pending_reviews \
                 WHERE candidate = ?1",
                params![candidate.to_string()],
            )
            .await
            .map_err(query_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            if let Some(review) = row_to_pending_review(&row).map_err(query_err)? {
                out.push(review);
            }
        }
        Ok(out)
    }

    async fn purge_pending_reviews(&self, candidate: CandidateId) -> Result<usize, StoreError> {
        let deleted = self
            .conn()
            .execute(
                "DELETE FROM pending_reviews WHERE candidate = ?1",
                params![candidate.to_string()],
            )
            .await
            .map_err(query_err)?;
        Ok(deleted as usize)
    }

    async fn push_overflow(&self, entry: &OverflowEntry) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO overflow_queue (source, message, enqueued_at) \
                 VALUES (?1, ?2, ?3)",
                params![
                    entry.source,
                    entry.message,
                    entry.enqueued_at.to_rfc3339()
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn pop_oldest_overflow(&self) -> Result<Option<OverflowEntry>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT source, message, enqueued_at FROM overflow_queue \
                 ORDER BY enqueued_at ASC LIMIT 1",
                (),
            )
            .await
            .map_err(query_err)?;
        let Some(row) = rows.next().await.map_err(query_err)? else {
            return Ok(None);
        };
        let entry = row_to_overflow(&row).map_err(query_err)?;
        self.conn()
            .execute(
                "DELETE FROM overflow_queue WHERE source = ?1 AND message = ?2",
                params![entry.source, entry.message],
            )
            .await
            .map_err(query_err)?;
        Ok(Some(entry))
    }

    async fn delete_overflow_for_source(&self, id: SourceId) -> Result<usize, StoreError> {
        let deleted = self
            .conn()
            .execute("DELETE FROM overflow_queue WHERE source = ?1", params![id])
            .await
            .map_err(query_err)?;
        Ok(deleted as usize)
    }

    async fn record_hash(
        &self,
        hash: &str,
        first_seen: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let inserted = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO seen_hashes (hash, first_seen) VALUES (?1, ?2)",
                params![hash, first_seen.to_rfc3339()],
            )
            .await
            .map_err(query_err)?;
        Ok(inserted > 0)
    }

    async fn hash_seen(&self, hash: &str) -> Result<bool, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT 1 FROM seen_hashes WHERE hash = ?1 LIMIT 1",
                params![hash],
            )
            .await
            .map_err(query_err)?;
        Ok(rows.next().await.map_err(query_err)?.is_some())
    }

    async fn delete_hash(&self, hash: &str) -> Result<(), StoreError> {
        self.conn()
            .execute("DELETE FROM seen_hashes WHERE hash = ?1", params![hash])
            .await
            .map_err(query_err)?;
        Ok(())
    }
}
