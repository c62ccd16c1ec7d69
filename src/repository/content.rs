//! Content repository: the durable store of ingested URLs.
//!
//! Producers insert rows by unique URL (duplicates fall through), handlers
//! update status and metadata, and batch processors reserve rows through the
//! checkout columns.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};

use super::{encode_timestamp, parse_timestamp, parse_timestamp_opt, Result};
use crate::models::{Content, ContentStatus, ContentType, NewContent};

/// SQLite-backed repository for content items.
pub struct ContentRepository {
    db_path: PathBuf,
}

impl ContentRepository {
    pub fn new(db_path: &Path) -> Result<Self> {
        let repo = Self {
            db_path: db_path.to_path_buf(),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection> {
        super::connect(&self.db_path)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS contents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL UNIQUE,
                source_url TEXT,
                content_type TEXT NOT NULL DEFAULT 'unknown',
                platform TEXT,
                source TEXT,
                title TEXT,
                status TEXT NOT NULL DEFAULT 'new',
                error_message TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                checked_out_by TEXT,
                checked_out_at TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                processed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_contents_type_status
                ON contents(content_type, status);
            CREATE INDEX IF NOT EXISTS idx_contents_checkout
                ON contents(checked_out_by, checked_out_at);
            CREATE INDEX IF NOT EXISTS idx_contents_created
                ON contents(created_at);
        "#,
        )?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Inserts and lookups
    // -------------------------------------------------------------------------

    /// Insert a content row, falling through to the existing row when the URL
    /// is already known.
    ///
    /// Returns `(id, created)`.
    pub fn insert_if_new(&self, new: &NewContent) -> Result<(i64, bool)> {
        crate::repository::with_retry(|| {
            let conn = self.connect()?;
            let now = encode_timestamp(Utc::now());

            let inserted = conn.execute(
                r#"
                INSERT OR IGNORE INTO contents (
                    url, source_url, content_type, platform, source, title,
                    status, metadata, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'new', ?7, ?8, ?8)
                "#,
                params![
                    new.url,
                    new.source_url,
                    new.content_type.unwrap_or(ContentType::Unknown).as_str(),
                    new.platform,
                    new.source,
                    new.title,
                    serde_json::to_string(&new.metadata)?,
                    now,
                ],
            )?;

            let id: i64 = conn.query_row(
                "SELECT id FROM contents WHERE url = ?",
                params![new.url],
                |row| row.get(0),
            )?;
            Ok((id, inserted > 0))
        })
    }

    pub fn get(&self, id: i64) -> Result<Option<Content>> {
        let conn = self.connect()?;
        let content = conn
            .query_row(
                "SELECT * FROM contents WHERE id = ?",
                params![id],
                |row| self.row_to_content(row),
            )
            .optional()?;
        Ok(content)
    }

    pub fn get_by_url(&self, url: &str) -> Result<Option<Content>> {
        let conn = self.connect()?;
        let content = conn
            .query_row(
                "SELECT * FROM contents WHERE url = ?",
                params![url],
                |row| self.row_to_content(row),
            )
            .optional()?;
        Ok(content)
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Persist the mutable fields of a content row.
    pub fn save(&self, content: &Content) -> Result<()> {
        crate::repository::with_retry(|| {
            let conn = self.connect()?;
            conn.execute(
                r#"
                UPDATE contents SET
                    url = ?1,
                    source_url = ?2,
                    content_type = ?3,
                    platform = ?4,
                    source = ?5,
                    title = ?6,
                    status = ?7,
                    error_message = ?8,
                    retry_count = ?9,
                    metadata = ?10,
                    updated_at = ?11,
                    processed_at = ?12
                WHERE id = ?13
                "#,
                params![
                    content.url,
                    content.source_url,
                    content.content_type.as_str(),
                    content.platform,
                    content.source,
                    content.title,
                    content.status.as_str(),
                    content.error_message,
                    content.retry_count,
                    serde_json::to_string(&content.metadata)?,
                    encode_timestamp(Utc::now()),
                    content.processed_at.map(encode_timestamp),
                    content.id,
                ],
            )?;
            Ok(())
        })
    }

    /// Replace the metadata blob for a content row.
    pub fn set_metadata(&self, id: i64, metadata: &Map<String, Value>) -> Result<()> {
        crate::repository::with_retry(|| {
            let conn = self.connect()?;
            conn.execute(
                "UPDATE contents SET metadata = ?1, updated_at = ?2 WHERE id = ?3",
                params![
                    serde_json::to_string(metadata)?,
                    encode_timestamp(Utc::now()),
                    id
                ],
            )?;
            Ok(())
        })
    }

    /// Load only the metadata blob.
    pub fn get_metadata(&self, id: i64) -> Result<Option<Map<String, Value>>> {
        let conn = self.connect()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT metadata FROM contents WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.map(|s| parse_metadata(&s)))
    }

    /// Move a content row to a status, stamping `processed_at` on completion.
    pub fn set_status(
        &self,
        id: i64,
        status: ContentStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        crate::repository::with_retry(|| {
            let conn = self.connect()?;
            let now = encode_timestamp(Utc::now());
            let processed_at = matches!(status, ContentStatus::Completed | ContentStatus::Skipped)
                .then(|| now.clone());
            conn.execute(
                r#"
                UPDATE contents SET
                    status = ?1,
                    error_message = COALESCE(?2, error_message),
                    processed_at = COALESCE(?3, processed_at),
                    updated_at = ?4
                WHERE id = ?5
                "#,
                params![status.as_str(), error_message, processed_at, now, id],
            )?;
            Ok(())
        })
    }

    // -------------------------------------------------------------------------
    // Checkout
    // -------------------------------------------------------------------------

    /// Atomically claim up to `batch_size` unclaimed `new` rows for a worker.
    ///
    /// Uses BEGIN IMMEDIATE for multi-process safety and returns ids only,
    /// never live rows.
    pub fn checkout_batch(
        &self,
        worker_id: &str,
        content_type: Option<ContentType>,
        batch_size: u32,
    ) -> Result<Vec<i64>> {
        crate::repository::with_retry(|| {
            let conn = self.connect()?;
            conn.execute("BEGIN IMMEDIATE", [])?;

            let result: Result<Vec<i64>> = (|| {
                let ids: Vec<i64> = if let Some(ct) = content_type {
                    let mut stmt = conn.prepare(
                        r#"
                        SELECT id FROM contents
                        WHERE status = 'new' AND checked_out_by IS NULL
                        AND content_type = ?
                        ORDER BY retry_count ASC, created_at ASC
                        LIMIT ?
                    "#,
                    )?;
                    let collected = stmt
                        .query_map(params![ct.as_str(), batch_size], |row| row.get(0))?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    collected
                } else {
                    let mut stmt = conn.prepare(
                        r#"
                        SELECT id FROM contents
                        WHERE status = 'new' AND checked_out_by IS NULL
                        ORDER BY retry_count ASC, created_at ASC
                        LIMIT ?
                    "#,
                    )?;
                    let collected = stmt
                        .query_map(params![batch_size], |row| row.get(0))?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    collected
                };

                let now = encode_timestamp(Utc::now());
                for id in &ids {
                    conn.execute(
                        r#"
                        UPDATE contents SET
                            checked_out_by = ?1,
                            checked_out_at = ?2,
                            status = 'processing',
                            updated_at = ?2
                        WHERE id = ?3
                        "#,
                        params![worker_id, now, id],
                    )?;
                }
                Ok(ids)
            })();

            if result.is_ok() {
                conn.execute("COMMIT", [])?;
            } else {
                let _ = conn.execute("ROLLBACK", []);
            }
            result
        })
    }

    /// Check a content item back in, clearing the checkout and applying the
    /// final status in one statement.
    ///
    /// No-op when the row is not checked out by `worker_id`.
    pub fn checkin(
        &self,
        id: i64,
        worker_id: &str,
        status: ContentStatus,
        error_message: Option<&str>,
    ) -> Result<bool> {
        let bump_retry = status == ContentStatus::Failed;
        crate::repository::with_retry(|| {
            let conn = self.connect()?;
            let now = encode_timestamp(Utc::now());
            let processed_at = (status == ContentStatus::Completed).then(|| now.clone());

            let changed = conn.execute(
                r#"
                UPDATE contents SET
                    status = ?1,
                    checked_out_by = NULL,
                    checked_out_at = NULL,
                    error_message = COALESCE(?2, error_message),
                    retry_count = retry_count + ?3,
                    processed_at = COALESCE(?4, processed_at),
                    updated_at = ?5
                WHERE id = ?6 AND checked_out_by = ?7
                "#,
                params![
                    status.as_str(),
                    error_message,
                    bump_retry as i32,
                    processed_at,
                    now,
                    id,
                    worker_id
                ],
            )?;
            Ok(changed > 0)
        })
    }

    /// Release checkouts older than the timeout: clear the owner, reset the
    /// row to `new`, and bump `retry_count`. Idempotent.
    pub fn release_stale_checkouts(&self, timeout_minutes: i64) -> Result<u64> {
        let threshold = encode_timestamp(Utc::now() - Duration::minutes(timeout_minutes));
        crate::repository::with_retry(|| {
            let conn = self.connect()?;
            let released = conn.execute(
                r#"
                UPDATE contents SET
                    checked_out_by = NULL,
                    checked_out_at = NULL,
                    status = 'new',
                    retry_count = retry_count + 1,
                    updated_at = ?1
                WHERE checked_out_by IS NOT NULL AND checked_out_at < ?2
                "#,
                params![encode_timestamp(Utc::now()), threshold],
            )?;
            Ok(released as u64)
        })
    }

    /// Count of checkouts per worker, for operations tooling.
    pub fn checkout_counts(&self) -> Result<HashMap<String, u64>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT checked_out_by, COUNT(*) FROM contents
            WHERE checked_out_by IS NOT NULL
            GROUP BY checked_out_by
        "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (worker, count) = row?;
            counts.insert(worker, count);
        }
        Ok(counts)
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn row_to_content(&self, row: &rusqlite::Row) -> rusqlite::Result<Content> {
        let metadata_raw: String = row.get("metadata")?;

        Ok(Content {
            id: row.get("id")?,
            url: row.get("url")?,
            source_url: row.get("source_url")?,
            content_type: ContentType::parse(&row.get::<_, String>("content_type")?)
                .unwrap_or(ContentType::Unknown),
            platform: row.get("platform")?,
            source: row.get("source")?,
            title: row.get("title")?,
            status: ContentStatus::parse(&row.get::<_, String>("status")?)
                .unwrap_or(ContentStatus::New),
            error_message: row.get("error_message")?,
            retry_count: row.get::<_, i64>("retry_count")? as u32,
            checked_out_by: row.get("checked_out_by")?,
            checked_out_at: parse_timestamp_opt(row.get("checked_out_at")?),
            metadata: parse_metadata(&metadata_raw),
            created_at: parse_timestamp(&row.get::<_, String>("created_at")?),
            updated_at: parse_timestamp(&row.get::<_, String>("updated_at")?),
            processed_at: parse_timestamp_opt(row.get("processed_at")?),
        })
    }
}

fn parse_metadata(raw: &str) -> Map<String, Value> {
    match serde_json::from_str(raw) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}
