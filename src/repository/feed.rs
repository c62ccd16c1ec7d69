//! Feed subscription repository.
//!
//! The analyze-url feed flow records detected feeds here so later scraper
//! runs can poll them.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Connection};

use super::{encode_timestamp, Result};

/// A feed detected on a submitted page.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSubscription {
    pub feed_url: String,
    pub feed_type: Option<String>,
    pub title: Option<String>,
    pub discovered_from: Option<String>,
}

/// SQLite-backed repository for feed subscriptions.
pub struct FeedRepository {
    db_path: PathBuf,
}

impl FeedRepository {
    pub fn new(db_path: &Path) -> Result<Self> {
        let repo = Self {
            db_path: db_path.to_path_buf(),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    fn connect(&self) -> Result<Connection> {
        super::connect(&self.db_path)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS feed_subscriptions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                feed_url TEXT NOT NULL UNIQUE,
                feed_type TEXT,
                title TEXT,
                discovered_from TEXT,
                created_at TEXT NOT NULL
            );
        "#,
        )?;
        Ok(())
    }

    /// Record a subscription. Returns true when the feed was new.
    pub fn subscribe(&self, feed: &FeedSubscription) -> Result<bool> {
        crate::repository::with_retry(|| {
            let conn = self.connect()?;
            let inserted = conn.execute(
                r#"
                INSERT OR IGNORE INTO feed_subscriptions
                    (feed_url, feed_type, title, discovered_from, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    feed.feed_url,
                    feed.feed_type,
                    feed.title,
                    feed.discovered_from,
                    encode_timestamp(Utc::now()),
                ],
            )?;
            Ok(inserted > 0)
        })
    }

    pub fn all(&self) -> Result<Vec<FeedSubscription>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT feed_url, feed_type, title, discovered_from FROM feed_subscriptions ORDER BY id",
        )?;
        let feeds = stmt
            .query_map([], |row| {
                Ok(FeedSubscription {
                    feed_url: row.get(0)?,
                    feed_type: row.get(1)?,
                    title: row.get(2)?,
                    discovered_from: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(feeds)
    }
}
