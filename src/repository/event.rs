//! Event log repository: journal for watchdog actions and runs.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Connection};
use serde_json::Value;

use super::{encode_timestamp, Result};

/// A journaled operational event.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub id: i64,
    pub event_type: String,
    pub event_name: String,
    pub status: String,
    pub data: Value,
}

/// SQLite-backed event journal.
pub struct EventLogRepository {
    db_path: PathBuf,
}

impl EventLogRepository {
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
            CREATE TABLE IF NOT EXISTS event_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_type TEXT NOT NULL,
                event_name TEXT NOT NULL,
                status TEXT NOT NULL,
                data TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_event_log_type
                ON event_log(event_type, created_at);
        "#,
        )?;
        Ok(())
    }

    pub fn record(
        &self,
        event_type: &str,
        event_name: &str,
        status: &str,
        data: &Value,
    ) -> Result<i64> {
        crate::repository::with_retry(|| {
            let conn = self.connect()?;
            conn.execute(
                r#"
                INSERT INTO event_log (event_type, event_name, status, data, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    event_type,
                    event_name,
                    status,
                    serde_json::to_string(data)?,
                    encode_timestamp(Utc::now()),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Most recent events of a type, newest first.
    pub fn recent(&self, event_type: &str, limit: u32) -> Result<Vec<EventRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, event_type, event_name, status, data FROM event_log
            WHERE event_type = ?1
            ORDER BY id DESC
            LIMIT ?2
            "#,
        )?;
        let events = stmt
            .query_map(params![event_type, limit], |row| {
                let data_raw: String = row.get(4)?;
                Ok(EventRecord {
                    id: row.get(0)?,
                    event_type: row.get(1)?,
                    event_name: row.get(2)?,
                    status: row.get(3)?,
                    data: serde_json::from_str(&data_raw).unwrap_or(Value::Null),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn records_and_reads_back() {
        let dir = TempDir::new().unwrap();
        let repo = EventLogRepository::new(&dir.path().join("test.db")).unwrap();

        repo.record(
            "queue_watchdog_action",
            "move_transcribe",
            "completed",
            &json!({"touched_count": 3}),
        )
        .unwrap();
        repo.record("queue_watchdog_run", "queue_recovery", "completed", &json!({}))
            .unwrap();

        let events = repo.recent("queue_watchdog_action", 10).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_name, "move_transcribe");
        assert_eq!(events[0].data["touched_count"], json!(3));
    }
}
