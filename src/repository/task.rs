//! Task repository: SQL for the durable task queue.
//!
//! Claiming uses a compare-and-set UPDATE rather than `SELECT ... FOR UPDATE
//! SKIP LOCKED`, so the same code runs on engines without lock skipping. The
//! queue service layers the retry loop and dedup policy on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::{Map, Value};

use super::{encode_timestamp, parse_timestamp, parse_timestamp_opt, Result};
use crate::models::{queue_for_task_type, Task, TaskQueue, TaskStatus, TaskType};

/// Optional filters applied when selecting the next claimable task.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskFilter {
    pub task_type: Option<TaskType>,
    pub queue_name: Option<TaskQueue>,
}

/// SQLite-backed repository for queue tasks.
pub struct TaskRepository {
    db_path: PathBuf,
}

impl TaskRepository {
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
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_type TEXT NOT NULL,
                queue_name TEXT NOT NULL,
                content_id INTEGER,
                payload TEXT NOT NULL DEFAULT '{}',
                status TEXT NOT NULL DEFAULT 'pending',
                retry_count INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_status_created
                ON tasks(status, created_at);
            CREATE INDEX IF NOT EXISTS idx_tasks_claim
                ON tasks(queue_name, status, created_at, retry_count);
            CREATE INDEX IF NOT EXISTS idx_tasks_content
                ON tasks(content_id);
        "#,
        )?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Enqueue
    // -------------------------------------------------------------------------

    /// Insert a pending task, visible immediately.
    pub fn insert(
        &self,
        task_type: TaskType,
        queue_name: TaskQueue,
        content_id: Option<i64>,
        payload: &Map<String, Value>,
    ) -> Result<i64> {
        crate::repository::with_retry(|| {
            let conn = self.connect()?;
            conn.execute(
                r#"
                INSERT INTO tasks (task_type, queue_name, content_id, payload, status, created_at)
                VALUES (?1, ?2, ?3, ?4, 'pending', ?5)
                "#,
                params![
                    task_type.as_str(),
                    queue_name.as_str(),
                    content_id,
                    serde_json::to_string(payload)?,
                    encode_timestamp(Utc::now()),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Newest non-terminal task for `(task_type, content_id, queue_name)`,
    /// used by the enqueue dedup path.
    pub fn find_active(
        &self,
        task_type: TaskType,
        content_id: i64,
        queue_name: TaskQueue,
    ) -> Result<Option<i64>> {
        let conn = self.connect()?;
        let id = conn
            .query_row(
                r#"
                SELECT id FROM tasks
                WHERE task_type = ?1 AND content_id = ?2 AND queue_name = ?3
                AND status IN ('pending', 'processing')
                ORDER BY created_at DESC
                LIMIT 1
                "#,
                params![task_type.as_str(), content_id, queue_name.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    // -------------------------------------------------------------------------
    // Claim
    // -------------------------------------------------------------------------

    /// Select the id of the best currently-visible pending task.
    ///
    /// Lowest retry count first, then longest-visible. Tasks with a future
    /// `created_at` are invisible.
    pub fn next_pending_id(&self, filter: TaskFilter, now: DateTime<Utc>) -> Result<Option<i64>> {
        let conn = self.connect()?;

        let mut sql = String::from(
            "SELECT id FROM tasks WHERE status = 'pending' AND created_at <= ?",
        );
        let mut args: Vec<String> = vec![encode_timestamp(now)];
        if let Some(task_type) = filter.task_type {
            sql.push_str(" AND task_type = ?");
            args.push(task_type.as_str().to_string());
        }
        if let Some(queue_name) = filter.queue_name {
            sql.push_str(" AND queue_name = ?");
            args.push(queue_name.as_str().to_string());
        }
        sql.push_str(" ORDER BY retry_count ASC, created_at ASC LIMIT 1");

        let id = conn
            .query_row(&sql, params_from_iter(args.iter()), |row| row.get(0))
            .optional()?;
        Ok(id)
    }

    /// Compare-and-set claim: move the row to `processing` only if it is
    /// still pending. Returns false when another worker won the race.
    pub fn try_claim(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        crate::repository::with_retry(|| {
            let conn = self.connect()?;
            let claimed = conn.execute(
                r#"
                UPDATE tasks SET status = 'processing', started_at = ?1
                WHERE id = ?2 AND status = 'pending'
                "#,
                params![encode_timestamp(now), id],
            )?;
            Ok(claimed > 0)
        })
    }

    pub fn get(&self, id: i64) -> Result<Option<Task>> {
        let conn = self.connect()?;
        let task = conn
            .query_row("SELECT * FROM tasks WHERE id = ?", params![id], |row| {
                self.row_to_task(row)
            })
            .optional()?;
        Ok(task)
    }

    // -------------------------------------------------------------------------
    // Completion and retry
    // -------------------------------------------------------------------------

    pub fn complete(&self, id: i64, success: bool, error_message: Option<&str>) -> Result<bool> {
        let status = if success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        crate::repository::with_retry(|| {
            let conn = self.connect()?;
            let changed = conn.execute(
                r#"
                UPDATE tasks SET status = ?1, completed_at = ?2, error_message = ?3
                WHERE id = ?4
                "#,
                params![
                    status.as_str(),
                    encode_timestamp(Utc::now()),
                    error_message,
                    id
                ],
            )?;
            Ok(changed > 0)
        })
    }

    /// Reschedule a task: back to pending with a future visibility time and
    /// an incremented retry count.
    pub fn retry(&self, id: i64, delay_seconds: i64) -> Result<bool> {
        let visible_at = Utc::now() + Duration::seconds(delay_seconds);
        crate::repository::with_retry(|| {
            let conn = self.connect()?;
            let changed = conn.execute(
                r#"
                UPDATE tasks SET
                    status = 'pending',
                    retry_count = retry_count + 1,
                    started_at = NULL,
                    completed_at = NULL,
                    created_at = ?1
                WHERE id = ?2
                "#,
                params![encode_timestamp(visible_at), id],
            )?;
            Ok(changed > 0)
        })
    }

    /// Strip transient keys from a stored task payload.
    pub fn set_payload(&self, id: i64, payload: &Map<String, Value>) -> Result<()> {
        crate::repository::with_retry(|| {
            let conn = self.connect()?;
            conn.execute(
                "UPDATE tasks SET payload = ?1 WHERE id = ?2",
                params![serde_json::to_string(payload)?, id],
            )?;
            Ok(())
        })
    }

    /// Delete completed tasks older than `days`.
    pub fn cleanup_old(&self, days: u32) -> Result<u64> {
        let cutoff = encode_timestamp(Utc::now() - Duration::days(days as i64));
        crate::repository::with_retry(|| {
            let conn = self.connect()?;
            let deleted = conn.execute(
                "DELETE FROM tasks WHERE status = 'completed' AND completed_at < ?",
                params![cutoff],
            )?;
            Ok(deleted as u64)
        })
    }

    /// Delete pending tasks, optionally for a single queue. Manual tooling.
    pub fn clear_pending(&self, queue_name: Option<TaskQueue>) -> Result<u64> {
        crate::repository::with_retry(|| {
            let conn = self.connect()?;
            let deleted = match queue_name {
                Some(queue) => conn.execute(
                    "DELETE FROM tasks WHERE status = 'pending' AND queue_name = ?",
                    params![queue.as_str()],
                )?,
                None => conn.execute("DELETE FROM tasks WHERE status = 'pending'", [])?,
            };
            Ok(deleted as u64)
        })
    }

    // -------------------------------------------------------------------------
    // Watchdog actions
    // -------------------------------------------------------------------------

    /// Ids of non-terminal transcribe tasks sitting on the wrong queue.
    pub fn misqueued_transcribe_ids(&self, limit: Option<u32>) -> Result<Vec<i64>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id FROM tasks
            WHERE task_type = ?1 AND queue_name != ?2
            AND status IN ('pending', 'processing')
            ORDER BY id ASC
            LIMIT ?3
            "#,
        )?;
        let ids = stmt
            .query_map(
                params![
                    TaskType::Transcribe.as_str(),
                    queue_for_task_type(TaskType::Transcribe).as_str(),
                    limit.map(i64::from).unwrap_or(i64::MAX),
                ],
                |row| row.get(0),
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Move tasks to the transcribe queue.
    pub fn move_to_transcribe_queue(&self, ids: &[i64]) -> Result<u64> {
        crate::repository::with_retry(|| {
            let conn = self.connect()?;
            let mut moved = 0;
            for id in ids {
                moved += conn.execute(
                    "UPDATE tasks SET queue_name = ?1 WHERE id = ?2",
                    params![TaskQueue::Transcribe.as_str(), id],
                )?;
            }
            Ok(moved as u64)
        })
    }

    /// Ids of `processing` tasks of one type whose most recent timestamp is
    /// older than the cutoff.
    pub fn stale_processing_ids(
        &self,
        task_type: TaskType,
        stale_hours: f64,
        limit: Option<u32>,
    ) -> Result<Vec<i64>> {
        let conn = self.connect()?;
        let cutoff =
            encode_timestamp(Utc::now() - Duration::seconds((stale_hours * 3600.0) as i64));
        let mut stmt = conn.prepare(
            r#"
            SELECT id FROM tasks
            WHERE status = 'processing' AND task_type = ?1
            AND COALESCE(started_at, completed_at, created_at) <= ?2
            ORDER BY COALESCE(started_at, completed_at, created_at) ASC, id ASC
            LIMIT ?3
            "#,
        )?;
        let ids = stmt
            .query_map(
                params![
                    task_type.as_str(),
                    cutoff,
                    limit.map(i64::from).unwrap_or(i64::MAX)
                ],
                |row| row.get(0),
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Requeue abandoned tasks: pending again, visible now, error cleared,
    /// retry count incremented.
    pub fn requeue(&self, ids: &[i64]) -> Result<u64> {
        let now = encode_timestamp(Utc::now());
        crate::repository::with_retry(|| {
            let conn = self.connect()?;
            let mut requeued = 0;
            for id in ids {
                requeued += conn.execute(
                    r#"
                    UPDATE tasks SET
                        status = 'pending',
                        started_at = NULL,
                        completed_at = NULL,
                        created_at = ?1,
                        error_message = NULL,
                        retry_count = retry_count + 1
                    WHERE id = ?2
                    "#,
                    params![now, id],
                )?;
            }
            Ok(requeued as u64)
        })
    }

    // -------------------------------------------------------------------------
    // Stats
    // -------------------------------------------------------------------------

    pub fn counts_by_status(&self) -> Result<HashMap<String, u64>> {
        self.grouped_counts("SELECT status, COUNT(*) FROM tasks GROUP BY status")
    }

    pub fn pending_counts_by_type(&self) -> Result<HashMap<String, u64>> {
        self.grouped_counts(
            "SELECT task_type, COUNT(*) FROM tasks WHERE status = 'pending' GROUP BY task_type",
        )
    }

    pub fn pending_counts_by_queue(&self) -> Result<HashMap<String, u64>> {
        self.grouped_counts(
            "SELECT queue_name, COUNT(*) FROM tasks WHERE status = 'pending' GROUP BY queue_name",
        )
    }

    pub fn pending_counts_by_queue_type(&self) -> Result<HashMap<String, HashMap<String, u64>>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT queue_name, task_type, COUNT(*) FROM tasks
            WHERE status = 'pending'
            GROUP BY queue_name, task_type
        "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)? as u64,
            ))
        })?;

        let mut nested: HashMap<String, HashMap<String, u64>> = HashMap::new();
        for row in rows {
            let (queue, task_type, count) = row?;
            nested.entry(queue).or_default().insert(task_type, count);
        }
        Ok(nested)
    }

    /// Tasks failed within the last hour.
    pub fn recent_failures(&self) -> Result<u64> {
        let conn = self.connect()?;
        let one_hour_ago = encode_timestamp(Utc::now() - Duration::hours(1));
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM tasks WHERE status = 'failed' AND completed_at >= ?",
            params![one_hour_ago],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn grouped_counts(&self, sql: &str) -> Result<HashMap<String, u64>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (key, count) = row?;
            counts.insert(key, count);
        }
        Ok(counts)
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn row_to_task(&self, row: &rusqlite::Row) -> rusqlite::Result<Task> {
        let payload_raw: String = row.get("payload")?;
        let payload = match serde_json::from_str(&payload_raw) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        let task_type_raw: String = row.get("task_type")?;
        let queue_raw: String = row.get("queue_name")?;

        Ok(Task {
            id: row.get("id")?,
            task_type: TaskType::parse(&task_type_raw).unwrap_or(TaskType::ProcessContent),
            queue_name: TaskQueue::parse(&queue_raw).unwrap_or(TaskQueue::Content),
            content_id: row.get("content_id")?,
            payload,
            status: TaskStatus::parse(&row.get::<_, String>("status")?)
                .unwrap_or(TaskStatus::Pending),
            retry_count: row.get::<_, i64>("retry_count")? as u32,
            error_message: row.get("error_message")?,
            created_at: parse_timestamp(&row.get::<_, String>("created_at")?),
            started_at: parse_timestamp_opt(row.get("started_at")?),
            completed_at: parse_timestamp_opt(row.get("completed_at")?),
        })
    }
}
