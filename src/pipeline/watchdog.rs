//! Queue recovery watchdog.
//!
//! Runs the safety actions operators used to run by hand: move transcribe
//! tasks back to their dedicated queue, and requeue processing tasks
//! abandoned past the stale threshold. Every action is journaled to the
//! event log; large recoveries trigger a webhook alert.

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::config::WatchdogConfig;
use crate::models::TaskType;
use crate::repository::{EventLogRepository, Result, TaskRepository};

/// Result of a single watchdog action.
#[derive(Debug, Clone)]
pub struct ActionResult {
    pub action_name: String,
    pub touched_count: u64,
    pub task_ids: Vec<i64>,
}

/// Top-level watchdog run payload.
#[derive(Debug, Clone)]
pub struct WatchdogRunResult {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub moved_transcribe: ActionResult,
    pub requeued_transcribe: ActionResult,
    pub requeued_process_content: ActionResult,
}

impl WatchdogRunResult {
    /// Total touched tasks across all actions.
    pub fn total_touched(&self) -> u64 {
        self.moved_transcribe.touched_count
            + self.requeued_transcribe.touched_count
            + self.requeued_process_content.touched_count
    }
}

/// Periodic recovery process for the task queue.
pub struct Watchdog {
    tasks: TaskRepository,
    events: EventLogRepository,
    config: WatchdogConfig,
    http: reqwest::Client,
}

impl Watchdog {
    pub fn new(tasks: TaskRepository, events: EventLogRepository, config: WatchdogConfig) -> Self {
        Self {
            tasks,
            events,
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Move pending/processing transcribe tasks sitting on the wrong queue
    /// back to the transcribe queue.
    fn move_transcribe_tasks(&self, dry_run: bool, limit: Option<u32>) -> Result<ActionResult> {
        let task_ids = self.tasks.misqueued_transcribe_ids(limit)?;
        let touched_count = if dry_run {
            task_ids.len() as u64
        } else {
            self.tasks.move_to_transcribe_queue(&task_ids)?
        };
        Ok(ActionResult {
            action_name: "move_transcribe".to_string(),
            touched_count,
            task_ids,
        })
    }

    /// Requeue processing tasks of one type whose latest timestamp is older
    /// than the stale threshold.
    fn requeue_stale_tasks(
        &self,
        task_type: TaskType,
        stale_hours: f64,
        dry_run: bool,
        limit: Option<u32>,
    ) -> Result<ActionResult> {
        let task_ids = self
            .tasks
            .stale_processing_ids(task_type, stale_hours, limit)?;
        let touched_count = if dry_run {
            task_ids.len() as u64
        } else {
            self.tasks.requeue(&task_ids)?
        };
        Ok(ActionResult {
            action_name: format!("requeue_stale_{}", task_type.as_str()),
            touched_count,
            task_ids,
        })
    }

    fn record_events(&self, result: &WatchdogRunResult) -> Result<()> {
        let run_id = result.started_at.format("%Y%m%d%H%M%S").to_string();

        for action in [
            &result.moved_transcribe,
            &result.requeued_transcribe,
            &result.requeued_process_content,
        ] {
            self.events.record(
                "queue_watchdog_action",
                &action.action_name,
                "completed",
                &json!({
                    "run_id": run_id,
                    "touched_count": action.touched_count,
                    "task_ids": action.task_ids.iter().take(100).collect::<Vec<_>>(),
                }),
            )?;
        }

        let duration = (result.finished_at - result.started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        self.events.record(
            "queue_watchdog_run",
            "queue_recovery",
            "completed",
            &json!({
                "run_id": run_id,
                "started_at": result.started_at.to_rfc3339(),
                "finished_at": result.finished_at.to_rfc3339(),
                "duration_seconds": duration,
                "total_touched": result.total_touched(),
                "moved_transcribe": result.moved_transcribe.touched_count,
                "requeued_transcribe": result.requeued_transcribe.touched_count,
                "requeued_process_content": result.requeued_process_content.touched_count,
                "dry_run": result.dry_run,
            }),
        )?;
        Ok(())
    }

    async fn send_alert(&self, webhook_url: &str, result: &WatchdogRunResult) -> (bool, String) {
        let payload = json!({
            "text": format!(
                "Queue watchdog touched tasks | total={} move_transcribe={} \
                 requeue_transcribe={} requeue_process_content={}",
                result.total_touched(),
                result.moved_transcribe.touched_count,
                result.requeued_transcribe.touched_count,
                result.requeued_process_content.touched_count,
            )
        });

        match self.http.post(webhook_url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => (true, "sent".to_string()),
            Ok(response) => (false, format!("HTTP {}", response.status())),
            Err(e) => (false, e.to_string()),
        }
    }

    async fn alert_if_warranted(&self, result: &WatchdogRunResult) -> Result<()> {
        if result.total_touched() < self.config.alert_threshold.max(1) {
            return Ok(());
        }

        let Some(webhook_url) = self.config.webhook_url.as_deref() else {
            self.events.record(
                "queue_watchdog_alert",
                "webhook",
                "skipped",
                &json!({
                    "total_touched": result.total_touched(),
                    "alert_threshold": self.config.alert_threshold,
                    "detail": "no webhook URL configured",
                }),
            )?;
            return Ok(());
        };

        let (sent, detail) = self.send_alert(webhook_url, result).await;
        if !sent {
            tracing::warn!(detail = %detail, "failed to send watchdog alert");
        }
        self.events.record(
            "queue_watchdog_alert",
            "webhook",
            if sent { "sent" } else { "failed" },
            &json!({
                "total_touched": result.total_touched(),
                "alert_threshold": self.config.alert_threshold,
                "detail": detail,
            }),
        )?;
        Ok(())
    }

    /// Execute one watchdog cycle, optionally journaling and alerting.
    pub async fn run_once(
        &self,
        dry_run: bool,
        action_limit: Option<u32>,
    ) -> Result<WatchdogRunResult> {
        let started_at = Utc::now();

        let moved_transcribe = self.move_transcribe_tasks(dry_run, action_limit)?;
        let requeued_transcribe = self.requeue_stale_tasks(
            TaskType::Transcribe,
            self.config.transcribe_stale_hours,
            dry_run,
            action_limit,
        )?;
        let requeued_process_content = self.requeue_stale_tasks(
            TaskType::ProcessContent,
            self.config.process_content_stale_hours,
            dry_run,
            action_limit,
        )?;

        let result = WatchdogRunResult {
            started_at,
            finished_at: Utc::now(),
            dry_run,
            moved_transcribe,
            requeued_transcribe,
            requeued_process_content,
        };

        tracing::info!(
            dry_run,
            moved_transcribe = result.moved_transcribe.touched_count,
            requeued_transcribe = result.requeued_transcribe.touched_count,
            requeued_process_content = result.requeued_process_content.touched_count,
            total = result.total_touched(),
            "watchdog cycle complete"
        );

        if dry_run {
            return Ok(result);
        }

        self.record_events(&result)?;
        self.alert_if_warranted(&result).await?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{queue_for_task_type, TaskQueue, TaskStatus};
    use crate::repository::{connect, encode_timestamp};
    use chrono::Duration;
    use rusqlite::params;
    use serde_json::Map;
    use tempfile::TempDir;

    fn watchdog() -> (TempDir, Watchdog, TaskRepository, EventLogRepository) {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("test.db");
        let watchdog = Watchdog::new(
            TaskRepository::new(&db).unwrap(),
            EventLogRepository::new(&db).unwrap(),
            WatchdogConfig::default(),
        );
        let tasks = TaskRepository::new(&db).unwrap();
        let events = EventLogRepository::new(&db).unwrap();
        (dir, watchdog, tasks, events)
    }

    fn seed_stale_processing(
        dir: &TempDir,
        tasks: &TaskRepository,
        task_type: TaskType,
        hours_ago: i64,
    ) -> i64 {
        let id = tasks
            .insert(task_type, queue_for_task_type(task_type), Some(1), &Map::new())
            .unwrap();
        tasks.try_claim(id, Utc::now()).unwrap();

        let conn = connect(&dir.path().join("test.db")).unwrap();
        let old = encode_timestamp(Utc::now() - Duration::hours(hours_ago));
        conn.execute(
            "UPDATE tasks SET started_at = ?1 WHERE id = ?2",
            params![old, id],
        )
        .unwrap();
        id
    }

    #[tokio::test]
    async fn stale_processing_task_is_requeued_and_journaled() {
        let (dir, watchdog, tasks, events) = watchdog();
        let id = seed_stale_processing(&dir, &tasks, TaskType::ProcessContent, 3);

        let result = watchdog.run_once(false, None).await.unwrap();
        assert_eq!(result.requeued_process_content.touched_count, 1);
        assert_eq!(result.requeued_process_content.task_ids, vec![id]);

        let task = tasks.get(id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 1);
        assert!(task.started_at.is_none());

        // One event per action plus the run summary.
        assert_eq!(events.recent("queue_watchdog_action", 10).unwrap().len(), 3);
        let runs = events.recent("queue_watchdog_run", 10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].data["total_touched"], json!(1));
        // Threshold reached but no webhook configured: alert skipped.
        let alerts = events.recent("queue_watchdog_alert", 10).unwrap();
        assert_eq!(alerts[0].status, "skipped");
    }

    #[tokio::test]
    async fn fresh_processing_tasks_are_left_alone() {
        let (_dir, watchdog, tasks, _events) = watchdog();
        let id = tasks
            .insert(
                TaskType::ProcessContent,
                TaskQueue::Content,
                Some(1),
                &Map::new(),
            )
            .unwrap();
        tasks.try_claim(id, Utc::now()).unwrap();

        let result = watchdog.run_once(false, None).await.unwrap();
        assert_eq!(result.total_touched(), 0);

        let task = tasks.get(id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Processing);
    }

    #[tokio::test]
    async fn misqueued_transcribe_tasks_move_back() {
        let (_dir, watchdog, tasks, _events) = watchdog();
        let id = tasks
            .insert(TaskType::Transcribe, TaskQueue::Content, Some(2), &Map::new())
            .unwrap();

        let result = watchdog.run_once(false, None).await.unwrap();
        assert_eq!(result.moved_transcribe.touched_count, 1);

        let task = tasks.get(id).unwrap().unwrap();
        assert_eq!(task.queue_name, TaskQueue::Transcribe);
    }

    #[tokio::test]
    async fn dry_run_previews_without_writing() {
        let (dir, watchdog, tasks, events) = watchdog();
        let id = seed_stale_processing(&dir, &tasks, TaskType::Transcribe, 5);

        let result = watchdog.run_once(true, None).await.unwrap();
        assert_eq!(result.requeued_transcribe.touched_count, 1);

        // Nothing changed and nothing was journaled.
        let task = tasks.get(id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Processing);
        assert!(events.recent("queue_watchdog_run", 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn action_limit_caps_rows_touched() {
        let (dir, watchdog, tasks, _events) = watchdog();
        for _ in 0..3 {
            seed_stale_processing(&dir, &tasks, TaskType::ProcessContent, 4);
        }

        let result = watchdog.run_once(false, Some(2)).await.unwrap();
        assert_eq!(result.requeued_process_content.touched_count, 2);
    }
}
