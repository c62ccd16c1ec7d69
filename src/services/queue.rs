//! Database-backed task queue.
//!
//! The claim path is a bounded compare-and-set loop: select the best visible
//! pending row, then flip it to `processing` only if it is still pending.
//! Losing the race retries with a fresh selection, so concurrent workers
//! never hand out the same task twice even without SKIP LOCKED.

use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use serde_json::{Map, Value};

use crate::models::{queue_for_task_type, Task, TaskQueue, TaskType};
use crate::repository::{Result, TaskFilter, TaskRepository};

/// Attempts before a claim race is treated as an empty queue.
const CLAIM_ATTEMPTS: u32 = 5;

/// Placeholder stored when a failure arrives without a message.
const DEFAULT_FAILURE_MESSAGE: &str = "Task failed without error details";

/// Parameters for [`QueueService::enqueue`].
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub task_type: TaskType,
    pub content_id: Option<i64>,
    pub payload: Map<String, Value>,
    pub queue_name: Option<TaskQueue>,
    pub dedupe: Option<bool>,
}

impl EnqueueRequest {
    pub fn new(task_type: TaskType) -> Self {
        Self {
            task_type,
            content_id: None,
            payload: Map::new(),
            queue_name: None,
            dedupe: None,
        }
    }

    pub fn content_id(mut self, content_id: i64) -> Self {
        self.content_id = Some(content_id);
        self
    }

    pub fn payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    /// Queue override. Only tests and recovery tooling should need this.
    pub fn queue_name(mut self, queue_name: TaskQueue) -> Self {
        self.queue_name = Some(queue_name);
        self
    }

    pub fn dedupe(mut self, dedupe: bool) -> Self {
        self.dedupe = Some(dedupe);
        self
    }
}

/// Queue statistics for operations tooling. Counts only.
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub by_status: HashMap<String, u64>,
    pub pending_by_type: HashMap<String, u64>,
    pub pending_by_queue: HashMap<String, u64>,
    pub pending_by_queue_type: HashMap<String, HashMap<String, u64>>,
    pub recent_failures: u64,
}

/// Simple database-backed task queue.
pub struct QueueService {
    tasks: TaskRepository,
}

impl QueueService {
    pub fn new(db_path: &Path) -> Result<Self> {
        Ok(Self {
            tasks: TaskRepository::new(db_path)?,
        })
    }

    /// Add a task to the queue, returning its id.
    ///
    /// For dedupe-eligible task types with a content id, an existing
    /// non-terminal task for the same `(task_type, content_id, queue)` is
    /// reused instead of inserting a new row.
    pub fn enqueue(&self, request: EnqueueRequest) -> Result<i64> {
        let target_queue = request
            .queue_name
            .unwrap_or_else(|| queue_for_task_type(request.task_type));

        let should_dedupe = request
            .dedupe
            .unwrap_or_else(|| request.task_type.is_dedupable());
        if should_dedupe {
            if let Some(content_id) = request.content_id {
                if let Some(existing) =
                    self.tasks
                        .find_active(request.task_type, content_id, target_queue)?
                {
                    tracing::info!(
                        task_id = existing,
                        task_type = request.task_type.as_str(),
                        content_id,
                        queue = target_queue.as_str(),
                        "reusing existing task"
                    );
                    return Ok(existing);
                }
            }
        }

        let task_id = self.tasks.insert(
            request.task_type,
            target_queue,
            request.content_id,
            &request.payload,
        )?;
        tracing::info!(
            task_id,
            task_type = request.task_type.as_str(),
            queue = target_queue.as_str(),
            "enqueued task"
        );
        Ok(task_id)
    }

    /// Claim the next available task, or None when the queue is empty for
    /// this caller.
    ///
    /// The returned task is a detached snapshot; callers never hold a live
    /// row across handler execution.
    pub fn dequeue(&self, filter: TaskFilter, worker_id: &str) -> Result<Option<Task>> {
        // Retry the claim a few times to ride out races across worker
        // processes. The compare-and-set pattern works even where SKIP
        // LOCKED semantics are unavailable.
        for _ in 0..CLAIM_ATTEMPTS {
            let now = Utc::now();
            let Some(task_id) = self.tasks.next_pending_id(filter, now)? else {
                return Ok(None);
            };

            if !self.tasks.try_claim(task_id, now)? {
                // Another worker won; pick again.
                continue;
            }

            let Some(task) = self.tasks.get(task_id)? else {
                return Ok(None);
            };

            tracing::debug!(
                task_id,
                worker_id,
                queue = task.queue_name.as_str(),
                "dequeued task"
            );
            return Ok(Some(task));
        }

        Ok(None)
    }

    /// Mark a task as completed or failed.
    pub fn complete_task(
        &self,
        task_id: i64,
        success: bool,
        error_message: Option<&str>,
    ) -> Result<()> {
        let message = if success {
            None
        } else {
            Some(
                error_message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or(DEFAULT_FAILURE_MESSAGE),
            )
        };

        if !self.tasks.complete(task_id, success, message)? {
            tracing::error!(task_id, "task not found");
            return Ok(());
        }

        if success {
            tracing::info!(task_id, "task completed successfully");
        } else {
            tracing::error!(task_id, error = message, "task failed");
        }
        Ok(())
    }

    /// Reschedule a task after a delay; invisible until the delay expires.
    pub fn retry_task(&self, task_id: i64, delay_seconds: i64) -> Result<()> {
        if !self.tasks.retry(task_id, delay_seconds)? {
            tracing::error!(task_id, "task not found");
            return Ok(());
        }
        tracing::info!(task_id, delay_seconds, "task scheduled for retry");
        Ok(())
    }

    /// Strip a transient key from a stored task payload.
    pub fn strip_payload_key(&self, task_id: i64, key: &str) -> Result<()> {
        if let Some(task) = self.tasks.get(task_id)? {
            if task.payload.contains_key(key) {
                let mut payload = task.payload;
                payload.remove(key);
                self.tasks.set_payload(task_id, &payload)?;
            }
        }
        Ok(())
    }

    pub fn queue_stats(&self) -> Result<QueueStats> {
        Ok(QueueStats {
            by_status: self.tasks.counts_by_status()?,
            pending_by_type: self.tasks.pending_counts_by_type()?,
            pending_by_queue: self.tasks.pending_counts_by_queue()?,
            pending_by_queue_type: self.tasks.pending_counts_by_queue_type()?,
            recent_failures: self.tasks.recent_failures()?,
        })
    }

    /// Remove completed tasks older than the given age.
    pub fn cleanup_old_tasks(&self, days: u32) -> Result<u64> {
        let deleted = self.tasks.cleanup_old(days)?;
        tracing::info!(deleted, "cleaned up old completed tasks");
        Ok(deleted)
    }

    pub fn tasks(&self) -> &TaskRepository {
        &self.tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskStatus;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn service() -> (TempDir, QueueService) {
        let dir = TempDir::new().unwrap();
        let service = QueueService::new(&dir.path().join("test.db")).unwrap();
        (dir, service)
    }

    fn payload(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn enqueue_claim_complete_happy_path() {
        let (_dir, service) = service();
        let id = service
            .enqueue(
                EnqueueRequest::new(TaskType::Scrape)
                    .payload(payload(json!({"sources": ["all"]}))),
            )
            .unwrap();

        let task = service
            .dequeue(TaskFilter::default(), "worker-1")
            .unwrap()
            .unwrap();
        assert_eq!(task.id, id);
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(task.payload["sources"], json!(["all"]));

        service.complete_task(id, true, None).unwrap();

        let stats = service.queue_stats().unwrap();
        assert!(*stats.by_status.get("completed").unwrap_or(&0) >= 1);

        let stored = service.tasks().get(id).unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert!(stored.completed_at.is_some());
    }

    #[test]
    fn dedupe_returns_existing_task_id() {
        let (_dir, service) = service();
        let first = service
            .enqueue(EnqueueRequest::new(TaskType::ProcessContent).content_id(42))
            .unwrap();
        let second = service
            .enqueue(EnqueueRequest::new(TaskType::ProcessContent).content_id(42))
            .unwrap();
        assert_eq!(first, second);

        let stats = service.queue_stats().unwrap();
        assert_eq!(stats.by_status.get("pending"), Some(&1));
    }

    #[test]
    fn dedupe_still_applies_while_processing() {
        let (_dir, service) = service();
        let first = service
            .enqueue(EnqueueRequest::new(TaskType::Summarize).content_id(7))
            .unwrap();
        service.dequeue(TaskFilter::default(), "w").unwrap().unwrap();

        let second = service
            .enqueue(EnqueueRequest::new(TaskType::Summarize).content_id(7))
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn completed_task_does_not_block_new_enqueue() {
        let (_dir, service) = service();
        let first = service
            .enqueue(EnqueueRequest::new(TaskType::Summarize).content_id(7))
            .unwrap();
        service.dequeue(TaskFilter::default(), "w").unwrap();
        service.complete_task(first, true, None).unwrap();

        let second = service
            .enqueue(EnqueueRequest::new(TaskType::Summarize).content_id(7))
            .unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn non_dedupable_types_always_insert() {
        let (_dir, service) = service();
        let first = service
            .enqueue(EnqueueRequest::new(TaskType::AnalyzeUrl).content_id(1))
            .unwrap();
        let second = service
            .enqueue(EnqueueRequest::new(TaskType::AnalyzeUrl).content_id(1))
            .unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn explicit_dedupe_flag_overrides_default() {
        let (_dir, service) = service();
        let first = service
            .enqueue(
                EnqueueRequest::new(TaskType::AnalyzeUrl)
                    .content_id(5)
                    .dedupe(true),
            )
            .unwrap();
        let second = service
            .enqueue(
                EnqueueRequest::new(TaskType::AnalyzeUrl)
                    .content_id(5)
                    .dedupe(true),
            )
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_queue_returns_none() {
        let (_dir, service) = service();
        assert!(service
            .dequeue(TaskFilter::default(), "worker-1")
            .unwrap()
            .is_none());
    }

    #[test]
    fn retried_task_is_invisible_until_delay_expires() {
        let (_dir, service) = service();
        let id = service
            .enqueue(EnqueueRequest::new(TaskType::ProcessContent).content_id(9))
            .unwrap();
        service.dequeue(TaskFilter::default(), "w").unwrap();
        service.complete_task(id, false, Some("transient")).unwrap();
        service.retry_task(id, 120).unwrap();

        // Before the delay elapses, nothing is claimable.
        assert!(service.dequeue(TaskFilter::default(), "w").unwrap().is_none());

        let task = service.tasks().get(id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 1);
        assert!(task.created_at > Utc::now() + chrono::Duration::seconds(110));
    }

    #[test]
    fn failed_completion_defaults_error_message() {
        let (_dir, service) = service();
        let id = service
            .enqueue(EnqueueRequest::new(TaskType::Scrape))
            .unwrap();
        service.complete_task(id, false, None).unwrap();

        let task = service.tasks().get(id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(
            task.error_message.as_deref(),
            Some("Task failed without error details")
        );
    }

    #[test]
    fn queue_filter_partitions_workers() {
        let (_dir, service) = service();
        service
            .enqueue(EnqueueRequest::new(TaskType::Summarize).content_id(1))
            .unwrap();
        let transcribe = service
            .enqueue(EnqueueRequest::new(TaskType::Transcribe).content_id(2))
            .unwrap();

        let filter = TaskFilter {
            queue_name: Some(TaskQueue::Transcribe),
            ..Default::default()
        };
        let task = service.dequeue(filter, "transcribe-worker").unwrap().unwrap();
        assert_eq!(task.id, transcribe);
        assert!(service.dequeue(filter, "transcribe-worker").unwrap().is_none());
    }

    #[test]
    fn concurrent_dequeue_never_double_claims() {
        let (dir, _service) = service();
        let db_path = dir.path().join("test.db");
        let service = Arc::new(QueueService::new(&db_path).unwrap());

        const TASKS: usize = 20;
        for _ in 0..TASKS {
            service
                .enqueue(EnqueueRequest::new(TaskType::AnalyzeUrl))
                .unwrap();
        }

        let mut handles = Vec::new();
        for worker in 0..4 {
            let service = Arc::new(QueueService::new(&db_path).unwrap());
            handles.push(std::thread::spawn(move || {
                let mut claimed = Vec::new();
                loop {
                    match service.dequeue(TaskFilter::default(), &format!("w{worker}")) {
                        Ok(Some(task)) => claimed.push(task.id),
                        Ok(None) => break,
                        // Claim loops may surface lock contention; retry.
                        Err(_) => continue,
                    }
                }
                claimed
            }));
        }

        let mut all: Vec<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        let before_dedup = all.len();
        all.dedup();
        assert_eq!(all.len(), before_dedup, "a task id was claimed twice");
        assert_eq!(all.len(), TASKS);
    }

    #[test]
    fn strip_payload_key_removes_only_that_key() {
        let (_dir, service) = service();
        let id = service
            .enqueue(
                EnqueueRequest::new(TaskType::AnalyzeUrl)
                    .content_id(3)
                    .payload(payload(json!({"instruction": "find links", "crawl_links": true}))),
            )
            .unwrap();

        service.strip_payload_key(id, "instruction").unwrap();
        let task = service.tasks().get(id).unwrap().unwrap();
        assert!(!task.payload.contains_key("instruction"));
        assert_eq!(task.payload["crawl_links"], json!(true));
    }
}
