//! Task envelope and result models crossing the handler boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::{Task, TaskQueue, TaskStatus, TaskType};

/// Normalized snapshot of a claimed task row.
///
/// An envelope is detached from the database session that claimed it, so
/// handlers never hold a live row across their execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub id: i64,
    pub task_type: TaskType,
    #[serde(default)]
    pub content_id: Option<i64>,
    #[serde(default, deserialize_with = "normalize_payload")]
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub queue_name: Option<TaskQueue>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

/// Null payloads normalize to an empty map.
fn normalize_payload<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    })
}

impl TaskEnvelope {
    /// Build an envelope from a claimed queue row.
    pub fn from_task(task: Task) -> Self {
        Self {
            id: task.id,
            task_type: task.task_type,
            content_id: task.content_id,
            payload: task.payload,
            retry_count: task.retry_count,
            status: Some(task.status),
            queue_name: Some(task.queue_name),
            created_at: Some(task.created_at),
            started_at: task.started_at,
        }
    }

    /// The content this task addresses: the column when set, otherwise the
    /// payload's `content_id` field.
    pub fn resolve_content_id(&self) -> Option<i64> {
        self.content_id
            .or_else(|| self.payload.get("content_id").and_then(Value::as_i64))
    }

    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    pub fn payload_bool(&self, key: &str) -> bool {
        self.payload
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Outcome of task processing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    pub success: bool,
    pub error_message: Option<String>,
    pub retry_delay_seconds: Option<i64>,
    /// False marks a terminal failure that bypasses the retry loop.
    pub retryable: bool,
}

impl TaskResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error_message: None,
            retry_delay_seconds: None,
            retryable: true,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            retry_delay_seconds: None,
            retryable: true,
        }
    }

    /// A failure no amount of retrying will fix.
    pub fn fail_permanent(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            ..Self::fail(message)
        }
    }

    /// Ask the loop for a specific retry delay instead of the default
    /// backoff schedule.
    pub fn with_retry_delay(mut self, delay_seconds: i64) -> Self {
        self.retry_delay_seconds = Some(delay_seconds);
        self
    }
}
