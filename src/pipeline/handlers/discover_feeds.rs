//! Feed discovery task handler.

use async_trait::async_trait;
use serde_json::Value;

use crate::models::TaskType;
use crate::pipeline::context::TaskContext;
use crate::pipeline::handler::TaskHandler;
use crate::pipeline::handlers::result_from_gateway_error;
use crate::pipeline::task_models::{TaskEnvelope, TaskResult};

/// Runs feed/podcast discovery for a user.
pub struct DiscoverFeedsHandler;

#[async_trait]
impl TaskHandler for DiscoverFeedsHandler {
    fn task_type(&self) -> TaskType {
        TaskType::DiscoverFeeds
    }

    async fn handle(&self, task: &TaskEnvelope, context: &TaskContext) -> TaskResult {
        let Some(user_id) = task.payload.get("user_id").and_then(Value::as_i64) else {
            tracing::error!(task_id = task.id, "missing user_id in discover_feeds task");
            return TaskResult::fail_permanent("Missing user_id");
        };

        let trigger = task.payload_str("trigger").unwrap_or("cron");

        match context.discovery.discover_feeds(user_id, trigger).await {
            Ok(()) => TaskResult::ok(),
            Err(e) => {
                tracing::error!(user_id, error = %e, "feed discovery task failed");
                result_from_gateway_error(&e)
            }
        }
    }
}
