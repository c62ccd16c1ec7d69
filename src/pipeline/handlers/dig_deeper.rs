//! Dig-deeper chat task handler.

use async_trait::async_trait;
use serde_json::Value;

use crate::models::TaskType;
use crate::pipeline::context::TaskContext;
use crate::pipeline::handler::TaskHandler;
use crate::pipeline::handlers::result_from_gateway_error;
use crate::pipeline::task_models::{TaskEnvelope, TaskResult};

/// Starts a dig-deeper chat over processed content.
pub struct DigDeeperHandler;

#[async_trait]
impl TaskHandler for DigDeeperHandler {
    fn task_type(&self) -> TaskType {
        TaskType::DigDeeper
    }

    async fn handle(&self, task: &TaskEnvelope, context: &TaskContext) -> TaskResult {
        let content_id = task.resolve_content_id();
        let user_id = task.payload.get("user_id").and_then(Value::as_i64);
        let (Some(content_id), Some(user_id)) = (content_id, user_id) else {
            tracing::error!(
                task_id = task.id,
                "missing content_id or user_id for dig_deeper task"
            );
            return TaskResult::fail_permanent("Missing content_id or user_id");
        };

        match context.contents.get(content_id) {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::error!(content_id, "content not found for dig_deeper");
                return TaskResult::fail_permanent("Content not found");
            }
            Err(e) => return TaskResult::fail(e.to_string()),
        }

        match context.chat.run_dig_deeper(content_id, user_id).await {
            Ok(()) => TaskResult::ok(),
            Err(e) => {
                tracing::error!(content_id, user_id, error = %e, "dig_deeper message failed");
                result_from_gateway_error(&e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewContent;
    use crate::pipeline::handlers::test_support::{envelope, stub_context, StubChat};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn starts_chat_for_existing_content() {
        let (_dir, mut context) = stub_context();
        let chat = Arc::new(StubChat::default());
        context.chat = chat.clone();
        let (id, _) = context
            .contents
            .insert_if_new(&NewContent::new("https://a.example/deep"))
            .unwrap();

        let task = envelope(TaskType::DigDeeper, Some(id), json!({"user_id": 3}));
        assert!(DigDeeperHandler.handle(&task, &context).await.success);
        assert_eq!(chat.calls.lock().unwrap().as_slice(), &[(id, 3)]);
    }

    #[tokio::test]
    async fn missing_ids_fail_permanently() {
        let (_dir, context) = stub_context();
        let task = envelope(TaskType::DigDeeper, Some(1), json!({}));
        let result = DigDeeperHandler.handle(&task, &context).await;
        assert!(!result.success);
        assert!(!result.retryable);
    }

    #[tokio::test]
    async fn missing_content_fails_permanently() {
        let (_dir, context) = stub_context();
        let task = envelope(TaskType::DigDeeper, Some(404), json!({"user_id": 3}));
        let result = DigDeeperHandler.handle(&task, &context).await;
        assert!(!result.success);
        assert!(!result.retryable);
        assert_eq!(result.error_message.as_deref(), Some("Content not found"));
    }
}
