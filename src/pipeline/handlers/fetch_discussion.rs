//! Discussion fetch task handler.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use crate::models::{normalize_metadata_shape, TaskType};
use crate::pipeline::context::TaskContext;
use crate::pipeline::handler::TaskHandler;
use crate::pipeline::handlers::result_from_gateway_error;
use crate::pipeline::task_models::{TaskEnvelope, TaskResult};
use crate::repository::Result as RepoResult;
use crate::services::metadata_merge::refresh_merge_metadata;

/// Fetches and persists the aggregator discussion payload for a content
/// item.
pub struct FetchDiscussionHandler;

impl FetchDiscussionHandler {
    async fn fetch(&self, context: &TaskContext, content_id: i64) -> RepoResult<TaskResult> {
        let Some(content) = context.contents.get(content_id)? else {
            tracing::error!(content_id, "content not found for discussion fetch");
            return Ok(TaskResult::fail_permanent("Content not found"));
        };

        let base = normalize_metadata_shape(&content.metadata);
        let discussion_url = base
            .get("discussion_url")
            .and_then(serde_json::Value::as_str)
            .unwrap_or(&content.url)
            .to_string();

        let payload = match context
            .discussions
            .fetch_discussion(content_id, &discussion_url)
            .await
        {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(content_id, error = %e, "discussion fetch failed");
                return Ok(result_from_gateway_error(&e));
            }
        };

        let mut updated = base.clone();
        updated.insert("discussion".into(), payload);
        updated.insert("discussion_fetched_at".into(), json!(Utc::now().to_rfc3339()));

        let merged = refresh_merge_metadata(&context.contents, content_id, &base, &updated, &[])?;
        context.contents.set_metadata(content_id, &merged)?;
        Ok(TaskResult::ok())
    }
}

#[async_trait]
impl TaskHandler for FetchDiscussionHandler {
    fn task_type(&self) -> TaskType {
        TaskType::FetchDiscussion
    }

    async fn handle(&self, task: &TaskEnvelope, context: &TaskContext) -> TaskResult {
        let Some(content_id) = task.resolve_content_id() else {
            tracing::error!(task_id = task.id, "no content_id provided for fetch_discussion task");
            return TaskResult::fail_permanent("No content_id provided");
        };

        match self.fetch(context, content_id).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(content_id, error = %e, "discussion fetch handler failed");
                TaskResult::fail(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentType, NewContent};
    use crate::pipeline::handlers::test_support::{envelope, stub_context, StubDiscussions};
    use serde_json::Value;
    use std::sync::Arc;

    #[tokio::test]
    async fn stores_discussion_payload_in_metadata() {
        let (_dir, mut context) = stub_context();
        context.discussions = Arc::new(StubDiscussions {
            payload: Some(json!({"comments": [{"author": "pg", "text": "nice"}]})),
        });

        let mut new_content = NewContent::new("https://n.example/item");
        new_content.content_type = Some(ContentType::News);
        new_content.metadata = match json!({"discussion_url": "https://agg.example/d/1"}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let (id, _) = context.contents.insert_if_new(&new_content).unwrap();

        let task = envelope(TaskType::FetchDiscussion, Some(id), json!({}));
        assert!(FetchDiscussionHandler.handle(&task, &context).await.success);

        let content = context.contents.get(id).unwrap().unwrap();
        assert_eq!(
            content.metadata["discussion"]["comments"][0]["author"],
            json!("pg")
        );
        assert!(content.metadata.contains_key("discussion_fetched_at"));
    }

    #[tokio::test]
    async fn missing_content_id_is_permanent() {
        let (_dir, context) = stub_context();
        let task = envelope(TaskType::FetchDiscussion, None, json!({}));
        let result = FetchDiscussionHandler.handle(&task, &context).await;
        assert!(!result.success);
        assert!(!result.retryable);
    }
}
