//! Thumbnail generation task handler.

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

/// Captures a screenshot-based thumbnail for news content.
pub struct GenerateThumbnailHandler;

impl GenerateThumbnailHandler {
    async fn capture(&self, context: &TaskContext, content_id: i64) -> RepoResult<TaskResult> {
        let Some(content) = context.contents.get(content_id)? else {
            tracing::error!(content_id, "content not found for thumbnail generation");
            return Ok(TaskResult::fail_permanent("Content not found"));
        };

        let result = match context
            .images
            .capture_thumbnail(content_id, &content.url)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(content_id, error = %e, "thumbnail capture call failed");
                return Ok(result_from_gateway_error(&e));
            }
        };

        if !result.success {
            if result.was_skipped() {
                tracing::info!(
                    content_id,
                    reason = result.error_message.as_deref(),
                    "thumbnail generation skipped"
                );
                return Ok(TaskResult::ok());
            }
            let message = result
                .error_message
                .unwrap_or_else(|| "Thumbnail generation failed".to_string());
            tracing::error!(content_id, error = %message, "thumbnail generation failed");
            return Ok(TaskResult::fail(message));
        }

        let base = normalize_metadata_shape(&content.metadata);
        let mut updated = base.clone();
        updated.insert("image_generated_at".into(), json!(Utc::now().to_rfc3339()));
        if let Some(image_path) = &result.image_path {
            updated.insert("image_url".into(), json!(image_path));
        }
        if let Some(thumbnail_path) = &result.thumbnail_path {
            updated.insert("thumbnail_url".into(), json!(thumbnail_path));
        }

        let merged = refresh_merge_metadata(&context.contents, content_id, &base, &updated, &[])?;
        context.contents.set_metadata(content_id, &merged)?;

        tracing::info!(content_id, "generated thumbnail for content");
        Ok(TaskResult::ok())
    }
}

#[async_trait]
impl TaskHandler for GenerateThumbnailHandler {
    fn task_type(&self) -> TaskType {
        TaskType::GenerateThumbnail
    }

    async fn handle(&self, task: &TaskEnvelope, context: &TaskContext) -> TaskResult {
        let Some(content_id) = task.resolve_content_id() else {
            tracing::error!(
                task_id = task.id,
                "no content_id provided for thumbnail generation task"
            );
            return TaskResult::fail_permanent("No content_id provided");
        };

        match self.capture(context, content_id).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(content_id, error = %e, "thumbnail generation task failed");
                TaskResult::fail(e.to_string())
            }
        }
    }
}
