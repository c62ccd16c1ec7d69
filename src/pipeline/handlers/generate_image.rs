//! Image generation task handler.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::models::{normalize_metadata_shape, ContentType, TaskType};
use crate::pipeline::context::TaskContext;
use crate::pipeline::handler::TaskHandler;
use crate::pipeline::handlers::result_from_gateway_error;
use crate::pipeline::task_models::{TaskEnvelope, TaskResult};
use crate::repository::Result as RepoResult;
use crate::services::metadata_merge::refresh_merge_metadata;

/// Generates an AI header image for completed content. News items get a
/// screenshot thumbnail instead and are skipped here.
pub struct GenerateImageHandler;

impl GenerateImageHandler {
    async fn generate(&self, context: &TaskContext, content_id: i64) -> RepoResult<TaskResult> {
        let Some(content) = context.contents.get(content_id)? else {
            tracing::error!(content_id, "content not found for image generation");
            return Ok(TaskResult::fail_permanent("Content not found"));
        };

        if content.content_type == ContentType::News {
            tracing::info!(content_id, "skipping AI image generation for news content");
            return Ok(TaskResult::ok());
        }

        let base = normalize_metadata_shape(&content.metadata);
        let overview = base
            .get("summary")
            .and_then(Value::as_object)
            .and_then(|summary| summary.get("overview"))
            .and_then(Value::as_str);

        let result = match context
            .images
            .generate_image(content_id, content.title.as_deref(), overview)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(content_id, error = %e, "image generation call failed");
                return Ok(result_from_gateway_error(&e));
            }
        };

        if !result.success {
            if result.was_skipped() {
                tracing::info!(
                    content_id,
                    reason = result.error_message.as_deref(),
                    "image generation skipped"
                );
                return Ok(TaskResult::ok());
            }
            let message = result
                .error_message
                .unwrap_or_else(|| "Image generation failed".to_string());
            tracing::error!(content_id, error = %message, "image generation failed");
            return Ok(TaskResult::fail(message));
        }

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

        tracing::info!(content_id, "generated image for content");
        Ok(TaskResult::ok())
    }
}

#[async_trait]
impl TaskHandler for GenerateImageHandler {
    fn task_type(&self) -> TaskType {
        TaskType::GenerateImage
    }

    async fn handle(&self, task: &TaskEnvelope, context: &TaskContext) -> TaskResult {
        let Some(content_id) = task.resolve_content_id() else {
            tracing::error!(task_id = task.id, "no content_id provided for image generation task");
            return TaskResult::fail_permanent("No content_id provided");
        };

        match self.generate(context, content_id).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(content_id, error = %e, "image generation error");
                TaskResult::fail(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewContent;
    use crate::pipeline::handlers::test_support::{envelope, stub_context, StubImages};
    use std::sync::Arc;

    fn seed(context: &crate::pipeline::context::TaskContext, content_type: ContentType) -> i64 {
        let mut new_content = NewContent::new("https://a.example/img");
        new_content.content_type = Some(content_type);
        context.contents.insert_if_new(&new_content).unwrap().0
    }

    #[tokio::test]
    async fn stores_image_urls_on_success() {
        let (_dir, mut context) = stub_context();
        let images = Arc::new(StubImages::default());
        context.images = images.clone();
        let id = seed(&context, ContentType::Article);

        let task = envelope(TaskType::GenerateImage, Some(id), json!({}));
        assert!(GenerateImageHandler.handle(&task, &context).await.success);

        let content = context.contents.get(id).unwrap().unwrap();
        assert!(content.metadata.contains_key("image_generated_at"));
        assert_eq!(content.metadata["image_url"], json!("/images/1.png"));
        assert_eq!(images.generate_calls.lock().unwrap().as_slice(), &[id]);
    }

    #[tokio::test]
    async fn news_content_is_skipped_as_success() {
        let (_dir, mut context) = stub_context();
        let images = Arc::new(StubImages::default());
        context.images = images.clone();
        let id = seed(&context, ContentType::News);

        let task = envelope(TaskType::GenerateImage, Some(id), json!({}));
        assert!(GenerateImageHandler.handle(&task, &context).await.success);
        assert!(images.generate_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn service_skip_counts_as_success() {
        let (_dir, mut context) = stub_context();
        context.images = Arc::new(StubImages {
            result: Some(crate::services::gateways::ImageResult {
                success: false,
                error_message: Some("Skipped: image disabled for source".into()),
                ..Default::default()
            }),
            ..Default::default()
        });
        let id = seed(&context, ContentType::Article);

        let task = envelope(TaskType::GenerateImage, Some(id), json!({}));
        assert!(GenerateImageHandler.handle(&task, &context).await.success);
    }
}
