//! Content processing task handler.
//!
//! Fetches the raw content, extracts normalized fields into metadata, and
//! enqueues the next pipeline stage. Podcasts route to the audio pipeline,
//! short-circuiting past stages whose artifacts already exist.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use crate::models::{
    merge_runtime_metadata, normalize_metadata_shape, update_processing_state, Content,
    ContentStatus, ContentType, TaskType,
};
use crate::pipeline::context::TaskContext;
use crate::pipeline::extract::strategy_for_url;
use crate::pipeline::handler::TaskHandler;
use crate::pipeline::handlers::result_from_gateway_error;
use crate::pipeline::task_models::{TaskEnvelope, TaskResult};
use crate::pipeline::workflow::ContentProcessingWorkflow;
use crate::repository::Result as RepoResult;
use crate::services::metadata_merge::refresh_merge_metadata;

pub struct ProcessContentHandler;

impl ProcessContentHandler {
    /// Podcast route: chain into the audio pipeline, skipping stages whose
    /// artifacts already sit on the metadata.
    fn route_podcast(&self, context: &TaskContext, content: &Content) -> RepoResult<TaskResult> {
        let flat = merge_runtime_metadata(&content.metadata);

        let next = if !flat.contains_key("file_path") {
            TaskType::DownloadAudio
        } else if !flat.contains_key("transcript") {
            TaskType::Transcribe
        } else {
            TaskType::Summarize
        };

        context
            .contents
            .set_status(content.id, ContentStatus::Processing, None)?;
        context.queue.enqueue(next, content.id)?;
        tracing::info!(
            content_id = content.id,
            next = next.as_str(),
            "podcast routed to next stage"
        );
        Ok(TaskResult::ok())
    }

    /// Article/news route: fetch, extract, persist, hand off to summarize.
    async fn process_article(
        &self,
        context: &TaskContext,
        content: &mut Content,
    ) -> RepoResult<TaskResult> {
        let base = normalize_metadata_shape(&content.metadata);
        let strategy = strategy_for_url(&content.url);
        let fetch_url = strategy.preprocess_url(&content.url);

        let (body, _headers) = match context.http.fetch_content(&fetch_url, None).await {
            Ok(page) => page,
            Err(e) => {
                if !e.is_retryable() {
                    tracing::warn!(
                        content_id = content.id,
                        url = %fetch_url,
                        error = %e,
                        "non-retryable fetch error"
                    );
                    let updated = update_processing_state(
                        &base,
                        [(
                            "processing_errors".to_string(),
                            append_processing_error(&base, "fetch", &e.to_string()),
                        )],
                    );
                    let merged = refresh_merge_metadata(
                        &context.contents,
                        content.id,
                        &base,
                        &updated,
                        &[],
                    )?;
                    context.contents.set_metadata(content.id, &merged)?;
                    context.contents.set_status(
                        content.id,
                        ContentStatus::Failed,
                        Some(&truncate(&e.to_string(), 500)),
                    )?;
                    return Ok(TaskResult::fail_permanent(e.to_string()));
                }
                return Ok(result_from_gateway_error(&e));
            }
        };

        let fields = strategy.extract(&body, &fetch_url);

        let mut updated = base.clone();
        updated.insert("content".into(), json!(fields.text));
        updated.insert("word_count".into(), json!(fields.word_count));
        if let Some(author) = &fields.author {
            updated.insert("author".into(), json!(author));
        }
        if let Some(date) = &fields.publish_date {
            updated.insert("publication_date".into(), json!(date));
        }
        updated = update_processing_state(
            &updated,
            [("content_to_summarize".to_string(), json!(fields.text))],
        );

        if content.title.is_none() {
            content.title = fields.title.clone();
        }
        content.status = ContentStatus::Processing;
        content.metadata =
            refresh_merge_metadata(&context.contents, content.id, &base, &updated, &[])?;
        context.contents.save(content)?;

        if ContentProcessingWorkflow::should_enqueue_summarize(content) {
            context.queue.enqueue(TaskType::Summarize, content.id)?;
            tracing::info!(content_id = content.id, "enqueued summarize");
            return Ok(TaskResult::ok());
        }

        // Nothing worth summarizing came out of the page.
        let reason = "No content extracted";
        let failed_base = normalize_metadata_shape(&content.metadata);
        let updated = update_processing_state(
            &failed_base,
            [(
                "processing_errors".to_string(),
                append_processing_error(&failed_base, "extraction", reason),
            )],
        );
        let merged =
            refresh_merge_metadata(&context.contents, content.id, &failed_base, &updated, &[])?;
        context.contents.set_metadata(content.id, &merged)?;
        context
            .contents
            .set_status(content.id, ContentStatus::Failed, Some(reason))?;
        Ok(TaskResult::fail(reason))
    }
}

#[async_trait]
impl TaskHandler for ProcessContentHandler {
    fn task_type(&self) -> TaskType {
        TaskType::ProcessContent
    }

    async fn handle(&self, task: &TaskEnvelope, context: &TaskContext) -> TaskResult {
        let Some(content_id) = task.resolve_content_id() else {
            tracing::error!(task_id = task.id, "no content_id found in task data");
            return TaskResult::fail_permanent("No content_id provided");
        };

        tracing::info!(content_id, worker_id = %context.worker_id, "processing content");

        let outcome: RepoResult<TaskResult> = async {
            let Some(mut content) = context.contents.get(content_id)? else {
                return Ok(TaskResult::fail_permanent("Content not found"));
            };

            // Terminal states are final; re-processing acknowledges as done
            // instead of spinning the retry loop.
            if content.status.is_terminal() {
                tracing::info!(
                    content_id,
                    status = content.status.as_str(),
                    "content already terminal, acknowledging"
                );
                return Ok(TaskResult::ok());
            }

            match content.content_type {
                ContentType::Podcast => self.route_podcast(context, &content),
                ContentType::Article | ContentType::News => {
                    self.process_article(context, &mut content).await
                }
                ContentType::Unknown => {
                    tracing::error!(content_id, "unsupported content type for processing");
                    Ok(TaskResult::fail_permanent("Unsupported content type: unknown"))
                }
            }
        }
        .await;

        match outcome {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(content_id, error = %e, "content processing error");
                TaskResult::fail(e.to_string())
            }
        }
    }
}

/// Append a structured entry to the `processing_errors` list.
fn append_processing_error(
    metadata: &serde_json::Map<String, serde_json::Value>,
    stage: &str,
    reason: &str,
) -> serde_json::Value {
    let mut errors = metadata
        .get("processing_errors")
        .and_then(serde_json::Value::as_array)
        .cloned()
        .unwrap_or_default();
    errors.push(json!({
        "stage": stage,
        "reason": reason,
        "timestamp": Utc::now().to_rfc3339(),
    }));
    json!(errors)
}

fn truncate(message: &str, limit: usize) -> String {
    if message.len() <= limit {
        message.to_string()
    } else {
        message.chars().take(limit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewContent;
    use crate::pipeline::handlers::test_support::{envelope, stub_context, StubHttp};
    use crate::repository::TaskFilter;
    use serde_json::{json, Map, Value};
    use std::sync::Arc;

    fn seed(
        context: &crate::pipeline::context::TaskContext,
        url: &str,
        content_type: ContentType,
        metadata: Value,
    ) -> i64 {
        let mut new_content = NewContent::new(url);
        new_content.content_type = Some(content_type);
        new_content.metadata = match metadata {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        context.contents.insert_if_new(&new_content).unwrap().0
    }

    fn next_task_type(
        context: &crate::pipeline::context::TaskContext,
    ) -> Option<TaskType> {
        context
            .queue
            .service()
            .dequeue(TaskFilter::default(), "t")
            .unwrap()
            .map(|t| t.task_type)
    }

    const ARTICLE_PAGE: &str = r#"
        <html><head><title>Deep Dive</title>
        <meta name="author" content="Sam Author"/></head>
        <body><article><p>Plenty of extracted words to summarize.</p></article></body></html>
    "#;

    #[tokio::test]
    async fn article_extracts_fields_and_enqueues_summarize() {
        let (_dir, mut context) = stub_context();
        context.http = Arc::new(
            StubHttp::default().with_page("https://a.example/story", ARTICLE_PAGE),
        );
        let id = seed(&context, "https://a.example/story", ContentType::Article, json!({}));

        let task = envelope(TaskType::ProcessContent, Some(id), json!({}));
        let result = ProcessContentHandler.handle(&task, &context).await;
        assert!(result.success);

        let content = context.contents.get(id).unwrap().unwrap();
        assert_eq!(content.status, ContentStatus::Processing);
        assert_eq!(content.title.as_deref(), Some("Deep Dive"));
        assert_eq!(content.metadata_str("author"), Some("Sam Author"));
        assert!(content
            .metadata_str("content_to_summarize")
            .unwrap()
            .contains("extracted words"));
        assert_eq!(next_task_type(&context), Some(TaskType::Summarize));
    }

    #[tokio::test]
    async fn terminal_content_acknowledges_as_success() {
        let (_dir, context) = stub_context();
        let id = seed(&context, "https://a.example/dead", ContentType::Article, json!({}));
        context
            .contents
            .set_status(id, ContentStatus::Failed, Some("earlier failure"))
            .unwrap();

        let task = envelope(TaskType::ProcessContent, Some(id), json!({}));
        let result = ProcessContentHandler.handle(&task, &context).await;

        // Terminal failure short-circuits: success, no retry scheduled.
        assert!(result.success);
        assert!(next_task_type(&context).is_none());

        let content = context.contents.get(id).unwrap().unwrap();
        assert_eq!(content.status, ContentStatus::Failed);
    }

    #[tokio::test]
    async fn fresh_podcast_routes_to_download() {
        let (_dir, context) = stub_context();
        let id = seed(
            &context,
            "https://pod.example/ep1",
            ContentType::Podcast,
            json!({"audio_url": "https://cdn.example/1.mp3"}),
        );

        let task = envelope(TaskType::ProcessContent, Some(id), json!({}));
        assert!(ProcessContentHandler.handle(&task, &context).await.success);
        assert_eq!(next_task_type(&context), Some(TaskType::DownloadAudio));

        let content = context.contents.get(id).unwrap().unwrap();
        assert_eq!(content.status, ContentStatus::Processing);
    }

    #[tokio::test]
    async fn downloaded_podcast_short_circuits_to_transcribe() {
        let (_dir, context) = stub_context();
        let id = seed(
            &context,
            "https://pod.example/ep2",
            ContentType::Podcast,
            json!({"file_path": "/audio/ep2.mp3"}),
        );

        let task = envelope(TaskType::ProcessContent, Some(id), json!({}));
        assert!(ProcessContentHandler.handle(&task, &context).await.success);
        assert_eq!(next_task_type(&context), Some(TaskType::Transcribe));
    }

    #[tokio::test]
    async fn transcribed_podcast_short_circuits_to_summarize() {
        let (_dir, context) = stub_context();
        let id = seed(
            &context,
            "https://pod.example/ep3",
            ContentType::Podcast,
            json!({"file_path": "/audio/ep3.mp3", "transcript": "already transcribed"}),
        );

        let task = envelope(TaskType::ProcessContent, Some(id), json!({}));
        assert!(ProcessContentHandler.handle(&task, &context).await.success);
        assert_eq!(next_task_type(&context), Some(TaskType::Summarize));
    }

    #[tokio::test]
    async fn terminal_fetch_error_fails_permanently() {
        let (_dir, context) = stub_context();
        // StubHttp with no pages returns a terminal 404 for everything.
        let id = seed(&context, "https://gone.example/x", ContentType::Article, json!({}));

        let task = envelope(TaskType::ProcessContent, Some(id), json!({}));
        let result = ProcessContentHandler.handle(&task, &context).await;
        assert!(!result.success);
        assert!(!result.retryable);

        let content = context.contents.get(id).unwrap().unwrap();
        assert_eq!(content.status, ContentStatus::Failed);
        let errors = content.metadata["processing_errors"].as_array().unwrap();
        assert_eq!(errors[0]["stage"], json!("fetch"));
    }

    #[tokio::test]
    async fn empty_extraction_marks_content_failed() {
        let (_dir, mut context) = stub_context();
        context.http = Arc::new(
            StubHttp::default().with_page("https://a.example/empty", "<html><body></body></html>"),
        );
        let id = seed(&context, "https://a.example/empty", ContentType::Article, json!({}));

        let task = envelope(TaskType::ProcessContent, Some(id), json!({}));
        let result = ProcessContentHandler.handle(&task, &context).await;
        assert!(!result.success);
        assert!(result.retryable);

        let content = context.contents.get(id).unwrap().unwrap();
        assert_eq!(content.status, ContentStatus::Failed);
        assert!(next_task_type(&context).is_none());
    }

    #[tokio::test]
    async fn unknown_content_type_is_permanent_failure() {
        let (_dir, context) = stub_context();
        let id = seed(&context, "https://a.example/u", ContentType::Unknown, json!({}));

        let task = envelope(TaskType::ProcessContent, Some(id), json!({}));
        let result = ProcessContentHandler.handle(&task, &context).await;
        assert!(!result.success);
        assert!(!result.retryable);
    }

    #[tokio::test]
    async fn missing_content_row_is_permanent_failure() {
        let (_dir, context) = stub_context();
        let task = envelope(TaskType::ProcessContent, Some(424242), json!({}));
        let result = ProcessContentHandler.handle(&task, &context).await;
        assert!(!result.success);
        assert!(!result.retryable);
        assert_eq!(result.error_message.as_deref(), Some("Content not found"));
    }
}
