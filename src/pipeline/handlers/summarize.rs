//! Summarization task handler.
//!
//! Selects the source text and summarization parameters by content type,
//! persists the summary payload, completes the content, and enqueues the
//! follow-up media generation stage.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::models::{
    merge_runtime_metadata, normalize_metadata_shape, ContentStatus, ContentType, TaskType,
};
use crate::pipeline::context::TaskContext;
use crate::pipeline::handler::TaskHandler;
use crate::pipeline::task_models::{TaskEnvelope, TaskResult};
use crate::repository::Result as RepoResult;
use crate::services::gateways::SummarizeRequest;
use crate::services::metadata_merge::refresh_merge_metadata;

/// Aggregator context lines prefixed to news content before summarization.
fn build_news_context(metadata: &Map<String, Value>) -> String {
    let mut lines = Vec::new();

    let article = metadata.get("article").and_then(Value::as_object);
    if let Some(title) = article
        .and_then(|a| a.get("title"))
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
    {
        lines.push(format!("Article Title: {title}"));
    }
    if let Some(url) = article
        .and_then(|a| a.get("url"))
        .and_then(Value::as_str)
        .filter(|u| !u.is_empty())
    {
        lines.push(format!("Article URL: {url}"));
    }

    if let Some(aggregator) = metadata.get("aggregator").and_then(Value::as_object) {
        let mut context_bits = Vec::new();
        if let Some(name) = aggregator
            .get("name")
            .or_else(|| metadata.get("platform"))
            .and_then(Value::as_str)
        {
            context_bits.push(name.to_string());
        }
        if let Some(author) = aggregator.get("author").and_then(Value::as_str) {
            context_bits.push(format!("by {author}"));
        }
        if !context_bits.is_empty() {
            lines.push(format!("Aggregator Context: {}", context_bits.join(", ")));
        }

        if let Some(discussion_url) = metadata
            .get("discussion_url")
            .or_else(|| aggregator.get("url"))
            .and_then(Value::as_str)
        {
            lines.push(format!("Discussion URL: {discussion_url}"));
        }

        let extra = aggregator.get("metadata").and_then(Value::as_object);
        let mut signals = Vec::new();
        for field in ["score", "comments_count", "likes", "retweets", "replies"] {
            if let Some(value) = extra.and_then(|e| e.get(field)) {
                if !value.is_null() {
                    signals.push(format!("{field}={value}"));
                }
            }
        }
        if !signals.is_empty() {
            lines.push(format!("Signals: {}", signals.join(", ")));
        }
    }

    if let Some(excerpt) = metadata.get("excerpt").and_then(Value::as_str) {
        lines.push(format!("Aggregator Summary: {excerpt}"));
    }

    lines.join("\n")
}

fn truncate(message: &str, limit: usize) -> String {
    if message.len() <= limit {
        message.to_string()
    } else {
        message.chars().take(limit).collect()
    }
}

pub struct SummarizeHandler;

impl SummarizeHandler {
    /// Record a summarization failure on the content: structured
    /// `processing_errors` entry, terminal failed status, truncated message.
    fn persist_failure(
        &self,
        context: &TaskContext,
        content_id: i64,
        reason: &str,
    ) -> RepoResult<()> {
        let Some(mut content) = context.contents.get(content_id)? else {
            return Ok(());
        };

        let base = normalize_metadata_shape(&content.metadata);
        let mut updated = base.clone();
        updated.remove("summary");

        let mut errors = updated
            .get("processing_errors")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        errors.push(json!({
            "stage": "summarization",
            "reason": reason,
            "timestamp": Utc::now().to_rfc3339(),
        }));
        updated.insert("processing_errors".into(), json!(errors));

        content.metadata =
            refresh_merge_metadata(&context.contents, content_id, &base, &updated, &[])?;
        content.status = ContentStatus::Failed;
        content.error_message = Some(truncate(reason, 500));
        content.processed_at = Some(Utc::now());
        context.contents.save(&content)?;
        Ok(())
    }

    async fn summarize(&self, context: &TaskContext, content_id: i64) -> RepoResult<TaskResult> {
        let Some(mut content) = context.contents.get(content_id)? else {
            tracing::error!(content_id, "content not found for summarization");
            return Ok(TaskResult::fail_permanent("Content not found"));
        };

        tracing::info!(
            content_id,
            content_type = content.content_type.as_str(),
            status = content.status.as_str(),
            "summarizing content"
        );

        let base = normalize_metadata_shape(&content.metadata);
        let flat = merge_runtime_metadata(&base);

        let text_to_summarize = match content.content_type {
            ContentType::Article => flat
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            ContentType::News => {
                let text = flat
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let aggregator_context = build_news_context(&flat);
                if !aggregator_context.is_empty() && !text.is_empty() {
                    format!("Context:\n{aggregator_context}\n\nArticle Content:\n{text}")
                } else {
                    text.to_string()
                }
            }
            ContentType::Podcast => flat
                .get("transcript")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            ContentType::Unknown => {
                let reason = "Unknown content type for summarization: unknown";
                tracing::error!(content_id, "unknown content type for summarization");
                self.persist_failure(context, content_id, reason)?;
                return Ok(TaskResult::fail_permanent(reason));
            }
        };

        if text_to_summarize.is_empty() {
            let reason = format!("No text to summarize for content {content_id}");
            tracing::error!(
                content_id,
                content_type = content.content_type.as_str(),
                metadata_keys = ?flat.keys().collect::<Vec<_>>(),
                "no text to summarize"
            );
            self.persist_failure(context, content_id, &reason)?;
            return Ok(TaskResult::fail(reason));
        }

        // Parameter selection by content type.
        let (summarization_type, provider_override, max_bullet_points, max_quotes) =
            match content.content_type {
                ContentType::News => ("news_digest", Some("openai".to_string()), 4, 0),
                _ => ("interleaved", None, 6, 8),
            };

        tracing::info!(
            content_id,
            summarization_type,
            text_length = text_to_summarize.len(),
            "calling summarizer"
        );

        let request = SummarizeRequest {
            content: text_to_summarize,
            content_type: summarization_type.to_string(),
            title: content.title.clone(),
            max_bullet_points,
            max_quotes,
            provider_override,
        };

        let summary = match context.llm.summarize(request).await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::error!(content_id, error = %e, "summarizer call failed");
                self.persist_failure(context, content_id, &format!("Summarization error: {e}"))?;
                return Ok(if e.is_retryable() {
                    TaskResult::fail(e.to_string())
                } else {
                    TaskResult::fail_permanent(e.to_string())
                });
            }
        };

        let Some(summary) = summary else {
            let reason = "LLM summarization returned no payload";
            tracing::error!(content_id, "missing summary payload");
            self.persist_failure(context, content_id, reason)?;
            return Ok(TaskResult::fail(reason));
        };

        let mut updated = base.clone();
        updated.insert("summary".into(), summary.to_value());
        updated.insert("summarization_date".into(), json!(Utc::now().to_rfc3339()));

        if content.content_type == ContentType::News {
            if let Some(title) = summary.title() {
                content.title = Some(title.to_string());
            }
        } else if content.title.is_none() {
            content.title = summary.title().map(str::to_string);
        }

        content.metadata =
            refresh_merge_metadata(&context.contents, content_id, &base, &updated, &[])?;
        content.status = ContentStatus::Completed;
        content.processed_at = Some(Utc::now());
        context.contents.save(&content)?;

        let followup = if content.content_type == ContentType::News {
            TaskType::GenerateThumbnail
        } else {
            TaskType::GenerateImage
        };
        context.queue.enqueue(followup, content_id)?;

        tracing::info!(
            content_id,
            followup = followup.as_str(),
            "summary stored, media generation enqueued"
        );
        Ok(TaskResult::ok())
    }
}

#[async_trait]
impl TaskHandler for SummarizeHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Summarize
    }

    async fn handle(&self, task: &TaskEnvelope, context: &TaskContext) -> TaskResult {
        let Some(content_id) = task.resolve_content_id() else {
            tracing::error!(task_id = task.id, "no content_id provided for summarize task");
            return TaskResult::fail_permanent("No content_id provided");
        };

        match self.summarize(context, content_id).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(content_id, error = %e, "summarization error");
                TaskResult::fail(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewContent;
    use crate::pipeline::handlers::test_support::{envelope, stub_context, StubLlm};
    use crate::repository::TaskFilter;
    use crate::services::gateways::{GatewayError, SummaryPayload};
    use std::sync::Arc;

    fn seed(
        context: &crate::pipeline::context::TaskContext,
        content_type: ContentType,
        metadata: Value,
    ) -> i64 {
        let mut new_content = NewContent::new("https://a.example/s");
        new_content.content_type = Some(content_type);
        new_content.metadata = match metadata {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        context.contents.insert_if_new(&new_content).unwrap().0
    }

    fn summary(value: Value) -> SummaryPayload {
        match value {
            Value::Object(map) => SummaryPayload(map),
            _ => panic!("expected object"),
        }
    }

    fn llm_with_summary(payload: Value) -> Arc<StubLlm> {
        Arc::new(StubLlm {
            summary: Some(summary(payload)),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn article_summary_completes_content_and_enqueues_image() {
        let (_dir, mut context) = stub_context();
        let llm = llm_with_summary(json!({"title": "Generated", "overview": "o"}));
        context.llm = llm.clone();
        let id = seed(
            &context,
            ContentType::Article,
            json!({"content": "long article body"}),
        );

        let task = envelope(TaskType::Summarize, Some(id), json!({}));
        assert!(SummarizeHandler.handle(&task, &context).await.success);

        let content = context.contents.get(id).unwrap().unwrap();
        assert_eq!(content.status, ContentStatus::Completed);
        assert!(content.processed_at.is_some());
        assert_eq!(content.title.as_deref(), Some("Generated"));
        assert_eq!(content.metadata["summary"]["overview"], json!("o"));
        assert!(content.metadata.contains_key("summarization_date"));

        let next = context
            .queue
            .service()
            .dequeue(TaskFilter::default(), "t")
            .unwrap()
            .unwrap();
        assert_eq!(next.task_type, TaskType::GenerateImage);

        let calls = llm.summarize_calls.lock().unwrap();
        assert_eq!(calls[0].content_type, "interleaved");
        assert_eq!(calls[0].max_bullet_points, 6);
        assert_eq!(calls[0].max_quotes, 8);
    }

    #[tokio::test]
    async fn news_uses_digest_params_and_thumbnail_followup() {
        let (_dir, mut context) = stub_context();
        let llm = llm_with_summary(json!({"title": "Digest"}));
        context.llm = llm.clone();
        let id = seed(
            &context,
            ContentType::News,
            json!({
                "content": "story text",
                "aggregator": {"name": "hackernews", "author": "pg",
                               "metadata": {"score": 420, "comments_count": 77}},
                "discussion_url": "https://news.ycombinator.com/item?id=1",
            }),
        );

        let task = envelope(TaskType::Summarize, Some(id), json!({}));
        assert!(SummarizeHandler.handle(&task, &context).await.success);

        let next = context
            .queue
            .service()
            .dequeue(TaskFilter::default(), "t")
            .unwrap()
            .unwrap();
        assert_eq!(next.task_type, TaskType::GenerateThumbnail);

        let calls = llm.summarize_calls.lock().unwrap();
        assert_eq!(calls[0].content_type, "news_digest");
        assert_eq!(calls[0].max_bullet_points, 4);
        assert_eq!(calls[0].max_quotes, 0);
        assert_eq!(calls[0].provider_override.as_deref(), Some("openai"));
        // Aggregator context is prefixed to the text.
        assert!(calls[0].content.starts_with("Context:\n"));
        assert!(calls[0].content.contains("Signals: score=420, comments_count=77"));
        assert!(calls[0].content.contains("Article Content:\nstory text"));
    }

    #[tokio::test]
    async fn podcast_summarizes_transcript() {
        let (_dir, mut context) = stub_context();
        let llm = llm_with_summary(json!({"overview": "pod"}));
        context.llm = llm.clone();
        let id = seed(
            &context,
            ContentType::Podcast,
            json!({"transcript": "spoken words"}),
        );

        let task = envelope(TaskType::Summarize, Some(id), json!({}));
        assert!(SummarizeHandler.handle(&task, &context).await.success);

        let calls = llm.summarize_calls.lock().unwrap();
        assert_eq!(calls[0].content, "spoken words");
    }

    #[tokio::test]
    async fn missing_text_records_processing_error_and_fails_content() {
        let (_dir, context) = stub_context();
        let id = seed(&context, ContentType::Article, json!({}));

        let task = envelope(TaskType::Summarize, Some(id), json!({}));
        let result = SummarizeHandler.handle(&task, &context).await;
        assert!(!result.success);

        let content = context.contents.get(id).unwrap().unwrap();
        assert_eq!(content.status, ContentStatus::Failed);
        assert!(content.error_message.is_some());
        let errors = content.metadata["processing_errors"].as_array().unwrap();
        assert_eq!(errors[0]["stage"], json!("summarization"));
        assert!(errors[0]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn declined_summary_fails_with_record() {
        let (_dir, mut context) = stub_context();
        context.llm = Arc::new(StubLlm {
            decline_summary: true,
            ..Default::default()
        });
        let id = seed(&context, ContentType::Article, json!({"content": "text"}));

        let task = envelope(TaskType::Summarize, Some(id), json!({}));
        let result = SummarizeHandler.handle(&task, &context).await;
        assert!(!result.success);
        assert!(result.retryable);

        let content = context.contents.get(id).unwrap().unwrap();
        assert_eq!(content.status, ContentStatus::Failed);
        assert!(!content.metadata.contains_key("summary"));
    }

    #[tokio::test]
    async fn terminal_summarizer_error_bypasses_retry() {
        let (_dir, mut context) = stub_context();
        context.llm = Arc::new(StubLlm {
            summarize_error: Some(GatewayError::Terminal("API key rejected".into())),
            ..Default::default()
        });
        let id = seed(&context, ContentType::Article, json!({"content": "text"}));

        let task = envelope(TaskType::Summarize, Some(id), json!({}));
        let result = SummarizeHandler.handle(&task, &context).await;
        assert!(!result.success);
        assert!(!result.retryable);
    }

    #[tokio::test]
    async fn error_message_is_truncated() {
        let (_dir, mut context) = stub_context();
        let long_reason = "x".repeat(2000);
        context.llm = Arc::new(StubLlm {
            summarize_error: Some(GatewayError::Transient(long_reason)),
            ..Default::default()
        });
        let id = seed(&context, ContentType::Article, json!({"content": "text"}));

        let task = envelope(TaskType::Summarize, Some(id), json!({}));
        assert!(!SummarizeHandler.handle(&task, &context).await.success);

        let content = context.contents.get(id).unwrap().unwrap();
        assert_eq!(content.error_message.unwrap().len(), 500);
    }
}
