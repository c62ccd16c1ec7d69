//! Podcast transcription task handler.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use crate::models::{merge_runtime_metadata, normalize_metadata_shape, ContentStatus, TaskType};
use crate::pipeline::context::TaskContext;
use crate::pipeline::handler::TaskHandler;
use crate::pipeline::handlers::result_from_gateway_error;
use crate::pipeline::task_models::{TaskEnvelope, TaskResult};
use crate::repository::Result as RepoResult;
use crate::services::metadata_merge::refresh_merge_metadata;

pub struct TranscribeHandler;

impl TranscribeHandler {
    async fn transcribe(&self, context: &TaskContext, content_id: i64) -> RepoResult<TaskResult> {
        let Some(content) = context.contents.get(content_id)? else {
            tracing::error!(content_id, "content not found for transcription");
            return Ok(TaskResult::fail_permanent("Content not found"));
        };

        let base = normalize_metadata_shape(&content.metadata);
        let flat = merge_runtime_metadata(&base);

        // A prior attempt already produced the transcript; just chain on.
        if flat
            .get("transcript")
            .and_then(serde_json::Value::as_str)
            .is_some_and(|t| !t.is_empty())
        {
            tracing::info!(content_id, "transcript already present, chaining to summarize");
            context.queue.enqueue(TaskType::Summarize, content_id)?;
            return Ok(TaskResult::ok());
        }

        let Some(file_path) = flat.get("file_path").and_then(serde_json::Value::as_str) else {
            tracing::error!(content_id, "no audio file to transcribe");
            context.contents.set_status(
                content_id,
                ContentStatus::Failed,
                Some("No audio file to transcribe"),
            )?;
            return Ok(TaskResult::fail_permanent("No audio file to transcribe"));
        };

        let transcript = match context.transcriber.transcribe(file_path).await {
            Ok(transcript) => transcript,
            Err(e) => {
                tracing::error!(content_id, file_path, error = %e, "transcription failed");
                return Ok(result_from_gateway_error(&e));
            }
        };

        let mut updated = base.clone();
        updated.insert("transcript".into(), json!(transcript.text));
        updated.insert("transcription_date".into(), json!(Utc::now().to_rfc3339()));
        if let Some(language) = &transcript.language {
            updated.insert("transcript_language".into(), json!(language));
        }
        if let Some(duration) = transcript.duration_seconds {
            updated.insert("duration".into(), json!(duration));
        }

        let merged = refresh_merge_metadata(&context.contents, content_id, &base, &updated, &[])?;
        context.contents.set_metadata(content_id, &merged)?;

        context.queue.enqueue(TaskType::Summarize, content_id)?;
        tracing::info!(content_id, "transcription stored, summarize enqueued");
        Ok(TaskResult::ok())
    }
}

#[async_trait]
impl TaskHandler for TranscribeHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Transcribe
    }

    async fn handle(&self, task: &TaskEnvelope, context: &TaskContext) -> TaskResult {
        let Some(content_id) = task.resolve_content_id() else {
            tracing::error!(task_id = task.id, "no content_id provided for transcribe task");
            return TaskResult::fail_permanent("No content_id provided");
        };

        match self.transcribe(context, content_id).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(content_id, error = %e, "transcription error");
                TaskResult::fail(e.to_string())
            }
        }
    }
}
