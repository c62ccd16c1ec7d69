//! Podcast audio download task handler.

use std::path::{Path, PathBuf};

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

/// Sanitize a title into a filesystem-safe name.
fn sanitize_filename(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                ' '
            }
        })
        .collect();
    cleaned
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .chars()
        .take(100)
        .collect()
}

fn extension_from_url(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            Path::new(parsed.path())
                .extension()
                .map(|ext| ext.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "mp3".to_string())
}

pub struct DownloadAudioHandler;

impl DownloadAudioHandler {
    fn target_path(context: &TaskContext, feed_name: &str, title: &str, audio_url: &str) -> PathBuf {
        context
            .settings
            .audio_dir()
            .join(sanitize_filename(feed_name))
            .join(format!(
                "{}.{}",
                sanitize_filename(title),
                extension_from_url(audio_url)
            ))
    }

    async fn download(
        &self,
        context: &TaskContext,
        content_id: i64,
    ) -> RepoResult<TaskResult> {
        let Some(content) = context.contents.get(content_id)? else {
            tracing::error!(content_id, "content not found for download");
            return Ok(TaskResult::fail_permanent("Content not found"));
        };

        let base = normalize_metadata_shape(&content.metadata);
        let flat = merge_runtime_metadata(&base);

        let Some(audio_url) = flat.get("audio_url").and_then(serde_json::Value::as_str) else {
            tracing::error!(content_id, "no audio URL found");
            context.contents.set_status(
                content_id,
                ContentStatus::Failed,
                Some("No audio URL found"),
            )?;
            return Ok(TaskResult::fail_permanent("No audio URL found"));
        };

        let feed_name = flat
            .get("podcast_feed_name")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown_feed");
        let title = content
            .title
            .clone()
            .unwrap_or_else(|| format!("podcast_{content_id}"));
        let file_path = Self::target_path(context, feed_name, &title, audio_url);

        // Re-delivery after a crash between download and commit: the file is
        // already on disk, just record it and move on.
        if !file_path.exists() {
            let bytes = match context.http.download(audio_url).await {
                Ok(bytes) if !bytes.is_empty() => bytes,
                Ok(_) => {
                    return Ok(TaskResult::fail("Downloaded audio file is empty"));
                }
                Err(e) => {
                    tracing::error!(content_id, audio_url, error = %e, "audio download failed");
                    return Ok(result_from_gateway_error(&e));
                }
            };

            if let Some(parent) = file_path.parent() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    return Ok(TaskResult::fail(format!("Failed to create audio dir: {e}")));
                }
            }
            if let Err(e) = tokio::fs::write(&file_path, &bytes).await {
                return Ok(TaskResult::fail(format!("Failed to write audio file: {e}")));
            }
            tracing::info!(
                content_id,
                path = %file_path.display(),
                bytes = bytes.len(),
                "downloaded podcast audio"
            );
        } else {
            tracing::info!(content_id, path = %file_path.display(), "audio file already exists");
        }

        let file_size = std::fs::metadata(&file_path).map(|m| m.len()).unwrap_or(0);
        let mut updated = base.clone();
        updated.insert("file_path".into(), json!(file_path.to_string_lossy()));
        updated.insert("download_date".into(), json!(Utc::now().to_rfc3339()));
        updated.insert("file_size".into(), json!(file_size));

        let merged = refresh_merge_metadata(&context.contents, content_id, &base, &updated, &[])?;
        context.contents.set_metadata(content_id, &merged)?;

        context.queue.enqueue(TaskType::Transcribe, content_id)?;
        Ok(TaskResult::ok())
    }
}

#[async_trait]
impl TaskHandler for DownloadAudioHandler {
    fn task_type(&self) -> TaskType {
        TaskType::DownloadAudio
    }

    async fn handle(&self, task: &TaskEnvelope, context: &TaskContext) -> TaskResult {
        let Some(content_id) = task.resolve_content_id() else {
            tracing::error!(task_id = task.id, "no content_id provided for download task");
            return TaskResult::fail_permanent("No content_id provided");
        };

        match self.download(context, content_id).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(content_id, error = %e, "download error");
                TaskResult::fail(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentType, NewContent};
    use crate::pipeline::handlers::test_support::{envelope, stub_context, StubHttp};
    use crate::repository::TaskFilter;
    use serde_json::{json, Map, Value};
    use std::sync::Arc;

    fn seed_podcast(
        context: &crate::pipeline::context::TaskContext,
        metadata: Value,
    ) -> i64 {
        let mut new_content = NewContent::new("https://pod.example/ep");
        new_content.content_type = Some(ContentType::Podcast);
        new_content.title = Some("Episode One".into());
        new_content.metadata = match metadata {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        context.contents.insert_if_new(&new_content).unwrap().0
    }

    #[test]
    fn filenames_are_sanitized() {
        assert_eq!(sanitize_filename("An: Episode / Title!"), "An-Episode-Title");
        assert_eq!(extension_from_url("https://cdn.example/a/b.m4a?x=1"), "m4a");
        assert_eq!(extension_from_url("https://cdn.example/stream"), "mp3");
    }

    #[tokio::test]
    async fn downloads_records_metadata_and_chains_transcribe() {
        let (_dir, mut context) = stub_context();
        context.http = Arc::new(
            StubHttp::default().with_download("https://cdn.example/ep.mp3", b"audio-bytes"),
        );
        let id = seed_podcast(&context, json!({"audio_url": "https://cdn.example/ep.mp3"}));

        let task = envelope(TaskType::DownloadAudio, Some(id), json!({}));
        let result = DownloadAudioHandler.handle(&task, &context).await;
        assert!(result.success);

        let content = context.contents.get(id).unwrap().unwrap();
        let file_path = content.metadata_str("file_path").unwrap().to_string();
        assert!(std::path::Path::new(&file_path).exists());
        assert_eq!(content.metadata["file_size"], json!(11));

        let next = context
            .queue
            .service()
            .dequeue(TaskFilter::default(), "t")
            .unwrap()
            .unwrap();
        assert_eq!(next.task_type, TaskType::Transcribe);

        // Re-delivery is idempotent: the existing file short-circuits.
        let again = DownloadAudioHandler.handle(&task, &context).await;
        assert!(again.success);
    }

    #[tokio::test]
    async fn missing_audio_url_fails_permanently() {
        let (_dir, context) = stub_context();
        let id = seed_podcast(&context, json!({}));

        let task = envelope(TaskType::DownloadAudio, Some(id), json!({}));
        let result = DownloadAudioHandler.handle(&task, &context).await;
        assert!(!result.success);
        assert!(!result.retryable);

        let content = context.contents.get(id).unwrap().unwrap();
        assert_eq!(content.status, ContentStatus::Failed);
    }

    #[tokio::test]
    async fn transient_download_error_is_retryable() {
        let (_dir, context) = stub_context();
        // Default stub has no downloads registered and fails transiently.
        let id = seed_podcast(&context, json!({"audio_url": "https://cdn.example/gone.mp3"}));

        let task = envelope(TaskType::DownloadAudio, Some(id), json!({}));
        let result = DownloadAudioHandler.handle(&task, &context).await;
        assert!(!result.success);
        assert!(result.retryable);
    }
}
