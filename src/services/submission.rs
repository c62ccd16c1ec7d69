//! Content submission: the producer path for user-provided URLs.

use serde_json::{Map, Value};

use crate::models::{NewContent, SELF_SUBMISSION_SOURCE};
use crate::repository::{ContentRepository, RepositoryError, Result};
use crate::services::queue::{EnqueueRequest, QueueService};
use crate::models::TaskType;

/// Normalize a URL for storage and dedup.
///
/// Upgrades http to https, strips trailing slashes and fragments, and drops
/// common tracking parameters.
pub fn normalize_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let mut parsed = url::Url::parse(trimmed)
        .map_err(|e| RepositoryError::NotFound(format!("invalid url {trimmed}: {e}")))?;

    if parsed.scheme() == "http" {
        let _ = parsed.set_scheme("https");
    }
    parsed.set_fragment(None);

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| !key.starts_with("utm_") && key != "fbclid" && key != "ref")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        serializer.extend_pairs(kept);
        parsed.set_query(Some(&serializer.finish()));
    }

    Ok(parsed.to_string().trim_end_matches('/').to_string())
}

/// Outcome of a submission.
#[derive(Debug, Clone)]
pub struct Submission {
    pub content_id: i64,
    pub task_id: i64,
    pub created: bool,
}

/// Insert a submitted URL and enqueue its analysis.
///
/// Duplicate URLs fall through to the existing row but still get a fresh
/// `analyze_url` task so re-submissions with new payload flags take effect.
pub fn submit_url(
    contents: &ContentRepository,
    queue: &QueueService,
    raw_url: &str,
    payload: Map<String, Value>,
) -> Result<Submission> {
    let url = normalize_url(raw_url)?;

    let mut new_content = NewContent::new(&url);
    new_content.source = Some(SELF_SUBMISSION_SOURCE.to_string());
    let (content_id, created) = contents.insert_if_new(&new_content)?;

    let task_id = queue.enqueue(
        EnqueueRequest::new(TaskType::AnalyzeUrl)
            .content_id(content_id)
            .payload(payload),
    )?;

    tracing::info!(content_id, task_id, created, url = %url, "submitted content");
    Ok(Submission {
        content_id,
        task_id,
        created,
    })
}
