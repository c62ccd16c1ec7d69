//! Analyze URL task handler.
//!
//! Classifies a submitted URL and sets up the rest of the pipeline. Three
//! optional sub-flows run in order: feed subscription (short-circuits the
//! pipeline), tweet fanout (rewrites the parent URL and spawns siblings),
//! and URL analysis (pattern fast path or LLM-assisted). Afterwards the
//! parent gets a `process_content` task.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::models::{
    normalize_metadata_shape, update_processing_state, Content, ContentStatus, ContentType,
    NewContent, TaskType, SELF_SUBMISSION_SOURCE,
};
use crate::pipeline::context::TaskContext;
use crate::pipeline::handler::TaskHandler;
use crate::pipeline::task_models::{TaskEnvelope, TaskResult};
use crate::repository::Result as RepoResult;
use crate::services::gateways::{canonical_tweet_url, extract_tweet_id, ContentAnalysis};
use crate::services::metadata_merge::refresh_merge_metadata;
use crate::services::submission::normalize_url;
use crate::services::url_detection::{infer_content_type_and_platform, should_use_llm_analysis};
use crate::services::feeds::detect_feeds_from_html;

/// Result of an optional analyze-url flow.
struct FlowOutcome {
    handled: bool,
    success: bool,
    error_message: Option<String>,
    retryable: bool,
}

impl FlowOutcome {
    fn pass() -> Self {
        Self {
            handled: false,
            success: true,
            error_message: None,
            retryable: true,
        }
    }

    fn done() -> Self {
        Self {
            handled: true,
            success: true,
            error_message: None,
            retryable: true,
        }
    }

    fn failed(message: String, retryable: bool) -> Self {
        Self {
            handled: true,
            success: false,
            error_message: Some(message),
            retryable,
        }
    }
}

/// Build the instruction string to send to the content analyzer.
fn build_analysis_instruction(instruction: Option<&str>, crawl_links: bool) -> Option<String> {
    let cleaned = instruction.map(str::trim).filter(|s| !s.is_empty());
    if let Some(cleaned) = cleaned {
        return Some(cleaned.to_string());
    }
    crawl_links.then(|| "Extract relevant links from the submitted page.".to_string())
}

/// Tweet lookup failures that should degrade to plain analysis instead of
/// failing the task.
fn is_nonfatal_tweet_lookup_error(message: &str) -> bool {
    message.to_lowercase().contains("not configured")
}

pub struct AnalyzeUrlHandler;

impl AnalyzeUrlHandler {
    /// Feed subscription flow: detect feeds on the page, record the
    /// subscription, and mark the content skipped with no downstream work.
    async fn run_feed_flow(
        &self,
        context: &TaskContext,
        content: &mut Content,
        subscribe_to_feed: bool,
    ) -> RepoResult<FlowOutcome> {
        if !subscribe_to_feed {
            return Ok(FlowOutcome::pass());
        }

        let base = normalize_metadata_shape(&content.metadata);
        let url = content.url.clone();

        let mut fetch_status = "no_feed_found".to_string();
        let html = match context.http.fetch_content(&url, None).await {
            Ok((body, _headers)) => Some(body),
            Err(e) => {
                fetch_status = "fetch_failed".to_string();
                tracing::error!(
                    content_id = content.id,
                    url = %url,
                    error = %e,
                    "failed to fetch URL for feed detection"
                );
                None
            }
        };

        let detected = html
            .as_deref()
            .map(|html| detect_feeds_from_html(html, &url))
            .unwrap_or_default();

        let mut processing_updates: Vec<(String, Value)> =
            vec![("subscribe_to_feed".into(), json!(true))];

        if let Some(feed) = detected.first() {
            let created = context.feeds.subscribe(&feed.to_subscription(&url))?;
            fetch_status = if created { "created" } else { "exists" }.to_string();

            processing_updates.push((
                "detected_feed".into(),
                json!({"url": feed.url, "type": feed.feed_type, "title": feed.title}),
            ));
            if detected.len() > 1 {
                processing_updates.push((
                    "all_detected_feeds".into(),
                    json!(detected
                        .iter()
                        .map(|f| json!({"url": f.url, "type": f.feed_type}))
                        .collect::<Vec<_>>()),
                ));
            }
            processing_updates.push((
                "feed_subscription".into(),
                json!({
                    "status": fetch_status,
                    "feed_url": feed.url,
                    "feed_type": feed.feed_type,
                    "created": created,
                }),
            ));
        } else {
            processing_updates.push(("feed_subscription".into(), json!({"status": fetch_status})));
        }

        let updated = update_processing_state(&base, processing_updates);
        let merged = refresh_merge_metadata(&context.contents, content.id, &base, &updated, &[])?;
        context.contents.set_metadata(content.id, &merged)?;
        context
            .contents
            .set_status(content.id, ContentStatus::Skipped, None)?;

        tracing::info!(
            content_id = content.id,
            status = %fetch_status,
            "feed subscription flow completed"
        );
        Ok(FlowOutcome::done())
    }

    /// Tweet fanout flow: enrich from the tweet, rewrite the parent URL to
    /// the first external URL, and spawn sibling contents for the rest.
    async fn run_tweet_flow(
        &self,
        context: &TaskContext,
        content: &mut Content,
    ) -> RepoResult<FlowOutcome> {
        let base = normalize_metadata_shape(&content.metadata);
        let is_self_submission = content.source.as_deref() == Some(SELF_SUBMISSION_SOURCE)
            || base.contains_key("submitted_by_user_id");
        let Some(tweet_id) = extract_tweet_id(&content.url) else {
            return Ok(FlowOutcome::pass());
        };
        if !is_self_submission {
            return Ok(FlowOutcome::pass());
        }

        let tweet_url = canonical_tweet_url(&tweet_id);
        let tweet = match context.tweets.fetch_tweet(&tweet_id).await {
            Ok(tweet) => tweet,
            Err(e) => {
                let message = e.to_string();
                if is_nonfatal_tweet_lookup_error(&message) {
                    tracing::warn!(
                        content_id = content.id,
                        error = %message,
                        "tweet enrichment skipped, lookup unavailable"
                    );
                    let updated = update_processing_state(
                        &base,
                        [(
                            "tweet_enrichment".to_string(),
                            json!({"status": "skipped", "error": message}),
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
                    content.metadata = merged;
                    return Ok(FlowOutcome::pass());
                }

                tracing::error!(
                    content_id = content.id,
                    error = %message,
                    "tweet fetch failed"
                );
                context
                    .contents
                    .set_status(content.id, ContentStatus::Failed, Some(&message))?;
                return Ok(FlowOutcome::failed(message, e.is_retryable()));
            }
        };

        let mut external_urls = Vec::new();
        for raw in &tweet.external_urls {
            match normalize_url(raw) {
                Ok(url) => external_urls.push(url),
                Err(_) => {
                    tracing::warn!(
                        content_id = content.id,
                        url = %raw,
                        "skipping invalid tweet external URL"
                    );
                }
            }
        }

        let mut updated = base.clone();
        for (key, value) in [
            ("platform", json!("twitter")),
            ("discussion_url", json!(&tweet_url)),
            ("tweet_id", json!(&tweet_id)),
            ("tweet_url", json!(&tweet_url)),
            ("tweet_author", json!(&tweet.author_name)),
            ("tweet_author_username", json!(&tweet.author_username)),
            ("tweet_created_at", json!(&tweet.created_at)),
            ("tweet_like_count", json!(&tweet.like_count)),
            ("tweet_retweet_count", json!(&tweet.retweet_count)),
            ("tweet_reply_count", json!(&tweet.reply_count)),
            ("tweet_text", json!(&tweet.text)),
            ("tweet_external_urls", json!(&external_urls)),
        ] {
            updated.insert(key.to_string(), value);
        }

        content.content_type = ContentType::Article;
        content.platform = Some("twitter".to_string());
        if content.source_url.is_none() {
            content.source_url = Some(tweet_url.clone());
        }

        let fanout_urls: Vec<String> = if external_urls.is_empty() {
            content.url = tweet_url.clone();
            updated = update_processing_state(&updated, [("tweet_only".to_string(), json!(true))]);
            Vec::new()
        } else {
            content.url = external_urls[0].clone();
            external_urls[1..].to_vec()
        };

        content.metadata =
            refresh_merge_metadata(&context.contents, content.id, &base, &updated, &[])?;
        context.contents.save(content)?;

        for sibling_url in fanout_urls {
            if context.contents.get_by_url(&sibling_url)?.is_some() {
                continue;
            }

            let mut metadata = content.metadata.clone();
            metadata.insert("submitted_via".into(), json!("tweet_fanout"));

            let mut sibling = NewContent::new(&sibling_url);
            sibling.source_url = Some(tweet_url.clone());
            sibling.content_type = Some(ContentType::Article);
            sibling.source = Some(SELF_SUBMISSION_SOURCE.to_string());
            sibling.platform = Some("twitter".to_string());
            sibling.metadata = metadata;

            let (sibling_id, created) = context.contents.insert_if_new(&sibling)?;
            if created {
                context.queue.enqueue(TaskType::AnalyzeUrl, sibling_id)?;
            }
        }

        tracing::info!(
            content_id = content.id,
            external_urls = external_urls.len(),
            "tweet fanout processed"
        );
        Ok(FlowOutcome::done())
    }

    /// URL analysis flow: pattern detection fast path, LLM classification
    /// when instructed or for unknown hosts.
    async fn run_analysis_flow(
        &self,
        context: &TaskContext,
        content: &mut Content,
        analysis_instruction: Option<&str>,
    ) -> RepoResult<Option<ContentAnalysis>> {
        let base = normalize_metadata_shape(&content.metadata);
        let mut updated = base.clone();
        let url = content.url.clone();
        let platform_hint = base
            .get("platform_hint")
            .and_then(Value::as_str)
            .map(str::to_string);

        let use_llm = should_use_llm_analysis(&url) || analysis_instruction.is_some();

        let analysis = if use_llm {
            match context.llm.analyze_url(&url, analysis_instruction).await {
                Ok(analysis) => Some(analysis),
                Err(e) => {
                    tracing::warn!(
                        content_id = content.id,
                        error = %e.message,
                        "LLM analysis failed, using pattern detection"
                    );
                    None
                }
            }
        } else {
            None
        };

        match &analysis {
            Some(analysis) => {
                content.content_type = match analysis.content_type.as_str() {
                    "podcast" | "video" => ContentType::Podcast,
                    _ => ContentType::Article,
                };
                if let Some(platform) = &analysis.platform {
                    content.platform = Some(platform.clone());
                    updated.insert("platform".into(), json!(platform));
                }
                if let Some(media_url) = &analysis.media_url {
                    updated.insert("audio_url".into(), json!(media_url));
                }
                if let Some(media_format) = &analysis.media_format {
                    updated.insert("media_format".into(), json!(media_format));
                }
                if let Some(title) = &analysis.title {
                    updated.insert("extracted_title".into(), json!(title));
                    if content.title.is_none() {
                        content.title = Some(title.clone());
                    }
                }
                if let Some(description) = &analysis.description {
                    updated.insert("extracted_description".into(), json!(description));
                }
                if let Some(duration) = analysis.duration_seconds {
                    updated.insert("duration".into(), json!(duration));
                }
                if analysis.content_type == "video" {
                    updated.insert("is_video".into(), json!(true));
                    updated.insert("video_url".into(), json!(&url));
                }
                tracing::info!(
                    content_id = content.id,
                    content_type = content.content_type.as_str(),
                    platform = content.platform.as_deref(),
                    "LLM analysis complete"
                );
            }
            None => {
                let (detected_type, platform) =
                    infer_content_type_and_platform(&url, platform_hint.as_deref());
                tracing::info!(
                    content_id = content.id,
                    content_type = detected_type.as_str(),
                    platform = platform.as_deref(),
                    "pattern-based detection"
                );
                content.content_type = detected_type;
                if let Some(platform) = platform {
                    content.platform = Some(platform.clone());
                    updated.insert("platform".into(), json!(platform));
                }
            }
        }

        // A YouTube podcast doubles as its own audio source.
        if content.platform.as_deref() == Some("youtube")
            && content.content_type == ContentType::Podcast
            && !updated.contains_key("audio_url")
        {
            updated.insert("audio_url".into(), json!(&url));
            updated
                .entry("video_url".to_string())
                .or_insert_with(|| json!(&url));
        }

        content.metadata =
            refresh_merge_metadata(&context.contents, content.id, &base, &updated, &[])?;
        context.contents.save(content)?;
        Ok(analysis)
    }

    /// Create child content rows for links the analysis instruction found.
    fn fanout_instruction_links(
        &self,
        context: &TaskContext,
        content: &Content,
        analysis: &ContentAnalysis,
    ) -> RepoResult<usize> {
        let mut created_count = 0;
        for link in &analysis.links {
            let Ok(url) = normalize_url(&link.url) else {
                continue;
            };

            let mut child = NewContent::new(&url);
            child.source_url = Some(content.url.clone());
            child.title = link.title.clone();
            child.source = Some(SELF_SUBMISSION_SOURCE.to_string());
            child.metadata = Map::from_iter([("submitted_via".to_string(), json!("instruction_links"))]);

            let (child_id, created) = context.contents.insert_if_new(&child)?;
            if created {
                context.queue.enqueue(TaskType::AnalyzeUrl, child_id)?;
                created_count += 1;
            }
        }
        if created_count > 0 {
            tracing::info!(
                content_id = content.id,
                created = created_count,
                "created content records from instruction links"
            );
        }
        Ok(created_count)
    }
}

#[async_trait]
impl TaskHandler for AnalyzeUrlHandler {
    fn task_type(&self) -> TaskType {
        TaskType::AnalyzeUrl
    }

    async fn handle(&self, task: &TaskEnvelope, context: &TaskContext) -> TaskResult {
        let Some(content_id) = task.resolve_content_id() else {
            tracing::error!(task_id = task.id, "no content_id provided for analyze_url task");
            return TaskResult::fail_permanent("No content_id provided");
        };

        let instruction = task.payload_str("instruction").map(str::to_string);
        let crawl_links = task.payload_bool("crawl_links");
        let subscribe_to_feed = task.payload_bool("subscribe_to_feed");
        let analysis_instruction = build_analysis_instruction(instruction.as_deref(), crawl_links);

        tracing::info!(content_id, "analyzing URL");

        let outcome: RepoResult<TaskResult> = async {
            let Some(mut content) = context.contents.get(content_id)? else {
                return Ok(TaskResult::fail_permanent("Content not found"));
            };

            let feed_outcome = self
                .run_feed_flow(context, &mut content, subscribe_to_feed)
                .await?;
            if feed_outcome.handled {
                return Ok(if feed_outcome.success {
                    TaskResult::ok()
                } else {
                    TaskResult::fail("Feed subscription processing failed")
                });
            }

            let tweet_outcome = self.run_tweet_flow(context, &mut content).await?;
            if tweet_outcome.handled && !tweet_outcome.success {
                let message = tweet_outcome
                    .error_message
                    .unwrap_or_else(|| "Tweet processing failed".to_string());
                return Ok(if tweet_outcome.retryable {
                    TaskResult::fail(message)
                } else {
                    TaskResult::fail_permanent(message)
                });
            }

            if !tweet_outcome.handled {
                let analysis = self
                    .run_analysis_flow(context, &mut content, analysis_instruction.as_deref())
                    .await?;

                if crawl_links {
                    if let Some(analysis) = &analysis {
                        if !analysis.links.is_empty() {
                            self.fanout_instruction_links(context, &content, analysis)?;
                        }
                    }
                }
            }

            // Transient instruction payloads are one-shot.
            if instruction.is_some() {
                context
                    .queue
                    .service()
                    .strip_payload_key(task.id, "instruction")?;
            }

            context.queue.enqueue(TaskType::ProcessContent, content_id)?;
            tracing::info!(content_id, "enqueued process_content");
            Ok(TaskResult::ok())
        }
        .await;

        match outcome {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(content_id, error = %e, "URL analysis error");
                TaskResult::fail(e.to_string())
            }
        }
    }
}
