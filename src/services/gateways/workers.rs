//! Gateways to the out-of-process pipeline workers.
//!
//! Transcription, image generation, discussion fetching, discovery, chat,
//! and integration sync each run as their own service; the handlers only see
//! these traits. [`RemoteWorkerGateway`] is the production implementation
//! speaking JSON to configured endpoints.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::GatewayError;

/// Transcription output for one audio file.
#[derive(Debug, Clone, Deserialize)]
pub struct Transcript {
    pub text: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
}

/// Result of an image or thumbnail generation call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageResult {
    pub success: bool,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub thumbnail_path: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl ImageResult {
    /// True when the service declined the job on purpose.
    pub fn was_skipped(&self) -> bool {
        self.error_message
            .as_deref()
            .is_some_and(|m| m.contains("Skipped"))
    }
}

/// Outcome of one integration bookmark sync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncSummary {
    pub status: String,
    #[serde(default)]
    pub fetched: u64,
    #[serde(default)]
    pub created: u64,
    #[serde(default)]
    pub reused: u64,
}

#[async_trait]
pub trait TranscriptionGateway: Send + Sync {
    /// Transcribe a downloaded audio file.
    async fn transcribe(&self, file_path: &str) -> Result<Transcript, GatewayError>;
}

#[async_trait]
pub trait ImageGateway: Send + Sync {
    /// Generate an AI header image for a content item.
    async fn generate_image(
        &self,
        content_id: i64,
        title: Option<&str>,
        summary_overview: Option<&str>,
    ) -> Result<ImageResult, GatewayError>;

    /// Capture a screenshot-based thumbnail for a page.
    async fn capture_thumbnail(&self, content_id: i64, url: &str)
        -> Result<ImageResult, GatewayError>;
}

#[async_trait]
pub trait DiscussionGateway: Send + Sync {
    /// Fetch the aggregator discussion payload for a content item.
    async fn fetch_discussion(
        &self,
        content_id: i64,
        discussion_url: &str,
    ) -> Result<Value, GatewayError>;
}

#[async_trait]
pub trait DiscoveryGateway: Send + Sync {
    /// Run feed/podcast discovery for a user.
    async fn discover_feeds(&self, user_id: i64, trigger: &str) -> Result<(), GatewayError>;

    /// Run onboarding discovery enrichment.
    async fn onboarding_discover(&self, payload: &Value) -> Result<(), GatewayError>;
}

#[async_trait]
pub trait IntegrationGateway: Send + Sync {
    /// Sync bookmarks for a connected integration account.
    async fn sync_bookmarks(&self, user_id: i64, provider: &str)
        -> Result<SyncSummary, GatewayError>;
}

#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// Start a dig-deeper chat session over processed content.
    async fn run_dig_deeper(&self, content_id: i64, user_id: i64) -> Result<(), GatewayError>;
}

/// JSON-over-HTTP implementation for every worker trait.
///
/// Endpoints left unconfigured report a terminal error so the affected
/// pipeline stage fails fast instead of retrying forever.
pub struct RemoteWorkerGateway {
    client: reqwest::Client,
    transcriber_url: Option<String>,
    image_url: Option<String>,
    discussion_url: Option<String>,
    discovery_url: Option<String>,
    integration_url: Option<String>,
    chat_url: Option<String>,
}

impl RemoteWorkerGateway {
    pub fn new(client: reqwest::Client, services: &crate::config::ServiceEndpoints) -> Self {
        Self {
            client,
            transcriber_url: services.transcriber_url.clone(),
            image_url: services.image_url.clone(),
            discussion_url: services.discussion_url.clone(),
            discovery_url: services.discovery_url.clone(),
            integration_url: services.integration_url.clone(),
            chat_url: services.chat_url.clone(),
        }
    }

    fn endpoint<'a>(
        base: &'a Option<String>,
        feature: &str,
    ) -> Result<&'a str, GatewayError> {
        base.as_deref()
            .ok_or_else(|| GatewayError::Terminal(format!("{feature} service not configured")))
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
        body: Value,
    ) -> Result<T, GatewayError> {
        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::from_status(status, &url));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::Transient(format!("malformed response from {url}: {e}")))
    }
}

#[async_trait]
impl TranscriptionGateway for RemoteWorkerGateway {
    async fn transcribe(&self, file_path: &str) -> Result<Transcript, GatewayError> {
        let base = Self::endpoint(&self.transcriber_url, "transcription")?;
        self.post_json(format!("{base}/transcribe"), json!({"file_path": file_path}))
            .await
    }
}

#[async_trait]
impl ImageGateway for RemoteWorkerGateway {
    async fn generate_image(
        &self,
        content_id: i64,
        title: Option<&str>,
        summary_overview: Option<&str>,
    ) -> Result<ImageResult, GatewayError> {
        let base = Self::endpoint(&self.image_url, "image generation")?;
        self.post_json(
            format!("{base}/generate-image"),
            json!({
                "content_id": content_id,
                "title": title,
                "summary": summary_overview,
            }),
        )
        .await
    }

    async fn capture_thumbnail(
        &self,
        content_id: i64,
        url: &str,
    ) -> Result<ImageResult, GatewayError> {
        let base = Self::endpoint(&self.image_url, "thumbnail capture")?;
        self.post_json(
            format!("{base}/capture-thumbnail"),
            json!({"content_id": content_id, "url": url}),
        )
        .await
    }
}

#[async_trait]
impl DiscussionGateway for RemoteWorkerGateway {
    async fn fetch_discussion(
        &self,
        content_id: i64,
        discussion_url: &str,
    ) -> Result<Value, GatewayError> {
        let base = Self::endpoint(&self.discussion_url, "discussion fetch")?;
        self.post_json(
            format!("{base}/fetch-discussion"),
            json!({"content_id": content_id, "discussion_url": discussion_url}),
        )
        .await
    }
}

#[async_trait]
impl DiscoveryGateway for RemoteWorkerGateway {
    async fn discover_feeds(&self, user_id: i64, trigger: &str) -> Result<(), GatewayError> {
        let base = Self::endpoint(&self.discovery_url, "feed discovery")?;
        let _: Value = self
            .post_json(
                format!("{base}/discover-feeds"),
                json!({"user_id": user_id, "trigger": trigger}),
            )
            .await?;
        Ok(())
    }

    async fn onboarding_discover(&self, payload: &Value) -> Result<(), GatewayError> {
        let base = Self::endpoint(&self.discovery_url, "onboarding discovery")?;
        let _: Value = self
            .post_json(format!("{base}/onboarding-discover"), payload.clone())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl IntegrationGateway for RemoteWorkerGateway {
    async fn sync_bookmarks(
        &self,
        user_id: i64,
        provider: &str,
    ) -> Result<SyncSummary, GatewayError> {
        let base = Self::endpoint(&self.integration_url, "integration sync")?;
        self.post_json(
            format!("{base}/sync-bookmarks"),
            json!({"user_id": user_id, "provider": provider}),
        )
        .await
    }
}

#[async_trait]
impl ChatGateway for RemoteWorkerGateway {
    async fn run_dig_deeper(&self, content_id: i64, user_id: i64) -> Result<(), GatewayError> {
        let base = Self::endpoint(&self.chat_url, "dig-deeper chat")?;
        let _: Value = self
            .post_json(
                format!("{base}/dig-deeper"),
                json!({"content_id": content_id, "user_id": user_id}),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_endpoint_is_terminal() {
        let err = RemoteWorkerGateway::endpoint(&None, "transcription").unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("not configured"));
    }

    #[test]
    fn skipped_image_results_are_detected() {
        let skipped = ImageResult {
            success: false,
            error_message: Some("Skipped: news content".into()),
            ..Default::default()
        };
        assert!(skipped.was_skipped());

        let failed = ImageResult {
            success: false,
            error_message: Some("renderer crashed".into()),
            ..Default::default()
        };
        assert!(!failed.was_skipped());
    }
}
