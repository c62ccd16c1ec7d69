//! LLM gateway: URL analysis and summarization.
//!
//! The provider fleet lives behind a sidecar service; this gateway only
//! knows its JSON contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::GatewayError;

/// A link the analysis instruction asked to extract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionLink {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// Classification result for one URL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentAnalysis {
    /// `article`, `podcast`, or `video`.
    pub content_type: String,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub media_format: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<u64>,
    /// Links extracted per the caller's instruction.
    #[serde(default)]
    pub links: Vec<InstructionLink>,
}

/// Analysis failure; callers fall back to pattern detection.
#[derive(Debug, Clone)]
pub struct AnalysisError {
    pub message: String,
}

impl From<GatewayError> for AnalysisError {
    fn from(e: GatewayError) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}

/// Summarization request parameters, selected per content type.
#[derive(Debug, Clone, Serialize)]
pub struct SummarizeRequest {
    pub content: String,
    /// Summarization flavor: `interleaved` or `news_digest`.
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub max_bullet_points: u32,
    pub max_quotes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_override: Option<String>,
}

/// Opaque structured summary returned by the summarizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryPayload(pub Map<String, Value>);

impl SummaryPayload {
    pub fn title(&self) -> Option<&str> {
        self.0.get("title").and_then(Value::as_str)
    }

    pub fn classification(&self) -> Option<&str> {
        self.0.get("classification").and_then(Value::as_str)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

/// Facade over analyzer and summarizer services.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Analyze URL content and optional instruction links.
    async fn analyze_url(
        &self,
        url: &str,
        instruction: Option<&str>,
    ) -> Result<ContentAnalysis, AnalysisError>;

    /// Summarize content. `Ok(None)` means the summarizer declined.
    async fn summarize(
        &self,
        request: SummarizeRequest,
    ) -> Result<Option<SummaryPayload>, GatewayError>;
}

/// HTTP implementation speaking to the LLM sidecar.
pub struct RemoteLlmGateway {
    base_url: String,
    client: reqwest::Client,
}

impl RemoteLlmGateway {
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            client,
        }
    }
}

#[async_trait]
impl LlmGateway for RemoteLlmGateway {
    async fn analyze_url(
        &self,
        url: &str,
        instruction: Option<&str>,
    ) -> Result<ContentAnalysis, AnalysisError> {
        let response = self
            .client
            .post(format!("{}/analyze", self.base_url))
            .json(&json!({"url": url, "instruction": instruction}))
            .send()
            .await
            .map_err(GatewayError::from)?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::from_status(status, url).into());
        }
        response
            .json::<ContentAnalysis>()
            .await
            .map_err(|e| AnalysisError {
                message: format!("malformed analysis response: {e}"),
            })
    }

    async fn summarize(
        &self,
        request: SummarizeRequest,
    ) -> Result<Option<SummaryPayload>, GatewayError> {
        let response = self
            .client
            .post(format!("{}/summarize", self.base_url))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::from_status(status, &self.base_url));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::Transient(format!("malformed summary response: {e}")))?;
        match value {
            Value::Null => Ok(None),
            Value::Object(map) => Ok(Some(SummaryPayload(map))),
            other => Err(GatewayError::Terminal(format!(
                "unexpected summary payload shape: {other}"
            ))),
        }
    }
}

/// Placeholder wired in when no LLM endpoint is configured.
///
/// Analysis degrades to pattern detection; summarization fails terminally.
pub struct UnconfiguredLlmGateway;

#[async_trait]
impl LlmGateway for UnconfiguredLlmGateway {
    async fn analyze_url(
        &self,
        _url: &str,
        _instruction: Option<&str>,
    ) -> Result<ContentAnalysis, AnalysisError> {
        Err(AnalysisError {
            message: "LLM service not configured".to_string(),
        })
    }

    async fn summarize(
        &self,
        _request: SummarizeRequest,
    ) -> Result<Option<SummaryPayload>, GatewayError> {
        Err(GatewayError::Terminal("LLM service not configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_payload_accessors() {
        let payload: SummaryPayload = serde_json::from_value(serde_json::json!({
            "title": "A headline",
            "classification": "to_read",
            "bullet_points": [{"text": "point"}],
        }))
        .unwrap();
        assert_eq!(payload.title(), Some("A headline"));
        assert_eq!(payload.classification(), Some("to_read"));
        assert_eq!(payload.to_value()["bullet_points"][0]["text"], "point");
    }

    #[test]
    fn analysis_deserializes_with_defaults() {
        let analysis: ContentAnalysis =
            serde_json::from_str(r#"{"content_type": "article"}"#).unwrap();
        assert_eq!(analysis.content_type, "article");
        assert!(analysis.platform.is_none());
        assert!(analysis.links.is_empty());
    }
}
