//! Narrow gateways to external collaborators.
//!
//! The pipeline core only ever touches scrapers, LLM providers, transcription,
//! screenshotting, and integrations through these interfaces. Default
//! implementations POST to operator-configured sidecar services; tests swap
//! in stubs.

mod http_gateway;
mod llm_gateway;
mod task_queue;
mod tweets;
mod workers;

pub use http_gateway::{FetchedPage, HttpGateway, HttpResponse, ReqwestHttpGateway};
pub use llm_gateway::{
    AnalysisError, ContentAnalysis, InstructionLink, LlmGateway, RemoteLlmGateway,
    SummarizeRequest, SummaryPayload, UnconfiguredLlmGateway,
};
pub use task_queue::TaskQueueGateway;
pub use tweets::{
    canonical_tweet_url, extract_tweet_id, RemoteTweetGateway, TweetGateway, TweetInfo,
    UnconfiguredTweetGateway,
};
pub use workers::{
    ChatGateway, DiscoveryGateway, DiscussionGateway, ImageGateway, ImageResult,
    IntegrationGateway, RemoteWorkerGateway, SyncSummary, TranscriptionGateway, Transcript,
};

use thiserror::Error;

/// Upstream failure classified for the retry policy.
///
/// Terminal failures (missing auth, 4xx client errors, disabled features)
/// bypass the task retry loop; transient failures (network, timeout, 5xx,
/// rate limiting) are retried with backoff.
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    #[error("{0}")]
    Terminal(String),
    #[error("{0}")]
    Transient(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Classify an HTTP status code.
    pub fn from_status(status: reqwest::StatusCode, url: &str) -> Self {
        if status.as_u16() == 408 || status.as_u16() == 429 || status.is_server_error() {
            Self::Transient(format!("HTTP {status} from {url}"))
        } else {
            Self::Terminal(format!("HTTP {status} from {url}"))
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return Self::from_status(status, e.url().map(|u| u.as_str()).unwrap_or("?"));
        }
        // Connect/timeout/dns problems are worth retrying.
        Self::Transient(e.to_string())
    }
}
