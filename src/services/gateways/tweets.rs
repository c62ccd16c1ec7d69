//! Tweet lookup gateway and URL helpers.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::GatewayError;

/// Extract the numeric status id from a tweet URL, if it is one.
pub fn extract_tweet_id(url: &str) -> Option<String> {
    static TWEET_RE: OnceLock<Regex> = OnceLock::new();
    let re = TWEET_RE.get_or_init(|| {
        Regex::new(r"^https?://(?:www\.)?(?:twitter\.com|x\.com)/[^/]+/status(?:es)?/(\d+)")
            .expect("tweet id regex")
    });
    re.captures(url)
        .map(|captures| captures[1].to_string())
}

/// Canonical share URL for a tweet id.
pub fn canonical_tweet_url(tweet_id: &str) -> String {
    format!("https://x.com/i/status/{tweet_id}")
}

/// One fetched tweet with the fields the pipeline enriches from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TweetInfo {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub author_username: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub like_count: Option<u64>,
    #[serde(default)]
    pub retweet_count: Option<u64>,
    #[serde(default)]
    pub reply_count: Option<u64>,
    /// Non-tweet URLs referenced by the tweet, in order of appearance.
    #[serde(default)]
    pub external_urls: Vec<String>,
}

/// Lookup interface for tweet metadata.
#[async_trait]
pub trait TweetGateway: Send + Sync {
    async fn fetch_tweet(&self, tweet_id: &str) -> Result<TweetInfo, GatewayError>;
}

/// HTTP implementation against the tweet-resolver sidecar.
pub struct RemoteTweetGateway {
    base_url: String,
    client: reqwest::Client,
}

impl RemoteTweetGateway {
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            client,
        }
    }
}

#[async_trait]
impl TweetGateway for RemoteTweetGateway {
    async fn fetch_tweet(&self, tweet_id: &str) -> Result<TweetInfo, GatewayError> {
        let url = format!("{}/tweet/{tweet_id}", self.base_url);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::from_status(status, &url));
        }
        response
            .json::<TweetInfo>()
            .await
            .map_err(|e| GatewayError::Transient(format!("malformed tweet response: {e}")))
    }
}

/// Placeholder wired in when no tweet resolver endpoint is configured.
///
/// The analyze-url flow treats this as a nonfatal lookup failure and skips
/// tweet enrichment.
pub struct UnconfiguredTweetGateway;

#[async_trait]
impl TweetGateway for UnconfiguredTweetGateway {
    async fn fetch_tweet(&self, _tweet_id: &str) -> Result<TweetInfo, GatewayError> {
        Err(GatewayError::Terminal(
            "tweet lookup service not configured".to_string(),
        ))
    }
}
