//! Content item model.
//!
//! A content row represents one ingested URL. Intermediate pipeline results
//! (extracted text, transcript, summary payload, audio file path) travel in
//! the free-form `metadata` map so handlers can chain without migrations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Source label applied to user-submitted and fanned-out content.
pub const SELF_SUBMISSION_SOURCE: &str = "self submission";

/// Kind of content behind a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Article,
    Podcast,
    News,
    Unknown,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Article => "article",
            Self::Podcast => "podcast",
            Self::News => "news",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "article" => Some(Self::Article),
            "podcast" => Some(Self::Podcast),
            "news" => Some(Self::News),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// Lifecycle status of a content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    New,
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    /// Terminal statuses are final for downstream retry logic.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Skipped)
    }
}

/// One ingested URL with its processing state and metadata blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    pub id: i64,
    pub url: String,
    /// Page the URL was discovered on (tweet fanout keeps the tweet here).
    pub source_url: Option<String>,
    pub content_type: ContentType,
    pub platform: Option<String>,
    pub source: Option<String>,
    pub title: Option<String>,
    pub status: ContentStatus,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub checked_out_by: Option<String>,
    pub checked_out_at: Option<DateTime<Utc>>,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Content {
    /// Read a string-valued metadata key.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// True when the checkout owner fields are consistent.
    pub fn checkout_consistent(&self) -> bool {
        self.checked_out_by.is_some() == self.checked_out_at.is_some()
    }
}

/// A new content row ready for insertion.
#[derive(Debug, Clone, Default)]
pub struct NewContent {
    pub url: String,
    pub source_url: Option<String>,
    pub content_type: Option<ContentType>,
    pub platform: Option<String>,
    pub source: Option<String>,
    pub title: Option<String>,
    pub metadata: Map<String, Value>,
}

impl NewContent {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}
