//! Queue task model: task types, queue partitions, and statuses.
//!
//! The string values of these enums are wire- and storage-stable; they appear
//! in the tasks table and in operator tooling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Typed unit of pipeline work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Scrape,
    AnalyzeUrl,
    ProcessContent,
    DownloadAudio,
    Transcribe,
    Summarize,
    FetchDiscussion,
    GenerateImage,
    GenerateThumbnail,
    DiscoverFeeds,
    OnboardingDiscover,
    DigDeeper,
    SyncIntegration,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scrape => "scrape",
            Self::AnalyzeUrl => "analyze_url",
            Self::ProcessContent => "process_content",
            Self::DownloadAudio => "download_audio",
            Self::Transcribe => "transcribe",
            Self::Summarize => "summarize",
            Self::FetchDiscussion => "fetch_discussion",
            Self::GenerateImage => "generate_image",
            Self::GenerateThumbnail => "generate_thumbnail",
            Self::DiscoverFeeds => "discover_feeds",
            Self::OnboardingDiscover => "onboarding_discover",
            Self::DigDeeper => "dig_deeper",
            Self::SyncIntegration => "sync_integration",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scrape" => Some(Self::Scrape),
            "analyze_url" => Some(Self::AnalyzeUrl),
            "process_content" => Some(Self::ProcessContent),
            "download_audio" => Some(Self::DownloadAudio),
            "transcribe" => Some(Self::Transcribe),
            "summarize" => Some(Self::Summarize),
            "fetch_discussion" => Some(Self::FetchDiscussion),
            "generate_image" => Some(Self::GenerateImage),
            "generate_thumbnail" => Some(Self::GenerateThumbnail),
            "discover_feeds" => Some(Self::DiscoverFeeds),
            "onboarding_discover" => Some(Self::OnboardingDiscover),
            "dig_deeper" => Some(Self::DigDeeper),
            "sync_integration" => Some(Self::SyncIntegration),
            _ => None,
        }
    }

    /// Task types whose enqueues coalesce onto an existing non-terminal task
    /// for the same content.
    pub fn is_dedupable(&self) -> bool {
        matches!(
            self,
            Self::ProcessContent | Self::Summarize | Self::GenerateImage
        )
    }
}

/// Static routing partition for worker subscription.
///
/// Transcription is long and CPU-heavy, so it is isolated on its own queue
/// where it cannot starve short content tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskQueue {
    Content,
    Transcribe,
    Onboarding,
    Chat,
}

impl TaskQueue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::Transcribe => "transcribe",
            Self::Onboarding => "onboarding",
            Self::Chat => "chat",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "content" => Some(Self::Content),
            "transcribe" => Some(Self::Transcribe),
            "onboarding" => Some(Self::Onboarding),
            "chat" => Some(Self::Chat),
            _ => None,
        }
    }
}

/// Fixed task-type to queue mapping. Not overridable per call outside tests.
pub fn queue_for_task_type(task_type: TaskType) -> TaskQueue {
    match task_type {
        TaskType::Transcribe => TaskQueue::Transcribe,
        TaskType::OnboardingDiscover => TaskQueue::Onboarding,
        TaskType::DigDeeper => TaskQueue::Chat,
        _ => TaskQueue::Content,
    }
}

/// Execution status of a queue task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A full task row as stored in the queue table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub task_type: TaskType,
    pub queue_name: TaskQueue,
    pub content_id: Option<i64>,
    pub payload: Map<String, Value>,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub error_message: Option<String>,
    /// Creation time, doubling as the not-visible-before time for retries.
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_type_round_trips() {
        let all = [
            TaskType::Scrape,
            TaskType::AnalyzeUrl,
            TaskType::ProcessContent,
            TaskType::DownloadAudio,
            TaskType::Transcribe,
            TaskType::Summarize,
            TaskType::FetchDiscussion,
            TaskType::GenerateImage,
            TaskType::GenerateThumbnail,
            TaskType::DiscoverFeeds,
            TaskType::OnboardingDiscover,
            TaskType::DigDeeper,
            TaskType::SyncIntegration,
        ];
        for tt in all {
            assert_eq!(TaskType::parse(tt.as_str()), Some(tt));
        }
    }

    #[test]
    fn queue_mapping_is_fixed() {
        assert_eq!(queue_for_task_type(TaskType::Transcribe), TaskQueue::Transcribe);
        assert_eq!(
            queue_for_task_type(TaskType::OnboardingDiscover),
            TaskQueue::Onboarding
        );
        assert_eq!(queue_for_task_type(TaskType::DigDeeper), TaskQueue::Chat);
        assert_eq!(queue_for_task_type(TaskType::Scrape), TaskQueue::Content);
        assert_eq!(queue_for_task_type(TaskType::Summarize), TaskQueue::Content);
        assert_eq!(
            queue_for_task_type(TaskType::GenerateThumbnail),
            TaskQueue::Content
        );
    }

    #[test]
    fn dedupable_set_matches_content_pipeline() {
        assert!(TaskType::ProcessContent.is_dedupable());
        assert!(TaskType::Summarize.is_dedupable());
        assert!(TaskType::GenerateImage.is_dedupable());
        assert!(!TaskType::AnalyzeUrl.is_dedupable());
        assert!(!TaskType::Scrape.is_dedupable());
        assert!(!TaskType::GenerateThumbnail.is_dedupable());
    }
}
