//! Content processing workflow: canonical state transitions and next-stage
//! selection derived from the handler graph.

use crate::models::{Content, ContentStatus, ContentType, TaskType};

/// A high-level processing transition.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowTransition {
    pub from_status: ContentStatus,
    pub to_status: ContentStatus,
    pub reason: &'static str,
}

/// Derives canonical state transitions during `process_content`.
pub struct ContentProcessingWorkflow;

impl ContentProcessingWorkflow {
    /// Return the status transition for a processing result.
    pub fn infer_transition(content: &Content, success: bool) -> WorkflowTransition {
        let from_status = content.status;

        if success && content.status == ContentStatus::Processing {
            return WorkflowTransition {
                from_status,
                to_status: ContentStatus::Processing,
                reason: "processed.awaiting_summarization",
            };
        }

        if content.status.is_terminal() {
            return WorkflowTransition {
                from_status,
                to_status: content.status,
                reason: "processed.terminal",
            };
        }

        if success {
            return WorkflowTransition {
                from_status,
                to_status: content.status,
                reason: "processed.success",
            };
        }

        WorkflowTransition {
            from_status,
            to_status: ContentStatus::Failed,
            reason: "processed.failure",
        }
    }

    /// True when content should enqueue `summarize` next: article or news,
    /// mid-processing, with extracted text waiting.
    pub fn should_enqueue_summarize(content: &Content) -> bool {
        if !matches!(content.content_type, ContentType::Article | ContentType::News) {
            return false;
        }
        if content.status != ContentStatus::Processing {
            return false;
        }
        content
            .metadata_str("content_to_summarize")
            .is_some_and(|text| !text.trim().is_empty())
    }

    /// The next task type for processed content, if any.
    pub fn next_task_type(content: &Content) -> Option<TaskType> {
        match content.content_type {
            ContentType::Article | ContentType::News => Some(TaskType::Summarize),
            ContentType::Podcast => Some(TaskType::DownloadAudio),
            ContentType::Unknown => None,
        }
    }
}
