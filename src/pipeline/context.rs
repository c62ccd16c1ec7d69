//! Shared dependencies for task handlers.

use std::sync::Arc;

use crate::config::Settings;
use crate::repository::{ContentRepository, FeedRepository};
use crate::scrapers::ScraperRunner;
use crate::services::gateways::{
    ChatGateway, DiscoveryGateway, DiscussionGateway, HttpGateway, ImageGateway,
    IntegrationGateway, LlmGateway, TaskQueueGateway, TranscriptionGateway, TweetGateway,
};

/// Container for shared task-processing dependencies.
///
/// Constructed once at program start and cloned into each worker; there is no
/// hidden module-level state, so tests can wire in stubs freely.
#[derive(Clone)]
pub struct TaskContext {
    pub queue: TaskQueueGateway,
    pub settings: Arc<Settings>,
    pub contents: Arc<ContentRepository>,
    pub feeds: Arc<FeedRepository>,
    pub scrapers: Arc<ScraperRunner>,

    pub http: Arc<dyn HttpGateway>,
    pub llm: Arc<dyn LlmGateway>,
    pub tweets: Arc<dyn TweetGateway>,
    pub transcriber: Arc<dyn TranscriptionGateway>,
    pub images: Arc<dyn ImageGateway>,
    pub discussions: Arc<dyn DiscussionGateway>,
    pub discovery: Arc<dyn DiscoveryGateway>,
    pub integrations: Arc<dyn IntegrationGateway>,
    pub chat: Arc<dyn ChatGateway>,

    pub worker_id: String,
}
