//! CLI entry point and shared wiring.

mod commands;

pub use commands::{is_verbose, run};

use std::sync::Arc;
use std::time::Duration;

use crate::config::Settings;
use crate::pipeline::context::TaskContext;
use crate::pipeline::worker::default_worker_id;
use crate::repository::{ContentRepository, FeedRepository};
use crate::scrapers::ScraperRunner;
use crate::services::gateways::{
    ChatGateway, DiscoveryGateway, DiscussionGateway, ImageGateway, IntegrationGateway,
    LlmGateway, RemoteLlmGateway, RemoteTweetGateway, RemoteWorkerGateway, ReqwestHttpGateway,
    TaskQueueGateway, TranscriptionGateway, TweetGateway, UnconfiguredLlmGateway,
    UnconfiguredTweetGateway,
};
use crate::services::queue::QueueService;

/// Everything a command needs against one database.
pub struct AppState {
    pub settings: Arc<Settings>,
    pub queue: Arc<QueueService>,
    pub contents: Arc<ContentRepository>,
    pub feeds: Arc<FeedRepository>,
}

/// Open repositories and the queue service for the configured database.
pub fn open_state(settings: Settings) -> anyhow::Result<AppState> {
    let db_path = settings.database_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    Ok(AppState {
        settings: Arc::new(settings),
        queue: Arc::new(QueueService::new(&db_path)?),
        contents: Arc::new(ContentRepository::new(&db_path)?),
        feeds: Arc::new(FeedRepository::new(&db_path)?),
    })
}

/// Construct the shared task context: repositories, gateways, and scrapers,
/// wired once at startup.
pub fn build_context(state: &AppState, worker_id: Option<String>) -> TaskContext {
    let settings = state.settings.clone();
    let http = ReqwestHttpGateway::new(Duration::from_secs(settings.http_timeout_seconds));
    let client = http.client().clone();

    let llm: Arc<dyn LlmGateway> = match &settings.services.llm_url {
        Some(url) => Arc::new(RemoteLlmGateway::new(url.clone(), client.clone())),
        None => Arc::new(UnconfiguredLlmGateway),
    };
    let tweets: Arc<dyn TweetGateway> = match &settings.services.tweet_url {
        Some(url) => Arc::new(RemoteTweetGateway::new(url.clone(), client.clone())),
        None => Arc::new(UnconfiguredTweetGateway),
    };

    let workers = Arc::new(RemoteWorkerGateway::new(client, &settings.services));
    let transcriber: Arc<dyn TranscriptionGateway> = workers.clone();
    let images: Arc<dyn ImageGateway> = workers.clone();
    let discussions: Arc<dyn DiscussionGateway> = workers.clone();
    let discovery: Arc<dyn DiscoveryGateway> = workers.clone();
    let integrations: Arc<dyn IntegrationGateway> = workers.clone();
    let chat: Arc<dyn ChatGateway> = workers;

    let scrapers = Arc::new(ScraperRunner::new(state.contents.clone(), state.queue.clone()));

    TaskContext {
        queue: TaskQueueGateway::new(state.queue.clone()),
        settings,
        contents: state.contents.clone(),
        feeds: state.feeds.clone(),
        scrapers,
        http: Arc::new(http),
        llm,
        tweets,
        transcriber,
        images,
        discussions,
        discovery,
        integrations,
        chat,
        worker_id: worker_id.unwrap_or_else(default_worker_id),
    }
}
