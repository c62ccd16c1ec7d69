//! Task handlers, one per task type.

mod analyze_url;
mod dig_deeper;
mod discover_feeds;
mod download_audio;
mod fetch_discussion;
mod generate_image;
mod generate_thumbnail;
mod onboarding_discover;
mod process_content;
mod scrape;
mod summarize;
mod sync_integration;
mod transcribe;

pub use analyze_url::AnalyzeUrlHandler;
pub use dig_deeper::DigDeeperHandler;
pub use discover_feeds::DiscoverFeedsHandler;
pub use download_audio::DownloadAudioHandler;
pub use fetch_discussion::FetchDiscussionHandler;
pub use generate_image::GenerateImageHandler;
pub use generate_thumbnail::GenerateThumbnailHandler;
pub use onboarding_discover::OnboardingDiscoverHandler;
pub use process_content::ProcessContentHandler;
pub use scrape::ScrapeHandler;
pub use summarize::SummarizeHandler;
pub use sync_integration::SyncIntegrationHandler;
pub use transcribe::TranscribeHandler;

use std::sync::Arc;

use crate::pipeline::handler::TaskHandler;
use crate::pipeline::task_models::TaskResult;
use crate::services::gateways::GatewayError;

/// The full handler set for a production worker.
pub fn default_handlers() -> Vec<Arc<dyn TaskHandler>> {
    vec![
        Arc::new(ScrapeHandler),
        Arc::new(AnalyzeUrlHandler),
        Arc::new(ProcessContentHandler),
        Arc::new(DownloadAudioHandler),
        Arc::new(TranscribeHandler),
        Arc::new(SummarizeHandler),
        Arc::new(FetchDiscussionHandler),
        Arc::new(GenerateImageHandler),
        Arc::new(GenerateThumbnailHandler),
        Arc::new(DiscoverFeedsHandler),
        Arc::new(OnboardingDiscoverHandler),
        Arc::new(DigDeeperHandler),
        Arc::new(SyncIntegrationHandler),
    ]
}

/// Translate an upstream failure into a task result per its classification.
pub(crate) fn result_from_gateway_error(e: &GatewayError) -> TaskResult {
    if e.is_retryable() {
        TaskResult::fail(e.to_string())
    } else {
        TaskResult::fail_permanent(e.to_string())
    }
}
