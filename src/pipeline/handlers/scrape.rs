//! Scrape task handler.

use async_trait::async_trait;
use serde_json::Value;

use crate::models::TaskType;
use crate::pipeline::context::TaskContext;
use crate::pipeline::handler::TaskHandler;
use crate::pipeline::task_models::{TaskEnvelope, TaskResult};

/// Runs configured scrapers. Scraper outputs become new content rows whose
/// creation enqueues downstream tasks; this task terminates as soon as the
/// scrapers return.
pub struct ScrapeHandler;

#[async_trait]
impl TaskHandler for ScrapeHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Scrape
    }

    async fn handle(&self, task: &TaskEnvelope, context: &TaskContext) -> TaskResult {
        let sources: Vec<String> = task
            .payload
            .get("sources")
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_else(|| vec!["all".to_string()]);

        if sources == ["all"] {
            context.scrapers.run_all().await;
            return TaskResult::ok();
        }

        for source in &sources {
            if context.scrapers.run_scraper(source).await.is_none() {
                tracing::warn!(source = %source, "scraper not found");
            }
        }
        TaskResult::ok()
    }
}
