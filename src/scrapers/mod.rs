//! Scraper registry and runner.
//!
//! Concrete scrapers live outside the core; anything implementing
//! [`Scraper`] can be registered. The runner persists scraped items (unique
//! URLs fall through) and enqueues the first pipeline stage for new rows.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::models::{ContentType, NewContent, TaskType};
use crate::repository::ContentRepository;
use crate::services::queue::{EnqueueRequest, QueueService};

/// One scraped item ready for ingestion.
#[derive(Debug, Clone)]
pub struct ScrapedItem {
    pub url: String,
    pub title: Option<String>,
    pub content_type: ContentType,
    pub source: String,
    pub metadata: Map<String, Value>,
}

/// A content source the runner can poll.
#[async_trait]
pub trait Scraper: Send + Sync {
    fn name(&self) -> &str;

    async fn scrape(&self) -> anyhow::Result<Vec<ScrapedItem>>;
}

/// Manages and runs registered scrapers.
pub struct ScraperRunner {
    scrapers: Vec<Arc<dyn Scraper>>,
    contents: Arc<ContentRepository>,
    queue: Arc<QueueService>,
}

impl ScraperRunner {
    pub fn new(contents: Arc<ContentRepository>, queue: Arc<QueueService>) -> Self {
        Self {
            scrapers: Vec::new(),
            contents,
            queue,
        }
    }

    pub fn register(mut self, scraper: Arc<dyn Scraper>) -> Self {
        self.scrapers.push(scraper);
        self
    }

    pub fn scraper_names(&self) -> Vec<String> {
        self.scrapers.iter().map(|s| s.name().to_string()).collect()
    }

    /// Run all scrapers concurrently; failures are logged per scraper.
    pub async fn run_all(&self) -> HashMap<String, usize> {
        tracing::info!("starting all scrapers");

        let tasks = self.scrapers.iter().map(|scraper| {
            let scraper = scraper.clone();
            async move {
                let name = scraper.name().to_string();
                (name, scraper.scrape().await)
            }
        });

        let mut results = HashMap::new();
        for (name, outcome) in futures::future::join_all(tasks).await {
            match outcome {
                Ok(items) => {
                    let saved = self.save_items(&items);
                    results.insert(name, saved);
                }
                Err(e) => {
                    tracing::error!(scraper = %name, error = %e, "scraper failed");
                    results.insert(name, 0);
                }
            }
        }

        let total: usize = results.values().sum();
        tracing::info!(total, "all scrapers complete");
        results
    }

    /// Run one scraper by name. Returns None when unknown.
    pub async fn run_scraper(&self, name: &str) -> Option<usize> {
        let scraper = self
            .scrapers
            .iter()
            .find(|s| s.name().eq_ignore_ascii_case(name))?;

        match scraper.scrape().await {
            Ok(items) => Some(self.save_items(&items)),
            Err(e) => {
                tracing::error!(scraper = %name, error = %e, "scraper failed");
                Some(0)
            }
        }
    }

    /// Persist scraped items and enqueue processing for the new ones.
    fn save_items(&self, items: &[ScrapedItem]) -> usize {
        let mut saved = 0;
        for item in items {
            let mut new_content = NewContent::new(&item.url);
            new_content.title = item.title.clone();
            new_content.content_type = Some(item.content_type);
            new_content.source = Some(item.source.clone());
            new_content.metadata = item.metadata.clone();

            match self.contents.insert_if_new(&new_content) {
                Ok((_, false)) => {
                    tracing::debug!(url = %item.url, "url already exists");
                }
                Ok((content_id, true)) => {
                    if let Err(e) = self.queue.enqueue(
                        EnqueueRequest::new(TaskType::ProcessContent).content_id(content_id),
                    ) {
                        tracing::error!(content_id, error = %e, "failed to enqueue processing");
                        continue;
                    }
                    saved += 1;
                }
                Err(e) => {
                    tracing::error!(url = %item.url, error = %e, "error saving item");
                }
            }
        }
        saved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskStatus;
    use crate::repository::TaskFilter;
    use tempfile::TempDir;

    struct FixedScraper {
        name: &'static str,
        items: Vec<ScrapedItem>,
    }

    #[async_trait]
    impl Scraper for FixedScraper {
        fn name(&self) -> &str {
            self.name
        }

        async fn scrape(&self) -> anyhow::Result<Vec<ScrapedItem>> {
            Ok(self.items.clone())
        }
    }

    fn item(url: &str) -> ScrapedItem {
        ScrapedItem {
            url: url.to_string(),
            title: Some("Title".into()),
            content_type: ContentType::News,
            source: "hackernews".into(),
            metadata: Map::new(),
        }
    }

    fn runner(items: Vec<ScrapedItem>) -> (TempDir, ScraperRunner) {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("test.db");
        let contents = Arc::new(ContentRepository::new(&db).unwrap());
        let queue = Arc::new(QueueService::new(&db).unwrap());
        let runner = ScraperRunner::new(contents, queue).register(Arc::new(FixedScraper {
            name: "fixed",
            items,
        }));
        (dir, runner)
    }

    #[tokio::test]
    async fn saves_new_items_and_enqueues_processing() {
        let (_dir, runner) = runner(vec![item("https://n.example/1"), item("https://n.example/2")]);
        let results = runner.run_all().await;
        assert_eq!(results["fixed"], 2);

        let task = runner
            .queue
            .dequeue(TaskFilter::default(), "t")
            .unwrap()
            .unwrap();
        assert_eq!(task.task_type, TaskType::ProcessContent);
        assert_eq!(task.status, TaskStatus::Processing);

        // Re-running saves nothing new.
        let results = runner.run_all().await;
        assert_eq!(results["fixed"], 0);
    }

    #[tokio::test]
    async fn unknown_scraper_returns_none() {
        let (_dir, runner) = runner(vec![]);
        assert!(runner.run_scraper("nope").await.is_none());
        assert_eq!(runner.run_scraper("FIXED").await, Some(0));
    }
}
