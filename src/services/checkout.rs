//! Content checkout/check-in for batch workers.
//!
//! Checkout reserves the *content* while the queue reserves the *task*:
//! several task types can touch the same content, so batch processors that
//! need untouched items claim them here. A claim times out and is reclaimed
//! by [`CheckoutManager::release_stale_checkouts`] if the worker disappears.

use std::collections::HashMap;
use std::future::Future;

use crate::models::{ContentStatus, ContentType};
use crate::repository::{ContentRepository, Result};

/// Manages content checkout/checkin for workers.
pub struct CheckoutManager {
    contents: ContentRepository,
    timeout_minutes: i64,
}

impl CheckoutManager {
    pub fn new(contents: ContentRepository, timeout_minutes: i64) -> Self {
        Self {
            contents,
            timeout_minutes,
        }
    }

    /// Check out a batch of content ids for exclusive processing.
    ///
    /// Returns ids only, never live rows; the claim and the status change to
    /// `processing` happen in one transaction.
    pub fn checkout_batch(
        &self,
        worker_id: &str,
        content_type: Option<ContentType>,
        batch_size: u32,
    ) -> Result<Vec<i64>> {
        let ids = self
            .contents
            .checkout_batch(worker_id, content_type, batch_size)?;
        if !ids.is_empty() {
            tracing::info!(worker_id, count = ids.len(), "checked out content batch");
        }
        Ok(ids)
    }

    /// Check a single item back in with its final status.
    pub fn checkin(
        &self,
        content_id: i64,
        worker_id: &str,
        status: ContentStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        if !self
            .contents
            .checkin(content_id, worker_id, status, error_message)?
        {
            tracing::error!(
                content_id,
                worker_id,
                "content not found or not checked out by this worker"
            );
            return Ok(());
        }
        tracing::debug!(content_id, status = status.as_str(), "content checked in");
        Ok(())
    }

    /// Run `body` over a checked-out batch, checking every item back in on
    /// the way out: `completed` when the body succeeds, `failed` with the
    /// error text when it does not.
    pub async fn run<F, Fut, T, E>(
        &self,
        worker_id: &str,
        content_type: Option<ContentType>,
        batch_size: u32,
        body: F,
    ) -> Result<std::result::Result<T, E>>
    where
        F: FnOnce(Vec<i64>) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        let ids = self.checkout_batch(worker_id, content_type, batch_size)?;

        let outcome = body(ids.clone()).await;
        match &outcome {
            Ok(_) => {
                for id in &ids {
                    self.checkin(*id, worker_id, ContentStatus::Completed, None)?;
                }
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!(worker_id, error = %message, "error in checkout scope");
                for id in &ids {
                    self.checkin(*id, worker_id, ContentStatus::Failed, Some(&message))?;
                }
            }
        }
        Ok(outcome)
    }

    /// Release checkouts that have outlived the timeout. Idempotent and safe
    /// to run concurrently.
    pub fn release_stale_checkouts(&self) -> Result<u64> {
        let released = self
            .contents
            .release_stale_checkouts(self.timeout_minutes)?;
        if released > 0 {
            tracing::info!(released, "released stale checkouts");
        }
        Ok(released)
    }

    /// Current checkout totals per worker.
    pub fn checkout_stats(&self) -> Result<HashMap<String, u64>> {
        self.contents.checkout_counts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewContent;
    use tempfile::TempDir;

    fn manager() -> (TempDir, CheckoutManager) {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("test.db");
        let manager = CheckoutManager::new(ContentRepository::new(&db).unwrap(), 30);
        (dir, manager)
    }

    fn seed(manager: &CheckoutManager, url: &str) -> i64 {
        manager
            .contents
            .insert_if_new(&NewContent::new(url))
            .unwrap()
            .0
    }

    #[tokio::test]
    async fn scope_checks_in_completed_on_success() {
        let (_dir, manager) = manager();
        let id = seed(&manager, "https://a.example/ok");

        let outcome = manager
            .run("w1", None, 5, |ids| async move {
                assert_eq!(ids, vec![id]);
                Ok::<_, std::convert::Infallible>(ids.len())
            })
            .await
            .unwrap();
        assert_eq!(outcome.unwrap(), 1);

        let content = manager.contents.get(id).unwrap().unwrap();
        assert_eq!(content.status, ContentStatus::Completed);
        assert!(content.checked_out_by.is_none());
        assert!(content.processed_at.is_some());
    }

    #[tokio::test]
    async fn scope_checks_in_failed_on_error() {
        let (_dir, manager) = manager();
        let id = seed(&manager, "https://a.example/err");

        let outcome = manager
            .run("w1", None, 5, |_ids| async move {
                Err::<(), _>("downstream exploded")
            })
            .await
            .unwrap();
        assert!(outcome.is_err());

        let content = manager.contents.get(id).unwrap().unwrap();
        assert_eq!(content.status, ContentStatus::Failed);
        assert_eq!(content.retry_count, 1);
        assert_eq!(content.error_message.as_deref(), Some("downstream exploded"));
        assert!(content.checked_out_by.is_none());
    }

    #[tokio::test]
    async fn two_workers_never_share_content() {
        let (_dir, manager) = manager();
        seed(&manager, "https://a.example/1");
        seed(&manager, "https://a.example/2");
        seed(&manager, "https://a.example/3");

        let first = manager.checkout_batch("w1", None, 2).unwrap();
        let second = manager.checkout_batch("w2", None, 2).unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);
        assert!(first.iter().all(|id| !second.contains(id)));

        let stats = manager.checkout_stats().unwrap();
        assert_eq!(stats.get("w1"), Some(&2));
        assert_eq!(stats.get("w2"), Some(&1));
    }
}
