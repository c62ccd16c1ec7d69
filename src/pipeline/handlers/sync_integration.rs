//! Scheduled external integration sync task handler.

use async_trait::async_trait;
use serde_json::Value;

use crate::models::TaskType;
use crate::pipeline::context::TaskContext;
use crate::pipeline::handler::TaskHandler;
use crate::pipeline::handlers::result_from_gateway_error;
use crate::pipeline::task_models::{TaskEnvelope, TaskResult};

/// Runs bookmark sync for a user's connected integration.
pub struct SyncIntegrationHandler;

#[async_trait]
impl TaskHandler for SyncIntegrationHandler {
    fn task_type(&self) -> TaskType {
        TaskType::SyncIntegration
    }

    async fn handle(&self, task: &TaskEnvelope, context: &TaskContext) -> TaskResult {
        let Some(user_id) = task.payload.get("user_id").and_then(Value::as_i64) else {
            return TaskResult::fail_permanent("Missing user_id in sync_integration payload");
        };

        let provider = task
            .payload_str("provider")
            .unwrap_or("x")
            .trim()
            .to_lowercase();
        if provider != "x" {
            return TaskResult::fail_permanent(format!(
                "Unsupported integration provider: {provider}"
            ));
        }

        if !context.settings.x_bookmark_sync_enabled {
            tracing::info!(user_id, "integration sync skipped, bookmark sync disabled");
            return TaskResult::ok();
        }

        match context.integrations.sync_bookmarks(user_id, &provider).await {
            Ok(summary) => {
                tracing::info!(
                    user_id,
                    status = %summary.status,
                    fetched = summary.fetched,
                    created = summary.created,
                    reused = summary.reused,
                    "integration sync completed"
                );
                TaskResult::ok()
            }
            Err(e) => {
                tracing::error!(user_id, error = %e, "integration sync failed");
                result_from_gateway_error(&e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::handlers::test_support::{envelope, stub_context, StubIntegrations};
    use crate::services::gateways::GatewayError;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn syncs_bookmarks_for_user() {
        let (_dir, mut context) = stub_context();
        let integrations = Arc::new(StubIntegrations::default());
        context.integrations = integrations.clone();

        let task = envelope(TaskType::SyncIntegration, None, json!({"user_id": 12}));
        assert!(SyncIntegrationHandler.handle(&task, &context).await.success);
        assert_eq!(
            integrations.calls.lock().unwrap().as_slice(),
            &[(12, "x".to_string())]
        );
    }

    #[tokio::test]
    async fn disabled_feature_is_acknowledged() {
        let (_dir, mut context) = stub_context();
        let mut settings = (*context.settings).clone();
        settings.x_bookmark_sync_enabled = false;
        context.settings = Arc::new(settings);
        let integrations = Arc::new(StubIntegrations::default());
        context.integrations = integrations.clone();

        let task = envelope(TaskType::SyncIntegration, None, json!({"user_id": 12}));
        assert!(SyncIntegrationHandler.handle(&task, &context).await.success);
        assert!(integrations.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unsupported_provider_is_permanent() {
        let (_dir, context) = stub_context();
        let task = envelope(
            TaskType::SyncIntegration,
            None,
            json!({"user_id": 12, "provider": "mastodon"}),
        );
        let result = SyncIntegrationHandler.handle(&task, &context).await;
        assert!(!result.success);
        assert!(!result.retryable);
    }

    #[tokio::test]
    async fn auth_rejection_is_terminal() {
        let (_dir, mut context) = stub_context();
        context.integrations = Arc::new(StubIntegrations {
            error: Some(GatewayError::Terminal("token revoked".into())),
            ..Default::default()
        });

        let task = envelope(TaskType::SyncIntegration, None, json!({"user_id": 12}));
        let result = SyncIntegrationHandler.handle(&task, &context).await;
        assert!(!result.success);
        assert!(!result.retryable);
    }
}
