//! Onboarding discovery enrichment task handler.

use async_trait::async_trait;
use serde_json::Value;

use crate::models::TaskType;
use crate::pipeline::context::TaskContext;
use crate::pipeline::handler::TaskHandler;
use crate::pipeline::handlers::result_from_gateway_error;
use crate::pipeline::task_models::{TaskEnvelope, TaskResult};

/// Runs onboarding discovery enrichment for a newly signed-up user.
pub struct OnboardingDiscoverHandler;

#[async_trait]
impl TaskHandler for OnboardingDiscoverHandler {
    fn task_type(&self) -> TaskType {
        TaskType::OnboardingDiscover
    }

    async fn handle(&self, task: &TaskEnvelope, context: &TaskContext) -> TaskResult {
        if task.payload.get("user_id").and_then(Value::as_i64).is_none() {
            tracing::error!(task_id = task.id, "missing user_id in onboarding discover task");
            return TaskResult::fail_permanent("Missing user_id");
        }

        let payload = Value::Object(task.payload.clone());
        match context.discovery.onboarding_discover(&payload).await {
            Ok(()) => TaskResult::ok(),
            Err(e) => {
                tracing::error!(error = %e, "onboarding discover task failed");
                result_from_gateway_error(&e)
            }
        }
    }
}
