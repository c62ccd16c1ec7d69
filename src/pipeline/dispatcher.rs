//! Dispatcher for routing tasks to handlers.

use std::collections::HashMap;
use std::sync::Arc;

use crate::models::TaskType;
use crate::pipeline::context::TaskContext;
use crate::pipeline::handler::TaskHandler;
use crate::pipeline::task_models::{TaskEnvelope, TaskResult};

/// Routes envelopes to the handler registered for their task type.
pub struct TaskDispatcher {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl TaskDispatcher {
    /// Build the routing table. Two handlers claiming the same task type is
    /// a programming error surfaced at construction.
    pub fn new(handlers: impl IntoIterator<Item = Arc<dyn TaskHandler>>) -> anyhow::Result<Self> {
        let mut table: HashMap<TaskType, Arc<dyn TaskHandler>> = HashMap::new();
        for handler in handlers {
            let task_type = handler.task_type();
            if table.insert(task_type, handler).is_some() {
                anyhow::bail!("Duplicate handler for task type {}", task_type.as_str());
            }
        }
        Ok(Self { handlers: table })
    }

    pub async fn dispatch(&self, task: &TaskEnvelope, context: &TaskContext) -> TaskResult {
        let Some(handler) = self.handlers.get(&task.task_type) else {
            tracing::error!(
                task_id = task.id,
                task_type = task.task_type.as_str(),
                "unknown task type"
            );
            return TaskResult::fail_permanent(format!(
                "Unknown task type: {}",
                task.task_type.as_str()
            ));
        };
        handler.handle(task, context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::handlers::test_support::{stub_context, StubHandler};

    #[tokio::test]
    async fn unknown_task_type_fails_permanently() {
        let dispatcher = TaskDispatcher::new([]).unwrap();
        let (_dir, context) = stub_context();
        let task = TaskEnvelope {
            id: 1,
            task_type: TaskType::Scrape,
            content_id: None,
            payload: Default::default(),
            retry_count: 0,
            status: None,
            queue_name: None,
            created_at: None,
            started_at: None,
        };

        let result = dispatcher.dispatch(&task, &context).await;
        assert!(!result.success);
        assert!(!result.retryable);
        assert_eq!(
            result.error_message.as_deref(),
            Some("Unknown task type: scrape")
        );
    }

    #[tokio::test]
    async fn routes_to_matching_handler() {
        let handler: Arc<dyn TaskHandler> =
            Arc::new(StubHandler::new(TaskType::Scrape, TaskResult::ok));
        let dispatcher = TaskDispatcher::new([handler]).unwrap();
        let (_dir, context) = stub_context();
        let task = TaskEnvelope {
            id: 2,
            task_type: TaskType::Scrape,
            content_id: None,
            payload: Default::default(),
            retry_count: 0,
            status: None,
            queue_name: None,
            created_at: None,
            started_at: None,
        };

        assert!(dispatcher.dispatch(&task, &context).await.success);
    }

    #[test]
    fn duplicate_handlers_are_rejected() {
        let first: Arc<dyn TaskHandler> =
            Arc::new(StubHandler::new(TaskType::Scrape, TaskResult::ok));
        let second: Arc<dyn TaskHandler> =
            Arc::new(StubHandler::new(TaskType::Scrape, TaskResult::ok));
        assert!(TaskDispatcher::new([first, second]).is_err());
    }
}
