//! Handler trait for task processing.

use async_trait::async_trait;

use crate::models::TaskType;
use crate::pipeline::context::TaskContext;
use crate::pipeline::task_models::{TaskEnvelope, TaskResult};

/// One pipeline stage.
///
/// Handlers are re-invoked under at-least-once delivery, so they must
/// tolerate seeing the same `(task_type, content_id)` again: check the
/// current content state before acting and report already-done work as
/// success. Failures are classified into the returned result, never raised
/// to the worker loop.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn task_type(&self) -> TaskType;

    async fn handle(&self, task: &TaskEnvelope, context: &TaskContext) -> TaskResult;
}
