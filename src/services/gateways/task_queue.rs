//! Thin queue facade for handlers enqueueing follow-up tasks.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::models::TaskType;
use crate::repository::Result;
use crate::services::queue::{EnqueueRequest, QueueService};

/// Lets handlers enqueue follow-ups without binding to the queue service
/// surface.
#[derive(Clone)]
pub struct TaskQueueGateway {
    queue: Arc<QueueService>,
}

impl TaskQueueGateway {
    pub fn new(queue: Arc<QueueService>) -> Self {
        Self { queue }
    }

    pub fn enqueue(&self, task_type: TaskType, content_id: i64) -> Result<i64> {
        self.queue
            .enqueue(EnqueueRequest::new(task_type).content_id(content_id))
    }

    pub fn enqueue_with_payload(
        &self,
        task_type: TaskType,
        content_id: Option<i64>,
        payload: Map<String, Value>,
    ) -> Result<i64> {
        let mut request = EnqueueRequest::new(task_type).payload(payload);
        if let Some(content_id) = content_id {
            request = request.content_id(content_id);
        }
        self.queue.enqueue(request)
    }

    pub fn service(&self) -> &QueueService {
        &self.queue
    }
}
