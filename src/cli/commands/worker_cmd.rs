//! Worker loop command.

use std::sync::Arc;

use crate::cli::{build_context, open_state};
use crate::config::Settings;
use crate::models::{TaskQueue, TaskType};
use crate::pipeline::dispatcher::TaskDispatcher;
use crate::pipeline::handlers::default_handlers;
use crate::pipeline::worker::SequentialWorker;
use crate::repository::TaskFilter;

pub async fn cmd_worker(
    settings: Settings,
    queue: Option<String>,
    task_type: Option<String>,
    max_tasks: Option<u64>,
    worker_id: Option<String>,
) -> anyhow::Result<()> {
    let filter = TaskFilter {
        queue_name: match queue {
            Some(name) => Some(
                TaskQueue::parse(&name)
                    .ok_or_else(|| anyhow::anyhow!("unknown queue partition: {name}"))?,
            ),
            None => None,
        },
        task_type: match task_type {
            Some(name) => Some(
                TaskType::parse(&name)
                    .ok_or_else(|| anyhow::anyhow!("unknown task type: {name}"))?,
            ),
            None => None,
        },
    };

    let state = open_state(settings)?;
    let context = build_context(&state, worker_id);
    let dispatcher = Arc::new(TaskDispatcher::new(default_handlers())?);

    let worker = SequentialWorker::new(state.queue.clone(), dispatcher, context, filter);
    worker.install_signal_handlers();

    let processed = worker.run(max_tasks).await;
    println!("Processed {processed} tasks");
    Ok(())
}
