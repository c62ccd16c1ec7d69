//! Sequential task worker.
//!
//! One worker process runs one loop: claim a task, dispatch it, record the
//! outcome, schedule a retry when warranted. Concurrency comes from running
//! many workers against the shared store, not from parallelism inside the
//! loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use crate::pipeline::context::TaskContext;
use crate::pipeline::dispatcher::TaskDispatcher;
use crate::pipeline::task_models::{TaskEnvelope, TaskResult};
use crate::repository::TaskFilter;
use crate::services::queue::QueueService;

/// Aggressive polls right after startup, to drain queued work quickly.
const STARTUP_PHASE_POLLS: u32 = 10;

/// Consecutive empty polls before backing off to the long sleep.
const MAX_EMPTY_POLLS: u32 = 5;

/// Granularity of shutdown checks while sleeping.
const SHUTDOWN_CHECK_MS: u64 = 100;

/// Default worker id: host plus pid, unique per process on a host.
pub fn default_worker_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "worker".to_string());
    format!("{host}-{}", std::process::id())
}

/// Network-class failures get a longer backoff schedule.
fn is_network_error(message: &str) -> bool {
    let lowered = message.to_lowercase();
    [
        "timeout",
        "timed out",
        "dns",
        "connection",
        "name resolution",
        "name or service not known",
    ]
    .iter()
    .any(|needle| lowered.contains(needle))
}

/// Exponential backoff: 60s doubling capped at an hour, or 120s doubling
/// capped at two hours for network-class failures.
fn retry_delay_seconds(retry_count: u32, network_error: bool) -> i64 {
    let (base, cap) = if network_error { (120, 7_200) } else { (60, 3_600) };
    let factor = 1i64 << retry_count.min(16);
    (base * factor).min(cap)
}

/// Sequential task processor: processes tasks one at a time.
pub struct SequentialWorker {
    queue: Arc<QueueService>,
    dispatcher: Arc<TaskDispatcher>,
    context: TaskContext,
    filter: TaskFilter,
    shutdown: Arc<AtomicBool>,
}

impl SequentialWorker {
    pub fn new(
        queue: Arc<QueueService>,
        dispatcher: Arc<TaskDispatcher>,
        context: TaskContext,
        filter: TaskFilter,
    ) -> Self {
        Self {
            queue,
            dispatcher,
            context,
            filter,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked between polls and during sleeps; setting it stops the
    /// loop promptly.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Install SIGINT/SIGTERM handlers that request cooperative shutdown.
    pub fn install_signal_handlers(&self) {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let interrupted = tokio::signal::ctrl_c();
            #[cfg(unix)]
            {
                let mut terminate =
                    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    {
                        Ok(signal) => signal,
                        Err(e) => {
                            tracing::error!(error = %e, "failed to install SIGTERM handler");
                            let _ = interrupted.await;
                            shutdown.store(true, Ordering::SeqCst);
                            return;
                        }
                    };
                tokio::select! {
                    _ = interrupted => {}
                    _ = terminate.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = interrupted.await;
            }
            tracing::info!("received shutdown signal, stopping gracefully");
            shutdown.store(true, Ordering::SeqCst);
        });
    }

    fn should_stop(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Sleep in short slices so a shutdown request interrupts promptly.
    async fn sleep_checked(&self, total_ms: u64) {
        let mut remaining = total_ms;
        while remaining > 0 && !self.should_stop() {
            let slice = remaining.min(SHUTDOWN_CHECK_MS);
            tokio::time::sleep(Duration::from_millis(slice)).await;
            remaining -= slice;
        }
    }

    /// Dispatch with panic isolation: a panicking handler becomes a
    /// retryable failure instead of killing the worker.
    async fn dispatch_guarded(&self, envelope: &TaskEnvelope) -> TaskResult {
        let dispatched = std::panic::AssertUnwindSafe(
            self.dispatcher.dispatch(envelope, &self.context),
        )
        .catch_unwind()
        .await;

        match dispatched {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_string());
                tracing::error!(
                    task_id = envelope.id,
                    task_type = envelope.task_type.as_str(),
                    panic = %message,
                    "handler panicked"
                );
                TaskResult::fail(format!("Handler panicked: {message}"))
            }
        }
    }

    /// Run the worker loop until shutdown, or until `max_tasks` tasks have
    /// been processed.
    ///
    /// Returns the number of tasks processed.
    pub async fn run(&self, max_tasks: Option<u64>) -> u64 {
        tracing::info!(
            worker_id = %self.context.worker_id,
            queue = self.filter.queue_name.map(|q| q.as_str()),
            "starting sequential task worker"
        );

        let max_retries = self.context.settings.max_retries;
        let poll = self.context.settings.poll.clone();

        let mut processed: u64 = 0;
        let mut consecutive_empty_polls: u32 = 0;
        let mut startup_polls: u32 = 0;

        while !self.should_stop() {
            let task = match self.queue.dequeue(self.filter, &self.context.worker_id) {
                Ok(task) => task,
                Err(e) => {
                    tracing::error!(error = %e, "error in worker loop");
                    self.sleep_checked(poll.backoff_interval_ms).await;
                    continue;
                }
            };

            let Some(task) = task else {
                consecutive_empty_polls += 1;
                startup_polls += 1;

                let sleep_ms = if startup_polls <= STARTUP_PHASE_POLLS {
                    poll.startup_interval_ms
                } else if consecutive_empty_polls >= MAX_EMPTY_POLLS {
                    poll.backoff_interval_ms
                } else {
                    poll.idle_interval_ms
                };
                self.sleep_checked(sleep_ms).await;
                continue;
            };

            consecutive_empty_polls = 0;

            let envelope = TaskEnvelope::from_task(task);
            tracing::info!(
                task_id = envelope.id,
                task_type = envelope.task_type.as_str(),
                retry_count = envelope.retry_count,
                "processing task"
            );

            let result = self.dispatch_guarded(&envelope).await;

            if let Err(e) = self.queue.complete_task(
                envelope.id,
                result.success,
                result.error_message.as_deref(),
            ) {
                tracing::error!(task_id = envelope.id, error = %e, "failed to record outcome");
            }

            if result.success {
                tracing::info!(task_id = envelope.id, "task completed");
            } else if !result.retryable {
                tracing::error!(
                    task_id = envelope.id,
                    error = result.error_message.as_deref(),
                    "task failed permanently"
                );
            } else if envelope.retry_count < max_retries {
                let message = result.error_message.as_deref().unwrap_or_default();
                let delay = result.retry_delay_seconds.unwrap_or_else(|| {
                    retry_delay_seconds(envelope.retry_count, is_network_error(message))
                });
                match self.queue.retry_task(envelope.id, delay) {
                    Ok(()) => tracing::info!(
                        task_id = envelope.id,
                        attempt = envelope.retry_count + 1,
                        max_retries,
                        delay_seconds = delay,
                        "task scheduled for retry"
                    ),
                    Err(e) => {
                        tracing::error!(task_id = envelope.id, error = %e, "failed to schedule retry")
                    }
                }
            } else {
                tracing::error!(
                    task_id = envelope.id,
                    max_retries,
                    "task exceeded max retries"
                );
            }

            processed += 1;
            if max_tasks.is_some_and(|max| processed >= max) {
                tracing::info!(max_tasks = max_tasks, "reached max tasks limit, stopping");
                break;
            }
        }

        tracing::info!(processed, "worker shutting down");
        processed
    }
}
