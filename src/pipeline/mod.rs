//! Task pipeline: envelope/result models, dispatcher, handlers, the
//! sequential worker loop, and the recovery watchdog.

pub mod context;
pub mod dispatcher;
pub mod extract;
pub mod handler;
pub mod handlers;
pub mod task_models;
pub mod watchdog;
pub mod worker;
pub mod workflow;

pub use context::TaskContext;
pub use dispatcher::TaskDispatcher;
pub use handler::TaskHandler;
pub use task_models::{TaskEnvelope, TaskResult};
pub use worker::SequentialWorker;
pub use watchdog::Watchdog;
