//! Service layer: queue orchestration, checkout, metadata merge, and the
//! narrow gateways to external collaborators.

pub mod checkout;
pub mod feeds;
pub mod gateways;
pub mod metadata_merge;
pub mod queue;
pub mod submission;
pub mod url_detection;

pub use checkout::CheckoutManager;
pub use queue::{EnqueueRequest, QueueService, QueueStats};
