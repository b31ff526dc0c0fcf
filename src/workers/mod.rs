//! The four queue consumers.
//!
//! Each worker owns one topic: [`FanOutWorker`] consumes data-change
//! envelopes and feeds the three downstream topics; the others consume
//! those topics and perform the actual side effects. Handlers are invoked
//! once per delivery by the consumer loop in the binary, which acks the
//! message regardless of outcome and leaves errors to the logs.

pub mod data_changes;
pub mod outbound_emailer;
pub mod search_indexer;
pub mod webhook_executor;

pub use data_changes::FanOutWorker;
pub use outbound_emailer::EmailWorker;
pub use search_indexer::SearchIndexWorker;
pub use webhook_executor::WebhookExecutionWorker;

use thiserror::Error;

/// Errors a handler surfaces to the consumer loop. The loop logs them; it
/// never retries, since none of these get better by replaying the message.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("decoding message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("required data is missing: {0}")]
    MissingData(&'static str),

    #[error(transparent)]
    Store(#[from] crate::store::StoreError),

    #[error(transparent)]
    Publish(#[from] crate::queue::PublishError),

    #[error(transparent)]
    Email(#[from] crate::email::EmailError),

    #[error(transparent)]
    Webhook(#[from] crate::webhooks::WebhookError),
}
