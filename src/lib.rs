//! # Dinner Done Better workers
//!
//! Asynchronous workers for the Dinner Done Better backend. The API produces
//! a [`DataChangeMessage`] for every domain change; the fan-out worker
//! consumes that topic and dispatches each event to three downstream
//! concerns, each with its own worker:
//!
//! ```text
//! API -> data_changes -> FanOutWorker -> outbound_emails            -> EmailWorker
//!                                     -> search_index_requests      -> SearchIndexWorker
//!                                     -> webhook_execution_requests -> WebhookExecutionWorker
//! ```
//!
//! Delivery is at-least-once everywhere; consumers must tolerate redelivery.
//! Failures downstream of a successful decode are logged and acknowledged
//! rather than retried, because retrying a partially-completed fan-out
//! duplicates the side effects that already succeeded.
//!
//! ## Modules
//!
//! - [`envelope`]: the event envelope and the closed event-kind enumeration
//! - [`routing`]: event kind -> {email, search index, webhook} decisions
//! - [`queue`]: topic publisher abstraction over Redis Streams
//! - [`store`]: the workers' narrow database surface
//! - [`workers`]: the four message handlers

pub mod analytics;
pub mod config;
pub mod email;
pub mod envelope;
pub mod queue;
pub mod routing;
pub mod search;
pub mod shutdown;
pub mod store;
pub mod types;
pub mod webhooks;
pub mod workers;

#[cfg(test)]
pub(crate) mod testutil;

pub use envelope::{DataChangeMessage, ServiceEventType};
pub use routing::{route, RouteDecision};
