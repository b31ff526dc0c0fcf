//! Topic publisher abstraction over Redis Streams.
//!
//! Every topic carries exactly one JSON message schema. Messages are XADDed
//! with a single `data` field holding the JSON body; consumers read with a
//! consumer group and ack after handling, which gives at-least-once delivery.

use async_trait::async_trait;
use deadpool_redis::redis::cmd;
use deadpool_redis::Pool;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Streams are trimmed to roughly this many entries to bound memory on the
/// bus; consumers that fall further behind than this lose messages.
const STREAM_MAX_LEN: usize = 100_000;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("serializing message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("acquiring bus connection: {0}")]
    Connection(String),

    #[error("publishing to {topic}: {message}")]
    Bus { topic: String, message: String },
}

/// Publishes typed messages to a single named topic.
///
/// Implementations are constructed once per worker lifetime and shared
/// across handler invocations.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// The topic this publisher writes to.
    fn topic(&self) -> &str;

    /// Publish one JSON-encoded message. At-least-once: a success means the
    /// bus accepted the message, not that any consumer has seen it.
    async fn publish(&self, body: Value) -> Result<(), PublishError>;
}

/// [`Publisher`] backed by a Redis stream.
#[derive(Clone)]
pub struct RedisStreamPublisher {
    pool: Pool,
    topic: String,
}

impl RedisStreamPublisher {
    pub fn new(pool: Pool, topic: impl Into<String>) -> Self {
        Self {
            pool,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl Publisher for RedisStreamPublisher {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn publish(&self, body: Value) -> Result<(), PublishError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| PublishError::Connection(e.to_string()))?;

        let payload = serde_json::to_string(&body)?;

        let id: String = cmd("XADD")
            .arg(&self.topic)
            .arg("MAXLEN")
            .arg("~")
            .arg(STREAM_MAX_LEN)
            .arg("*")
            .arg("data")
            .arg(&payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| PublishError::Bus {
                topic: self.topic.clone(),
                message: e.to_string(),
            })?;

        debug!(topic = %self.topic, id = %id, "message published");

        Ok(())
    }
}
