//! Product analytics reporting.
//!
//! Fan-out reports every event it sees, and registers newly signed-up users
//! as identified persons. Analytics is strictly best effort: failures are
//! logged by the caller and never affect message handling.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("analytics backend: {0}")]
    Backend(String),
}

/// Reports events and user registrations to the analytics backend.
#[async_trait]
pub trait EventReporter: Send + Sync {
    /// Record that an event occurred, attributed to `user_id` when known.
    async fn event_occurred(
        &self,
        event: &str,
        user_id: Option<&str>,
        context: &HashMap<String, Value>,
    ) -> Result<(), AnalyticsError>;

    /// Register a user as an identified person.
    async fn add_user(
        &self,
        user_id: &str,
        context: &HashMap<String, Value>,
    ) -> Result<(), AnalyticsError>;
}

/// [`EventReporter`] over the PostHog capture API.
pub struct PostHogReporter {
    client: Client,
    host: String,
    api_key: String,
}

impl PostHogReporter {
    pub fn new(client: Client, host: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            host: host.into(),
            api_key: api_key.into(),
        }
    }

    async fn capture(
        &self,
        event: &str,
        distinct_id: &str,
        properties: Value,
    ) -> Result<(), AnalyticsError> {
        let body = json!({
            "api_key": self.api_key,
            "event": event,
            "distinct_id": distinct_id,
            "properties": properties,
        });

        let response = self
            .client
            .post(format!("{}/capture/", self.host))
            .json(&body)
            .send()
            .await
            .map_err(|e| AnalyticsError::Backend(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AnalyticsError::Backend(format!(
                "capture returned {status}"
            )));
        }

        debug!(event = %event, distinct_id = %distinct_id, "analytics event captured");

        Ok(())
    }
}

#[async_trait]
impl EventReporter for PostHogReporter {
    async fn event_occurred(
        &self,
        event: &str,
        user_id: Option<&str>,
        context: &HashMap<String, Value>,
    ) -> Result<(), AnalyticsError> {
        let distinct_id = user_id.unwrap_or("anonymous");
        self.capture(event, distinct_id, json!(context)).await
    }

    async fn add_user(
        &self,
        user_id: &str,
        context: &HashMap<String, Value>,
    ) -> Result<(), AnalyticsError> {
        self.capture("$identify", user_id, json!({ "$set": context }))
            .await
    }
}

/// Reporter for environments with analytics configured off.
pub struct NoopReporter;

#[async_trait]
impl EventReporter for NoopReporter {
    async fn event_occurred(
        &self,
        _event: &str,
        _user_id: Option<&str>,
        _context: &HashMap<String, Value>,
    ) -> Result<(), AnalyticsError> {
        Ok(())
    }

    async fn add_user(
        &self,
        _user_id: &str,
        _context: &HashMap<String, Value>,
    ) -> Result<(), AnalyticsError> {
        Ok(())
    }
}
