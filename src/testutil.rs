//! In-memory doubles for the worker seams.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::analytics::{AnalyticsError, EventReporter};
use crate::email::{EmailError, EmailProvider, OutboundEmailMessage};
use crate::envelope::ServiceEventType;
use crate::queue::{PublishError, Publisher};
use crate::search::{IndexType, SearchError, SearchIndex};
use crate::store::{DataStore, SearchSubset, StoreError};
use crate::types::{Household, User, Webhook};

/// Records published messages instead of touching a bus.
pub(crate) struct MemoryPublisher {
    topic: String,
    published: Mutex<Vec<Value>>,
    fail: bool,
}

impl MemoryPublisher {
    pub(crate) fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            published: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub(crate) fn failing(topic: impl Into<String>) -> Self {
        Self {
            fail: true,
            ..Self::new(topic)
        }
    }

    pub(crate) fn published(&self) -> Vec<Value> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn publish(&self, body: Value) -> Result<(), PublishError> {
        if self.fail {
            return Err(PublishError::Bus {
                topic: self.topic.clone(),
                message: "synthetic failure".into(),
            });
        }
        self.published.lock().unwrap().push(body);
        Ok(())
    }
}

/// In-memory [`DataStore`] seeded by tests.
#[derive(Default)]
pub(crate) struct MemoryStore {
    pub(crate) users: HashMap<String, User>,
    pub(crate) households: HashMap<String, Household>,
    /// Webhooks keyed by household, each with its subscribed event kinds.
    pub(crate) webhooks: HashMap<String, Vec<(Webhook, Vec<ServiceEventType>)>>,
    pub(crate) subsets: HashMap<(IndexType, String), SearchSubset>,
    pub(crate) indexed: Mutex<Vec<(IndexType, String)>>,
}

impl MemoryStore {
    pub(crate) fn with_user(mut self, user: User) -> Self {
        self.users.insert(user.id.clone(), user);
        self
    }

    pub(crate) fn with_household(mut self, household: Household) -> Self {
        self.households.insert(household.id.clone(), household);
        self
    }

    pub(crate) fn with_webhook(mut self, webhook: Webhook, events: Vec<ServiceEventType>) -> Self {
        self.webhooks
            .entry(webhook.belongs_to_household.clone())
            .or_default()
            .push((webhook, events));
        self
    }

    pub(crate) fn with_subset(mut self, index: IndexType, subset: SearchSubset) -> Self {
        self.subsets
            .insert((index, subset.row_id().to_string()), subset);
        self
    }

    pub(crate) fn indexed(&self) -> Vec<(IndexType, String)> {
        self.indexed.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.get(user_id).cloned())
    }

    async fn get_household(&self, household_id: &str) -> Result<Option<Household>, StoreError> {
        Ok(self.households.get(household_id).cloned())
    }

    async fn get_webhook(
        &self,
        webhook_id: &str,
        household_id: &str,
    ) -> Result<Option<Webhook>, StoreError> {
        Ok(self
            .webhooks
            .get(household_id)
            .into_iter()
            .flatten()
            .map(|(webhook, _)| webhook)
            .find(|webhook| webhook.id == webhook_id)
            .cloned())
    }

    async fn get_webhooks_for_household_and_event(
        &self,
        household_id: &str,
        event: ServiceEventType,
    ) -> Result<Vec<Webhook>, StoreError> {
        Ok(self
            .webhooks
            .get(household_id)
            .into_iter()
            .flatten()
            .filter(|(_, events)| events.contains(&event))
            .map(|(webhook, _)| webhook.clone())
            .collect())
    }

    async fn load_search_subset(
        &self,
        index: IndexType,
        row_id: &str,
    ) -> Result<Option<SearchSubset>, StoreError> {
        Ok(self.subsets.get(&(index, row_id.to_string())).cloned())
    }

    async fn mark_as_indexed(&self, index: IndexType, row_id: &str) -> Result<(), StoreError> {
        self.indexed
            .lock()
            .unwrap()
            .push((index, row_id.to_string()));
        Ok(())
    }
}

/// Records upserts and deletes against one index.
#[derive(Default)]
pub(crate) struct RecordingIndex {
    pub(crate) upserts: Mutex<Vec<(String, SearchSubset)>>,
    pub(crate) deletes: Mutex<Vec<String>>,
}

#[async_trait]
impl SearchIndex for RecordingIndex {
    async fn upsert(&self, row_id: &str, document: &SearchSubset) -> Result<(), SearchError> {
        self.upserts
            .lock()
            .unwrap()
            .push((row_id.to_string(), document.clone()));
        Ok(())
    }

    async fn delete(&self, row_id: &str) -> Result<(), SearchError> {
        self.deletes.lock().unwrap().push(row_id.to_string());
        Ok(())
    }
}

/// Records sent emails.
#[derive(Default)]
pub(crate) struct RecordingEmailer {
    pub(crate) sent: Mutex<Vec<OutboundEmailMessage>>,
    pub(crate) fail: bool,
}

impl RecordingEmailer {
    pub(crate) fn sent(&self) -> Vec<OutboundEmailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailProvider for RecordingEmailer {
    async fn send(&self, message: &OutboundEmailMessage) -> Result<(), EmailError> {
        if self.fail {
            return Err(EmailError::Provider("synthetic failure".into()));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Records analytics calls.
#[derive(Default)]
pub(crate) struct RecordingReporter {
    pub(crate) events: Mutex<Vec<(String, Option<String>)>>,
    pub(crate) added_users: Mutex<Vec<String>>,
}

#[async_trait]
impl EventReporter for RecordingReporter {
    async fn event_occurred(
        &self,
        event: &str,
        user_id: Option<&str>,
        _context: &HashMap<String, Value>,
    ) -> Result<(), AnalyticsError> {
        self.events
            .lock()
            .unwrap()
            .push((event.to_string(), user_id.map(str::to_string)));
        Ok(())
    }

    async fn add_user(
        &self,
        user_id: &str,
        _context: &HashMap<String, Value>,
    ) -> Result<(), AnalyticsError> {
        self.added_users.lock().unwrap().push(user_id.to_string());
        Ok(())
    }
}

pub(crate) fn verified_user(id: &str) -> User {
    User {
        id: id.into(),
        username: format!("user_{id}"),
        first_name: "Pat".into(),
        last_name: "Doe".into(),
        email_address: format!("{id}@example.com"),
        email_address_verified_at: Some(chrono::Utc::now()),
    }
}

pub(crate) fn unverified_user(id: &str) -> User {
    User {
        email_address_verified_at: None,
        ..verified_user(id)
    }
}
