//! Search-index maintenance: request contract and backend handles.
//!
//! The fan-out worker publishes an [`IndexRequest`] per indexable event; the
//! index worker consumes them and applies the upsert or delete against the
//! configured backend. When no search provider is configured every handle is
//! a silent no-op, so environments without search still drain the topic.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use meilisearch_sdk::client::Client;
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::store::SearchSubset;

/// The indices the platform maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexType {
    Users,
    Recipes,
    Meals,
    ValidIngredients,
    ValidInstruments,
    ValidPreparations,
    ValidMeasurementUnits,
    ValidIngredientStates,
    ValidVessels,
    ValidIngredientMeasurementUnits,
    ValidPreparationInstruments,
    ValidIngredientPreparations,
}

impl IndexType {
    pub const ALL: &'static [IndexType] = &[
        IndexType::Users,
        IndexType::Recipes,
        IndexType::Meals,
        IndexType::ValidIngredients,
        IndexType::ValidInstruments,
        IndexType::ValidPreparations,
        IndexType::ValidMeasurementUnits,
        IndexType::ValidIngredientStates,
        IndexType::ValidVessels,
        IndexType::ValidIngredientMeasurementUnits,
        IndexType::ValidPreparationInstruments,
        IndexType::ValidIngredientPreparations,
    ];

    /// Wire string, also the backend index name and the database table name.
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexType::Users => "users",
            IndexType::Recipes => "recipes",
            IndexType::Meals => "meals",
            IndexType::ValidIngredients => "valid_ingredients",
            IndexType::ValidInstruments => "valid_instruments",
            IndexType::ValidPreparations => "valid_preparations",
            IndexType::ValidMeasurementUnits => "valid_measurement_units",
            IndexType::ValidIngredientStates => "valid_ingredient_states",
            IndexType::ValidVessels => "valid_vessels",
            IndexType::ValidIngredientMeasurementUnits => "valid_ingredient_measurement_units",
            IndexType::ValidPreparationInstruments => "valid_preparation_instruments",
            IndexType::ValidIngredientPreparations => "valid_ingredient_preparations",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        IndexType::ALL.iter().copied().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for IndexType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for IndexType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        IndexType::from_wire(&s).ok_or_else(|| de::Error::custom(format!("unknown index type {s:?}")))
    }
}

/// One unit of search-index maintenance. Upsert when `delete` is false,
/// removal when true. Wire form: `{id, rowID, type, delete}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRequest {
    pub id: String,

    #[serde(rename = "rowID")]
    pub row_id: String,

    #[serde(rename = "type")]
    pub index_type: IndexType,

    #[serde(default)]
    pub delete: bool,
}

impl IndexRequest {
    pub fn new(row_id: impl Into<String>, index_type: IndexType, delete: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            row_id: row_id.into(),
            index_type,
            delete,
        }
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search backend unavailable: {0}")]
    Unavailable(String),

    #[error("search backend rejected the operation: {0}")]
    Backend(String),

    #[error("serializing search document: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A handle to one index in the search backend.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Insert or replace the document for `row_id`. Idempotent.
    async fn upsert(&self, row_id: &str, document: &SearchSubset) -> Result<(), SearchError>;

    /// Remove the document for `row_id`. Removing an absent document is not
    /// an error.
    async fn delete(&self, row_id: &str) -> Result<(), SearchError>;
}

/// Resolves index handles per type. Constructed once per worker lifetime.
pub trait IndexProvider: Send + Sync {
    fn index_for(&self, index: IndexType) -> Arc<dyn SearchIndex>;
}

/// Meilisearch-backed provider. One client, one index per [`IndexType`].
pub struct MeilisearchProvider {
    client: Client,
}

impl MeilisearchProvider {
    pub fn new(url: &str, api_key: &str) -> Result<Self, SearchError> {
        let client = Client::new(url, Some(api_key))
            .map_err(|e| SearchError::Unavailable(e.to_string()))?;
        Ok(Self { client })
    }
}

impl IndexProvider for MeilisearchProvider {
    fn index_for(&self, index: IndexType) -> Arc<dyn SearchIndex> {
        Arc::new(MeilisearchIndex {
            client: self.client.clone(),
            index,
        })
    }
}

struct MeilisearchIndex {
    client: Client,
    index: IndexType,
}

#[async_trait]
impl SearchIndex for MeilisearchIndex {
    async fn upsert(&self, row_id: &str, document: &SearchSubset) -> Result<(), SearchError> {
        let doc = serde_json::to_value(document)?;

        let task = self
            .client
            .index(self.index.as_str())
            .add_or_update(&[doc], Some("id"))
            .await
            .map_err(|e| SearchError::Backend(e.to_string()))?;

        debug!(
            index = %self.index,
            row_id = %row_id,
            task = task.task_uid,
            "search document upserted"
        );

        Ok(())
    }

    async fn delete(&self, row_id: &str) -> Result<(), SearchError> {
        let task = self
            .client
            .index(self.index.as_str())
            .delete_document(row_id)
            .await
            .map_err(|e| SearchError::Backend(e.to_string()))?;

        debug!(
            index = %self.index,
            row_id = %row_id,
            task = task.task_uid,
            "search document deleted"
        );

        Ok(())
    }
}

/// Provider used when search is configured off. Every call succeeds without
/// touching anything.
pub struct NoopProvider;

impl IndexProvider for NoopProvider {
    fn index_for(&self, _index: IndexType) -> Arc<dyn SearchIndex> {
        Arc::new(NoopIndex)
    }
}

struct NoopIndex;

#[async_trait]
impl SearchIndex for NoopIndex {
    async fn upsert(&self, _row_id: &str, _document: &SearchSubset) -> Result<(), SearchError> {
        Ok(())
    }

    async fn delete(&self, _row_id: &str) -> Result<(), SearchError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn index_type_wire_strings_round_trip() {
        for index in IndexType::ALL {
            assert_eq!(IndexType::from_wire(index.as_str()), Some(*index));
        }
    }

    #[test]
    fn index_request_wire_form() {
        let req = IndexRequest {
            id: "req1".into(),
            row_id: "r1".into(),
            index_type: IndexType::Recipes,
            delete: true,
        };

        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({"id": "req1", "rowID": "r1", "type": "recipes", "delete": true})
        );
    }

    #[test]
    fn index_request_decodes_with_defaulted_delete() {
        let req: IndexRequest =
            serde_json::from_value(json!({"id": "x", "rowID": "u1", "type": "users"})).unwrap();
        assert!(!req.delete);
        assert_eq!(req.index_type, IndexType::Users);
    }
}
