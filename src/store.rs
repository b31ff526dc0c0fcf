//! Read access to the service database.
//!
//! The workers never own writes to domain tables; the single exception is
//! stamping `last_indexed_at` after a successful index upsert. Everything
//! else is lookups: users for email delivery, households and webhooks for
//! webhook execution, and row projections for search documents.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;

use crate::envelope::ServiceEventType;
use crate::search::IndexType;
use crate::types::{Household, HouseholdMember, User, Webhook};

/// How long to wait for a database connection before giving up.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connecting to database: {0}")]
    Connection(String),

    #[error("database query failed: {0}")]
    Database(#[from] sqlx::Error),
}

/// The slice of a row that gets indexed for search. Serializes flat, with
/// the shape the index expects for the row's table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SearchSubset {
    User {
        id: String,
        username: String,
        #[serde(rename = "firstName")]
        first_name: String,
        #[serde(rename = "lastName")]
        last_name: String,
        #[serde(rename = "emailAddress")]
        email_address: String,
    },
    /// Recipes, meals, and the single-entity valid_* vocabularies.
    Named {
        id: String,
        name: String,
        description: String,
    },
    /// The valid_* join tables, which carry notes instead of a name.
    Annotated { id: String, notes: String },
}

impl SearchSubset {
    pub fn row_id(&self) -> &str {
        match self {
            SearchSubset::User { id, .. }
            | SearchSubset::Named { id, .. }
            | SearchSubset::Annotated { id, .. } => id,
        }
    }
}

/// Lookups the workers need. One implementation talks to Postgres; tests
/// substitute an in-memory double.
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>, StoreError>;

    async fn get_household(&self, household_id: &str) -> Result<Option<Household>, StoreError>;

    /// Fetch a webhook scoped to its owning household. A webhook belonging
    /// to a different household is treated as absent.
    async fn get_webhook(
        &self,
        webhook_id: &str,
        household_id: &str,
    ) -> Result<Option<Webhook>, StoreError>;

    /// All live webhooks in the household subscribed to the given event.
    async fn get_webhooks_for_household_and_event(
        &self,
        household_id: &str,
        event: ServiceEventType,
    ) -> Result<Vec<Webhook>, StoreError>;

    /// Project the row into its search document, or None if the row is gone.
    async fn load_search_subset(
        &self,
        index: IndexType,
        row_id: &str,
    ) -> Result<Option<SearchSubset>, StoreError>;

    /// Record that the row's search document is current.
    async fn mark_as_indexed(&self, index: IndexType, row_id: &str) -> Result<(), StoreError>;
}

/// [`DataStore`] over the service's Postgres database.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .acquire_timeout(CONNECT_TIMEOUT)
            .connect(url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    username: String,
    first_name: String,
    last_name: String,
    email_address: String,
    email_address_verified_at: Option<DateTime<Utc>>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            username: row.username,
            first_name: row.first_name,
            last_name: row.last_name,
            email_address: row.email_address,
            email_address_verified_at: row.email_address_verified_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct HouseholdRow {
    id: String,
    name: String,
    webhook_hmac_secret: String,
}

#[derive(sqlx::FromRow)]
struct WebhookRow {
    id: String,
    name: String,
    content_type: String,
    url: String,
    method: String,
    belongs_to_household: String,
}

impl From<WebhookRow> for Webhook {
    fn from(row: WebhookRow) -> Self {
        Webhook {
            id: row.id,
            name: row.name,
            content_type: row.content_type,
            url: row.url,
            method: row.method,
            belongs_to_household: row.belongs_to_household,
        }
    }
}

#[derive(sqlx::FromRow)]
struct NamedRow {
    id: String,
    name: String,
    description: String,
}

#[derive(sqlx::FromRow)]
struct AnnotatedRow {
    id: String,
    notes: String,
}

#[async_trait]
impl DataStore for PostgresStore {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, first_name, last_name, email_address, email_address_verified_at
             FROM users
             WHERE id = $1 AND archived_at IS NULL",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(User::from))
    }

    async fn get_household(&self, household_id: &str) -> Result<Option<Household>, StoreError> {
        let Some(household) = sqlx::query_as::<_, HouseholdRow>(
            "SELECT id, name, webhook_hmac_secret
             FROM households
             WHERE id = $1 AND archived_at IS NULL",
        )
        .bind(household_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let members = sqlx::query_as::<_, UserRow>(
            "SELECT u.id, u.username, u.first_name, u.last_name, u.email_address, u.email_address_verified_at
             FROM users u
             JOIN household_user_memberships m ON m.belongs_to_user = u.id
             WHERE m.belongs_to_household = $1
               AND m.archived_at IS NULL
               AND u.archived_at IS NULL",
        )
        .bind(household_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(Household {
            id: household.id,
            name: household.name,
            webhook_encryption_key: household.webhook_hmac_secret,
            members: members
                .into_iter()
                .map(|row| HouseholdMember {
                    belongs_to_user: User::from(row),
                })
                .collect(),
        }))
    }

    async fn get_webhook(
        &self,
        webhook_id: &str,
        household_id: &str,
    ) -> Result<Option<Webhook>, StoreError> {
        let row = sqlx::query_as::<_, WebhookRow>(
            "SELECT id, name, content_type, url, method, belongs_to_household
             FROM webhooks
             WHERE id = $1 AND belongs_to_household = $2 AND archived_at IS NULL",
        )
        .bind(webhook_id)
        .bind(household_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Webhook::from))
    }

    async fn get_webhooks_for_household_and_event(
        &self,
        household_id: &str,
        event: ServiceEventType,
    ) -> Result<Vec<Webhook>, StoreError> {
        let rows = sqlx::query_as::<_, WebhookRow>(
            "SELECT w.id, w.name, w.content_type, w.url, w.method, w.belongs_to_household
             FROM webhooks w
             JOIN webhook_trigger_events t ON t.belongs_to_webhook = w.id
             WHERE w.belongs_to_household = $1
               AND t.trigger_event = $2
               AND w.archived_at IS NULL
               AND t.archived_at IS NULL",
        )
        .bind(household_id)
        .bind(event.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Webhook::from).collect())
    }

    async fn load_search_subset(
        &self,
        index: IndexType,
        row_id: &str,
    ) -> Result<Option<SearchSubset>, StoreError> {
        let subset = match index {
            IndexType::Users => sqlx::query_as::<_, UserRow>(
                "SELECT id, username, first_name, last_name, email_address, email_address_verified_at
                 FROM users
                 WHERE id = $1 AND archived_at IS NULL",
            )
            .bind(row_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| SearchSubset::User {
                id: row.id,
                username: row.username,
                first_name: row.first_name,
                last_name: row.last_name,
                email_address: row.email_address,
            }),

            IndexType::ValidIngredientMeasurementUnits
            | IndexType::ValidPreparationInstruments
            | IndexType::ValidIngredientPreparations => {
                let sql = format!(
                    "SELECT id, COALESCE(notes, '') AS notes
                     FROM {table}
                     WHERE id = $1 AND archived_at IS NULL",
                    table = index.as_str()
                );

                sqlx::query_as::<_, AnnotatedRow>(&sql)
                    .bind(row_id)
                    .fetch_optional(&self.pool)
                    .await?
                    .map(|row| SearchSubset::Annotated {
                        id: row.id,
                        notes: row.notes,
                    })
            }

            _ => {
                let sql = format!(
                    "SELECT id, name, COALESCE(description, '') AS description
                     FROM {table}
                     WHERE id = $1 AND archived_at IS NULL",
                    table = index.as_str()
                );

                sqlx::query_as::<_, NamedRow>(&sql)
                    .bind(row_id)
                    .fetch_optional(&self.pool)
                    .await?
                    .map(|row| SearchSubset::Named {
                        id: row.id,
                        name: row.name,
                        description: row.description,
                    })
            }
        };

        Ok(subset)
    }

    async fn mark_as_indexed(&self, index: IndexType, row_id: &str) -> Result<(), StoreError> {
        let sql = format!(
            "UPDATE {table} SET last_indexed_at = NOW() WHERE id = $1",
            table = index.as_str()
        );

        sqlx::query(&sql).bind(row_id).execute(&self.pool).await?;

        Ok(())
    }
}
