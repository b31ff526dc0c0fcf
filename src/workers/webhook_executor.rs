//! The webhook executor: delivers signed payloads to registered endpoints.

use std::sync::Arc;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method};
use tracing::{error, info, warn};

use crate::store::DataStore;
use crate::webhooks::{marshal_payload, sign_payload, WebhookExecutionRequest, SIGNATURE_HEADER};

use super::WorkerError;

pub struct WebhookExecutionWorker {
    store: Arc<dyn DataStore>,
    client: Client,
    cease_operation: bool,
}

impl WebhookExecutionWorker {
    pub fn new(store: Arc<dyn DataStore>, client: Client, cease_operation: bool) -> Self {
        Self {
            store,
            client,
            cease_operation,
        }
    }

    /// Handle one delivery from the webhook-execution topic.
    ///
    /// Receiver misbehavior never fails the handler: a dead endpoint or a
    /// non-2xx response is the receiver's problem, logged and dropped.
    pub async fn handle(&self, raw: &[u8]) -> Result<(), WorkerError> {
        if self.cease_operation {
            warn!("operations ceased, dropping message");
            return Ok(());
        }

        let request: WebhookExecutionRequest = serde_json::from_slice(raw)?;

        let Some(household) = self.store.get_household(&request.household_id).await? else {
            warn!(household_id = %request.household_id, "household no longer exists, dropping execution");
            return Ok(());
        };

        let Some(webhook) = self
            .store
            .get_webhook(&request.webhook_id, &request.household_id)
            .await?
        else {
            warn!(
                webhook_id = %request.webhook_id,
                household_id = %request.household_id,
                "webhook no longer registered, dropping execution"
            );
            return Ok(());
        };

        let body = marshal_payload(&webhook.content_type, &request.payload)?;
        let signature = sign_payload(&household.webhook_encryption_key, &body)?;

        let method = match Method::from_bytes(webhook.method.as_bytes()) {
            Ok(method) => method,
            Err(_) => {
                warn!(webhook_id = %webhook.id, method = %webhook.method, "webhook has an invalid method, dropping execution");
                return Ok(());
            }
        };

        let response = match self
            .client
            .request(method, &webhook.url)
            .header(CONTENT_TYPE, &webhook.content_type)
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, webhook_id = %webhook.id, url = %webhook.url, "delivering webhook");
                return Ok(());
            }
        };

        let status = response.status();
        if status.is_success() {
            info!(webhook_id = %webhook.id, status = %status, "webhook delivered");
        } else {
            warn!(webhook_id = %webhook.id, status = %status, "webhook delivery rejected by receiver");
        }

        Ok(())
    }
}
