//! The fan-out worker: one data-change envelope in, downstream work out.
//!
//! Per envelope it reports the event to analytics, then runs three
//! dispatches concurrently: webhook execution requests, outbound email
//! requests, and search index requests. Dispatches are independent; a
//! failure in one is logged and never blocks the others. The envelope is
//! consumed exactly once per delivery regardless of outcome.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::analytics::EventReporter;
use crate::email::DeliveryRequest;
use crate::envelope::{DataChangeMessage, ServiceEventType};
use crate::queue::Publisher;
use crate::routing::route;
use crate::search::IndexRequest;
use crate::store::DataStore;
use crate::webhooks::WebhookExecutionRequest;

use super::WorkerError;

pub struct FanOutWorker {
    store: Arc<dyn DataStore>,
    reporter: Arc<dyn EventReporter>,
    outbound_emails: Arc<dyn Publisher>,
    search_requests: Arc<dyn Publisher>,
    webhook_requests: Arc<dyn Publisher>,
    cease_operation: bool,
}

impl FanOutWorker {
    pub fn new(
        store: Arc<dyn DataStore>,
        reporter: Arc<dyn EventReporter>,
        outbound_emails: Arc<dyn Publisher>,
        search_requests: Arc<dyn Publisher>,
        webhook_requests: Arc<dyn Publisher>,
        cease_operation: bool,
    ) -> Self {
        Self {
            store,
            reporter,
            outbound_emails,
            search_requests,
            webhook_requests,
            cease_operation,
        }
    }

    /// Handle one delivery from the data-changes topic.
    pub async fn handle(self: Arc<Self>, raw: &[u8]) -> Result<(), WorkerError> {
        if self.cease_operation {
            warn!("operations ceased, dropping message");
            return Ok(());
        }

        let msg: DataChangeMessage = serde_json::from_slice(raw)?;
        let msg = Arc::new(msg);

        info!(event_type = %msg.event_type, message_id = %msg.id, "handling data change");

        if let Some(user_id) = msg.user_id.as_deref() {
            if let Err(e) = self
                .reporter
                .event_occurred(msg.event_type.as_str(), Some(user_id), &msg.context)
                .await
            {
                warn!(error = %e, "reporting event to analytics");
            }
        }

        let mut dispatches = JoinSet::new();

        {
            let worker = Arc::clone(&self);
            let msg = Arc::clone(&msg);
            dispatches.spawn(async move {
                if let Err(e) = worker.dispatch_webhooks(&msg).await {
                    error!(error = %e, event_type = %msg.event_type, "dispatching webhooks");
                }
            });
        }

        {
            let worker = Arc::clone(&self);
            let msg = Arc::clone(&msg);
            dispatches.spawn(async move {
                if let Err(e) = worker.dispatch_emails(&msg).await {
                    error!(error = %e, event_type = %msg.event_type, "dispatching emails");
                }
            });
        }

        {
            let worker = Arc::clone(&self);
            let msg = Arc::clone(&msg);
            dispatches.spawn(async move {
                if let Err(e) = worker.dispatch_search(&msg).await {
                    error!(error = %e, event_type = %msg.event_type, "dispatching search updates");
                }
            });
        }

        while dispatches.join_next().await.is_some() {}

        Ok(())
    }

    /// Publish one execution request per webhook subscribed to this event in
    /// the envelope's household.
    async fn dispatch_webhooks(&self, msg: &DataChangeMessage) -> Result<(), WorkerError> {
        let Some(household_id) = msg.household_id.as_deref() else {
            return Ok(());
        };

        if !route(msg.event_type).eligible_for_webhooks {
            return Ok(());
        }

        let webhooks = self
            .store
            .get_webhooks_for_household_and_event(household_id, msg.event_type)
            .await?;

        for webhook in webhooks {
            let request = WebhookExecutionRequest {
                webhook_id: webhook.id.clone(),
                household_id: household_id.to_string(),
                payload: msg.clone(),
            };

            match serde_json::to_value(&request) {
                Ok(body) => {
                    if let Err(e) = self.webhook_requests.publish(body).await {
                        // one bad publish must not starve the other webhooks
                        error!(error = %e, webhook_id = %webhook.id, "publishing webhook execution request");
                    }
                }
                Err(e) => {
                    error!(error = %e, webhook_id = %webhook.id, "encoding webhook execution request");
                }
            }
        }

        Ok(())
    }

    /// Publish the email delivery requests this event calls for.
    async fn dispatch_emails(&self, msg: &DataChangeMessage) -> Result<(), WorkerError> {
        let mut requests: Vec<DeliveryRequest> = Vec::new();

        match msg.event_type {
            ServiceEventType::UserSignedUp => {
                let user_id = msg
                    .user_id
                    .as_deref()
                    .ok_or(WorkerError::MissingData("userID"))?;

                if let Err(e) = self.reporter.add_user(user_id, &msg.context).await {
                    warn!(error = %e, "registering user with analytics");
                }

                let mut request = DeliveryRequest::new(user_id, crate::email::TemplateType::VerifyEmail);
                request.email_verification_token = msg.email_verification_token.clone();
                requests.push(request);
            }
            ServiceEventType::UserEmailAddressVerificationEmailRequested => {
                let user_id = msg
                    .user_id
                    .as_deref()
                    .ok_or(WorkerError::MissingData("userID"))?;

                let mut request = DeliveryRequest::new(user_id, crate::email::TemplateType::VerifyEmail);
                request.email_verification_token = msg.email_verification_token.clone();
                requests.push(request);
            }
            ServiceEventType::MealPlanCreated => {
                let meal_plan = msg
                    .meal_plan
                    .as_ref()
                    .ok_or(WorkerError::MissingData("mealPlan"))?;

                let household = self
                    .store
                    .get_household(&meal_plan.belongs_to_household)
                    .await?
                    .ok_or(WorkerError::MissingData("household"))?;

                for member in &household.members {
                    let user = &member.belongs_to_user;
                    if !user.email_verified() {
                        continue;
                    }

                    let mut request =
                        DeliveryRequest::new(&user.id, crate::email::TemplateType::MealPlanCreated);
                    request.meal_plan = Some(meal_plan.clone());
                    requests.push(request);
                }
            }
            ServiceEventType::PasswordResetTokenCreated => {
                let user_id = msg
                    .user_id
                    .as_deref()
                    .ok_or(WorkerError::MissingData("userID"))?;
                let token = msg
                    .password_reset_token
                    .as_ref()
                    .ok_or(WorkerError::MissingData("passwordResetToken"))?;

                let mut request = DeliveryRequest::new(
                    user_id,
                    crate::email::TemplateType::PasswordResetTokenCreated,
                );
                request.password_reset_token = Some(token.clone());
                requests.push(request);
            }
            ServiceEventType::UsernameReminderRequested => {
                let user_id = msg
                    .user_id
                    .as_deref()
                    .ok_or(WorkerError::MissingData("userID"))?;
                requests.push(DeliveryRequest::new(
                    user_id,
                    crate::email::TemplateType::UsernameReminder,
                ));
            }
            ServiceEventType::PasswordResetTokenRedeemed => {
                let user_id = msg
                    .user_id
                    .as_deref()
                    .ok_or(WorkerError::MissingData("userID"))?;
                requests.push(DeliveryRequest::new(
                    user_id,
                    crate::email::TemplateType::PasswordResetTokenRedeemed,
                ));
            }
            ServiceEventType::PasswordChanged => {
                let user_id = msg
                    .user_id
                    .as_deref()
                    .ok_or(WorkerError::MissingData("userID"))?;
                requests.push(DeliveryRequest::new(
                    user_id,
                    crate::email::TemplateType::PasswordChanged,
                ));
            }
            ServiceEventType::HouseholdInvitationCreated => {
                let user_id = msg
                    .user_id
                    .as_deref()
                    .ok_or(WorkerError::MissingData("userID"))?;
                let invitation = msg
                    .household_invitation
                    .as_ref()
                    .ok_or(WorkerError::MissingData("householdInvitation"))?;

                let mut request =
                    DeliveryRequest::new(user_id, crate::email::TemplateType::Invite);
                request.invitation = Some(invitation.clone());
                requests.push(request);
            }
            _ => {}
        }

        if !requests.is_empty() {
            info!(
                event_type = %msg.event_type,
                outbound_emails_to_send = requests.len(),
                "publishing email requests"
            );
        }

        for request in &requests {
            match serde_json::to_value(request) {
                Ok(body) => {
                    if let Err(e) = self.outbound_emails.publish(body).await {
                        error!(error = %e, template = %request.template, "publishing email request");
                    }
                }
                Err(e) => {
                    error!(error = %e, template = %request.template, "encoding email request");
                }
            }
        }

        Ok(())
    }

    /// Publish the index request this event calls for, if any.
    async fn dispatch_search(&self, msg: &DataChangeMessage) -> Result<(), WorkerError> {
        let Some(search) = route(msg.event_type).search else {
            debug!(event_type = %msg.event_type, "event type not handled for search indexing");
            return Ok(());
        };

        let Some(row_id) = search.family.row_id(msg) else {
            warn!(event_type = %msg.event_type, "envelope lacks the payload its index route needs");
            return Ok(());
        };

        let request = IndexRequest::new(row_id, search.index, search.delete);
        let body = serde_json::to_value(&request)?;
        self.search_requests.publish(body).await?;

        Ok(())
    }
}
