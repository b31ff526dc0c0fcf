//! The email worker: renders delivery requests and hands them to the
//! configured provider.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::analytics::EventReporter;
use crate::email::{DeliveryRequest, EmailProvider, EmailRenderer, TemplateType};
use crate::store::DataStore;

use super::WorkerError;

pub struct EmailWorker {
    store: Arc<dyn DataStore>,
    provider: Arc<dyn EmailProvider>,
    renderer: EmailRenderer,
    reporter: Arc<dyn EventReporter>,
    cease_operation: bool,
}

impl EmailWorker {
    pub fn new(
        store: Arc<dyn DataStore>,
        provider: Arc<dyn EmailProvider>,
        renderer: EmailRenderer,
        reporter: Arc<dyn EventReporter>,
        cease_operation: bool,
    ) -> Self {
        Self {
            store,
            provider,
            renderer,
            reporter,
            cease_operation,
        }
    }

    /// Handle one delivery from the outbound-emails topic.
    pub async fn handle(&self, raw: &[u8]) -> Result<(), WorkerError> {
        if self.cease_operation {
            warn!("operations ceased, dropping message");
            return Ok(());
        }

        let request: DeliveryRequest = serde_json::from_slice(raw)?;

        let Some(user) = self.store.get_user(&request.user_id).await? else {
            warn!(user_id = %request.user_id, "recipient no longer exists, dropping email");
            return Ok(());
        };

        // Unverified addresses only ever receive the verification email.
        if !user.email_verified() && request.template != TemplateType::VerifyEmail {
            info!(
                user_id = %user.id,
                template = %request.template,
                "recipient address unverified, dropping email"
            );
            return Ok(());
        }

        let message = self.renderer.render(&request, &user)?;

        if let Err(e) = self.provider.send(&message).await {
            error!(error = %e, to = %message.to_address, template = %request.template, "sending email");
            return Ok(());
        }

        info!(user_id = %user.id, template = %request.template, "email sent");

        let mut context = HashMap::new();
        context.insert(
            "template".to_string(),
            serde_json::Value::String(request.template.as_str().to_string()),
        );
        if let Err(e) = self
            .reporter
            .event_occurred("email_sent", Some(&user.id), &context)
            .await
        {
            warn!(error = %e, "reporting email send to analytics");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::EmailError;
    use crate::testutil::{unverified_user, verified_user, MemoryStore, RecordingEmailer, RecordingReporter};

    fn renderer() -> EmailRenderer {
        EmailRenderer {
            public_url: "https://app.example.com".into(),
            from_address: "noreply@example.com".into(),
            from_name: "Dinner Done Better".into(),
        }
    }

    fn worker(store: MemoryStore, provider: Arc<RecordingEmailer>) -> EmailWorker {
        EmailWorker::new(
            Arc::new(store),
            provider,
            renderer(),
            Arc::new(RecordingReporter::default()),
            false,
        )
    }

    #[tokio::test]
    async fn renders_and_sends_to_verified_user() {
        let store = MemoryStore::default().with_user(verified_user("u1"));
        let provider = Arc::new(RecordingEmailer::default());
        let worker = worker(store, provider.clone());

        let request = DeliveryRequest::new("u1", TemplateType::UsernameReminder);
        let raw = serde_json::to_vec(&request).unwrap();
        worker.handle(&raw).await.unwrap();

        let sent = provider.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to_address, "u1@example.com");
        assert!(sent[0].html_content.contains("user_u1"));
    }

    #[tokio::test]
    async fn unverified_recipient_only_gets_verification_emails() {
        let store = MemoryStore::default().with_user(unverified_user("u1"));
        let provider = Arc::new(RecordingEmailer::default());
        let worker = worker(store, provider.clone());

        let request = DeliveryRequest::new("u1", TemplateType::UsernameReminder);
        let raw = serde_json::to_vec(&request).unwrap();
        worker.handle(&raw).await.unwrap();
        assert!(provider.sent().is_empty());

        let mut request = DeliveryRequest::new("u1", TemplateType::VerifyEmail);
        request.email_verification_token = Some("tok".into());
        let raw = serde_json::to_vec(&request).unwrap();
        worker.handle(&raw).await.unwrap();
        assert_eq!(provider.sent().len(), 1);
    }

    #[tokio::test]
    async fn unknown_recipient_is_dropped() {
        let provider = Arc::new(RecordingEmailer::default());
        let worker = worker(MemoryStore::default(), provider.clone());

        let request = DeliveryRequest::new("ghost", TemplateType::PasswordChanged);
        let raw = serde_json::to_vec(&request).unwrap();
        worker.handle(&raw).await.unwrap();

        assert!(provider.sent().is_empty());
    }

    #[tokio::test]
    async fn missing_template_payload_surfaces_as_error() {
        let store = MemoryStore::default().with_user(verified_user("u1"));
        let provider = Arc::new(RecordingEmailer::default());
        let worker = worker(store, provider.clone());

        let request = DeliveryRequest::new("u1", TemplateType::MealPlanCreated);
        let raw = serde_json::to_vec(&request).unwrap();

        let err = worker.handle(&raw).await.unwrap_err();
        assert!(matches!(
            err,
            WorkerError::Email(EmailError::MissingPayload { .. })
        ));
        assert!(provider.sent().is_empty());
    }

    #[tokio::test]
    async fn provider_failure_is_logged_not_fatal() {
        let store = MemoryStore::default().with_user(verified_user("u1"));
        let provider = Arc::new(RecordingEmailer {
            fail: true,
            ..Default::default()
        });
        let worker = worker(store, provider);

        let request = DeliveryRequest::new("u1", TemplateType::PasswordChanged);
        let raw = serde_json::to_vec(&request).unwrap();
        worker.handle(&raw).await.unwrap();
    }

    #[tokio::test]
    async fn successful_send_is_reported_to_analytics() {
        let store = MemoryStore::default().with_user(verified_user("u1"));
        let provider = Arc::new(RecordingEmailer::default());
        let reporter = Arc::new(RecordingReporter::default());
        let worker = EmailWorker::new(
            Arc::new(store),
            provider,
            renderer(),
            reporter.clone(),
            false,
        );

        let request = DeliveryRequest::new("u1", TemplateType::PasswordChanged);
        let raw = serde_json::to_vec(&request).unwrap();
        worker.handle(&raw).await.unwrap();

        assert_eq!(
            reporter.events.lock().unwrap().as_slice(),
            &[("email_sent".to_string(), Some("u1".to_string()))]
        );
    }
}
