//! Outbound email: delivery requests, template rendering, and providers.
//!
//! The fan-out worker publishes a [`DeliveryRequest`] naming a template and
//! carrying whatever payload that template needs. The email worker resolves
//! the recipient, renders the template into an [`OutboundEmailMessage`], and
//! hands it to the configured provider.

use std::fmt;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::types::{HouseholdInvitation, MealPlan, PasswordResetToken, User};

/// Every email template the pipeline can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateType {
    VerifyEmail,
    Invite,
    UsernameReminder,
    PasswordResetTokenCreated,
    PasswordResetTokenRedeemed,
    PasswordChanged,
    MealPlanCreated,
}

impl TemplateType {
    pub const ALL: &'static [TemplateType] = &[
        TemplateType::VerifyEmail,
        TemplateType::Invite,
        TemplateType::UsernameReminder,
        TemplateType::PasswordResetTokenCreated,
        TemplateType::PasswordResetTokenRedeemed,
        TemplateType::PasswordChanged,
        TemplateType::MealPlanCreated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateType::VerifyEmail => "verify_email",
            TemplateType::Invite => "invite",
            TemplateType::UsernameReminder => "username_reminder",
            TemplateType::PasswordResetTokenCreated => "password_reset_token_created",
            TemplateType::PasswordResetTokenRedeemed => "password_reset_token_redeemed",
            TemplateType::PasswordChanged => "password_changed",
            TemplateType::MealPlanCreated => "meal_plan_created",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        TemplateType::ALL.iter().copied().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for TemplateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TemplateType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TemplateType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        TemplateType::from_wire(&s)
            .ok_or_else(|| de::Error::custom(format!("unknown email template {s:?}")))
    }
}

/// Message published to the outbound-emails topic: which template to send to
/// which user, plus the payload the template consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRequest {
    #[serde(rename = "userID")]
    pub user_id: String,

    pub template: TemplateType,

    #[serde(
        rename = "emailVerificationToken",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub email_verification_token: Option<String>,

    #[serde(rename = "passwordResetToken", default, skip_serializing_if = "Option::is_none")]
    pub password_reset_token: Option<PasswordResetToken>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invitation: Option<HouseholdInvitation>,

    #[serde(rename = "mealPlan", default, skip_serializing_if = "Option::is_none")]
    pub meal_plan: Option<MealPlan>,
}

impl DeliveryRequest {
    pub fn new(user_id: impl Into<String>, template: TemplateType) -> Self {
        Self {
            user_id: user_id.into(),
            template,
            email_verification_token: None,
            password_reset_token: None,
            invitation: None,
            meal_plan: None,
        }
    }
}

/// A fully rendered email, ready for a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEmailMessage {
    pub to_address: String,
    pub to_name: String,
    pub from_address: String,
    pub from_name: String,
    pub subject: String,
    pub html_content: String,
}

#[derive(Debug, Error)]
pub enum EmailError {
    /// The request named a template but lacked the payload it needs. This is
    /// a producer bug; retrying the same message cannot succeed.
    #[error("template {template} requires the {field} payload")]
    MissingPayload {
        template: TemplateType,
        field: &'static str,
    },

    #[error("email provider: {0}")]
    Provider(String),
}

/// Renders delivery requests into outbound messages. Holds the deployment
/// facts every template interpolates.
#[derive(Debug, Clone)]
pub struct EmailRenderer {
    pub public_url: String,
    pub from_address: String,
    pub from_name: String,
}

impl EmailRenderer {
    pub fn render(
        &self,
        req: &DeliveryRequest,
        user: &User,
    ) -> Result<OutboundEmailMessage, EmailError> {
        let (subject, html) = match req.template {
            TemplateType::VerifyEmail => {
                let token = req.email_verification_token.as_deref().ok_or(
                    EmailError::MissingPayload {
                        template: req.template,
                        field: "emailVerificationToken",
                    },
                )?;
                let link =
                    format!("{}/verify_email?emailVerificationToken={token}", self.public_url);
                (
                    "Verify your email address".to_string(),
                    format!(
                        "<p>Hi {first},</p><p>Please <a href=\"{link}\">verify your email \
                         address</a> to finish setting up your account.</p>",
                        first = user.first_name,
                    ),
                )
            }
            TemplateType::Invite => {
                let invitation =
                    req.invitation.as_ref().ok_or(EmailError::MissingPayload {
                        template: req.template,
                        field: "invitation",
                    })?;
                let link = format!(
                    "{}/accept_invitation?i={}&t={}",
                    self.public_url, invitation.id, invitation.token,
                );
                (
                    "You've been invited to a household".to_string(),
                    format!(
                        "<p>You've been invited to join a household. \
                         <a href=\"{link}\">Accept the invitation</a>.</p><p>{note}</p>",
                        note = invitation.note,
                    ),
                )
            }
            TemplateType::UsernameReminder => (
                "Your username".to_string(),
                format!(
                    "<p>Hi {first},</p><p>Your username is <b>{username}</b>.</p>",
                    first = user.first_name,
                    username = user.username,
                ),
            ),
            TemplateType::PasswordResetTokenCreated => {
                let token = req.password_reset_token.as_ref().ok_or(
                    EmailError::MissingPayload {
                        template: req.template,
                        field: "passwordResetToken",
                    },
                )?;
                let link = format!("{}/password_reset?t={}", self.public_url, token.token);
                (
                    "Reset your password".to_string(),
                    format!(
                        "<p>Hi {first},</p><p>A password reset was requested for your \
                         account. <a href=\"{link}\">Choose a new password</a>. If you \
                         didn't request this, you can ignore this email.</p>",
                        first = user.first_name,
                    ),
                )
            }
            TemplateType::PasswordResetTokenRedeemed => (
                "Your password reset link was used".to_string(),
                format!(
                    "<p>Hi {first},</p><p>Your password reset link was just used. If this \
                     wasn't you, reset your password immediately.</p>",
                    first = user.first_name,
                ),
            ),
            TemplateType::PasswordChanged => (
                "Your password was changed".to_string(),
                format!(
                    "<p>Hi {first},</p><p>Your password was just changed. If this wasn't \
                     you, contact support.</p>",
                    first = user.first_name,
                ),
            ),
            TemplateType::MealPlanCreated => {
                let plan = req.meal_plan.as_ref().ok_or(EmailError::MissingPayload {
                    template: req.template,
                    field: "mealPlan",
                })?;
                let link = format!("{}/meal_plans/{}", self.public_url, plan.id);
                (
                    "A new meal plan is ready".to_string(),
                    format!(
                        "<p>Hi {first},</p><p>A new meal plan was created for your \
                         household. <a href=\"{link}\">Cast your votes</a>.</p>",
                        first = user.first_name,
                    ),
                )
            }
        };

        Ok(OutboundEmailMessage {
            to_address: user.email_address.clone(),
            to_name: user.first_name.clone(),
            from_address: self.from_address.clone(),
            from_name: self.from_name.clone(),
            subject,
            html_content: html,
        })
    }
}

/// Sends rendered emails.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send(&self, message: &OutboundEmailMessage) -> Result<(), EmailError>;
}

const SENDGRID_SEND_URL: &str = "https://api.sendgrid.com/v3/mail/send";

/// [`EmailProvider`] over the SendGrid v3 API.
pub struct SendGridEmailer {
    client: Client,
    api_key: String,
}

impl SendGridEmailer {
    pub fn new(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl EmailProvider for SendGridEmailer {
    async fn send(&self, message: &OutboundEmailMessage) -> Result<(), EmailError> {
        let body = json!({
            "personalizations": [{
                "to": [{"email": message.to_address, "name": message.to_name}],
            }],
            "from": {"email": message.from_address, "name": message.from_name},
            "subject": message.subject,
            "content": [{"type": "text/html", "value": message.html_content}],
        });

        let response = self
            .client
            .post(SENDGRID_SEND_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmailError::Provider(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EmailError::Provider(format!(
                "sendgrid returned {status}"
            )));
        }

        debug!(to = %message.to_address, subject = %message.subject, "email accepted by provider");

        Ok(())
    }
}

/// Provider for environments with email configured off.
pub struct NoopEmailer;

#[async_trait]
impl EmailProvider for NoopEmailer {
    async fn send(&self, message: &OutboundEmailMessage) -> Result<(), EmailError> {
        debug!(to = %message.to_address, subject = %message.subject, "email discarded (no provider)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer() -> EmailRenderer {
        EmailRenderer {
            public_url: "https://app.example.com".into(),
            from_address: "noreply@example.com".into(),
            from_name: "Dinner Done Better".into(),
        }
    }

    fn user() -> User {
        User {
            id: "u1".into(),
            username: "cook".into(),
            first_name: "Pat".into(),
            last_name: "Doe".into(),
            email_address: "pat@example.com".into(),
            email_address_verified_at: None,
        }
    }

    #[test]
    fn template_wire_strings_round_trip() {
        for template in TemplateType::ALL {
            assert_eq!(TemplateType::from_wire(template.as_str()), Some(*template));
        }
    }

    #[test]
    fn delivery_request_wire_names() {
        let mut req = DeliveryRequest::new("u1", TemplateType::VerifyEmail);
        req.email_verification_token = Some("tok".into());

        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["userID"], "u1");
        assert_eq!(value["template"], "verify_email");
        assert_eq!(value["emailVerificationToken"], "tok");
        assert!(value.get("mealPlan").is_none());
    }

    #[test]
    fn verify_email_links_the_token() {
        let mut req = DeliveryRequest::new("u1", TemplateType::VerifyEmail);
        req.email_verification_token = Some("tok123".into());

        let msg = renderer().render(&req, &user()).unwrap();
        assert_eq!(msg.to_address, "pat@example.com");
        assert!(msg
            .html_content
            .contains("https://app.example.com/verify_email?emailVerificationToken=tok123"));
    }

    #[test]
    fn missing_payload_is_rejected() {
        let req = DeliveryRequest::new("u1", TemplateType::MealPlanCreated);
        let err = renderer().render(&req, &user()).unwrap_err();
        assert!(matches!(
            err,
            EmailError::MissingPayload {
                template: TemplateType::MealPlanCreated,
                field: "mealPlan",
            }
        ));
    }

    #[test]
    fn invite_links_invitation_id_and_token() {
        let mut req = DeliveryRequest::new("u1", TemplateType::Invite);
        req.invitation = Some(HouseholdInvitation {
            id: "inv1".into(),
            token: "t9".into(),
            to_email: "new@example.com".into(),
            note: "join us".into(),
            destination_household: "h1".into(),
        });

        let msg = renderer().render(&req, &user()).unwrap();
        assert!(msg
            .html_content
            .contains("https://app.example.com/accept_invitation?i=inv1&t=t9"));
        assert!(msg.html_content.contains("join us"));
    }
}
